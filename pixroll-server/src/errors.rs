use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    /// Wrap an unexpected fault. The detail is always logged; it only
    /// reaches the response body in dev mode.
    pub fn unexpected(dev_mode: bool, context: &str, err: impl fmt::Display) -> Self {
        error!("{context}: {err}");
        if dev_mode {
            Self::internal(format!("{context}: {err}"))
        } else {
            Self::internal("internal server error")
        }
    }

    /// Map a core error at the request boundary. Cache-layer faults never
    /// reach here; they are absorbed inside the façade.
    pub fn from_image_error(dev_mode: bool, err: pixroll_core::ImageError) -> Self {
        use pixroll_core::ImageError;
        match err {
            ImageError::NotFound(what) => Self::not_found(format!("image not found: {what}")),
            ImageError::ManifestWrite(msg) => {
                error!("manifest write failed: {msg}");
                Self::internal(format!("manifest update failed: {msg}"))
            }
            other => Self::unexpected(dev_mode, "request failed", other),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
