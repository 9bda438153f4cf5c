use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("External cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Manifest write failed: {0}")]
    ManifestWrite(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ImageError>;
