use std::path::{Path as FsPath, PathBuf};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use pixroll_core::{ImageRecord, cache_key};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    json: Option<String>,
}

impl ImageQuery {
    fn wants_json(&self) -> bool {
        self.json.as_deref() == Some("1")
    }
}

/// `GET /`: a random image drawn across the whole corpus.
pub async fn random_image_handler(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> AppResult<Response> {
    let picked = state
        .library
        .pick_random(None)
        .await
        .map_err(|err| AppError::from_image_error(state.config.dev_mode, err))?;

    let Some((record, path)) = picked else {
        return Err(AppError::not_found("no images available"));
    };
    respond(&state, record, path, query.wants_json(), true).await
}

/// `GET /{directory}`: a random image from one directory key.
pub async fn directory_image_handler(
    State(state): State<AppState>,
    Path(directory): Path<String>,
    Query(query): Query<ImageQuery>,
) -> AppResult<Response> {
    if !valid_segments(&directory) {
        return Err(AppError::not_found(format!("no such directory: {directory}")));
    }

    let picked = state
        .library
        .pick_random(Some(&directory))
        .await
        .map_err(|err| AppError::from_image_error(state.config.dev_mode, err))?;

    let Some((record, path)) = picked else {
        return Err(AppError::not_found(format!("no images in {directory}")));
    };
    respond(&state, record, path, query.wants_json(), true).await
}

/// `GET /{directory}/{*filename}`: an exact file. The wildcard tail keeps
/// nested entries (`pets/cats/d.gif`) addressable; when the path names a
/// nested directory rather than a file, it falls back to a random draw
/// within that directory.
pub async fn exact_image_handler(
    State(state): State<AppState>,
    Path((directory, filename)): Path<(String, String)>,
    Query(query): Query<ImageQuery>,
) -> AppResult<Response> {
    if !valid_segments(&directory) || !valid_segments(&filename) {
        return Err(AppError::not_found("image not found"));
    }

    let found = state
        .library
        .find_exact(&directory, &filename)
        .await
        .map_err(|err| AppError::from_image_error(state.config.dev_mode, err))?;

    if let Some((record, path)) = found {
        return respond(&state, record, path, query.wants_json(), false).await;
    }

    let nested = format!("{directory}/{filename}");
    let picked = state
        .library
        .pick_random(Some(&nested))
        .await
        .map_err(|err| AppError::from_image_error(state.config.dev_mode, err))?;

    let Some((record, path)) = picked else {
        return Err(AppError::not_found(format!("image not found: {nested}")));
    };
    respond(&state, record, path, query.wants_json(), true).await
}

async fn respond(
    state: &AppState,
    record: ImageRecord,
    path: PathBuf,
    wants_json: bool,
    random: bool,
) -> AppResult<Response> {
    if wants_json {
        return Ok(Json(record).into_response());
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            // Lost a race with a deletion after resolution; drop the entry
            // and report absence like any other stale lookup.
            warn!("{} vanished before it could be read", path.display());
            state
                .cache
                .del(&cache_key_for(&record))
                .await;
            return Err(AppError::not_found(format!("image not found: {}", record.path)));
        }
        Err(err) => {
            return Err(AppError::unexpected(
                state.config.dev_mode,
                "failed to read image",
                err,
            ));
        }
    };

    debug!("serving {} ({} bytes)", record.path, record.size);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type(&path)),
    );
    // Random picks must not be cached downstream, or every repeat request
    // would see the same "random" image.
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static(if random {
            "no-store"
        } else {
            "public, max-age=86400"
        }),
    );

    Ok((headers, bytes).into_response())
}

fn cache_key_for(record: &ImageRecord) -> String {
    match record.path.split_once('/') {
        Some((directory, filename)) => cache_key(directory, filename),
        None => cache_key(pixroll_core::ROOT_KEY, &record.path),
    }
}

/// Request segments may nest (`pets/cats`), but never traverse upward or
/// hide behind dotfiles.
fn valid_segments(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.contains('\\')
        && raw
            .split('/')
            .all(|segment| !segment.is_empty() && !segment.starts_with('.'))
}

fn content_type(path: &FsPath) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
