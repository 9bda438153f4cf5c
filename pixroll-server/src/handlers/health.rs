use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

/// `GET /health`: liveness plus a snapshot of the cache layer.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let cache = state.cache.status().await;

    let remote = match cache.remote {
        Some(remote) => json!({
            "state": remote.state.to_string(),
            "consecutive_failures": remote.consecutive_failures,
            "retry_scheduled": remote.retry_scheduled,
        }),
        None => json!(null),
    };

    Json(json!({
        "status": "healthy",
        "images": state.index.image_count(),
        "cache": {
            "enabled": cache.enabled,
            "local_entries": cache.local_entries,
            "remote": remote,
        },
    }))
}
