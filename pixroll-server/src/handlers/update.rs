use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, Query, State},
    http::request::Parts,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateQuery {
    token: Option<String>,
}

/// `GET /update?token=<secret>`: authenticated manifest refresh.
///
/// On success the manifest document is rebuilt and persisted and the
/// response carries the indexed image count. A bad or missing token has no
/// side effects beyond the failure window used for rate limiting.
pub async fn update_manifest_handler(
    State(state): State<AppState>,
    Query(query): Query<UpdateQuery>,
    parts: Parts,
) -> AppResult<Json<Value>> {
    let client = client_ip(&parts);

    if !state.update_guard.check(client) {
        return Err(AppError::rate_limited(
            "too many failed update attempts; try again later",
        ));
    }

    let Some(expected) = state.config.update_token.as_deref() else {
        return Err(AppError::forbidden("update endpoint is disabled"));
    };

    let authorized = query
        .token
        .as_deref()
        .is_some_and(|token| token_matches(token, expected));
    if !authorized {
        warn!("rejected manifest update from {client}: bad token");
        state.update_guard.record_failure(client);
        return Err(AppError::forbidden("invalid update token"));
    }
    state.update_guard.clear(client);

    // An authenticated refresh doubles as the manual reset for an external
    // cache that exhausted its retry budget.
    if let Some(remote) = &state.remote
        && !remote.healthy().await
        && remote.reset().await
    {
        info!("external cache reconnected after manual reset");
    }

    info!("manifest update triggered by {client}");
    let count = state
        .builder
        .rebuild()
        .await
        .map_err(|err| AppError::from_image_error(state.config.dev_mode, err))?;

    Ok(Json(json!({
        "status": "ok",
        "count": count,
    })))
}

fn client_ip(parts: &Parts) -> IpAddr {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn token_matches(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_is_exact() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secret2"));
        assert!(!token_matches("Secret", "secret"));
        assert!(!token_matches("", "secret"));
    }
}
