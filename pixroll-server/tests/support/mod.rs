use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tower::ServiceExt;

use pixroll_core::{CacheFacade, ImageLibrary, ManifestBuilder, ManifestIndex, ManifestStore};
use pixroll_server::{
    AppState, create_router,
    infra::{config::Config, update_guard::UpdateGuard},
};

pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub root: TempDir,
}

/// Stand up a server over a seeded temp directory: `a.webp`
/// (2025-01-01 00:00:00) at the root, `pets/b.png` (2025-01-02 00:00:00)
/// one level down, and `wild/cats/d.gif` (2025-01-03 00:00:00) nested.
pub async fn spawn(update_token: Option<&str>) -> TestServer {
    let root = tempfile::tempdir().unwrap();

    std::fs::write(root.path().join("a.webp"), b"webp-data").unwrap();
    std::fs::create_dir(root.path().join("pets")).unwrap();
    std::fs::write(root.path().join("pets/b.png"), b"png-data").unwrap();
    std::fs::create_dir_all(root.path().join("wild/cats")).unwrap();
    std::fs::write(root.path().join("wild/cats/d.gif"), b"gif-data").unwrap();
    set_mtime(
        &root.path().join("a.webp"),
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    );
    set_mtime(
        &root.path().join("pets/b.png"),
        Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
    );
    set_mtime(
        &root.path().join("wild/cats/d.gif"),
        Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap(),
    );

    let config = Arc::new(Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        image_root: root.path().to_path_buf(),
        manifest_path: root.path().join("manifest.json"),
        cache_enabled: true,
        cache_capacity: 16,
        redis_host: None,
        redis_port: 6379,
        redis_password: None,
        redis_ttl_secs: 600,
        redis_max_retries: 3,
        redis_retry_interval_ms: 100,
        redis_op_timeout_ms: 500,
        rebuild_interval_secs: 0,
        maintenance_interval_secs: 60,
        update_token: update_token.map(str::to_string),
        cors_allowed_origins: vec!["*".to_string()],
        dev_mode: false,
    });

    let cache = Arc::new(CacheFacade::new(true, config.cache_capacity, config.redis_ttl_secs, None));
    let index = Arc::new(ManifestIndex::default());
    let builder = Arc::new(ManifestBuilder::new(
        config.image_root.clone(),
        Arc::clone(&index),
        ManifestStore::new(config.manifest_path.clone()),
        Arc::clone(&cache),
    ));
    builder.load_or_build().await.unwrap();

    let library = Arc::new(ImageLibrary::new(
        config.image_root.clone(),
        Arc::clone(&index),
        Arc::clone(&cache),
    ));

    let state = AppState {
        config,
        library,
        index,
        cache,
        remote: None,
        builder,
        update_guard: Arc::new(UpdateGuard::new(Duration::from_secs(600), 5)),
    };

    TestServer {
        router: create_router(state.clone()),
        state,
        root,
    }
}

pub fn set_mtime(path: &Path, datetime: DateTime<Utc>) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    let times = std::fs::FileTimes::new().set_modified(SystemTime::from(datetime));
    file.set_times(times).unwrap();
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, headers, body)
}

pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = get(router, uri).await;
    let value = serde_json::from_slice(&body).unwrap();
    (status, value)
}
