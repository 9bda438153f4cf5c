//! # Pixroll Server
//!
//! Serves random or specific images over HTTP from a directory tree.
//!
//! ## Overview
//!
//! - **Random selection**: `GET /` draws uniformly across the corpus,
//!   `GET /{directory}` within one directory
//! - **Exact lookup**: `GET /{directory}/{filename}`, with `?json=1` for
//!   the metadata record instead of the bytes
//! - **Manifest refresh**: a background timer and an authenticated
//!   `GET /update` trigger re-snapshot the tree into a persisted JSON
//!   manifest
//! - **Two-tier cache**: hot metadata lives in a bounded in-process LRU
//!   map, optionally fronted by redis with automatic failover

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixroll_core::{
    CacheFacade, ImageLibrary, ManifestBuilder, ManifestIndex, ManifestStore, RemoteCache,
    RemoteCacheConfig,
};
use pixroll_server::{
    create_router,
    infra::{app_state::AppState, config::Config, update_guard::UpdateGuard},
};

/// How long a client stays blocked after too many bad update tokens.
const UPDATE_FAILURE_WINDOW: Duration = Duration::from_secs(600);
const UPDATE_MAX_FAILURES: u32 = 5;

#[derive(Parser, Debug)]
#[command(name = "pixroll-server")]
#[command(about = "Image server with random selection and a two-tier metadata cache")]
struct Cli {
    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Image root directory (overrides config)
    #[arg(long)]
    image_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pixroll_server=info,pixroll_core=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if let Some(host) = cli.host {
        config.server_host = host;
    }
    if let Some(image_root) = cli.image_root {
        config.image_root = image_root;
    }
    config.ensure_directories()?;

    let state = build_state(config).await?;
    spawn_background_tasks(&state);

    let addr = SocketAddr::new(
        state
            .config
            .server_host
            .parse()
            .context("invalid server host")?,
        state.config.server_port,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("pixroll listening on {addr}");

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    let remote = config.redis_url().map(|url| {
        Arc::new(RemoteCache::new(RemoteCacheConfig {
            url,
            op_timeout: Duration::from_millis(config.redis_op_timeout_ms),
            retry_interval: Duration::from_millis(config.redis_retry_interval_ms),
            max_retries: config.redis_max_retries,
        }))
    });
    if let Some(remote) = &remote {
        if remote.connect().await {
            info!("external cache connected");
        } else {
            warn!("external cache unreachable; serving from the local tier");
        }
    }

    let cache = Arc::new(CacheFacade::new(
        config.cache_enabled,
        config.cache_capacity,
        config.redis_ttl_secs,
        remote.clone(),
    ));
    let index = Arc::new(ManifestIndex::default());
    let builder = Arc::new(ManifestBuilder::new(
        config.image_root.clone(),
        Arc::clone(&index),
        ManifestStore::new(config.manifest_path.clone()),
        Arc::clone(&cache),
    ));

    let count = builder
        .load_or_build()
        .await
        .context("initial manifest build failed")?;
    info!("manifest ready: {count} images under {}", config.image_root.display());

    let library = Arc::new(ImageLibrary::new(
        config.image_root.clone(),
        Arc::clone(&index),
        Arc::clone(&cache),
    ));

    Ok(AppState {
        config,
        library,
        index,
        cache,
        remote,
        builder,
        update_guard: Arc::new(UpdateGuard::new(UPDATE_FAILURE_WINDOW, UPDATE_MAX_FAILURES)),
    })
}

fn spawn_background_tasks(state: &AppState) {
    if state.config.rebuild_interval_secs > 0 {
        let builder = Arc::clone(&state.builder);
        let period = Duration::from_secs(state.config.rebuild_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately and startup already built.
            interval.tick().await;
            loop {
                interval.tick().await;
                match builder.rebuild_if_idle().await {
                    Ok(Some(count)) => info!("scheduled rebuild indexed {count} images"),
                    Ok(None) => {}
                    Err(err) => warn!("scheduled rebuild failed: {err}"),
                }
            }
        });
    }

    let remote = state.remote.clone();
    let update_guard = Arc::clone(&state.update_guard);
    let period = Duration::from_secs(state.config.maintenance_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Some(remote) = &remote {
                remote.tick().await;
            }
            update_guard.sweep().await;
        }
    });
}
