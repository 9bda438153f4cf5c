use anyhow::Context;
use serde::Deserialize;
use std::{env, path::PathBuf};

/// Server configuration loaded from environment variables (optionally via a
/// `.env` file).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Image settings
    pub image_root: PathBuf,
    pub manifest_path: PathBuf,

    // Cache settings
    pub cache_enabled: bool,
    pub cache_capacity: usize,

    // External cache settings
    pub redis_host: Option<String>,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_ttl_secs: i64,
    pub redis_max_retries: u32,
    pub redis_retry_interval_ms: u64,
    pub redis_op_timeout_ms: u64,

    // Background jobs
    pub rebuild_interval_secs: u64,
    pub maintenance_interval_secs: u64,

    // Manifest refresh trigger
    pub update_token: Option<String>,

    // CORS settings
    pub cors_allowed_origins: Vec<String>,

    // Development settings
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_env("SERVER_PORT", 3000)?,

            image_root: env::var("IMAGE_ROOT")
                .unwrap_or_else(|_| "./images".to_string())
                .into(),
            manifest_path: env::var("MANIFEST_PATH")
                .unwrap_or_else(|_| "./manifest.json".to_string())
                .into(),

            cache_enabled: parse_env("CACHE_ENABLED", true)?,
            cache_capacity: parse_env("CACHE_CAPACITY", pixroll_core::cache::DEFAULT_CAPACITY)?,

            redis_host: env::var("REDIS_HOST").ok().filter(|host| !host.is_empty()),
            redis_port: parse_env("REDIS_PORT", 6379)?,
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|pw| !pw.is_empty()),
            redis_ttl_secs: parse_env("REDIS_TTL_SECS", 600)?,
            redis_max_retries: parse_env("REDIS_MAX_RETRIES", 10)?,
            redis_retry_interval_ms: parse_env("REDIS_RETRY_INTERVAL_MS", 1_000)?,
            redis_op_timeout_ms: parse_env("REDIS_OP_TIMEOUT_MS", 2_000)?,

            rebuild_interval_secs: parse_env("REBUILD_INTERVAL_SECS", 3_600)?,
            maintenance_interval_secs: parse_env("MAINTENANCE_INTERVAL_SECS", 60)?,

            update_token: env::var("UPDATE_TOKEN").ok().filter(|t| !t.is_empty()),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            dev_mode: parse_env("DEV_MODE", false)?,
        })
    }

    /// Connection URL for the external cache, if one is configured.
    pub fn redis_url(&self) -> Option<String> {
        let host = self.redis_host.as_ref()?;
        let url = match &self.redis_password {
            Some(password) => format!("redis://:{password}@{host}:{}/", self.redis_port),
            None => format!("redis://{host}:{}/", self.redis_port),
        };
        Some(url)
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.image_root.is_dir(),
            "image root {} is not a directory",
            self.image_root.display()
        );
        if let Some(parent) = self.manifest_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create manifest directory {}", parent.display())
            })?;
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid {name}={raw}: {err}")),
        Err(_) => Ok(default),
    }
}
