use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ImageError, Result};
use crate::manifest::Manifest;

/// Persisted manifest document: a JSON object on disk, written with a
/// write-temp-then-rename discipline under a lock file so concurrent writers
/// cannot corrupt it.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    lock_attempts: u32,
    lock_retry_delay: Duration,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock_attempts: 5,
            lock_retry_delay: Duration::from_millis(200),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted document, or `None` if none exists yet.
    pub async fn load(&self) -> Result<Option<Manifest>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let manifest = serde_json::from_str(&raw)?;
        Ok(Some(manifest))
    }

    /// Serialize and atomically replace the persisted document.
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        let lock = self.acquire_lock().await?;

        let result = self.write_document(manifest).await;
        lock.release().await;
        result
    }

    async fn write_document(&self, manifest: &Manifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        let tmp_path = sibling(&self.path, ".tmp");

        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(
            "persisted manifest to {} ({} bytes)",
            self.path.display(),
            bytes.len()
        );
        Ok(())
    }

    async fn acquire_lock(&self) -> Result<LockFile> {
        let lock_path = sibling(&self.path, ".lock");

        for attempt in 1..=self.lock_attempts {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(_) => {
                    return Ok(LockFile {
                        path: lock_path,
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    let delay = self.lock_retry_delay * attempt;
                    warn!(
                        "manifest lock {} is held (attempt {attempt}/{}); retrying in {delay:?}",
                        lock_path.display(),
                        self.lock_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ImageError::ManifestWrite(format!(
            "could not acquire {} after {} attempts",
            lock_path.display(),
            self.lock_attempts
        )))
    }

    #[cfg(test)]
    fn with_lock_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.lock_attempts = attempts;
        self.lock_retry_delay = delay;
        self
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    async fn release(mut self) {
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            warn!("failed to remove manifest lock {}: {err}", self.path.display());
        }
        self.released = true;
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Fallback for early-exit paths; release() is the normal route.
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
