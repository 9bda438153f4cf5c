use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheFacade;
use crate::error::Result;
use crate::manifest::store::ManifestStore;
use crate::manifest::{Manifest, ManifestIndex, ROOT_KEY};
use crate::record::format_system_time;

/// Extension allow-list for indexable images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

pub fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|allowed| ext.eq_ignore_ascii_case(allowed)))
}

/// Walks the image root, snapshots it into a [`Manifest`], persists the
/// document, and swaps the result into the shared index.
///
/// Rebuilds are single-flight: [`ManifestBuilder::rebuild`] serializes
/// behind any in-flight run, while the timer-driven
/// [`ManifestBuilder::rebuild_if_idle`] skips instead of queueing.
#[derive(Debug)]
pub struct ManifestBuilder {
    root: PathBuf,
    index: Arc<ManifestIndex>,
    store: ManifestStore,
    cache: Arc<CacheFacade>,
    build_lock: Mutex<()>,
}

impl ManifestBuilder {
    pub fn new(
        root: PathBuf,
        index: Arc<ManifestIndex>,
        store: ManifestStore,
        cache: Arc<CacheFacade>,
    ) -> Self {
        Self {
            root,
            index,
            store,
            cache,
            build_lock: Mutex::new(()),
        }
    }

    /// Install the persisted manifest if one exists, otherwise run a first
    /// build. Returns the indexed image count.
    pub async fn load_or_build(&self) -> Result<usize> {
        match self.store.load().await {
            Ok(Some(manifest)) => {
                let count = manifest.image_count();
                info!(
                    "loaded manifest from {} ({count} images)",
                    self.store.path().display()
                );
                self.index.install(manifest);
                Ok(count)
            }
            Ok(None) => self.rebuild().await,
            Err(err) => {
                warn!(
                    "could not load manifest from {}: {err}; rebuilding",
                    self.store.path().display()
                );
                self.rebuild().await
            }
        }
    }

    /// Run a full rebuild, waiting for any in-flight run to finish first.
    /// Returns the indexed image count.
    pub async fn rebuild(&self) -> Result<usize> {
        let _guard = self.build_lock.lock().await;
        self.run().await
    }

    /// Timer entry point: run a rebuild unless one is already in flight, in
    /// which case the tick is skipped rather than queued.
    pub async fn rebuild_if_idle(&self) -> Result<Option<usize>> {
        match self.build_lock.try_lock() {
            Ok(_guard) => self.run().await.map(Some),
            Err(_) => {
                debug!("manifest rebuild already in flight; skipping");
                Ok(None)
            }
        }
    }

    async fn run(&self) -> Result<usize> {
        let started = Instant::now();
        let manifest = scan_root(&self.root).await?;
        let count = manifest.image_count();

        // Persist before the swap: if the write fails, readers keep the
        // previous (still consistent) index.
        self.store.save(&manifest).await?;
        self.index.install(manifest);

        // Cached records may point at paths that moved under the new index.
        self.cache.clear_local();

        info!(
            "manifest rebuilt: {count} images under {} in {:?}",
            self.root.display(),
            started.elapsed()
        );
        Ok(count)
    }
}

/// Snapshot the directory tree. Top-level files land under [`ROOT_KEY`];
/// everything below a first-level subdirectory is keyed by that
/// subdirectory, with deeper files keeping their relative path as the
/// filename key (`pets/cats/d.gif` -> key `pets`, filename `cats/d.gif`).
async fn scan_root(root: &Path) -> Result<Manifest> {
    let mut manifest = Manifest::default();
    let mut entries = tokio::fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("skipping non-UTF-8 entry {raw:?}");
                continue;
            }
        };
        if name.starts_with('.') {
            continue;
        }

        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            if is_image_name(&name) {
                let mtime = metadata
                    .modified()
                    .map(format_system_time)
                    .unwrap_or_default();
                manifest.insert(ROOT_KEY, name, mtime);
            }
        } else if metadata.is_dir() {
            collect_directory(entry.path(), &name, String::new(), &mut manifest).await?;
        }
    }

    Ok(manifest)
}

fn collect_directory<'a>(
    dir: PathBuf,
    key: &'a str,
    prefix: String,
    manifest: &'a mut Manifest,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("skipping non-UTF-8 entry {raw:?}");
                    continue;
                }
            };
            if name.starts_with('.') {
                continue;
            }

            let filename = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };

            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                if is_image_name(&name) {
                    let mtime = metadata
                        .modified()
                        .map(format_system_time)
                        .unwrap_or_default();
                    manifest.insert(key, filename, mtime);
                }
            } else if metadata.is_dir() {
                collect_directory(entry.path(), key, filename, manifest).await?;
            }
        }

        Ok(())
    })
}
