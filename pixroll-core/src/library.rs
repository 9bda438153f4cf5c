use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::CacheFacade;
use crate::error::{ImageError, Result};
use crate::manifest::{Candidate, ManifestIndex};
use crate::record::ImageRecord;

/// Cache key for an exact (directory, filename) lookup.
pub fn cache_key(directory: &str, filename: &str) -> String {
    format!("img:{directory}/{filename}")
}

/// Owns filesystem access for serving: resolves manifest candidates into
/// [`ImageRecord`]s, re-validating that the file still exists (the manifest
/// may be stale), and keeps the cache façade in step.
///
/// Only exact lookups populate the cache. Random draws bypass it entirely,
/// so a hot "any image" path cannot pin one pick and defeat randomization.
#[derive(Debug)]
pub struct ImageLibrary {
    root: PathBuf,
    index: Arc<ManifestIndex>,
    cache: Arc<CacheFacade>,
}

impl ImageLibrary {
    pub fn new(root: PathBuf, index: Arc<ManifestIndex>, cache: Arc<CacheFacade>) -> Self {
        Self { root, index, cache }
    }

    pub fn index(&self) -> &Arc<ManifestIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<CacheFacade> {
        &self.cache
    }

    /// Uniform random draw, optionally restricted to one directory key.
    /// `None` when the candidate pool is empty or the picked file vanished.
    pub async fn pick_random(&self, directory: Option<&str>) -> Result<Option<(ImageRecord, PathBuf)>> {
        let Some(candidate) = self.index.pick_random(directory) else {
            return Ok(None);
        };
        self.resolve(&candidate).await
    }

    /// Exact lookup by (directory, filename), cache-first.
    pub async fn find_exact(
        &self,
        directory: &str,
        filename: &str,
    ) -> Result<Option<(ImageRecord, PathBuf)>> {
        let key = cache_key(directory, filename);

        if let Some(record) = self.cache.get(&key).await {
            let absolute = self.root.join(&record.path);
            if tokio::fs::try_exists(&absolute).await.unwrap_or(false) {
                debug!("served {key} from cache");
                return Ok(Some((record, absolute)));
            }
            warn!("cached record for {key} points at a missing file; invalidating");
            self.cache.del(&key).await;
            return Ok(None);
        }

        let Some(candidate) = self.index.find_exact(directory, filename) else {
            return Ok(None);
        };

        match self.resolve(&candidate).await? {
            Some((record, absolute)) => {
                self.cache.set(&key, record.clone()).await;
                Ok(Some((record, absolute)))
            }
            None => Ok(None),
        }
    }

    /// Stat the candidate's file and build its record. A file the manifest
    /// still lists but the filesystem no longer has is treated as absent,
    /// and any cache entry for it is proactively dropped.
    async fn resolve(&self, candidate: &Candidate) -> Result<Option<(ImageRecord, PathBuf)>> {
        let relative = candidate.rel_path();

        match ImageRecord::from_file(&self.root, &relative).await {
            Ok(record) => {
                let absolute = self.root.join(&record.path);
                Ok(Some((record, absolute)))
            }
            Err(ImageError::NotFound(_)) => {
                warn!("manifest entry {relative} is stale; file no longer exists");
                self.cache
                    .del(&cache_key(&candidate.directory, &candidate.filename))
                    .await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, ROOT_KEY};
    use std::fs;

    fn library_with(root: &std::path::Path, manifest: Manifest) -> ImageLibrary {
        ImageLibrary::new(
            root.to_path_buf(),
            Arc::new(ManifestIndex::new(manifest)),
            Arc::new(CacheFacade::new(true, 10, 600, None)),
        )
    }

    fn sample_root(root: &std::path::Path) -> Manifest {
        fs::write(root.join("a.webp"), b"webp-data").unwrap();
        fs::create_dir(root.join("pets")).unwrap();
        fs::write(root.join("pets/b.png"), b"png-data").unwrap();

        let mut manifest = Manifest::default();
        manifest.insert(ROOT_KEY, "a.webp".into(), "2025-01-01 00:00:00".into());
        manifest.insert("pets", "b.png".into(), "2025-01-02 00:00:00".into());
        manifest
    }

    #[tokio::test]
    async fn exact_lookups_populate_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library_with(tmp.path(), sample_root(tmp.path()));

        let (record, absolute) = library.find_exact("pets", "b.png").await.unwrap().unwrap();
        assert_eq!(record.name, "b.png");
        assert_eq!(record.path, "pets/b.png");
        assert_eq!(record.size, 8);
        assert!(absolute.ends_with("pets/b.png"));

        assert!(library.cache.get(&cache_key("pets", "b.png")).await.is_some());
    }

    #[tokio::test]
    async fn random_draws_never_populate_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library_with(tmp.path(), sample_root(tmp.path()));

        for _ in 0..10 {
            assert!(library.pick_random(None).await.unwrap().is_some());
            assert!(library.pick_random(Some("pets")).await.unwrap().is_some());
        }
        assert_eq!(library.cache.local().len(), 0);
    }

    #[tokio::test]
    async fn random_draws_stay_inside_the_requested_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library_with(tmp.path(), sample_root(tmp.path()));

        for _ in 0..50 {
            let (record, _) = library.pick_random(Some("pets")).await.unwrap().unwrap();
            assert_eq!(record.path, "pets/b.png");
        }
    }

    #[tokio::test]
    async fn a_stale_manifest_entry_resolves_to_absent_and_invalidates() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library_with(tmp.path(), sample_root(tmp.path()));

        // Warm the cache, then pull the file out from under the manifest.
        library.find_exact("pets", "b.png").await.unwrap().unwrap();
        fs::remove_file(tmp.path().join("pets/b.png")).unwrap();

        assert!(library.find_exact("pets", "b.png").await.unwrap().is_none());
        assert!(library.cache.get(&cache_key("pets", "b.png")).await.is_none());
        assert_eq!(library.cache.local().len(), 0);
    }

    #[tokio::test]
    async fn unknown_keys_are_absent_not_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library_with(tmp.path(), sample_root(tmp.path()));

        assert!(library.find_exact("pets", "zzz.png").await.unwrap().is_none());
        assert!(library.find_exact("nope", "b.png").await.unwrap().is_none());
        assert!(library.pick_random(Some("nope")).await.unwrap().is_none());
    }
}
