//! In-memory snapshot of the image corpus: directory -> filename -> upload
//! time, plus uniform random selection and exact lookup over it.

pub mod builder;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

pub use builder::{IMAGE_EXTENSIONS, ManifestBuilder};
pub use store::ManifestStore;

/// Synthetic directory key for files directly under the image root.
pub const ROOT_KEY: &str = "_root";

/// Filenames (posix-relative to their directory key) mapped to formatted
/// modification timestamps.
pub type DirectoryEntries = BTreeMap<String, String>;

/// Snapshot of the directory tree, keyed by first-level subdirectory name
/// (or [`ROOT_KEY`]). `BTreeMap` keeps serialization deterministic, so two
/// builds over an unchanged tree persist byte-identical documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub directories: BTreeMap<String, DirectoryEntries>,
}

impl Manifest {
    pub fn insert(&mut self, directory: &str, filename: String, mtime: String) {
        self.directories
            .entry(directory.to_string())
            .or_default()
            .insert(filename, mtime);
    }

    pub fn directory(&self, key: &str) -> Option<&DirectoryEntries> {
        self.directories.get(key)
    }

    pub fn image_count(&self) -> usize {
        self.directories.values().map(BTreeMap::len).sum()
    }
}

/// A manifest entry selected for serving, not yet validated against the
/// filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub directory: String,
    pub filename: String,
}

impl Candidate {
    /// Path relative to the image root.
    pub fn rel_path(&self) -> String {
        if self.directory == ROOT_KEY {
            self.filename.clone()
        } else {
            format!("{}/{}", self.directory, self.filename)
        }
    }
}

/// Shared read view over the current manifest.
///
/// The builder is the single writer: it assembles a complete replacement and
/// swaps it in atomically via [`ManifestIndex::install`], so readers only
/// ever observe a fully-built snapshot.
#[derive(Debug, Default)]
pub struct ManifestIndex {
    current: RwLock<Arc<Manifest>>,
}

impl ManifestIndex {
    pub fn new(initial: Manifest) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<Manifest> {
        Arc::clone(&self.current.read())
    }

    /// Atomically replace the current manifest.
    pub fn install(&self, manifest: Manifest) {
        *self.current.write() = Arc::new(manifest);
    }

    pub fn image_count(&self) -> usize {
        self.snapshot().image_count()
    }

    /// Draw uniformly at random, either across the whole corpus or within
    /// one directory key. `directory` may carry a nested suffix
    /// (`pets/cats`), which prefix-filters filenames under the first-level
    /// key. An empty candidate pool yields `None`, never an error.
    pub fn pick_random(&self, directory: Option<&str>) -> Option<Candidate> {
        let manifest = self.snapshot();
        let mut rng = rand::rng();

        match directory {
            None => {
                let pool: Vec<(&String, &String)> = manifest
                    .directories
                    .iter()
                    .flat_map(|(dir, entries)| entries.keys().map(move |name| (dir, name)))
                    .collect();
                pool.choose(&mut rng).map(|(dir, name)| Candidate {
                    directory: (*dir).clone(),
                    filename: (*name).clone(),
                })
            }
            Some(directory) => {
                let (key, prefix) = match directory.split_once('/') {
                    Some((key, rest)) => (key, Some(rest)),
                    None => (directory, None),
                };
                let entries = manifest.directory(key)?;
                let pool: Vec<&String> = entries
                    .keys()
                    .filter(|name| match prefix {
                        None => true,
                        Some(prefix) => name
                            .strip_prefix(prefix)
                            .is_some_and(|rest| rest.starts_with('/')),
                    })
                    .collect();
                pool.choose(&mut rng).map(|name| Candidate {
                    directory: key.to_string(),
                    filename: (*name).clone(),
                })
            }
        }
    }

    /// Equality lookup on the (directory, filename) composite key. Absence
    /// is `None`, not an error.
    pub fn find_exact(&self, directory: &str, filename: &str) -> Option<Candidate> {
        let manifest = self.snapshot();
        manifest
            .directory(directory)?
            .contains_key(filename)
            .then(|| Candidate {
                directory: directory.to_string(),
                filename: filename.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_index() -> ManifestIndex {
        let mut manifest = Manifest::default();
        manifest.insert(ROOT_KEY, "a.webp".into(), "2025-01-01 00:00:00".into());
        manifest.insert("pets", "b.png".into(), "2025-01-02 00:00:00".into());
        manifest.insert("pets", "c.jpg".into(), "2025-01-02 00:00:01".into());
        manifest.insert("pets", "cats/d.gif".into(), "2025-01-03 00:00:00".into());
        ManifestIndex::new(manifest)
    }

    #[test]
    fn pick_random_restricts_to_the_requested_directory() {
        let index = sample_index();
        for _ in 0..200 {
            let candidate = index.pick_random(Some("pets")).unwrap();
            assert_eq!(candidate.directory, "pets");
        }
    }

    #[test]
    fn pick_random_supports_nested_prefixes() {
        let index = sample_index();
        for _ in 0..50 {
            let candidate = index.pick_random(Some("pets/cats")).unwrap();
            assert_eq!(candidate.rel_path(), "pets/cats/d.gif");
        }
        assert!(index.pick_random(Some("pets/ca")).is_none());
    }

    #[test]
    fn empty_pools_yield_none() {
        let index = ManifestIndex::default();
        assert!(index.pick_random(None).is_none());
        assert!(index.pick_random(Some("pets")).is_none());
        assert!(index.find_exact("pets", "b.png").is_none());
    }

    #[test]
    fn draws_are_roughly_uniform() {
        let index = sample_index();
        let mut counts: HashMap<String, usize> = HashMap::new();
        let draws = 2000;
        for _ in 0..draws {
            let candidate = index.pick_random(None).unwrap();
            *counts.entry(candidate.rel_path()).or_default() += 1;
        }

        // Four candidates; each should land near draws/4. The bounds are
        // several standard deviations wide to keep the test stable.
        assert_eq!(counts.len(), 4);
        for (path, count) in counts {
            assert!(
                (350..=650).contains(&count),
                "{path} drawn {count} times out of {draws}"
            );
        }
    }

    #[test]
    fn find_exact_matches_the_composite_key() {
        let index = sample_index();
        let candidate = index.find_exact("pets", "b.png").unwrap();
        assert_eq!(candidate.rel_path(), "pets/b.png");
        let nested = index.find_exact("pets", "cats/d.gif").unwrap();
        assert_eq!(nested.rel_path(), "pets/cats/d.gif");
        assert!(index.find_exact("pets", "zzz.png").is_none());
        assert!(index.find_exact("_root", "b.png").is_none());
    }

    #[test]
    fn install_swaps_the_snapshot_atomically_for_readers() {
        let index = sample_index();
        let before = index.snapshot();

        let mut replacement = Manifest::default();
        replacement.insert(ROOT_KEY, "z.png".into(), "2025-02-01 00:00:00".into());
        index.install(replacement);

        // The old snapshot stays fully queryable for readers that hold it.
        assert_eq!(before.image_count(), 4);
        assert_eq!(index.image_count(), 1);
    }
}
