use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::local::LocalCache;
use crate::cache::remote::{RemoteCache, RemoteCacheStatus};
use crate::record::ImageRecord;

/// Observable façade state, surfaced by the health endpoint.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub enabled: bool,
    pub local_entries: usize,
    pub remote: Option<RemoteCacheStatus>,
}

/// Unifies the bounded local cache and the external cache adapter behind one
/// get/set/delete contract.
///
/// The external tier is tried first while its adapter reports healthy; a
/// failure mid-operation falls back to the local tier for that single call,
/// and the adapter's own bookkeeping demotes subsequent calls to local-only
/// until it reconnects. The two tiers are otherwise independent stores.
pub struct CacheFacade {
    enabled: bool,
    ttl_secs: i64,
    local: LocalCache,
    remote: Option<Arc<RemoteCache>>,
}

impl fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFacade")
            .field("enabled", &self.enabled)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl CacheFacade {
    pub fn new(
        enabled: bool,
        capacity: usize,
        ttl_secs: i64,
        remote: Option<Arc<RemoteCache>>,
    ) -> Self {
        Self {
            enabled,
            ttl_secs,
            local: LocalCache::new(capacity),
            remote,
        }
    }

    /// A façade that never stores anything, for configurations with caching
    /// switched off.
    pub fn disabled() -> Self {
        Self::new(false, 1, 0, None)
    }

    pub async fn get(&self, key: &str) -> Option<ImageRecord> {
        if !self.enabled {
            return None;
        }

        if let Some(remote) = self.healthy_remote().await {
            if let Some(record) = remote.get::<ImageRecord>(key).await {
                return Some(record);
            }
            // Remote miss or mid-operation failure: either way the local
            // tier answers this call.
        }

        self.local.get(key)
    }

    pub async fn set(&self, key: &str, record: ImageRecord) {
        if !self.enabled {
            return;
        }
        if self.ttl_secs <= 0 {
            debug!("cache TTL resolves to {}s; skipping store of {key}", self.ttl_secs);
            return;
        }

        if let Some(remote) = self.healthy_remote().await {
            let ttl = Duration::from_secs(self.ttl_secs as u64);
            if remote.set(key, &record, ttl).await {
                return;
            }
        }

        self.local.set(key, record);
    }

    pub async fn del(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let mut removed = false;
        if let Some(remote) = self.healthy_remote().await {
            removed = remote.del(key).await;
        }
        // Invalidation always covers both tiers; a stale record must not
        // survive in whichever store answered last.
        removed | self.local.remove(key)
    }

    /// Drop every local entry. The manifest builder calls this after a
    /// rebuild, when cached paths may no longer match the filesystem.
    pub fn clear_local(&self) {
        self.local.clear();
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub async fn status(&self) -> CacheStatus {
        let remote = match &self.remote {
            Some(remote) => Some(remote.status().await),
            None => None,
        };
        CacheStatus {
            enabled: self.enabled,
            local_entries: self.local.len(),
            remote,
        }
    }

    async fn healthy_remote(&self) -> Option<&Arc<RemoteCache>> {
        match &self.remote {
            Some(remote) if remote.healthy().await => Some(remote),
            _ => None,
        }
    }
}
