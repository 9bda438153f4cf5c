//! Two-tier metadata cache: a bounded in-process LRU map plus an optional
//! external key-value store, unified behind [`facade::CacheFacade`].

pub mod facade;
pub mod local;
pub mod remote;

pub use facade::{CacheFacade, CacheStatus};
pub use local::{DEFAULT_CAPACITY, LocalCache};
pub use remote::{ConnectionState, RemoteCache, RemoteCacheConfig, RemoteCacheStatus};
