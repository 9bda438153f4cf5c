//! # Pixroll Core
//!
//! Core library for the pixroll image server: image metadata records, the
//! two-tier metadata cache, and the manifest index that drives random
//! selection.
//!
//! ## Overview
//!
//! - [`record`]: the canonical [`record::ImageRecord`] schema and its fixed
//!   timestamp format
//! - [`cache`]: bounded local LRU tier, external (redis) adapter with an
//!   explicit connection state machine, and the façade that unifies them
//! - [`manifest`]: directory-tree snapshots, uniform random selection,
//!   exact lookup, the rebuild walk, and the persisted JSON document
//! - [`library`]: filesystem-owning resolution of manifest candidates into
//!   records, with stale-entry invalidation
//!
//! The HTTP surface lives in `pixroll-server`; this crate has no web types.

/// Two-tier metadata cache
pub mod cache;

/// Error types
pub mod error;

/// Candidate resolution against the filesystem
pub mod library;

/// Manifest snapshot, random selection, builder, and persistence
pub mod manifest;

/// Canonical image metadata record
pub mod record;

pub use cache::{CacheFacade, CacheStatus, ConnectionState, LocalCache, RemoteCache, RemoteCacheConfig, RemoteCacheStatus};
pub use error::{ImageError, Result};
pub use library::{ImageLibrary, cache_key};
pub use manifest::{Candidate, IMAGE_EXTENSIONS, Manifest, ManifestBuilder, ManifestIndex, ManifestStore, ROOT_KEY};
pub use record::ImageRecord;
