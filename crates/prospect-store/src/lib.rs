//! # prospect-store
//!
//! Tab-scoped persistence for the dashboard engine.
//!
//! Storage is a flat string key-value space behind the [`KvBackend`] trait:
//! the SQLite implementation backs real runs (pooled connections, one
//! `kv_records` table), the in-memory implementation backs tests and can
//! enforce a per-item byte quota to exercise the storage-pressure fallback.
//!
//! On top of the KV space sit two consumers:
//! - [`ResultCache`] — per-session result lists persisted as fixed-size
//!   chunks plus a metadata record, with a capped legacy blob as the
//!   degraded format;
//! - [`ViewStateStore`] — the active selection, scroll offset, last keyword
//!   insight, and the durable reopen-after-update marker.

#![deny(unsafe_code)]

pub mod errors;
pub mod kv;
pub mod result_cache;
pub mod sqlite;
pub mod view_state;

pub use errors::{Result, StoreError};
pub use kv::{KvBackend, MemoryBackend};
pub use result_cache::ResultCache;
pub use sqlite::SqliteBackend;
pub use view_state::{InsightState, ReopenMarker, ViewStateStore};
