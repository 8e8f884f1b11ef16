//! Store error types.

use thiserror::Error;

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A write exceeded the backend's per-item size limit. Callers degrade
    /// to the capped legacy format rather than surfacing this.
    #[error("record {key} exceeds item quota ({size} > {limit} bytes)")]
    QuotaExceeded { key: String, size: usize, limit: usize },
}
