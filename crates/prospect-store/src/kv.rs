//! The key-value backend trait and the in-memory implementation.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::errors::{Result, StoreError};

/// Flat string key-value storage. Implementations must be safe to share
/// across tasks; all methods are synchronous and cheap enough to call from
/// async contexts without spawning.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory backend for tests and ephemeral runs.
///
/// An optional per-item byte quota makes oversized writes fail the way a
/// browser storage item would, so the cache's legacy-blob degradation path
/// is testable.
#[derive(Default)]
pub struct MemoryBackend {
    map: Mutex<HashMap<String, String>>,
    max_item_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that rejects any single item larger than `limit` bytes.
    pub fn with_item_quota(limit: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            max_item_bytes: Some(limit),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Snapshot of stored keys, for assertions.
    pub fn keys(&self) -> Vec<String> {
        self.map.lock().keys().cloned().collect()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        if let Some(limit) = self.max_item_bytes {
            if value.len() > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size: value.len(),
                    limit,
                });
            }
        }
        let _ = self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _ = self.map.lock().remove(key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
