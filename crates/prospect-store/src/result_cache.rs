//! Chunked per-session result cache.
//!
//! Each session's full result list lives in memory and is persisted as
//! fixed-size chunk records plus one metadata record, so no single stored
//! item grows past what a storage backend with item-size limits will take.
//! Writes clear the previous chunk set first — a shorter list must never
//! leave stale trailing chunks behind. Under storage pressure (a failed
//! chunk write) the cache degrades to a single capped legacy blob: a
//! preview survives even when the full list can't.
//!
//! Persistence failures never propagate — by the time chunks are written
//! the in-memory layer is already current, and the cache is a cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use prospect_core::entry::{ResultEntry, SessionAnnotation};
use prospect_core::session::{Session, SessionId};

use crate::kv::KvBackend;

/// Cache sizing knobs (mirrors `prospect_settings::CacheSettings`, kept
/// structural so the store crate stays settings-agnostic).
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub chunk_size: usize,
    pub max_chunks: usize,
    pub legacy_cap: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            max_chunks: 100,
            legacy_cap: 200,
        }
    }
}

/// Extra chunk keys swept past the declared count on removal, in case a
/// previous write died between chunks and meta.
const REMOVE_SWEEP_MARGIN: usize = 5;

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    count: usize,
    #[serde(rename = "chunkCount")]
    chunk_count: usize,
    ts: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyBlob {
    entries: Vec<ResultEntry>,
    count: usize,
    ts: i64,
}

/// Per-session result cache over a KV backend.
pub struct ResultCache {
    backend: Arc<dyn KvBackend>,
    config: CacheConfig,
    memory: Mutex<HashMap<SessionId, Vec<ResultEntry>>>,
    counts: Mutex<HashMap<SessionId, u64>>,
}

fn legacy_key(id: &str) -> String {
    format!("br_results_{id}")
}

fn meta_key(id: &str) -> String {
    format!("br_results_{id}__meta")
}

fn chunk_key(id: &str, index: usize) -> String {
    format!("br_results_{id}__chunk_{index}")
}

impl ResultCache {
    pub fn new(backend: Arc<dyn KvBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            memory: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Annotate and store a session's full result list, replacing whatever
    /// was cached before. Returns the annotated list.
    pub fn save(&self, session: &Session, entries: &[ResultEntry]) -> Vec<ResultEntry> {
        let annotation = SessionAnnotation {
            session_id: session.id.clone(),
            keyword: session.keyword.clone(),
            created_at: session.created_at.clone(),
            products_count: entries.len() as u64,
        };
        let mut annotated = entries.to_vec();
        for entry in &mut annotated {
            entry.annotate(&annotation);
        }

        let _ = self
            .memory
            .lock()
            .insert(session.id.clone(), annotated.clone());
        let _ = self
            .counts
            .lock()
            .insert(session.id.clone(), annotated.len() as u64);

        if let Err(e) = self.persist_chunked(&session.id, &annotated) {
            warn!(session_id = %session.id, error = %e, "chunked cache write failed, degrading to legacy blob");
            self.persist_legacy(&session.id, &annotated);
        }
        metrics::gauge!("result_cache_sessions").set(self.memory.lock().len() as f64);
        annotated
    }

    fn persist_chunked(&self, id: &str, entries: &[ResultEntry]) -> crate::Result<()> {
        // Clear previous chunks first so a shorter list leaves no stale tail.
        self.remove_persisted(id);

        let chunk_count = entries.len().div_ceil(self.config.chunk_size);
        for (index, chunk) in entries.chunks(self.config.chunk_size).enumerate() {
            let payload = serde_json::to_string(chunk)?;
            self.backend.put(&chunk_key(id, index), &payload)?;
        }
        let meta = CacheMeta {
            count: entries.len(),
            chunk_count,
            ts: chrono::Utc::now().timestamp_millis(),
        };
        self.backend.put(&meta_key(id), &serde_json::to_string(&meta)?)
    }

    fn persist_legacy(&self, id: &str, entries: &[ResultEntry]) {
        let blob = LegacyBlob {
            entries: entries.iter().take(self.config.legacy_cap).cloned().collect(),
            count: entries.len(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        let result = serde_json::to_string(&blob)
            .map_err(crate::StoreError::from)
            .and_then(|payload| self.backend.put(&legacy_key(id), &payload));
        if let Err(e) = result {
            warn!(session_id = %id, error = %e, "legacy cache write failed, entries kept in memory only");
        }
    }

    /// Load a session's cached entries: memory first, then chunked records,
    /// then the legacy blob. A successful persisted read hydrates the
    /// in-memory layer. `session` supplies annotation metadata for legacy
    /// entries that predate annotation.
    pub fn load(&self, id: &str, session: Option<&Session>) -> Option<Vec<ResultEntry>> {
        if let Some(hit) = self.memory.lock().get(id) {
            if !hit.is_empty() {
                return Some(hit.clone());
            }
        }

        let loaded = self.load_persisted(id, session);
        if let Some(entries) = &loaded {
            let _ = self.memory.lock().insert(id.to_string(), entries.clone());
            let _ = self.counts.lock().insert(id.to_string(), entries.len() as u64);
        }
        loaded
    }

    fn load_persisted(&self, id: &str, session: Option<&Session>) -> Option<Vec<ResultEntry>> {
        if let Some(meta) = self.read_meta(id) {
            let mut out: Vec<ResultEntry> = Vec::with_capacity(meta.count);
            for index in 0..meta.chunk_count {
                match self.backend.get(&chunk_key(id, index)) {
                    Ok(Some(raw)) => match serde_json::from_str::<Vec<ResultEntry>>(&raw) {
                        Ok(part) => out.extend(part),
                        // A corrupt chunk loses its slice, not the whole read.
                        Err(e) => warn!(session_id = %id, index, error = %e, "skipping unparsable cache chunk"),
                    },
                    Ok(None) => debug!(session_id = %id, index, "cache chunk missing"),
                    Err(e) => warn!(session_id = %id, index, error = %e, "cache chunk read failed"),
                }
            }
            if out.is_empty() && meta.count > 0 {
                if let Some(legacy) = self.read_legacy(id, session) {
                    return Some(legacy);
                }
            }
            if !out.is_empty() {
                return Some(out);
            }
            if meta.count == 0 {
                // Legitimately cached empty list.
                return Some(out);
            }
        }
        self.read_legacy(id, session)
    }

    fn read_meta(&self, id: &str) -> Option<CacheMeta> {
        match self.backend.get(&meta_key(id)) {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .map_err(|e| warn!(session_id = %id, error = %e, "unparsable cache meta"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = %id, error = %e, "cache meta read failed");
                None
            }
        }
    }

    fn read_legacy(&self, id: &str, session: Option<&Session>) -> Option<Vec<ResultEntry>> {
        let raw = match self.backend.get(&legacy_key(id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(session_id = %id, error = %e, "legacy cache read failed");
                return None;
            }
        };
        let blob: LegacyBlob = serde_json::from_str(&raw)
            .map_err(|e| warn!(session_id = %id, error = %e, "unparsable legacy cache blob"))
            .ok()?;
        if blob.entries.is_empty() {
            return None;
        }
        let annotation = SessionAnnotation {
            session_id: id.to_string(),
            keyword: session.map(|s| s.keyword.clone()).unwrap_or_default(),
            created_at: session.map(|s| s.created_at.clone()).unwrap_or_default(),
            products_count: blob.count as u64,
        };
        let mut entries = blob.entries;
        for entry in &mut entries {
            if !entry.is_annotated() {
                entry.annotate(&annotation);
            }
        }
        Some(entries)
    }

    /// Drop a session's cache everywhere: memory, meta, chunks (declared
    /// count plus a safety margin, capped), and the legacy blob. Safe when
    /// nothing exists.
    pub fn remove(&self, id: &str) {
        let _ = self.memory.lock().remove(id);
        let _ = self.counts.lock().remove(id);
        self.remove_persisted(id);
        metrics::gauge!("result_cache_sessions").set(self.memory.lock().len() as f64);
    }

    fn remove_persisted(&self, id: &str) {
        let declared = self.read_meta(id).map(|m| m.chunk_count).unwrap_or(0);
        let sweep = if declared > 0 {
            (declared + REMOVE_SWEEP_MARGIN).min(self.config.max_chunks)
        } else {
            self.config.max_chunks
        };
        if let Err(e) = self.backend.delete(&legacy_key(id)) {
            warn!(session_id = %id, error = %e, "legacy cache delete failed");
        }
        if let Err(e) = self.backend.delete(&meta_key(id)) {
            warn!(session_id = %id, error = %e, "cache meta delete failed");
        }
        for index in 0..sweep {
            if let Err(e) = self.backend.delete(&chunk_key(id, index)) {
                warn!(session_id = %id, index, error = %e, "cache chunk delete failed");
            }
        }
    }

    /// Latest known entry count for a session, if any.
    pub fn count(&self, id: &str) -> Option<u64> {
        self.counts.lock().get(id).copied()
    }

    /// Record a count learned from a snapshot or polling without touching
    /// the entries themselves.
    pub fn record_count(&self, id: &str, count: u64) {
        let _ = self.counts.lock().insert(id.to_string(), count);
    }

    /// Sum of all known per-session counts (selector label for the
    /// aggregate option).
    pub fn total_known_count(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// True when any cached entries exist for the session, persisted or in
    /// memory.
    pub fn has_cached(&self, id: &str, session: Option<&Session>) -> bool {
        self.load(id, session).is_some_and(|e| !e.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
