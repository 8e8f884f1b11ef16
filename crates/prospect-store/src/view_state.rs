//! View-state persistence: selection, scroll offset, last keyword insight,
//! and the reopen-after-update marker.
//!
//! Two backends with different lifetimes: the *tab* store lives as long as
//! the browsing session (selection, scroll, insight state), the *durable*
//! store survives a full reload (the reopen marker — the whole point of it
//! is to outlive one).
//!
//! All accessors are lossy by design: a storage failure logs and degrades
//! to "nothing saved" rather than surfacing an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use prospect_core::events::ViewSelection;
use prospect_core::session::SessionId;

use crate::kv::KvBackend;

const SELECT_KEY: &str = "bulk_selected_session";
const SCROLL_KEY: &str = "bulk_scroll_y";
const REOPEN_KEY: &str = "bulk_reopen_after_update";
const INSIGHT_KEY: &str = "keyword_insight_state";

/// Marker persisted by the replace-listing flow so the next boot can
/// reselect the session and re-open the product's detail view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReopenMarker {
    pub session_id: SessionId,
    pub listing_id: String,
    pub ts: i64,
}

/// Last successful keyword-insight lookup, restored on the companion page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightState {
    pub keyword: String,
    pub result: Value,
    pub ts: i64,
}

/// Persisted view state over a tab-scoped and a durable KV backend.
pub struct ViewStateStore {
    tab: Arc<dyn KvBackend>,
    durable: Arc<dyn KvBackend>,
}

impl ViewStateStore {
    pub fn new(tab: Arc<dyn KvBackend>, durable: Arc<dyn KvBackend>) -> Self {
        Self { tab, durable }
    }

    // --- Selection ---

    pub fn selection(&self) -> Option<ViewSelection> {
        let raw = self.read(&self.tab, SELECT_KEY)?;
        Some(ViewSelection::from_stored(&raw))
    }

    pub fn set_selection(&self, selection: &ViewSelection) {
        match selection {
            ViewSelection::None => self.remove(&self.tab, SELECT_KEY),
            other => self.write(&self.tab, SELECT_KEY, &other.to_stored()),
        }
    }

    // --- Scroll offset ---

    pub fn scroll_y(&self) -> Option<u64> {
        self.read(&self.tab, SCROLL_KEY)?.parse().ok()
    }

    pub fn set_scroll_y(&self, y: u64) {
        self.write(&self.tab, SCROLL_KEY, &y.to_string());
    }

    // --- Reopen marker (durable) ---

    pub fn reopen_marker(&self) -> Option<ReopenMarker> {
        let raw = self.read(&self.durable, REOPEN_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(error = %e, "discarding unparsable reopen marker");
                self.remove(&self.durable, REOPEN_KEY);
                None
            }
        }
    }

    pub fn set_reopen_marker(&self, marker: &ReopenMarker) {
        match serde_json::to_string(marker) {
            Ok(raw) => self.write(&self.durable, REOPEN_KEY, &raw),
            Err(e) => warn!(error = %e, "failed to serialize reopen marker"),
        }
    }

    pub fn clear_reopen_marker(&self) {
        self.remove(&self.durable, REOPEN_KEY);
    }

    // --- Keyword insight state ---

    pub fn insight_state(&self) -> Option<InsightState> {
        let raw = self.read(&self.tab, INSIGHT_KEY)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn set_insight_state(&self, state: &InsightState) {
        match serde_json::to_string(state) {
            Ok(raw) => self.write(&self.tab, INSIGHT_KEY, &raw),
            Err(e) => warn!(error = %e, "failed to serialize insight state"),
        }
    }

    // --- Lossy primitives ---

    fn read(&self, backend: &Arc<dyn KvBackend>, key: &str) -> Option<String> {
        match backend.get(key) {
            Ok(v) => v.filter(|s| !s.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "view-state read failed");
                None
            }
        }
    }

    fn write(&self, backend: &Arc<dyn KvBackend>, key: &str, value: &str) {
        if let Err(e) = backend.put(key, value) {
            warn!(key, error = %e, "view-state write failed");
        }
    }

    fn remove(&self, backend: &Arc<dyn KvBackend>, key: &str) {
        if let Err(e) = backend.delete(key) {
            warn!(key, error = %e, "view-state delete failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryBackend;
    use serde_json::json;

    fn store() -> (ViewStateStore, Arc<MemoryBackend>, Arc<MemoryBackend>) {
        let tab = Arc::new(MemoryBackend::new());
        let durable = Arc::new(MemoryBackend::new());
        (ViewStateStore::new(tab.clone(), durable.clone()), tab, durable)
    }

    #[test]
    fn selection_round_trip() {
        let (vs, ..) = store();
        assert_eq!(vs.selection(), None);

        vs.set_selection(&ViewSelection::Aggregate);
        assert_eq!(vs.selection(), Some(ViewSelection::Aggregate));

        vs.set_selection(&ViewSelection::Session("s1".into()));
        assert_eq!(vs.selection(), Some(ViewSelection::Session("s1".into())));

        vs.set_selection(&ViewSelection::None);
        assert_eq!(vs.selection(), None);
    }

    #[test]
    fn scroll_round_trip() {
        let (vs, ..) = store();
        assert_eq!(vs.scroll_y(), None);
        vs.set_scroll_y(1280);
        assert_eq!(vs.scroll_y(), Some(1280));
    }

    #[test]
    fn reopen_marker_lives_in_durable_store() {
        let (vs, tab, durable) = store();
        let marker = ReopenMarker {
            session_id: "s1".into(),
            listing_id: "42".into(),
            ts: 1_700_000_000,
        };
        vs.set_reopen_marker(&marker);
        assert_eq!(vs.reopen_marker(), Some(marker));
        assert!(tab.is_empty());
        assert_eq!(durable.len(), 1);

        vs.clear_reopen_marker();
        assert_eq!(vs.reopen_marker(), None);
        assert!(durable.is_empty());
    }

    #[test]
    fn unparsable_reopen_marker_is_discarded() {
        let (vs, _, durable) = store();
        durable.put(REOPEN_KEY, "{not json").unwrap();
        assert_eq!(vs.reopen_marker(), None);
        // The bad record was cleaned up, not left to fail every boot.
        assert!(durable.is_empty());
    }

    #[test]
    fn insight_state_round_trip() {
        let (vs, ..) = store();
        let state = InsightState {
            keyword: "mug".into(),
            result: json!({"volume": 10}),
            ts: 5,
        };
        vs.set_insight_state(&state);
        assert_eq!(vs.insight_state(), Some(state));
    }
}
