//! Results orchestrator — cache-first loads, fast/full fetch sequencing,
//! single-flight aggregate loads, and time-sliced progressive rendering.
//!
//! Every render decision re-checks "is this view still selected"
//! immediately before emitting, never just at fetch start: a late response
//! for an abandoned selection is discarded, and the aggregate is always
//! re-derived from the per-session caches so arrival reordering can never
//! overwrite newer data.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use prospect_core::entry::{ResultEntry, looks_structurally_incomplete};
use prospect_core::events::{ToastLevel, UiEvent, ViewSelection};
use prospect_core::session::{SessionId, SessionStatus};

use crate::controller::DashboardController;

/// Per-session in-flight marker: a second logical load for the same id is
/// coalesced away instead of interleaving cache writes.
struct LoadGuard {
    ctrl: DashboardController,
    id: SessionId,
}

impl LoadGuard {
    fn acquire(ctrl: &DashboardController, id: &str) -> Option<Self> {
        if ctrl.inner.inflight_loads.lock().insert(id.to_string()) {
            Some(Self {
                ctrl: ctrl.clone(),
                id: id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let _ = self.ctrl.inner.inflight_loads.lock().remove(&self.id);
    }
}

impl DashboardController {
    // ─────────────────────────────────────────────────────────────────────
    // Single-session load
    // ─────────────────────────────────────────────────────────────────────

    /// Load one session's results: cache first (no spinner), then a silent
    /// revalidation when the data may be stale or structurally incomplete;
    /// on a cache miss, a fast small fetch for quick paint followed by the
    /// full set rendered progressively.
    #[instrument(skip(self), fields(render_now))]
    pub async fn load_results(&self, session_id: &str, render_now: bool) {
        let Some(_guard) = LoadGuard::acquire(self, session_id) else {
            debug!(session_id, "load already in flight, coalescing");
            return;
        };

        let session = self.find_session(session_id);
        let completed = session
            .as_ref()
            .is_some_and(|s| s.status == SessionStatus::Completed);

        // A pending reopen for this session forces a fresh fetch.
        let reopen_pending = {
            let pending = self.inner.pending_reopen.lock();
            pending.as_ref().is_some_and(|m| m.session_id == session_id)
        };
        let cached = if reopen_pending {
            None
        } else {
            self.inner.cache.load(session_id, session.as_ref())
        };

        if let Some(cached) = cached.filter(|c| !c.is_empty()) {
            // Instant render from cache, no loading indicator.
            let sorted = self.sorted(&cached);
            if render_now {
                self.render_grid(
                    &ViewSelection::Session(session_id.to_string()),
                    &sorted,
                    sorted.len(),
                );
            } else if self.selection() == ViewSelection::Aggregate {
                self.render_aggregate_from_cache();
            }

            if !completed || looks_structurally_incomplete(&cached) {
                self.revalidate(session_id, render_now).await;
            }
            return;
        }

        // Cache miss. Ongoing sessions never get a blocking spinner —
        // partial data is expected there.
        self.set_loading(completed);

        let fast_limit = self.inner.settings.render.fast_limit;
        match self.inner.api.results(session_id, Some(fast_limit)).await {
            Ok(entries) => {
                let mut fast_sorted: Vec<ResultEntry> = (*self.sorted(&entries)).clone();
                fast_sorted.truncate(fast_limit);
                if let Some(session) = self.find_session(session_id) {
                    let saved = self.inner.cache.save(&session, &fast_sorted);
                    let saved = Arc::new(saved);
                    if render_now {
                        self.render_grid(
                            &ViewSelection::Session(session_id.to_string()),
                            &saved,
                            saved.len(),
                        );
                    } else if self.selection() == ViewSelection::Aggregate {
                        self.render_aggregate_from_cache();
                    }
                }
                self.set_loading(false);
            }
            Err(e) if e.is_transient() => {
                debug!(session_id, error = %e, "fast results fetch aborted/transient");
                self.set_loading(false);
            }
            Err(e) => {
                self.set_loading(false);
                self.toast(
                    ToastLevel::Error,
                    format!("Failed to load results: {}", e.user_message("Results")),
                );
            }
        }

        // Background full fetch — no spinner, progressive append.
        match self.inner.api.results(session_id, None).await {
            Ok(full) => {
                self.ingest_full_results(session_id, full, render_now);
            }
            Err(e) => {
                // Background failures never surface.
                if e.is_transient() {
                    debug!(session_id, error = %e, "background results fetch aborted/transient");
                } else {
                    warn!(session_id, error = %e, "background results fetch failed");
                }
            }
        }
    }

    /// Silent background revalidation: replace the cache and re-render only
    /// if the view is still pointed at this session or the aggregate.
    async fn revalidate(&self, session_id: &str, render_now: bool) {
        match self.inner.api.results(session_id, None).await {
            Ok(full) => self.ingest_full_results(session_id, full, render_now),
            Err(e) => debug!(session_id, error = %e, "quiet revalidation skipped/failed"),
        }
    }

    /// Cache a full fetch's results and fold them into whichever view is
    /// still current. Also retires a reopen marker whose target listing is
    /// absent from the fresh list.
    fn ingest_full_results(&self, session_id: &str, entries: Vec<ResultEntry>, render_now: bool) {
        let sorted = self.sorted(&entries);
        let Some(session) = self.find_session(session_id) else {
            return;
        };
        let saved = Arc::new(self.inner.cache.save(&session, &sorted));
        self.discard_unmatched_reopen(session_id, &saved);

        let selection = self.selection();
        if render_now && selection.is_session(session_id) {
            let from = self.rendered_count();
            self.progressive_render_session(session_id, saved, from);
        } else if selection == ViewSelection::Aggregate {
            self.render_aggregate_from_cache();
        }
    }

    /// A reopen marker whose listing never came back in the fresh full list
    /// (the product was removed) must be discarded rather than block normal
    /// rendering forever.
    fn discard_unmatched_reopen(&self, session_id: &str, entries: &[ResultEntry]) {
        let stale = {
            let pending = self.inner.pending_reopen.lock();
            pending.as_ref().is_some_and(|marker| {
                marker.session_id == session_id
                    && !entries
                        .iter()
                        .any(|e| e.listing_id_str().as_deref() == Some(marker.listing_id.as_str()))
            })
        };
        if stale {
            debug!(session_id, "reopen target absent from fresh results, discarding marker");
            self.clear_pending_reopen();
        }
    }

    pub(crate) fn clear_pending_reopen(&self) {
        *self.inner.pending_reopen.lock() = None;
        self.inner.view_store.clear_reopen_marker();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Aggregate load
    // ─────────────────────────────────────────────────────────────────────

    /// Load the all-sessions aggregate. Single-flight: a new call cancels
    /// the previous one's fetches. Paints immediately from cache, then
    /// refetches every ongoing session (completed sessions with cache are
    /// skipped), folding each response into a progressive re-render.
    #[instrument(skip(self))]
    pub async fn load_all_sessions_results(&self) {
        self.ensure_streams_attached();

        let token = {
            let mut slot = self.inner.aggregate_token.lock();
            slot.cancel();
            let fresh = self.inner.shutdown.child_token();
            *slot = fresh.clone();
            fresh
        };

        let sessions = self.sessions();
        if sessions.is_empty() {
            self.render_grid(&ViewSelection::Aggregate, &Arc::new(Vec::new()), 0);
            self.publish_sessions_changed();
            return;
        }

        // Seed and paint from whatever cache already exists.
        self.progressive_render_aggregate(self.rendered_count());

        for session in sessions {
            let ongoing = session.status == SessionStatus::Ongoing;
            let cached = self.inner.cache.load(&session.id, Some(&session));
            let have_cache = cached.as_ref().is_some_and(|c| !c.is_empty());
            if have_cache && !ongoing {
                // Nothing new can appear; the cache is authoritative.
                continue;
            }

            let ctrl = self.clone();
            let token = token.clone();
            let id = session.id.clone();
            let _ = tokio::spawn(async move {
                let entries = tokio::select! {
                    () = token.cancelled() => return,
                    r = ctrl.inner.api.results(&id, None) => match r {
                        Ok(entries) => entries,
                        Err(e) => {
                            // One session's failure never blocks the others;
                            // it simply contributes nothing this round.
                            warn!(session_id = %id, error = %e, "aggregate fetch failed for session");
                            return;
                        }
                    },
                };
                let sorted = ctrl.sorted(&entries);
                if let Some(session) = ctrl.find_session(&id) {
                    let _ = ctrl.inner.cache.save(&session, &sorted);
                }
                if token.is_cancelled() {
                    return;
                }
                if ctrl.selection() == ViewSelection::Aggregate {
                    ctrl.progressive_render_aggregate(ctrl.rendered_count());
                }
            });
        }
    }

    pub(crate) fn cancel_aggregate_load(&self) {
        self.inner.aggregate_token.lock().cancel();
    }

    /// Merged, sorted entries across every session's cache, in registry
    /// order. The caches are the authority — never raw response order.
    pub(crate) fn aggregated_entries(&self) -> Arc<Vec<ResultEntry>> {
        let sessions = self.sessions();
        let mut merged = Vec::new();
        for session in &sessions {
            if let Some(list) = self.inner.cache.load(&session.id, Some(session)) {
                merged.extend(list);
            }
        }
        self.sorted(&merged)
    }

    /// Full (non-progressive) aggregate redraw from cache, used after a
    /// cache update for a non-selected session and after sort changes.
    pub(crate) fn render_aggregate_from_cache(&self) {
        let merged = self.aggregated_entries();
        let total = merged.len();
        self.render_grid(&ViewSelection::Aggregate, &merged, total);
        self.publish_sessions_changed();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Progressive rendering
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the current render token, cancelling any progressive render
    /// still stepping for a previous view.
    pub(crate) fn new_render_token(&self) -> CancellationToken {
        let mut slot = self.inner.render_token.lock();
        slot.cancel();
        let fresh = self.inner.shutdown.child_token();
        *slot = fresh.clone();
        fresh
    }

    /// Append-batched render of one session's sorted list, starting from an
    /// already-rendered prefix. Each step re-checks cancellation, selection,
    /// and the detail pin.
    pub(crate) fn progressive_render_session(
        &self,
        session_id: &str,
        sorted: Arc<Vec<ResultEntry>>,
        initial: usize,
    ) {
        let total = sorted.len();
        let batch = self.inner.settings.render.session_batch;
        let tick = Duration::from_millis(self.inner.settings.render.session_tick_ms);
        let token = self.new_render_token();
        let view = ViewSelection::Session(session_id.to_string());

        let mut shown = initial.min(total);
        if shown == 0 && total > 0 {
            if self.selection() != view {
                return;
            }
            // Quick first paint before the batch timer starts.
            shown = self.inner.settings.render.fast_limit.min(total);
            self.render_grid(&view, &sorted, shown);
        }
        if shown >= total {
            return;
        }

        let ctrl = self.clone();
        let _ = tokio::spawn(async move {
            let mut shown = shown;
            while shown < total {
                tokio::time::sleep(tick).await;
                if token.is_cancelled() || ctrl.selection() != view || ctrl.is_detail_open() {
                    return;
                }
                shown = (shown + batch).min(total);
                ctrl.render_grid(&view, &sorted, shown);
            }
        });
    }

    /// Append-batched render of the aggregate, re-derived from cache at
    /// invocation time.
    pub(crate) fn progressive_render_aggregate(&self, initial: usize) {
        let entries = self.aggregated_entries();
        let total = entries.len();
        let batch = self.inner.settings.render.aggregate_batch;
        let tick = Duration::from_millis(self.inner.settings.render.aggregate_tick_ms);
        let token = self.new_render_token();

        let first = if initial == 0 {
            batch.min(total)
        } else {
            initial.min(total)
        };
        self.render_grid(&ViewSelection::Aggregate, &entries, first);
        if first >= total {
            return;
        }

        let ctrl = self.clone();
        let _ = tokio::spawn(async move {
            let mut shown = first;
            while shown < total {
                tokio::time::sleep(tick).await;
                if token.is_cancelled()
                    || ctrl.selection() != ViewSelection::Aggregate
                    || ctrl.is_detail_open()
                {
                    return;
                }
                shown = (shown + batch).min(total);
                ctrl.render_grid(&ViewSelection::Aggregate, &entries, shown);
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // The render primitive
    // ─────────────────────────────────────────────────────────────────────

    /// Publish a grid render: the first `shown` of `entries` for `view`.
    /// Suppressed entirely while a detail view pins the grid. Also the hook
    /// point for the reopen-after-update flow: when the pending marker's
    /// listing appears in the list, its detail view opens instead.
    pub(crate) fn render_grid(
        &self,
        view: &ViewSelection,
        entries: &Arc<Vec<ResultEntry>>,
        shown: usize,
    ) {
        if self.inner.detail.lock().open {
            return;
        }

        let target = {
            let pending = self.inner.pending_reopen.lock();
            pending.as_ref().and_then(|marker| {
                let in_scope = match view {
                    ViewSelection::Session(id) => *id == marker.session_id,
                    ViewSelection::Aggregate => true,
                    ViewSelection::None => false,
                };
                if !in_scope {
                    return None;
                }
                entries
                    .iter()
                    .find(|e| {
                        e.listing_id_str().as_deref() == Some(marker.listing_id.as_str())
                            && match view {
                                // In the aggregate, attribute by annotation.
                                ViewSelection::Aggregate => {
                                    e.session_id.as_deref() == Some(marker.session_id.as_str())
                                }
                                _ => true,
                            }
                    })
                    .cloned()
            })
        };
        if let Some(entry) = target {
            self.clear_pending_reopen();
            self.open_detail(&entry);
            return;
        }

        let shown = shown.min(entries.len());
        *self.inner.last_entries.lock() = entries.clone();
        *self.inner.rendered_count.lock() = shown;
        let _ = self.inner.emitter.emit(UiEvent::ResultsRendered {
            view: view.clone(),
            shown,
            total: entries.len(),
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
