//! The dashboard controller — one context object owning every piece of
//! shared state, injected into the stream manager, polling loop, and
//! results orchestrator through `impl` blocks in their modules.
//!
//! All state lives behind `parking_lot` mutexes inside [`ControllerInner`];
//! no lock is ever held across an `.await`. Background tasks (stream
//! readers, polling, progressive renders) are scoped to cancellation
//! tokens derived from the controller's shutdown token.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use prospect_client::ApiClient;
use prospect_client::types::ReplaceListingRequest;
use prospect_core::entry::ResultEntry;
use prospect_core::events::{SelectorOption, ToastLevel, UiEvent, ViewSelection};
use prospect_core::insight::{InsightSummary, normalize_insight};
use prospect_core::metric::{SortMetric, SortOrder, SortState};
use prospect_core::session::{Session, SessionId, SessionStatus, clamp_desired_total};
use prospect_settings::Settings;
use prospect_store::result_cache::CacheConfig;
use prospect_store::{InsightState, KvBackend, ReopenMarker, ResultCache, ViewStateStore};

use crate::emitter::UiEventEmitter;
use crate::errors::{Result, RuntimeError};
use crate::registry::SessionRegistry;
use crate::streams::StreamHandle;

/// Product-detail pin state. While a detail view is open the results grid
/// must not be redrawn underneath it.
#[derive(Debug, Default)]
pub(crate) struct DetailState {
    pub(crate) open: bool,
    pub(crate) listing_id: Option<String>,
}

pub(crate) struct ControllerInner {
    pub(crate) settings: Settings,
    pub(crate) api: ApiClient,
    pub(crate) emitter: UiEventEmitter,
    pub(crate) registry: Mutex<SessionRegistry>,
    pub(crate) cache: ResultCache,
    pub(crate) view_store: ViewStateStore,
    pub(crate) sort: Mutex<SortState>,
    pub(crate) selection: Mutex<ViewSelection>,
    pub(crate) detail: Mutex<DetailState>,
    pub(crate) pending_reopen: Mutex<Option<ReopenMarker>>,
    pub(crate) loading: Mutex<bool>,
    /// Sorted full list backing the current view; renderers read it through
    /// [`DashboardController::current_entries`] when a `ResultsRendered`
    /// event arrives.
    pub(crate) last_entries: Mutex<Arc<Vec<ResultEntry>>>,
    pub(crate) rendered_count: Mutex<usize>,
    pub(crate) streams: Mutex<HashMap<SessionId, StreamHandle>>,
    pub(crate) stream_retries: Mutex<HashMap<SessionId, u32>>,
    pub(crate) auto_reconnect_issued: Mutex<HashMap<SessionId, tokio::time::Instant>>,
    pub(crate) published_controls: Mutex<HashMap<SessionId, prospect_core::events::ReconnectControl>>,
    /// Per-session logical-operation serialization: a second load for an id
    /// already in flight is coalesced away.
    pub(crate) inflight_loads: Mutex<HashSet<SessionId>>,
    /// Single-flight token for the aggregate load; replaced on every new one.
    pub(crate) aggregate_token: Mutex<CancellationToken>,
    /// Token scoping the current progressive render; replaced on view change.
    pub(crate) render_token: Mutex<CancellationToken>,
    pub(crate) poll_task: Mutex<Option<CancellationToken>>,
    pub(crate) aggregate_refresh_task: Mutex<Option<CancellationToken>>,
    pub(crate) shutdown: CancellationToken,
}

/// The dashboard engine. Clone-cheap; every clone shares the same state.
#[derive(Clone)]
pub struct DashboardController {
    pub(crate) inner: Arc<ControllerInner>,
}

impl DashboardController {
    /// Build a controller over the given storage backends. `tab` holds
    /// per-tab state (selection, scroll, cache); `durable` holds state that
    /// must survive a full reload (the reopen marker).
    pub fn new(settings: Settings, tab: Arc<dyn KvBackend>, durable: Arc<dyn KvBackend>) -> Self {
        let api = ApiClient::new(&settings.api);
        let cache = ResultCache::new(
            tab.clone(),
            CacheConfig {
                chunk_size: settings.cache.chunk_size,
                max_chunks: settings.cache.max_chunks,
                legacy_cap: settings.cache.legacy_cap,
            },
        );
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(ControllerInner {
                api,
                emitter: UiEventEmitter::new(),
                registry: Mutex::new(SessionRegistry::default()),
                cache,
                view_store: ViewStateStore::new(tab, durable),
                sort: Mutex::new(SortState::default()),
                selection: Mutex::new(ViewSelection::None),
                detail: Mutex::new(DetailState::default()),
                pending_reopen: Mutex::new(None),
                loading: Mutex::new(false),
                last_entries: Mutex::new(Arc::new(Vec::new())),
                rendered_count: Mutex::new(0),
                streams: Mutex::new(HashMap::new()),
                stream_retries: Mutex::new(HashMap::new()),
                auto_reconnect_issued: Mutex::new(HashMap::new()),
                published_controls: Mutex::new(HashMap::new()),
                inflight_loads: Mutex::new(HashSet::new()),
                aggregate_token: Mutex::new(shutdown.child_token()),
                render_token: Mutex::new(shutdown.child_token()),
                poll_task: Mutex::new(None),
                aggregate_refresh_task: Mutex::new(None),
                shutdown,
                settings,
            }),
        }
    }

    /// Subscribe to UI events.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.inner.emitter.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Boot
    // ─────────────────────────────────────────────────────────────────────

    /// Bring the controller up from the server-injected session snapshot:
    /// hydrate caches, attach streams for ongoing sessions, start the
    /// reconnect sampler, then restore the persisted selection (or honor a
    /// pending reopen marker).
    #[instrument(skip_all, fields(sessions = initial.len()))]
    pub async fn boot(&self, initial: Vec<Session>) {
        {
            let mut registry = self.inner.registry.lock();
            *registry = SessionRegistry::new(initial);
        }

        // Seed the in-memory cache from persisted records so view switches
        // are instant from the first frame.
        let snapshot = self.sessions();
        for session in &snapshot {
            let _ = self.inner.cache.load(&session.id, Some(session));
        }
        self.publish_sessions_changed();

        self.ensure_streams_attached();
        self.spawn_reconnect_tick();

        if let Some(marker) = self.inner.view_store.reopen_marker() {
            if self.inner.registry.lock().contains(&marker.session_id) {
                info!(session_id = %marker.session_id, listing_id = %marker.listing_id, "resuming reopen-after-update flow");
                let id = marker.session_id.clone();
                *self.inner.pending_reopen.lock() = Some(marker);
                self.set_selection_state(ViewSelection::Session(id.clone()));
                self.attach_stream(&id);
                // Forced fresh load; the pending marker suppresses the cache.
                self.load_results(&id, true).await;
                self.update_polling();
                self.update_aggregate_refresh();
                return;
            }
            // Marker for a session that no longer exists — discard it.
            self.inner.view_store.clear_reopen_marker();
        }

        let has_sessions = !self.inner.registry.lock().is_empty();
        let saved = self.inner.view_store.selection().unwrap_or_default();
        let restored = if !has_sessions {
            ViewSelection::None
        } else {
            match saved {
                ViewSelection::Session(id) if !self.inner.registry.lock().contains(&id) => {
                    ViewSelection::Aggregate
                }
                ViewSelection::None => ViewSelection::Aggregate,
                other => other,
            }
        };
        self.select(restored).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Selection & navigation
    // ─────────────────────────────────────────────────────────────────────

    /// Switch the active view. Cancels any in-flight aggregate load and
    /// progressive render tied to the previous selection.
    pub async fn select(&self, selection: ViewSelection) {
        self.cancel_aggregate_load();
        let _ = self.new_render_token();
        *self.inner.rendered_count.lock() = 0;

        // Selection changes always exit detail mode.
        let was_detail = {
            let mut detail = self.inner.detail.lock();
            let was = detail.open;
            detail.open = false;
            detail.listing_id = None;
            was
        };
        if was_detail {
            let _ = self.inner.emitter.emit(UiEvent::DetailClosed);
        }

        // An empty selection falls back to the aggregate while sessions
        // exist; only a truly empty registry shows the empty prompt.
        let selection = match selection {
            ViewSelection::None if !self.inner.registry.lock().is_empty() => ViewSelection::Aggregate,
            other => other,
        };

        self.set_selection_state(selection.clone());
        match &selection {
            ViewSelection::None => {
                self.stop_aggregate_refresh();
                let _ = self.inner.emitter.emit(UiEvent::EmptyPrompt);
            }
            ViewSelection::Aggregate => {
                self.load_all_sessions_results().await;
            }
            ViewSelection::Session(id) => {
                self.stop_aggregate_refresh();
                self.attach_stream(id);
                self.load_selected_session_view(id).await;
            }
        }
        self.update_polling();
        self.update_aggregate_refresh();
    }

    pub(crate) fn set_selection_state(&self, selection: ViewSelection) {
        self.inner.view_store.set_selection(&selection);
        *self.inner.selection.lock() = selection;
    }

    /// The cache-first load path shared by selection changes, boot restore,
    /// and back-from-detail navigation.
    pub(crate) async fn load_selected_session_view(&self, id: &str) {
        let session = self.find_session(id);
        let completed = session
            .as_ref()
            .is_some_and(|s| s.status == SessionStatus::Completed);
        if completed {
            self.load_results(id, true).await;
            return;
        }
        let cached = self.inner.cache.load(id, session.as_ref());
        match cached {
            Some(entries) if !entries.is_empty() => {
                let sorted = self.sorted(&entries);
                self.render_grid(&ViewSelection::Session(id.to_string()), &sorted, sorted.len());
            }
            _ => {
                // Partial data for an ongoing session is expected; no spinner.
                self.set_loading(false);
                self.render_grid(&ViewSelection::Session(id.to_string()), &Arc::new(Vec::new()), 0);
            }
        }
    }

    /// Open a product's detail view. Grid renders are pinned until closed.
    pub fn open_detail(&self, entry: &ResultEntry) {
        let listing_id = entry.listing_id_str().unwrap_or_default();
        {
            let mut detail = self.inner.detail.lock();
            detail.open = true;
            detail.listing_id = Some(listing_id.clone());
        }
        let session_id = match self.selection() {
            ViewSelection::Session(id) => Some(id),
            _ => entry.session_id.clone(),
        };
        let _ = self.inner.emitter.emit(UiEvent::DetailOpened {
            session_id,
            listing_id,
        });
    }

    /// Leave the detail view and restore the selection's normal render.
    pub async fn close_detail(&self) {
        {
            let mut detail = self.inner.detail.lock();
            detail.open = false;
            detail.listing_id = None;
        }
        let _ = self.inner.emitter.emit(UiEvent::DetailClosed);

        match self.selection() {
            ViewSelection::None => {
                if self.inner.registry.lock().is_empty() {
                    let _ = self.inner.emitter.emit(UiEvent::EmptyPrompt);
                } else {
                    self.select(ViewSelection::Aggregate).await;
                }
            }
            ViewSelection::Aggregate => self.load_all_sessions_results().await,
            ViewSelection::Session(id) => self.load_selected_session_view(&id).await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start a research session: POST start, then optimistically insert the
    /// local session and attach its stream before any server event arrives.
    #[instrument(skip(self))]
    pub async fn create_session(&self, keyword: &str, desired_total: u64) -> Result<SessionId> {
        let keyword = keyword.trim().to_string();
        let desired = clamp_desired_total(desired_total);
        let id = match self.inner.api.start(&keyword, desired).await {
            Ok(id) => id,
            Err(e) => {
                self.toast(ToastLevel::Error, format!("Failed to start: {}", e.user_message("Start")));
                return Err(e.into());
            }
        };

        let session = Session::optimistic(id.clone(), keyword, desired);
        {
            let mut registry = self.inner.registry.lock();
            registry.add(session);
        }
        self.publish_sessions_changed();
        self.attach_stream(&id);
        self.update_polling();
        info!(session_id = %id, "session started");
        Ok(id)
    }

    /// Delete a session: rejected while ongoing; on success purges the
    /// stream handle and cache and falls the selection back gracefully.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let Some(session) = self.find_session(id) else {
            return Err(RuntimeError::SessionNotFound(id.to_string()));
        };
        if session.status == SessionStatus::Ongoing {
            self.toast(ToastLevel::Error, "Cannot delete while session is ongoing");
            return Err(RuntimeError::SessionStillRunning(id.to_string()));
        }

        if let Err(e) = self.inner.api.delete(id).await {
            self.toast(ToastLevel::Error, format!("Delete failed: {}", e.user_message("Delete")));
            return Err(e.into());
        }

        self.detach_stream(id);
        self.inner.cache.remove(id);
        {
            let mut registry = self.inner.registry.lock();
            let _ = registry.remove(id);
        }
        self.publish_sessions_changed();

        match self.selection() {
            ViewSelection::Session(selected) if selected == id => {
                let has_sessions = !self.inner.registry.lock().is_empty();
                if has_sessions {
                    self.select(ViewSelection::Aggregate).await;
                } else {
                    self.select(ViewSelection::None).await;
                }
            }
            ViewSelection::Aggregate => {
                // Keep the aggregate current without the deleted contribution.
                self.load_all_sessions_results().await;
            }
            _ => {}
        }

        self.toast(ToastLevel::Success, "Session deleted.");
        self.update_polling();
        Ok(())
    }

    /// Apply a session mutation and republish the derived views.
    pub(crate) fn update_session(&self, session: Session) {
        {
            let mut registry = self.inner.registry.lock();
            let _ = registry.upsert(session);
        }
        self.publish_sessions_changed();
        self.update_polling();
        self.update_aggregate_refresh();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Replace-listing ("update product") flow
    // ─────────────────────────────────────────────────────────────────────

    /// POST replace-listing, then invalidate the session's cache, persist
    /// the durable reopen marker, and ask the shell for a full reload. The
    /// next [`boot`](Self::boot) re-selects the session and re-opens the
    /// product's detail view once it reappears.
    #[instrument(skip(self, entry))]
    pub async fn replace_listing(&self, entry: &ResultEntry) -> Result<()> {
        let listing_id = entry.listing_id_str().unwrap_or_default();
        let session_id = match self.selection() {
            ViewSelection::Session(id) => id,
            _ => entry.session_id.clone().unwrap_or_default(),
        };
        let request = ReplaceListingRequest {
            listing_id: entry
                .listing_id
                .as_ref()
                .map(|v| serde_json::to_value(v).unwrap_or_default())
                .unwrap_or_default(),
            session_id: id_as_json(&session_id),
            forced_personalize: entry.has_any_variations(),
        };

        if let Err(e) = self.inner.api.replace_listing(&request).await {
            self.toast(ToastLevel::Error, format!("Update failed: {}", e.user_message("Update")));
            return Err(e.into());
        }

        // Bust every cache layer so the reload fetches fresh data.
        self.inner.cache.remove(&session_id);
        self.inner.view_store.set_reopen_marker(&ReopenMarker {
            session_id,
            listing_id,
            ts: chrono::Utc::now().timestamp_millis(),
        });
        let _ = self.inner.emitter.emit(UiEvent::ReloadRequested);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sort state
    // ─────────────────────────────────────────────────────────────────────

    /// Change the sort state and redraw the current view from cache.
    pub async fn set_sort(&self, metric: SortMetric, order: SortOrder) {
        *self.inner.sort.lock() = SortState { metric, order };
        // Any progressive render still stepping holds the old order.
        let _ = self.new_render_token();
        match self.selection() {
            ViewSelection::Session(id) => {
                let session = self.find_session(&id);
                if let Some(entries) = self.inner.cache.load(&id, session.as_ref()) {
                    let sorted = self.sorted(&entries);
                    self.render_grid(&ViewSelection::Session(id), &sorted, sorted.len());
                }
            }
            ViewSelection::Aggregate => self.render_aggregate_from_cache(),
            ViewSelection::None => {}
        }
    }

    pub fn sort_state(&self) -> SortState {
        *self.inner.sort.lock()
    }

    pub(crate) fn sorted(&self, entries: &[ResultEntry]) -> Arc<Vec<ResultEntry>> {
        let state = self.sort_state();
        Arc::new(prospect_core::metric::sort_with(entries, state))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Keyword insight (companion page)
    // ─────────────────────────────────────────────────────────────────────

    /// Single-keyword metric lookup. The raw result persists per tab so the
    /// page can restore the last lookup on boot. Errors surface as status
    /// text through the returned error, not as toasts.
    pub async fn lookup_keyword(&self, keyword: &str) -> Result<InsightSummary> {
        let body = self.inner.api.keyword_insight(keyword).await?;
        let summary = normalize_insight(keyword.trim(), &body);
        self.inner.view_store.set_insight_state(&InsightState {
            keyword: keyword.trim().to_string(),
            result: body,
            ts: chrono::Utc::now().timestamp_millis(),
        });
        Ok(summary)
    }

    /// The last successful lookup, restored from the tab store.
    pub fn restored_insight(&self) -> Option<InsightSummary> {
        let state = self.inner.view_store.insight_state()?;
        Some(normalize_insight(&state.keyword, &state.result))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Derived views & accessors
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn publish_sessions_changed(&self) {
        let _ = self.inner.emitter.emit(UiEvent::SessionListChanged);
        let options = self.selector_options();
        let _ = self.inner.emitter.emit(UiEvent::SelectorOptionsChanged { options });
    }

    /// Selector options: the aggregate entry (with summed known counts)
    /// plus one entry per session, newest first. An empty placeholder only
    /// exists while no sessions do.
    pub fn selector_options(&self) -> Vec<SelectorOption> {
        let sessions = self.sessions();
        let mut options = Vec::with_capacity(sessions.len() + 2);
        if sessions.is_empty() {
            options.push(SelectorOption {
                value: String::new(),
                label: "Select...".to_string(),
            });
        }
        let total = self.inner.cache.total_known_count();
        options.push(SelectorOption {
            value: ViewSelection::AGGREGATE_SENTINEL.to_string(),
            label: if total > 0 {
                format!("All Sessions — aggregated • {total} products")
            } else {
                "All Sessions — aggregated".to_string()
            },
        });
        for session in &sessions {
            let date = session.created_at.split('T').next().unwrap_or_default();
            let mut label = format!("{} ({date})", session.keyword);
            if let Some(count) = self.inner.cache.count(&session.id) {
                label.push_str(&format!(" • {count} products"));
            }
            options.push(SelectorOption {
                value: session.id.clone(),
                label,
            });
        }
        options
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.lock().snapshot()
    }

    pub fn find_session(&self, id: &str) -> Option<Session> {
        self.inner.registry.lock().find(id).cloned()
    }

    pub fn selection(&self) -> ViewSelection {
        self.inner.selection.lock().clone()
    }

    /// The sorted entry list backing the most recent render.
    pub fn current_entries(&self) -> Arc<Vec<ResultEntry>> {
        self.inner.last_entries.lock().clone()
    }

    pub fn rendered_count(&self) -> usize {
        *self.inner.rendered_count.lock()
    }

    pub fn is_detail_open(&self) -> bool {
        self.inner.detail.lock().open
    }

    /// Persisted scroll offset passthrough for the shell.
    pub fn scroll_y(&self) -> Option<u64> {
        self.inner.view_store.scroll_y()
    }

    pub fn set_scroll_y(&self, y: u64) {
        self.inner.view_store.set_scroll_y(y);
    }

    pub(crate) fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        let _ = self.inner.emitter.emit(UiEvent::Toast {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn set_loading(&self, visible: bool) {
        let mut loading = self.inner.loading.lock();
        if *loading != visible {
            *loading = visible;
            drop(loading);
            let _ = self.inner.emitter.emit(UiEvent::LoadingChanged { visible });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────

    /// Tear down every timer and stream. Safe to call more than once.
    pub fn shutdown(&self) {
        info!("dashboard controller shutting down");
        self.inner.shutdown.cancel();
        let mut streams = self.inner.streams.lock();
        for handle in streams.values() {
            handle.cancel.cancel();
        }
        streams.clear();
        drop(streams);
        if let Some(token) = self.inner.poll_task.lock().take() {
            token.cancel();
        }
        if let Some(token) = self.inner.aggregate_refresh_task.lock().take() {
            token.cancel();
        }
    }
}

/// Session ids are strings locally but the backend serializes numeric ids
/// as numbers; send whichever shape round-trips.
fn id_as_json(id: &str) -> serde_json::Value {
    match id.parse::<i64>() {
        Ok(n) => serde_json::Value::from(n),
        Err(_) => serde_json::Value::from(id),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
