//! Stream manager — one SSE reader per ongoing session.
//!
//! Push is the primary channel; heartbeats (message receipt, never mere
//! connection-open) certify liveness. Transport errors tear the handle down
//! and enter the exponential-backoff reconnect machine; the 500 ms sampler
//! drives the staged disable → countdown → manual → auto reconnect control.

pub mod state;

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use prospect_client::types::StreamEvent;
use prospect_client::SessionEventStream;
use prospect_core::events::{ToastLevel, UiEvent, ViewSelection};
use prospect_core::session::{SessionId, SessionStatus};

use crate::controller::DashboardController;
use crate::errors::Result;

/// Live connection bookkeeping for one session.
#[derive(Debug)]
pub(crate) struct StreamHandle {
    pub(crate) cancel: CancellationToken,
    /// Connection reached the open state (still not a liveness signal).
    pub(crate) open: bool,
    pub(crate) attached_at: Instant,
    pub(crate) last_heartbeat: Option<Instant>,
}

impl DashboardController {
    /// Attach (or re-attach) the push stream for a session. Closes any
    /// existing handle first. No-op for unknown or terminal sessions.
    pub(crate) fn attach_stream(&self, session_id: &str) {
        let Some(session) = self.find_session(session_id) else {
            return;
        };
        if session.is_terminal() {
            return;
        }

        let cancel = self.inner.shutdown.child_token();
        {
            let mut streams = self.inner.streams.lock();
            if let Some(previous) = streams.remove(session_id) {
                previous.cancel.cancel();
            }
            let _ = streams.insert(
                session_id.to_string(),
                StreamHandle {
                    cancel: cancel.clone(),
                    open: false,
                    attached_at: Instant::now(),
                    last_heartbeat: None,
                },
            );
            metrics::gauge!("streams_active").set(streams.len() as f64);
        }

        let ctrl = self.clone();
        let id = session_id.to_string();
        let _ = tokio::spawn(async move { ctrl.run_stream_reader(id, cancel).await });
    }

    /// Attach streams for every ongoing session that has none (boot, and
    /// each aggregate load).
    pub(crate) fn ensure_streams_attached(&self) {
        let missing: Vec<SessionId> = {
            let registry = self.inner.registry.lock();
            let streams = self.inner.streams.lock();
            registry
                .iter()
                .filter(|s| s.status == SessionStatus::Ongoing && !streams.contains_key(&s.id))
                .map(|s| s.id.clone())
                .collect()
        };
        for id in missing {
            self.attach_stream(&id);
        }
    }

    /// Drop a session's handle and reconnect bookkeeping (delete path).
    pub(crate) fn detach_stream(&self, session_id: &str) {
        let mut streams = self.inner.streams.lock();
        if let Some(handle) = streams.remove(session_id) {
            handle.cancel.cancel();
        }
        metrics::gauge!("streams_active").set(streams.len() as f64);
        drop(streams);
        let _ = self.inner.stream_retries.lock().remove(session_id);
        let _ = self.inner.auto_reconnect_issued.lock().remove(session_id);
        let _ = self.inner.published_controls.lock().remove(session_id);
    }

    /// True only when the handle exists, the connection is open, and the
    /// heartbeat is within the staleness window.
    pub fn is_stream_alive(&self, session_id: &str) -> bool {
        let streams = self.inner.streams.lock();
        let Some(handle) = streams.get(session_id) else {
            return false;
        };
        let age = handle.last_heartbeat.map(|t| Instant::now() - t);
        state::is_alive(handle.open, age, &self.inner.settings.timing)
    }

    async fn run_stream_reader(self, session_id: String, cancel: CancellationToken) {
        let connected = tokio::select! {
            () = cancel.cancelled() => return,
            r = SessionEventStream::connect(&self.inner.api, &session_id) => r,
        };
        let mut stream = match connected {
            Ok(s) => s,
            Err(e) => {
                warn!(session_id, error = %e, "stream open failed");
                self.on_stream_error(&session_id, &cancel);
                return;
            }
        };

        // Open: reset the retry budget. Heartbeats only come from messages.
        {
            let mut streams = self.inner.streams.lock();
            match streams.get_mut(&session_id) {
                Some(handle) if !cancel.is_cancelled() => handle.open = true,
                _ => return,
            }
        }
        let _ = self.inner.stream_retries.lock().insert(session_id.clone(), 0);
        self.publish_sessions_changed();

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return,
                ev = stream.next_event() => ev,
            };
            match next {
                Some(Ok(event)) => {
                    {
                        let mut streams = self.inner.streams.lock();
                        if let Some(handle) = streams.get_mut(&session_id) {
                            handle.last_heartbeat = Some(Instant::now());
                        }
                    }
                    let _ = self.inner.auto_reconnect_issued.lock().remove(&session_id);
                    self.handle_stream_event(&session_id, event).await;
                }
                Some(Err(e)) => {
                    warn!(session_id, error = %e, "stream transport error");
                    self.on_stream_error(&session_id, &cancel);
                    return;
                }
                None => {
                    let still_ongoing = self
                        .find_session(&session_id)
                        .is_some_and(|s| s.status == SessionStatus::Ongoing);
                    if still_ongoing {
                        debug!(session_id, "stream closed while session ongoing");
                        self.on_stream_error(&session_id, &cancel);
                    } else {
                        // Terminal session: retire the handle quietly.
                        if !cancel.is_cancelled() {
                            let mut streams = self.inner.streams.lock();
                            let _ = streams.remove(&session_id);
                            metrics::gauge!("streams_active").set(streams.len() as f64);
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Transport-failure path: discard the handle (and with it the
    /// heartbeat), re-render, and enter the backoff machine. A cancelled
    /// token means this reader was replaced or shut down — nothing to do.
    fn on_stream_error(&self, session_id: &str, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        {
            let mut streams = self.inner.streams.lock();
            let _ = streams.remove(session_id);
            metrics::gauge!("streams_active").set(streams.len() as f64);
        }
        self.publish_sessions_changed();
        self.schedule_reconnect(session_id);
    }

    /// Schedule a reattach with exponential backoff. The attempt counter
    /// persists across repeated failures until a successful open resets it.
    pub(crate) fn schedule_reconnect(&self, session_id: &str) {
        let Some(session) = self.find_session(session_id) else {
            return;
        };
        if session.is_terminal() {
            return;
        }
        let attempt = {
            let mut retries = self.inner.stream_retries.lock();
            let entry = retries.entry(session_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let delay = state::backoff_delay(attempt, &self.inner.settings.timing);
        debug!(session_id, attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        metrics::counter!("stream_reconnects_scheduled").increment(1);

        let ctrl = self.clone();
        let id = session_id.to_string();
        let shutdown = self.inner.shutdown.clone();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            ctrl.attach_stream(&id);
            if ctrl.selection() == ViewSelection::Aggregate {
                ctrl.load_all_sessions_results().await;
            }
        });
    }

    /// Explicit reconnect call (manual button or the auto-reconnect path):
    /// refresh status/progress from the response, then either re-attach the
    /// stream or — on completion — ingest any inline entries directly.
    #[instrument(skip(self))]
    pub async fn reconnect_session(&self, session_id: &str) -> Result<()> {
        if self.is_stream_alive(session_id) {
            self.toast(
                ToastLevel::Error,
                "Already receiving live updates — reconnect disabled.",
            );
            return Ok(());
        }

        let mut out = match self.inner.api.reconnect(session_id).await {
            Ok(out) => out,
            Err(e) => {
                self.toast(
                    ToastLevel::Error,
                    format!("Reconnect failed: {}", e.user_message("Reconnect")),
                );
                self.set_loading(false);
                return Err(e.into());
            }
        };

        let inline_entries = out.take_entries();
        let completed = out.is_completed();
        let updated = {
            let mut registry = self.inner.registry.lock();
            let Some(local) = registry.find_mut(session_id) else {
                warn!(session_id, "reconnect response for unknown session");
                return Ok(());
            };
            if let Some(status) = out.parsed_status() {
                let _ = local.adopt_status(status);
            }
            if let Some(progress) = out.progress.take() {
                local.progress = progress;
            }
            if local.status == SessionStatus::Completed {
                let count = (!inline_entries.is_empty()).then(|| inline_entries.len() as u64);
                local.normalize_completed(count);
            }
            local.clone()
        };
        self.update_session(updated.clone());
        self.toast(
            ToastLevel::Success,
            if completed {
                "Session Completed."
            } else {
                "Reconnected — resuming live updates…"
            },
        );

        if completed {
            if inline_entries.is_empty() {
                match self.selection() {
                    sel if sel.is_session(session_id) => self.load_results(session_id, true).await,
                    ViewSelection::Aggregate => self.load_all_sessions_results().await,
                    _ => {}
                }
            } else {
                // Skip the refetch: the reconnect response already carried
                // the full result set.
                let sorted = self.sorted(&inline_entries);
                let saved = self.inner.cache.save(&updated, &sorted);
                match self.selection() {
                    sel if sel.is_session(session_id) => {
                        let from = self.rendered_count();
                        self.progressive_render_session(session_id, std::sync::Arc::new(saved), from);
                    }
                    ViewSelection::Aggregate => self.render_aggregate_from_cache(),
                    _ => {}
                }
            }
        } else {
            self.attach_stream(session_id);
        }
        self.update_polling();
        self.set_loading(false);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stream event dispatch
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) async fn handle_stream_event(&self, session_id: &str, event: StreamEvent) {
        match event {
            StreamEvent::Snapshot {
                status,
                progress,
                entries_count,
            } => {
                let Some(updated) = self.apply_snapshot(session_id, status, progress, entries_count)
                else {
                    return;
                };
                self.update_session(updated.clone());
                if let Some(count) = entries_count {
                    self.inner.cache.record_count(session_id, count);
                    // Snapshot refreshes results only when it reports a
                    // finished job with something to show.
                    if updated.status == SessionStatus::Completed && count > 0 {
                        match self.selection() {
                            ViewSelection::Aggregate => self.load_all_sessions_results().await,
                            sel => {
                                let render_now = sel.is_session(session_id);
                                self.load_results(session_id, render_now).await;
                            }
                        }
                    }
                } else {
                    warn!(session_id, "snapshot missing entries_count");
                }
            }
            StreamEvent::Stage { stage, update } => {
                let updated = {
                    let mut registry = self.inner.registry.lock();
                    let Some(local) = registry.find_mut(session_id) else {
                        warn!(session_id, "stage event for unknown session");
                        return;
                    };
                    local.apply_stage_update(stage, update);
                    local.clone()
                };
                self.update_session(updated);
            }
            StreamEvent::Completed { entries_count } => {
                let updated = {
                    let mut registry = self.inner.registry.lock();
                    let Some(local) = registry.find_mut(session_id) else {
                        warn!(session_id, "completed event for unknown session");
                        return;
                    };
                    let _ = local.adopt_status(SessionStatus::Completed);
                    if entries_count.is_some() {
                        local.entries_count = entries_count;
                    }
                    local.normalize_completed(entries_count);
                    local.clone()
                };
                info!(session_id, ?entries_count, "session completed");
                self.update_session(updated);
                if let Some(count) = entries_count {
                    self.inner.cache.record_count(session_id, count);
                }
                match self.selection() {
                    ViewSelection::Aggregate => self.load_all_sessions_results().await,
                    sel if sel.is_session(session_id) => self.load_results(session_id, true).await,
                    _ => {}
                }
            }
        }
    }

    fn apply_snapshot(
        &self,
        session_id: &str,
        status: Option<SessionStatus>,
        progress: Option<prospect_core::session::Progress>,
        entries_count: Option<u64>,
    ) -> Option<prospect_core::session::Session> {
        let mut registry = self.inner.registry.lock();
        let Some(local) = registry.find_mut(session_id) else {
            warn!(session_id, "snapshot for unknown session");
            return None;
        };
        if let Some(status) = status {
            let _ = local.adopt_status(status);
        }
        if let Some(progress) = progress {
            local.progress = progress;
        }
        if entries_count.is_some() {
            local.entries_count = entries_count;
        }
        if local.status == SessionStatus::Completed {
            local.normalize_completed(entries_count);
        }
        Some(local.clone())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconnect-control sampler
    // ─────────────────────────────────────────────────────────────────────

    /// Start the 500 ms tick that samples stream liveness for every ongoing
    /// session, publishes control-state changes, and issues throttled
    /// auto-reconnects.
    pub(crate) fn spawn_reconnect_tick(&self) {
        let ctrl = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let tick = Duration::from_millis(self.inner.settings.timing.reconnect_tick_ms);
        let _ = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                ctrl.reconnect_tick().await;
            }
        });
    }

    pub(crate) async fn reconnect_tick(&self) {
        let timing = self.inner.settings.timing.clone();
        let ongoing: Vec<SessionId> = {
            let registry = self.inner.registry.lock();
            registry
                .iter()
                .filter(|s| s.status == SessionStatus::Ongoing)
                .map(|s| s.id.clone())
                .collect()
        };
        let now = Instant::now();

        for id in ongoing {
            let (alive, signal_age) = {
                let streams = self.inner.streams.lock();
                match streams.get(&id) {
                    Some(handle) => {
                        let heartbeat_age = handle.last_heartbeat.map(|t| now - t);
                        let alive = state::is_alive(handle.open, heartbeat_age, &timing);
                        // Before the first heartbeat, staleness is measured
                        // from attach time.
                        let signal_age = now - handle.last_heartbeat.unwrap_or(handle.attached_at);
                        (alive, Some(signal_age))
                    }
                    None => (false, None),
                }
            };

            let control = state::reconnect_control(alive, signal_age, &timing);
            let changed = {
                let mut published = self.inner.published_controls.lock();
                published.insert(id.clone(), control) != Some(control)
            };
            if changed {
                let _ = self.inner.emitter.emit(UiEvent::ReconnectControlChanged {
                    session_id: id.clone(),
                    control,
                });
            }

            let last_issued_age = self
                .inner
                .auto_reconnect_issued
                .lock()
                .get(&id)
                .map(|t| now - *t);
            if state::should_auto_reconnect(alive, signal_age, last_issued_age, &timing) {
                let _ = self.inner.auto_reconnect_issued.lock().insert(id.clone(), now);
                metrics::counter!("stream_auto_reconnects").increment(1);
                debug!(session_id = %id, "auto-reconnect issued");
                let ctrl = self.clone();
                let id = id.clone();
                let _ = tokio::spawn(async move {
                    let _ = ctrl.reconnect_session(&id).await;
                });
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use prospect_core::events::ReconnectControl;
    use prospect_core::session::Session;
    use prospect_settings::Settings;
    use prospect_store::MemoryBackend;

    fn controller() -> DashboardController {
        let mut settings = Settings::default();
        settings.api.base_url = "http://127.0.0.1:1".to_string();
        DashboardController::new(
            settings,
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
        )
    }

    fn insert_handle(ctrl: &DashboardController, id: &str, open: bool, heartbeat: Option<Instant>) {
        let _ = ctrl.inner.streams.lock().insert(
            id.to_string(),
            StreamHandle {
                cancel: ctrl.inner.shutdown.child_token(),
                open,
                attached_at: Instant::now(),
                last_heartbeat: heartbeat,
            },
        );
    }

    fn published_control(ctrl: &DashboardController, id: &str) -> Option<ReconnectControl> {
        ctrl.inner.published_controls.lock().get(id).copied()
    }

    #[tokio::test(start_paused = true)]
    async fn control_disabled_while_heartbeat_fresh() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "kw", 5));
        insert_handle(&ctrl, "s1", true, Some(Instant::now()));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        ctrl.reconnect_tick().await;
        assert_eq!(published_control(&ctrl, "s1"), Some(ReconnectControl::Disabled));
        assert!(ctrl.is_stream_alive("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn control_walks_through_countdown_to_enabled() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "kw", 5));
        insert_handle(&ctrl, "s1", true, Some(Instant::now()));

        // 3s stale: past grace, inside the countdown window.
        tokio::time::advance(Duration::from_millis(3_000)).await;
        ctrl.reconnect_tick().await;
        assert_eq!(published_control(&ctrl, "s1"), Some(ReconnectControl::Countdown(3)));
        assert!(!ctrl.is_stream_alive("s1"));

        // 7s stale: manual reconnect unlocked, auto threshold not reached.
        tokio::time::advance(Duration::from_millis(4_000)).await;
        ctrl.reconnect_tick().await;
        assert_eq!(published_control(&ctrl, "s1"), Some(ReconnectControl::Enabled));
        assert!(ctrl.inner.auto_reconnect_issued.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reconnect_once_per_window() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "kw", 5));
        insert_handle(&ctrl, "s1", true, Some(Instant::now()));

        tokio::time::advance(Duration::from_millis(11_000)).await;
        ctrl.reconnect_tick().await;
        let first = *ctrl.inner.auto_reconnect_issued.lock().get("s1").unwrap();

        // Within the rolling window: throttled, stamp unchanged.
        tokio::time::advance(Duration::from_millis(500)).await;
        ctrl.reconnect_tick().await;
        assert_eq!(*ctrl.inner.auto_reconnect_issued.lock().get("s1").unwrap(), first);

        // Past the window: a second auto-reconnect is allowed.
        tokio::time::advance(Duration::from_millis(10_000)).await;
        ctrl.reconnect_tick().await;
        assert_ne!(*ctrl.inner.auto_reconnect_issued.lock().get("s1").unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_resets_the_clock() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "kw", 5));
        insert_handle(&ctrl, "s1", true, Some(Instant::now()));

        tokio::time::advance(Duration::from_millis(7_000)).await;
        ctrl.reconnect_tick().await;
        assert_eq!(published_control(&ctrl, "s1"), Some(ReconnectControl::Enabled));

        // A fresh heartbeat flips the control straight back to disabled.
        if let Some(handle) = ctrl.inner.streams.lock().get_mut("s1") {
            handle.last_heartbeat = Some(Instant::now());
        }
        ctrl.reconnect_tick().await;
        assert_eq!(published_control(&ctrl, "s1"), Some(ReconnectControl::Disabled));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_sessions_are_not_sampled() {
        let ctrl = controller();
        let mut s = Session::optimistic("s1", "kw", 5);
        s.status = SessionStatus::Completed;
        ctrl.inner.registry.lock().add(s);

        tokio::time::advance(Duration::from_millis(20_000)).await;
        ctrl.reconnect_tick().await;
        assert!(published_control(&ctrl, "s1").is_none());
        assert!(ctrl.inner.auto_reconnect_issued.lock().is_empty());
    }

    #[tokio::test]
    async fn attach_skips_terminal_sessions() {
        let ctrl = controller();
        let mut s = Session::optimistic("s1", "kw", 5);
        s.status = SessionStatus::Failed;
        ctrl.inner.registry.lock().add(s);

        ctrl.attach_stream("s1");
        assert!(ctrl.inner.streams.lock().is_empty());
    }

    #[tokio::test]
    async fn detach_clears_all_bookkeeping() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "kw", 5));
        insert_handle(&ctrl, "s1", true, Some(Instant::now()));
        let _ = ctrl.inner.stream_retries.lock().insert("s1".into(), 3);
        let _ = ctrl
            .inner
            .auto_reconnect_issued
            .lock()
            .insert("s1".into(), Instant::now());

        ctrl.detach_stream("s1");
        assert!(ctrl.inner.streams.lock().is_empty());
        assert!(ctrl.inner.stream_retries.lock().is_empty());
        assert!(ctrl.inner.auto_reconnect_issued.lock().is_empty());
    }

    #[tokio::test]
    async fn schedule_reconnect_skips_terminal_and_unknown() {
        let ctrl = controller();
        ctrl.schedule_reconnect("ghost");
        assert!(ctrl.inner.stream_retries.lock().is_empty());

        let mut s = Session::optimistic("done", "kw", 5);
        s.status = SessionStatus::Completed;
        ctrl.inner.registry.lock().add(s);
        ctrl.schedule_reconnect("done");
        assert!(ctrl.inner.stream_retries.lock().is_empty());
    }

    #[tokio::test]
    async fn stream_event_completed_normalizes_session() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        ctrl.handle_stream_event("s1", StreamEvent::Completed { entries_count: Some(37) })
            .await;

        let s = ctrl.find_session("s1").unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(s.progress.is_full());
        assert!(s.progress.demand.total >= 37);
        assert_eq!(ctrl.inner.cache.count("s1"), Some(37));
    }

    #[tokio::test]
    async fn stage_events_update_progress() {
        let ctrl = controller();
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        ctrl.handle_stream_event(
            "s1",
            StreamEvent::Stage {
                stage: prospect_core::session::Stage::Search,
                update: prospect_core::session::PartialStageProgress {
                    total: Some(50),
                    remaining: Some(12),
                },
            },
        )
        .await;

        let s = ctrl.find_session("s1").unwrap();
        assert_eq!(s.progress.search.remaining, 12);
    }

    #[tokio::test]
    async fn snapshot_for_unknown_session_is_ignored() {
        let ctrl = controller();
        ctrl.handle_stream_event(
            "ghost",
            StreamEvent::Snapshot {
                status: Some(SessionStatus::Completed),
                progress: None,
                entries_count: Some(5),
            },
        )
        .await;
        assert!(ctrl.sessions().is_empty());
    }
}
