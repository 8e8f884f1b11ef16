//! Polling fallback and the aggregate auto-refresh timer.
//!
//! Polling is a correctness backstop, not the primary signal: it runs only
//! while the selected view actually watches an ongoing session, reconciles
//! with a shallow per-stage merge, and must never regress a session's
//! status backward. All of its errors are silent.

use std::time::Duration;

use tracing::{debug, trace};

use prospect_core::events::ViewSelection;
use prospect_core::session::SessionStatus;

use crate::controller::DashboardController;

impl DashboardController {
    /// Re-evaluate whether the 2s polling loop should run, and start or
    /// stop it accordingly. Called after every selection change and session
    /// mutation.
    pub(crate) fn update_polling(&self) {
        let should_poll = {
            let registry = self.inner.registry.lock();
            match &*self.inner.selection.lock() {
                ViewSelection::Aggregate => registry.any_ongoing(),
                ViewSelection::Session(id) => registry
                    .find(id)
                    .is_some_and(|s| s.status == SessionStatus::Ongoing),
                ViewSelection::None => false,
            }
        };

        let mut task = self.inner.poll_task.lock();
        if should_poll {
            if task.is_none() {
                let token = self.inner.shutdown.child_token();
                *task = Some(token.clone());
                drop(task);
                debug!("polling started");
                let ctrl = self.clone();
                let interval_ms = self.inner.settings.timing.poll_interval_ms;
                let _ = tokio::spawn(async move {
                    // Immediate first tick, then the fixed interval.
                    ctrl.poll_once().await;
                    let mut interval =
                        tokio::time::interval(Duration::from_millis(interval_ms));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    // The first interval tick fires immediately; skip it.
                    let _ = interval.tick().await;
                    loop {
                        tokio::select! {
                            () = token.cancelled() => break,
                            _ = interval.tick() => {}
                        }
                        ctrl.poll_once().await;
                    }
                });
            }
        } else if let Some(token) = task.take() {
            debug!("polling stopped");
            token.cancel();
        }
    }

    /// One reconciliation pass over the server's session list.
    pub(crate) async fn poll_once(&self) {
        if !self.inner.registry.lock().any_ongoing() {
            return;
        }
        metrics::counter!("poll_ticks").increment(1);

        let list = match self.inner.api.list().await {
            Ok(list) => list,
            Err(e) => {
                // Expected noise while the backend restarts or the tab sleeps.
                trace!(error = %e, "poll fetch failed");
                return;
            }
        };

        for remote in list.sessions {
            let id = remote.id.to_string();
            let updated = {
                let mut registry = self.inner.registry.lock();
                let Some(local) = registry.find_mut(&id) else {
                    continue;
                };
                let mut changed = false;
                if let Some(status) = remote.parsed_status() {
                    changed |= local.adopt_status(status);
                }
                if let Some(progress) = &remote.progress {
                    changed |= local.merge_remote_progress(progress);
                }
                if let Some(count) = remote.entries_count {
                    if local.entries_count != Some(count) {
                        local.entries_count = Some(count);
                        changed = true;
                    }
                }
                if local.status == SessionStatus::Completed {
                    // Same normalization rule as every other completion
                    // signal; re-render so bars land on 100%.
                    local.normalize_completed(None);
                    changed = true;
                }
                changed.then(|| local.clone())
            };
            if let Some(session) = updated {
                self.update_session(session);
            }
        }
        self.update_polling();
    }

    /// Re-evaluate the 3s aggregate auto-refresh: armed only while the
    /// aggregate view is selected and any session is ongoing.
    pub(crate) fn update_aggregate_refresh(&self) {
        let should_run = {
            let registry = self.inner.registry.lock();
            matches!(&*self.inner.selection.lock(), ViewSelection::Aggregate)
                && registry.any_ongoing()
        };

        let mut task = self.inner.aggregate_refresh_task.lock();
        if should_run {
            if task.is_none() {
                let token = self.inner.shutdown.child_token();
                *task = Some(token.clone());
                drop(task);
                debug!("aggregate auto-refresh started");
                let ctrl = self.clone();
                let interval_ms = self.inner.settings.timing.aggregate_refresh_ms;
                let _ = tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(Duration::from_millis(interval_ms));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    let _ = interval.tick().await;
                    loop {
                        tokio::select! {
                            () = token.cancelled() => break,
                            _ = interval.tick() => {}
                        }
                        // Conditions may have shifted since the last tick.
                        let still_wanted = {
                            let registry = ctrl.inner.registry.lock();
                            matches!(&*ctrl.inner.selection.lock(), ViewSelection::Aggregate)
                                && registry.any_ongoing()
                        };
                        if still_wanted {
                            ctrl.load_all_sessions_results().await;
                        }
                    }
                });
            }
        } else if let Some(token) = task.take() {
            debug!("aggregate auto-refresh stopped");
            token.cancel();
        }
    }

    pub(crate) fn stop_aggregate_refresh(&self) {
        if let Some(token) = self.inner.aggregate_refresh_task.lock().take() {
            token.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use prospect_core::events::ViewSelection;
    use prospect_core::session::{Session, SessionStatus, StageProgress};
    use prospect_settings::Settings;
    use prospect_store::MemoryBackend;

    use crate::controller::DashboardController;

    fn controller(base_url: &str) -> DashboardController {
        let mut settings = Settings::default();
        settings.api.base_url = base_url.to_string();
        DashboardController::new(
            settings,
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
        )
    }

    async fn mount_list(server: &MockServer, sessions: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/bulk-research/list/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessions": sessions})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn poll_reconciles_status_progress_and_count() {
        let server = MockServer::start().await;
        mount_list(
            &server,
            json!([{
                "id": "s1",
                "status": "ongoing",
                "progress": {"search": {"total": 50, "remaining": 20}},
                "entries_count": 14
            }]),
        )
        .await;

        let ctrl = controller(&server.uri());
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        ctrl.poll_once().await;
        let s = ctrl.find_session("s1").unwrap();
        assert_eq!(s.progress.search, StageProgress::new(50, 20));
        // Absent stages keep their local values.
        assert_eq!(s.progress.demand, StageProgress::new(50, 50));
        assert_eq!(s.entries_count, Some(14));
    }

    #[tokio::test]
    async fn poll_never_regresses_terminal_status() {
        let server = MockServer::start().await;
        mount_list(&server, json!([{"id": "done", "status": "ongoing"}])).await;

        let ctrl = controller(&server.uri());
        let mut done = Session::optimistic("done", "mug", 50);
        done.status = SessionStatus::Completed;
        // Another ongoing session keeps the poll pass active.
        ctrl.inner.registry.lock().add(Session::optimistic("run", "cup", 10));
        ctrl.inner.registry.lock().add(done);

        ctrl.poll_once().await;
        assert_eq!(ctrl.find_session("done").unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn poll_applies_completion_normalization() {
        let server = MockServer::start().await;
        mount_list(
            &server,
            json!([{"id": "s1", "status": "completed", "entries_count": 37}]),
        )
        .await;

        let ctrl = controller(&server.uri());
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        ctrl.poll_once().await;
        let s = ctrl.find_session("s1").unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(s.progress.is_full());
        assert!(s.progress.demand.total >= 37);
    }

    #[tokio::test]
    async fn poll_ignores_unknown_sessions() {
        let server = MockServer::start().await;
        mount_list(&server, json!([{"id": "mystery", "status": "ongoing"}])).await;

        let ctrl = controller(&server.uri());
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        ctrl.poll_once().await;
        assert!(ctrl.find_session("mystery").is_none());
        assert_eq!(ctrl.sessions().len(), 1);
    }

    #[tokio::test]
    async fn poll_fetch_failure_is_silent() {
        // Nothing listening — the pass must swallow the transport error.
        let ctrl = controller("http://127.0.0.1:1");
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));
        ctrl.poll_once().await;
        assert_eq!(ctrl.find_session("s1").unwrap().status, SessionStatus::Ongoing);
    }

    #[tokio::test]
    async fn poll_skips_entirely_without_ongoing_sessions() {
        // No server mock mounted: a request would error loudly in wiremock,
        // but the guard returns before any fetch happens.
        let ctrl = controller("http://127.0.0.1:1");
        let mut s = Session::optimistic("s1", "mug", 50);
        s.status = SessionStatus::Completed;
        ctrl.inner.registry.lock().add(s);
        ctrl.poll_once().await;
    }

    #[tokio::test]
    async fn update_polling_arms_only_for_watched_ongoing_views() {
        let ctrl = controller("http://127.0.0.1:1");
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        // No selection: no polling.
        ctrl.update_polling();
        assert!(ctrl.inner.poll_task.lock().is_none());

        // Aggregate with an ongoing session: armed.
        *ctrl.inner.selection.lock() = ViewSelection::Aggregate;
        ctrl.update_polling();
        assert!(ctrl.inner.poll_task.lock().is_some());

        // Session goes terminal: disarmed on the next evaluation.
        ctrl.inner.registry.lock().find_mut("s1").unwrap().status = SessionStatus::Completed;
        ctrl.update_polling();
        assert!(ctrl.inner.poll_task.lock().is_none());
    }

    #[tokio::test]
    async fn aggregate_refresh_armed_only_on_aggregate_with_ongoing() {
        let ctrl = controller("http://127.0.0.1:1");
        ctrl.inner.registry.lock().add(Session::optimistic("s1", "mug", 50));

        *ctrl.inner.selection.lock() = ViewSelection::Session("s1".into());
        ctrl.update_aggregate_refresh();
        assert!(ctrl.inner.aggregate_refresh_task.lock().is_none());

        *ctrl.inner.selection.lock() = ViewSelection::Aggregate;
        ctrl.update_aggregate_refresh();
        assert!(ctrl.inner.aggregate_refresh_task.lock().is_some());

        ctrl.stop_aggregate_refresh();
        assert!(ctrl.inner.aggregate_refresh_task.lock().is_none());
    }
}
