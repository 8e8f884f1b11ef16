//! Wire types for the backend contract.
//!
//! Shapes here match the server exactly; tolerance for odd values (unknown
//! statuses, ids as numbers or strings, `entries` vs `megafile.entries`)
//! lives in accessor methods rather than strict serde failures, since a
//! polling tick must never take the whole list down over one weird field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use prospect_core::entry::{IdValue, ResultEntry};
use prospect_core::session::{PartialProgress, PartialStageProgress, Progress, SessionStatus, Stage};

/// `POST start` response.
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub session_id: IdValue,
}

/// One session as returned by `GET list`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSession {
    pub id: IdValue,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<PartialProgress>,
    #[serde(default)]
    pub entries_count: Option<u64>,
}

impl RemoteSession {
    /// Status parsed leniently: unknown strings are treated as absent.
    pub fn parsed_status(&self) -> Option<SessionStatus> {
        match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("ongoing") => Some(SessionStatus::Ongoing),
            Some("completed") => Some(SessionStatus::Completed),
            Some("failed") => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// `GET list` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionListResponse {
    #[serde(default)]
    pub sessions: Vec<RemoteSession>,
}

/// `GET result/{id}` body: entries at the top level or nested in a megafile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsResponse {
    #[serde(default)]
    pub entries: Option<Vec<ResultEntry>>,
    #[serde(default)]
    pub megafile: Option<Megafile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Megafile {
    #[serde(default)]
    pub entries: Vec<ResultEntry>,
}

impl ResultsResponse {
    /// Flatten whichever container the server used.
    pub fn into_entries(self) -> Vec<ResultEntry> {
        if let Some(entries) = self.entries {
            return entries;
        }
        self.megafile.map(|m| m.entries).unwrap_or_default()
    }
}

/// `POST reconnect/{id}` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconnectResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub entries: Option<Vec<ResultEntry>>,
    #[serde(default)]
    pub megafile: Option<Megafile>,
}

impl ReconnectResponse {
    pub fn parsed_status(&self) -> Option<SessionStatus> {
        match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("ongoing") => Some(SessionStatus::Ongoing),
            Some("completed") => Some(SessionStatus::Completed),
            Some("failed") => Some(SessionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.parsed_status() == Some(SessionStatus::Completed)
    }

    /// Inline entries from either container, empty when the server sent none.
    pub fn take_entries(&mut self) -> Vec<ResultEntry> {
        if let Some(entries) = self.entries.take() {
            return entries;
        }
        self.megafile.take().map(|m| m.entries).unwrap_or_default()
    }
}

/// Raw stream message before classification.
#[derive(Debug, Clone, Deserialize)]
struct RawStreamEvent {
    #[serde(default)]
    stage: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress: Option<Progress>,
    #[serde(default)]
    entries_count: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    remaining: Option<u64>,
}

/// One classified push-stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Full-state hydration on (re)attach.
    Snapshot {
        status: Option<SessionStatus>,
        progress: Option<Progress>,
        entries_count: Option<u64>,
    },
    /// Progress update for one pipeline stage.
    Stage {
        stage: Stage,
        update: PartialStageProgress,
    },
    /// The job finished.
    Completed { entries_count: Option<u64> },
}

impl StreamEvent {
    /// Parse one SSE `data:` payload. `Ok(None)` for well-formed messages
    /// with an unknown stage (ignored); `Err` for malformed JSON (dropped
    /// with a warning by the stream reader, never fatal).
    pub fn parse(data: &str) -> Result<Option<StreamEvent>, serde_json::Error> {
        let raw: RawStreamEvent = serde_json::from_str(data)?;
        let stage = raw.stage.to_ascii_lowercase();
        match stage.as_str() {
            "snapshot" => Ok(Some(StreamEvent::Snapshot {
                status: parse_status(raw.status.as_deref()),
                progress: raw.progress,
                entries_count: raw.entries_count,
            })),
            "completed" => Ok(Some(StreamEvent::Completed {
                entries_count: raw.entries_count,
            })),
            other => Ok(Stage::from_wire(other).map(|stage| StreamEvent::Stage {
                stage,
                update: PartialStageProgress {
                    total: raw.total,
                    remaining: raw.remaining,
                },
            })),
        }
    }
}

fn parse_status(raw: Option<&str>) -> Option<SessionStatus> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("ongoing") => Some(SessionStatus::Ongoing),
        Some("completed") => Some(SessionStatus::Completed),
        Some("failed") => Some(SessionStatus::Failed),
        _ => None,
    }
}

/// Structured error body: `{"error": "..."}` or `{"error": {"message": "..."}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<Value>,
}

impl ErrorBody {
    /// Best-effort human message from whatever shape the server used.
    pub fn message(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Object(o)) => o
                .get("message")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            _ => None,
        }
    }
}

/// `POST replace-listing` request body.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceListingRequest {
    pub listing_id: Value,
    pub session_id: Value,
    pub forced_personalize: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn results_flatten_top_level_entries() {
        let r: ResultsResponse =
            serde_json::from_value(json!({"entries": [{"title": "a"}]})).unwrap();
        assert_eq!(r.into_entries().len(), 1);
    }

    #[test]
    fn results_flatten_megafile_entries() {
        let r: ResultsResponse =
            serde_json::from_value(json!({"megafile": {"entries": [{"title": "a"}, {"title": "b"}]}}))
                .unwrap();
        assert_eq!(r.into_entries().len(), 2);
    }

    #[test]
    fn results_empty_body() {
        let r: ResultsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(r.into_entries().is_empty());
    }

    #[test]
    fn stream_event_snapshot() {
        let e = StreamEvent::parse(
            r#"{"stage": "snapshot", "status": "ongoing", "progress": {"search": {"total": 10, "remaining": 4}}, "entries_count": 6}"#,
        )
        .unwrap()
        .unwrap();
        match e {
            StreamEvent::Snapshot {
                status,
                progress,
                entries_count,
            } => {
                assert_eq!(status, Some(SessionStatus::Ongoing));
                assert_eq!(progress.unwrap().search.remaining, 4);
                assert_eq!(entries_count, Some(6));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn stream_event_stage_mapping() {
        let e = StreamEvent::parse(r#"{"stage": "demand_extraction", "remaining": 3}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            e,
            StreamEvent::Stage {
                stage: Stage::Demand,
                update: PartialStageProgress {
                    total: None,
                    remaining: Some(3)
                }
            }
        );

        let e = StreamEvent::parse(r#"{"stage": "keywords_research", "total": 12, "remaining": 12}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(e, StreamEvent::Stage { stage: Stage::Keywords, .. }));
    }

    #[test]
    fn stream_event_completed() {
        let e = StreamEvent::parse(r#"{"stage": "completed", "entries_count": 37}"#)
            .unwrap()
            .unwrap();
        assert_eq!(e, StreamEvent::Completed { entries_count: Some(37) });
    }

    #[test]
    fn stream_event_unknown_stage_ignored() {
        assert_eq!(StreamEvent::parse(r#"{"stage": "warmup"}"#).unwrap(), None);
    }

    #[test]
    fn stream_event_malformed_is_error() {
        assert!(StreamEvent::parse("not json").is_err());
    }

    #[test]
    fn error_body_shapes() {
        let e: ErrorBody = serde_json::from_value(json!({"error": "boom"})).unwrap();
        assert_eq!(e.message().as_deref(), Some("boom"));

        let e: ErrorBody =
            serde_json::from_value(json!({"error": {"message": "nested boom"}})).unwrap();
        assert_eq!(e.message().as_deref(), Some("nested boom"));

        let e: ErrorBody = serde_json::from_value(json!({})).unwrap();
        assert_eq!(e.message(), None);
    }

    #[test]
    fn remote_session_lenient_status() {
        let r: RemoteSession = serde_json::from_value(json!({"id": 1, "status": "ONGOING"})).unwrap();
        assert_eq!(r.parsed_status(), Some(SessionStatus::Ongoing));
        let r: RemoteSession = serde_json::from_value(json!({"id": 1, "status": "weird"})).unwrap();
        assert_eq!(r.parsed_status(), None);
    }

    #[test]
    fn reconnect_take_entries_prefers_top_level() {
        let mut r: ReconnectResponse = serde_json::from_value(json!({
            "status": "completed",
            "entries": [{"title": "x"}],
            "megafile": {"entries": [{"title": "y"}, {"title": "z"}]}
        }))
        .unwrap();
        assert!(r.is_completed());
        assert_eq!(r.take_entries().len(), 1);
    }
}
