//! UI events — the rendering seam.
//!
//! The engine never builds DOM. Every state change a UI would draw is
//! published as a [`UiEvent`] on the controller's broadcast channel;
//! progressive rendering appears as a series of `ResultsRendered` events
//! with a growing `shown` prefix.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// The single globally active view choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewSelection {
    /// Nothing selected — empty-state prompt.
    #[default]
    None,
    /// One session's results.
    Session(SessionId),
    /// The synthetic all-sessions aggregate.
    Aggregate,
}

impl ViewSelection {
    /// Sentinel used in persisted storage for the aggregate view.
    pub const AGGREGATE_SENTINEL: &'static str = "__all__";

    /// Persisted string form.
    pub fn to_stored(&self) -> String {
        match self {
            ViewSelection::None => String::new(),
            ViewSelection::Session(id) => id.clone(),
            ViewSelection::Aggregate => Self::AGGREGATE_SENTINEL.to_string(),
        }
    }

    /// Parse the persisted form.
    pub fn from_stored(raw: &str) -> Self {
        match raw {
            "" => ViewSelection::None,
            Self::AGGREGATE_SENTINEL => ViewSelection::Aggregate,
            id => ViewSelection::Session(id.to_string()),
        }
    }

    pub fn is_session(&self, id: &str) -> bool {
        matches!(self, ViewSelection::Session(s) if s == id)
    }

    /// Whether a render for `session_id` concerns this view: either that
    /// session is selected, or the aggregate (which it contributes to) is.
    pub fn covers_session(&self, session_id: &str) -> bool {
        match self {
            ViewSelection::None => false,
            ViewSelection::Aggregate => true,
            ViewSelection::Session(s) => s == session_id,
        }
    }
}

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Error,
}

/// Rendered state of a session's reconnect control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectControl {
    /// Stream healthy or too recently stale — control greyed out.
    Disabled,
    /// Stale; counting down the seconds until manual reconnect unlocks.
    Countdown(u64),
    /// Manual reconnect available.
    Enabled,
}

/// One option in the session selector dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorOption {
    /// Stored selection value (session id, aggregate sentinel, or empty).
    pub value: String,
    pub label: String,
}

/// Events published to whatever layer draws the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// The session list changed; re-render the sessions panel.
    SessionListChanged,
    /// Selector options re-derived after a registry or count change.
    SelectorOptionsChanged { options: Vec<SelectorOption> },
    /// A (possibly partial) results grid render: the first `shown` of
    /// `total` sorted entries for `view`.
    ResultsRendered {
        view: ViewSelection,
        shown: usize,
        total: usize,
    },
    /// No selection — show the pick-a-session prompt.
    EmptyPrompt,
    /// Blocking loading indicator visibility.
    LoadingChanged { visible: bool },
    /// A session's reconnect control changed state.
    ReconnectControlChanged {
        session_id: SessionId,
        control: ReconnectControl,
    },
    /// A product detail view opened (grid renders are pinned until closed).
    DetailOpened {
        session_id: Option<SessionId>,
        listing_id: String,
    },
    DetailClosed,
    /// Transient notification.
    Toast { level: ToastLevel, message: String },
    /// The replace-listing flow finished; the embedding shell should
    /// perform a full reload and re-boot the controller.
    ReloadRequested,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_stored_round_trip() {
        for sel in [
            ViewSelection::None,
            ViewSelection::Aggregate,
            ViewSelection::Session("s1".into()),
        ] {
            assert_eq!(ViewSelection::from_stored(&sel.to_stored()), sel);
        }
    }

    #[test]
    fn covers_session_semantics() {
        assert!(ViewSelection::Aggregate.covers_session("s1"));
        assert!(ViewSelection::Session("s1".into()).covers_session("s1"));
        assert!(!ViewSelection::Session("s2".into()).covers_session("s1"));
        assert!(!ViewSelection::None.covers_session("s1"));
    }

    #[test]
    fn event_serde_tagging() {
        let e = UiEvent::Toast {
            level: ToastLevel::Error,
            message: "Delete failed".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "toast");
        assert_eq!(json["level"], "error");
    }
}
