//! Client error taxonomy.
//!
//! Three families with different propagation rules:
//! - **Transport** — network failures and aborts. Expected during reconnect
//!   storms and teardown; background callers log and continue.
//! - **Server** — non-2xx with an optional structured message. Surfaced to
//!   the user for foreground actions, with the server's wording when it
//!   sent any.
//! - **Decode** — a 2xx body that didn't parse. Treated like transport for
//!   background work.

use thiserror::Error;

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{}", server_display(*status, message.as_deref()))]
    Server { status: u16, message: Option<String> },

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("stream closed: {0}")]
    StreamClosed(String),
}

fn server_display(status: u16, message: Option<&str>) -> String {
    match message {
        Some(m) => m.to_string(),
        None => format!("request failed ({status})"),
    }
}

impl ClientError {
    /// Whether this failure is expected network noise that background
    /// operations swallow silently.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::Decode(_) | ClientError::StreamClosed(_)
        )
    }

    /// User-facing message for a foreground action: the server's message
    /// when it sent one, else `"<action> failed (<status>)"`.
    pub fn user_message(&self, action: &str) -> String {
        match self {
            ClientError::Server {
                message: Some(m), ..
            } => m.clone(),
            ClientError::Server { status, .. } => format!("{action} failed ({status})"),
            other => format!("{action} failed: {other}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
