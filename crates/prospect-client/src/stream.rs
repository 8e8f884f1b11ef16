//! Per-session SSE event streams.
//!
//! One stream per ongoing session. The reader yields classified
//! [`StreamEvent`]s; malformed payloads are logged and skipped without
//! closing the connection (they cost nothing against the retry budget),
//! while transport failures end the stream and hand reconnect scheduling
//! back to the stream manager.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::errors::{ClientError, Result};
use crate::types::{ErrorBody, StreamEvent};

type InnerStream = Pin<
    Box<
        dyn Stream<
                Item = std::result::Result<
                    eventsource_stream::Event,
                    eventsource_stream::EventStreamError<reqwest::Error>,
                >,
            > + Send,
    >,
>;

/// An open SSE connection to one session's event endpoint.
pub struct SessionEventStream {
    session_id: String,
    inner: InnerStream,
}

impl std::fmt::Debug for SessionEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventStream")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionEventStream {
    /// Open the stream. A non-2xx response is a server error (with the
    /// structured message when present), not a silent retry.
    pub async fn connect(client: &ApiClient, session_id: &str) -> Result<Self> {
        let url = client.stream_url(session_id);
        let resp = client
            .http()
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.message());
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }
        debug!(session_id, "stream opened");
        Ok(Self {
            session_id: session_id.to_string(),
            inner: Box::pin(resp.bytes_stream().eventsource()),
        })
    }

    /// Next classified event.
    ///
    /// - `Some(Ok(event))` — a parsed message (this is the heartbeat signal);
    /// - `Some(Err(_))` — transport failure, the stream is dead;
    /// - `None` — the server closed the stream.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        loop {
            match self.inner.next().await {
                None => return None,
                Some(Err(e)) => {
                    return Some(Err(ClientError::StreamClosed(e.to_string())));
                }
                Some(Ok(sse)) => match StreamEvent::parse(&sse.data) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => {
                        debug!(session_id = %self.session_id, data = %sse.data, "ignoring unknown stage event");
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, data = %sse.data, "dropping malformed stream payload");
                    }
                },
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
