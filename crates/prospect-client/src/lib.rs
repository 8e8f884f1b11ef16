//! # prospect-client
//!
//! Typed client for the bulk-research backend: session lifecycle calls
//! (start/list/delete/reconnect), result retrieval, the replace-listing
//! mutation, keyword-insight lookup, and per-session SSE event streams.
//!
//! The error taxonomy lives here too: [`ClientError::is_transient`] is what
//! lets background operations (revalidation, polling, aggregate fetches)
//! swallow network noise while foreground actions surface server messages.

#![deny(unsafe_code)]

pub mod api;
pub mod errors;
pub mod stream;
pub mod types;

pub use api::ApiClient;
pub use errors::{ClientError, Result};
pub use stream::SessionEventStream;
pub use types::{ReconnectResponse, RemoteSession, ResultsResponse, StreamEvent};
