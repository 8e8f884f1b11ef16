//! # prospect-runtime
//!
//! The coordination layer of the dashboard engine. One
//! [`DashboardController`] owns every piece of shared state — the session
//! registry, result cache, stream handles, view state, and the UI event
//! bus — and the components operate through it:
//!
//! - **Session registry** ([`registry`]) — ordered source of truth for
//!   session summaries; every mutation republishes the session list and
//!   selector options.
//! - **Stream manager** ([`streams`], [`streams::state`]) — one SSE reader
//!   per ongoing session, heartbeat-certified liveness, exponential
//!   reconnect backoff, and the staged disable → countdown → manual →
//!   auto-reconnect control policy.
//! - **Polling fallback** ([`polling`]) — a 2s reconciliation loop armed
//!   only while the selected view watches an ongoing session.
//! - **Results orchestrator** ([`orchestrator`]) — cache-first loads, fast
//!   then full fetches, single-flight aggregate loads, and time-sliced
//!   progressive rendering.
//!
//! Concurrency model: cooperative tokio scheduling, `parking_lot` mutexes
//! never held across `.await`, cancellation tokens scoping every background
//! task, and a "is this view still selected" re-check at each resumption
//! point before anything renders.

#![deny(unsafe_code)]

pub mod controller;
pub mod emitter;
pub mod errors;
pub mod orchestrator;
pub mod polling;
pub mod registry;
pub mod streams;

pub use controller::DashboardController;
pub use emitter::UiEventEmitter;
pub use errors::{Result, RuntimeError};
pub use registry::SessionRegistry;
