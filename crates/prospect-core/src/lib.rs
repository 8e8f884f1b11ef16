//! # prospect-core
//!
//! Core data model for the Prospect bulk-research dashboard engine:
//! sessions and their per-stage progress, result entries (with the
//! normalization that turns heterogeneous provider payloads into one
//! canonical shape), the metric/sort utility, keyword-insight and
//! trend-series extraction, and the [`UiEvent`](events::UiEvent) type
//! that forms the rendering seam.
//!
//! Everything here is pure and synchronous — no I/O, no timers. The
//! runtime crate owns coordination; this crate owns meaning.

#![deny(unsafe_code)]

pub mod entry;
pub mod events;
pub mod insight;
pub mod keyword;
pub mod metric;
pub mod session;
pub mod trend;

pub use entry::{ResultEntry, SessionAnnotation};
pub use events::{ReconnectControl, SelectorOption, ToastLevel, UiEvent, ViewSelection};
pub use metric::{SortMetric, SortOrder, SortState, metric_value, sort_entries};
pub use session::{
    PartialProgress, PartialStageProgress, Progress, Session, SessionId, SessionStatus, Stage,
    StageProgress,
};
