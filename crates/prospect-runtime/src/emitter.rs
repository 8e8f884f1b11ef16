//! Broadcast-based emitter for [`UiEvent`] dispatch.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use prospect_core::events::UiEvent;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Non-blocking UI event fan-out. `emit` never awaits; a slow subscriber
/// lags and drops rather than backpressuring the engine.
pub struct UiEventEmitter {
    tx: broadcast::Sender<UiEvent>,
    emit_count: AtomicU64,
}

impl UiEventEmitter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers. Returns the receiver count
    /// (0 when nothing is listening).
    pub fn emit(&self, event: UiEvent) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for UiEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
