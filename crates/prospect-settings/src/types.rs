//! Settings types with compiled defaults.

use serde::{Deserialize, Serialize};

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub timing: TimingSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
}

/// Backend endpoint configuration. Individual operation paths are composed
/// by the client; only the base and the CSRF token vary per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    /// Sent as `X-CSRFToken` on mutating requests when present.
    pub csrf_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            csrf_token: None,
        }
    }
}

/// Timing constants for liveness, reconnect gating, and the fallback timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Heartbeat age beyond which an open stream no longer counts as live.
    pub heartbeat_stale_ms: u64,
    /// Extra grace after staleness before the countdown starts.
    pub stale_grace_ms: u64,
    /// Countdown length before the manual control unlocks.
    pub countdown_seconds: u64,
    /// Gap between manual enablement and the auto-reconnect threshold.
    pub auto_reconnect_gap_ms: u64,
    /// Reconnect-control sampling tick.
    pub reconnect_tick_ms: u64,
    /// Session-list polling fallback interval.
    pub poll_interval_ms: u64,
    /// Aggregate auto-refresh interval.
    pub aggregate_refresh_ms: u64,
    /// Stream reconnect backoff: first delay.
    pub base_backoff_ms: u64,
    /// Stream reconnect backoff: cap.
    pub max_backoff_ms: u64,
}

impl TimingSettings {
    /// Heartbeat age at which the manual reconnect control unlocks.
    pub fn enable_after_ms(&self) -> u64 {
        self.stale_grace_ms + self.countdown_seconds * 1_000
    }

    /// Heartbeat age past which one throttled auto-reconnect is issued.
    pub fn auto_reconnect_after_ms(&self) -> u64 {
        self.enable_after_ms() + self.auto_reconnect_gap_ms
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            heartbeat_stale_ms: 5_000,
            stale_grace_ms: 2_000,
            countdown_seconds: 4,
            auto_reconnect_gap_ms: 4_000,
            reconnect_tick_ms: 500,
            poll_interval_ms: 2_000,
            aggregate_refresh_ms: 3_000,
            base_backoff_ms: 500,
            max_backoff_ms: 15_000,
        }
    }
}

/// Result-cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entries per persisted chunk record.
    pub chunk_size: usize,
    /// Safety cap on chunks per session (chunk_size × max_chunks entries).
    pub max_chunks: usize,
    /// Entries kept in the legacy fallback blob under storage pressure.
    pub legacy_cap: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            max_chunks: 100,
            legacy_cap: 200,
        }
    }
}

/// Progressive-rendering batch sizes and the fast-paint fetch limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Page size of the quick first fetch.
    pub fast_limit: usize,
    /// Single-session view: items appended per tick.
    pub session_batch: usize,
    pub session_tick_ms: u64,
    /// Aggregate view: items appended per tick.
    pub aggregate_batch: usize,
    pub aggregate_tick_ms: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fast_limit: 8,
            session_batch: 12,
            session_tick_ms: 120,
            aggregate_batch: 8,
            aggregate_tick_ms: 100,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_thresholds() {
        let t = TimingSettings::default();
        assert_eq!(t.enable_after_ms(), 6_000);
        assert_eq!(t.auto_reconnect_after_ms(), 10_000);
    }

    #[test]
    fn settings_serde_round_trip() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn empty_object_deserializes_to_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s, Settings::default());
    }
}
