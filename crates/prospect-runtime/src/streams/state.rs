//! Pure stream-liveness state machine.
//!
//! Liveness is certified by heartbeats — receipt of parsed messages — not
//! by connection-open state, since an open socket can silently stop
//! delivering. These functions derive the FSM state and the reconnect
//! control from plain inputs; the timer code in the manager merely samples
//! them on a tick.

use std::time::Duration;

use prospect_core::events::ReconnectControl;
use prospect_settings::TimingSettings;

/// Liveness states of one session's push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No handle at all.
    Disconnected,
    /// Handle created, no heartbeat observed yet.
    Connecting,
    /// Heartbeat within the staleness window.
    Live,
    /// Open (or once-open) but the heartbeat aged out.
    Stale,
}

/// Derive the FSM state. `heartbeat_age` is `None` when no message has ever
/// arrived on the current handle.
pub fn stream_state(
    handle_exists: bool,
    open: bool,
    heartbeat_age: Option<Duration>,
    timing: &TimingSettings,
) -> StreamState {
    if !handle_exists {
        return StreamState::Disconnected;
    }
    match heartbeat_age {
        None => StreamState::Connecting,
        Some(age) if open && age.as_millis() as u64 <= timing.heartbeat_stale_ms => StreamState::Live,
        Some(_) => StreamState::Stale,
    }
}

/// Liveness check used to gate manual reconnects: connection open and
/// heartbeat fresh.
pub fn is_alive(open: bool, heartbeat_age: Option<Duration>, timing: &TimingSettings) -> bool {
    matches!(
        heartbeat_age,
        Some(age) if open && age.as_millis() as u64 <= timing.heartbeat_stale_ms
    )
}

/// Staged reconnect-control policy, from the age of the last liveness
/// signal (heartbeat, or attach time before any heartbeat; `None` means no
/// signal at all — an unattached ongoing session):
///
/// - alive, or age within the grace window: disabled, default label;
/// - within the countdown window: disabled, showing seconds remaining;
/// - past it: manual reconnect enabled.
pub fn reconnect_control(
    alive: bool,
    age: Option<Duration>,
    timing: &TimingSettings,
) -> ReconnectControl {
    if alive {
        return ReconnectControl::Disabled;
    }
    let Some(age) = age else {
        return ReconnectControl::Enabled;
    };
    let age_ms = age.as_millis() as u64;
    if age_ms <= timing.stale_grace_ms {
        ReconnectControl::Disabled
    } else if age_ms <= timing.enable_after_ms() {
        ReconnectControl::Countdown((timing.enable_after_ms() - age_ms).div_ceil(1_000))
    } else {
        ReconnectControl::Enabled
    }
}

/// Whether an automatic reconnect should fire: signal age past the auto
/// threshold, throttled to one per rolling window per session.
pub fn should_auto_reconnect(
    alive: bool,
    age: Option<Duration>,
    last_issued_age: Option<Duration>,
    timing: &TimingSettings,
) -> bool {
    if alive {
        return false;
    }
    let past_threshold = match age {
        None => true,
        Some(a) => a.as_millis() as u64 > timing.auto_reconnect_after_ms(),
    };
    let throttle_open = match last_issued_age {
        None => true,
        Some(d) => d.as_millis() as u64 > timing.auto_reconnect_after_ms(),
    };
    past_threshold && throttle_open
}

/// Exponential reconnect backoff: `min(cap, base * 2^(attempt-1))`.
pub fn backoff_delay(attempt: u32, timing: &TimingSettings) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    let delay = timing.base_backoff_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(timing.max_backoff_ms))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> TimingSettings {
        TimingSettings::default()
    }

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    // --- FSM ---

    #[test]
    fn fsm_states() {
        let t = timing();
        assert_eq!(stream_state(false, false, None, &t), StreamState::Disconnected);
        assert_eq!(stream_state(true, false, None, &t), StreamState::Connecting);
        assert_eq!(stream_state(true, true, None, &t), StreamState::Connecting);
        assert_eq!(stream_state(true, true, ms(4_999), &t), StreamState::Live);
        assert_eq!(stream_state(true, true, ms(5_001), &t), StreamState::Stale);
        // Closed connection can't be live no matter how fresh the heartbeat.
        assert_eq!(stream_state(true, false, ms(100), &t), StreamState::Stale);
    }

    #[test]
    fn alive_requires_open_and_fresh() {
        let t = timing();
        assert!(is_alive(true, ms(5_000), &t));
        assert!(!is_alive(true, ms(5_001), &t));
        assert!(!is_alive(false, ms(100), &t));
        assert!(!is_alive(true, None, &t));
    }

    // --- Reconnect control gating ---

    #[test]
    fn control_disabled_while_alive() {
        assert_eq!(reconnect_control(true, ms(0), &timing()), ReconnectControl::Disabled);
    }

    #[test]
    fn control_disabled_within_grace() {
        let t = timing();
        assert_eq!(reconnect_control(false, ms(1_500), &t), ReconnectControl::Disabled);
        assert_eq!(reconnect_control(false, ms(2_000), &t), ReconnectControl::Disabled);
    }

    #[test]
    fn control_counts_down_between_grace_and_enable() {
        let t = timing();
        assert_eq!(reconnect_control(false, ms(2_001), &t), ReconnectControl::Countdown(4));
        assert_eq!(reconnect_control(false, ms(3_000), &t), ReconnectControl::Countdown(3));
        assert_eq!(reconnect_control(false, ms(5_001), &t), ReconnectControl::Countdown(1));
        assert_eq!(reconnect_control(false, ms(5_999), &t), ReconnectControl::Countdown(1));
    }

    #[test]
    fn control_enabled_past_six_seconds() {
        let t = timing();
        assert_eq!(reconnect_control(false, ms(6_001), &t), ReconnectControl::Enabled);
        assert_eq!(reconnect_control(false, ms(60_000), &t), ReconnectControl::Enabled);
        // No signal ever — treat as infinitely stale.
        assert_eq!(reconnect_control(false, None, &t), ReconnectControl::Enabled);
    }

    // --- Auto reconnect throttle ---

    #[test]
    fn auto_fires_past_threshold_only() {
        let t = timing();
        assert!(!should_auto_reconnect(false, ms(9_999), None, &t));
        assert!(!should_auto_reconnect(false, ms(10_000), None, &t));
        assert!(should_auto_reconnect(false, ms(10_001), None, &t));
    }

    #[test]
    fn auto_throttled_to_one_per_window() {
        let t = timing();
        // Just issued — suppressed.
        assert!(!should_auto_reconnect(false, ms(20_000), ms(500), &t));
        assert!(!should_auto_reconnect(false, ms(20_000), ms(10_000), &t));
        // Window elapsed — allowed again.
        assert!(should_auto_reconnect(false, ms(20_000), ms(10_001), &t));
    }

    #[test]
    fn auto_never_fires_while_alive() {
        assert!(!should_auto_reconnect(true, ms(60_000), None, &timing()));
    }

    // --- Backoff ---

    #[test]
    fn backoff_doubles_to_cap() {
        let t = timing();
        assert_eq!(backoff_delay(1, &t), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, &t), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(3, &t), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(5, &t), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(6, &t), Duration::from_millis(15_000));
        assert_eq!(backoff_delay(60, &t), Duration::from_millis(15_000));
    }
}
