//! # prospect-settings
//!
//! Configuration for the dashboard engine, loaded in layers:
//! 1. **Compiled defaults** — [`Settings::default()`], which encode the
//!    production timing/cache constants.
//! 2. **Optional JSON file** — partial override, missing fields keep their
//!    defaults.
//! 3. **Environment variables** — `PROSPECT_*` overrides (highest priority).
//!
//! No global singleton: the controller owns its `Settings` value and passes
//! it (or an `Arc` of it) into each component, so tests construct isolated
//! configurations freely.

#![deny(unsafe_code)]

pub mod errors;
pub mod types;

pub use errors::{Result, SettingsError};
pub use types::*;

use std::path::Path;

/// Load settings from a JSON file, then apply env overrides.
pub fn load_from_path(path: &Path) -> Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
    let mut settings: Settings = serde_json::from_str(&raw)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Compiled defaults with env overrides applied.
pub fn load() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("PROSPECT_API_BASE_URL") {
        if !v.trim().is_empty() {
            settings.api.base_url = v;
        }
    }
    if let Ok(v) = std::env::var("PROSPECT_CSRF_TOKEN") {
        if !v.trim().is_empty() {
            settings.api.csrf_token = Some(v);
        }
    }
    if let Ok(v) = std::env::var("PROSPECT_POLL_INTERVAL_MS") {
        match v.parse::<u64>() {
            Ok(ms) if ms > 0 => settings.timing.poll_interval_ms = ms,
            _ => tracing::warn!(value = %v, "ignoring invalid PROSPECT_POLL_INTERVAL_MS"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
