//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
