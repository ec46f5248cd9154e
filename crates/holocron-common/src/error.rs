//! Error types shared across Holocron crates

use thiserror::Error;

/// Result type alias for Holocron operations
pub type Result<T> = std::result::Result<T, HolocronError>;

/// Workspace-level error type
///
/// Component-specific failures (fetch, normalization, storage) have their own
/// enums in `holocron-ingest`; this one covers setup and configuration.
#[derive(Error, Debug)]
pub enum HolocronError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidSetting { name: String, value: String },
}

impl HolocronError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_setting(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            value: value.into(),
        }
    }
}
