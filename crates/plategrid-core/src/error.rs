//! Error types for the core model.

use thiserror::Error;

/// Result type alias for core model operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("handoff {location}: {reason}")]
    Handoff { location: String, reason: String },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
