//! Error types shared across the AIS workspace

use thiserror::Error;

/// Result type alias for shared AIS operations
pub type Result<T> = std::result::Result<T, AisError>;

/// Errors raised by the shared layer (logging, environment parsing)
#[derive(Error, Debug)]
pub enum AisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl AisError {
    /// Build an [`AisError::InvalidValue`] for an environment key
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}
