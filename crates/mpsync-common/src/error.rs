//! Error types shared across mpsync crates

use thiserror::Error;

/// Result type alias for mpsync operations
pub type Result<T> = std::result::Result<T, MpsyncError>;

/// Errors that are not specific to a single crate
#[derive(Error, Debug)]
pub enum MpsyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

impl MpsyncError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        MpsyncError::Config(msg.into())
    }
}
