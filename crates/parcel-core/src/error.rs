//! Error types for the parcel tracking core
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for parcel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the parcel tracking system
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before reaching the cache (bad tracking number, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sign template compilation errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// HTTP client errors (from carrier APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Failure reported by a carrier adapter
    #[error("Adapter error ({provider}): {message}")]
    Adapter {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Provider used before `init()` completed
    #[error("Provider not initialized: {0}")]
    NotInitialized(String),

    /// Operation not offered by this adapter
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an adapter error
    pub fn adapter(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adapter {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a "not initialized" error
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
