//! Error types for BDPM ingestion
//!
//! These are file-level failures: anything that stops one source file from
//! being fetched, decoded or loaded. Problems with a single field of a single
//! line are not errors; the decoder reports them as diagnostics.

use thiserror::Error;

/// Result type alias for BDPM operations
pub type Result<T> = std::result::Result<T, BdpmError>;

/// Main error type for BDPM
#[derive(Error, Debug)]
pub enum BdpmError {
    /// Stream read or artifact write failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid column schema or runtime configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Download failure (after retries)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl BdpmError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BdpmError::Configuration(message.into())
    }

    /// Whether this error came from a bad schema or configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self, BdpmError::Configuration(_))
    }
}
