//! Error types for Relaycast

use thiserror::Error;

/// Main error type for Relaycast
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Relaycast
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry of the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Gateway(_))
    }
}
