//! Error types for txfixture

use thiserror::Error;

/// Core error type for txfixture operations
#[derive(Error, Debug)]
pub enum TxFixtureError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl TxFixtureError {
    /// Whether this error means the database could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TxFixtureError::Connection(_) | TxFixtureError::Timeout(_))
    }
}

/// Result type alias for txfixture operations
pub type Result<T> = std::result::Result<T, TxFixtureError>;
