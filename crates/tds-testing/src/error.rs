//! Errors raised by mock peers and fixtures.

use tds_protocol::ProtocolError;
use tds_types::TypeError;
use thiserror::Error;

/// Error type for mock peer operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A token or packet could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A row value could not be encoded.
    #[error("value error: {0}")]
    Value(#[from] TypeError),

    /// The client sent something the mock does not understand.
    #[error("unexpected request: {0}")]
    Unexpected(String),
}

/// Result type for mock peer operations.
pub type Result<T> = std::result::Result<T, MockServerError>;
