//! Codec error types.

use std::io;

use tds_protocol::ProtocolError;
use tds_types::TypeError;
use thiserror::Error;

/// Errors raised by the packet transport.
///
/// Apart from [`CodecError::Value`], raised before anything is written,
/// every variant leaves the byte stream in an unknown position and the
/// session that owns the transport must be discarded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream or the stream broke.
    #[error("connection lost")]
    ConnectionLost,

    /// A previous read or write was abandoned mid-message.
    #[error("connection poisoned by an interrupted message")]
    ConnectionPoisoned,

    /// The peer sent bytes that violate the wire format.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A composite value could not be encoded.
    #[error("value encoding failed: {0}")]
    Value(#[from] TypeError),
}

impl CodecError {
    /// Map an I/O failure, folding disconnect kinds into [`CodecError::ConnectionLost`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Self::ConnectionLost,
            _ => Self::Io(err),
        }
    }

    /// Check if the peer went away.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }

    /// Check if the error came from a socket timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
    }
}
