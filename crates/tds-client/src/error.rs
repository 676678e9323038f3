//! Client error types.

use tds_codec::CodecError;
use tds_protocol::ServerMessage;
use thiserror::Error;

/// Server error number reported for a deadlock victim.
pub const DEADLOCK_VICTIM: i32 = 1205;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed; the session is dead.
    #[error("transport error: {0}")]
    Transport(CodecError),

    /// The server violated the wire format; the session is dead.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// The batch completed with error-severity server messages.
    #[error("server error: {}", first_message(.0))]
    Server(Vec<ServerMessage>),

    /// The server rejected the login.
    #[error("login failed: {}", first_message(.messages))]
    Login {
        /// Messages the server sent before the terminal done.
        messages: Vec<ServerMessage>,
    },

    /// Invalid configuration, raised before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// Value conversion failed.
    #[error("type error: {0}")]
    Type(#[from] tds_types::TypeError),

    /// The credential provider failed.
    #[error("authentication error: {0}")]
    Auth(#[from] tds_auth::AuthError),

    /// The batch was cancelled by an attention request.
    #[error("operation cancelled")]
    Cancelled,

    /// The session is dead or was never connected.
    #[error("session is not usable")]
    SessionDead,

    /// The request is not valid for the session's protocol version.
    #[error("{operation} is not supported on TDS {version}")]
    Unsupported {
        /// What was attempted.
        operation: &'static str,
        /// Protocol version of the session.
        version: tds_protocol::TdsVersion,
    },
}

fn first_message(messages: &[ServerMessage]) -> String {
    match messages.iter().find(|m| m.is_error()).or(messages.first()) {
        Some(m) => m.to_string(),
        None => "no message".to_string(),
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Protocol(e) => Self::Protocol(e),
            CodecError::Value(e) => Self::Type(e),
            other => Self::Transport(other),
        }
    }
}

impl Error {
    /// Check whether the session that produced this error must be discarded.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_) | Self::SessionDead)
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Lost connections, socket timeouts and deadlock victims qualify.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connection_lost() || e.is_timeout(),
            Self::Server(messages) => messages.iter().any(|m| m.number == DEADLOCK_VICTIM),
            _ => false,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        self.server_messages().iter().any(|m| m.number == number)
    }

    /// Server messages carried by this error.
    #[must_use]
    pub fn server_messages(&self) -> &[ServerMessage] {
        match self {
            Self::Server(messages) | Self::Login { messages } => messages,
            _ => &[],
        }
    }

    /// Highest severity among the carried server messages.
    #[must_use]
    pub fn severity(&self) -> Option<u8> {
        self.server_messages().iter().map(|m| m.severity).max()
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
