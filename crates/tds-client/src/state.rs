//! Session lifecycle states.
//!
//! ```text
//! Disconnected -> LoggingOn (login packet sent)
//! LoggingOn -> Connected (terminal done, no error message)
//! LoggingOn -> Failed (error message or transport failure)
//! Connected -> Dead (fatal transport or protocol error, or close())
//! ```

use std::fmt;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport yet.
    Disconnected,
    /// Login packet sent, awaiting the terminal done.
    LoggingOn,
    /// Logged in and able to run requests.
    Connected,
    /// The server rejected the login.
    Failed,
    /// The transport is broken or closed.
    Dead,
}

impl SessionState {
    /// Check whether requests may be sent.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check whether the session can never become usable again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Dead)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::LoggingOn => "logging on",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}
