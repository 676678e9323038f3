//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No session became available within the timeout.
    #[error("pool exhausted: no session available after {0:?}")]
    Exhausted(Duration),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Opening or resetting a session failed.
    #[error("session error: {0}")]
    Session(#[from] tds_client::Error),

    /// Pool is closed.
    #[error("pool is closed")]
    Closed,

    /// The reaper thread could not be started.
    #[error("failed to start reaper thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl PoolError {
    /// Whether retrying the acquisition later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Exhausted(_) => true,
            Self::Session(e) => e.is_transient(),
            Self::Configuration(_) | Self::Closed | Self::Thread(_) => false,
        }
    }
}
