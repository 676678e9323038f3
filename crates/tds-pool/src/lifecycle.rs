//! Session lifecycle management.
//!
//! This module defines the trait the pool uses to open, check, reset and
//! close sessions, and the bookkeeping it keeps for each pooled session.

use std::fmt;
use std::time::{Duration, Instant};

use tds_client::{Config, Session};

use crate::error::PoolError;

/// Trait for session lifecycle management.
///
/// A pool owns one manager and calls it from whichever thread acquires,
/// releases or reaps a session, so implementations must be shareable.
pub trait SessionManager: Send + Sync + 'static {
    /// The pooled session type.
    type Session: Send + 'static;

    /// Open a new session.
    fn connect(&self) -> Result<Self::Session, PoolError>;

    /// Cheap liveness check; no round trip to the server.
    fn probe(&self, session: &mut Self::Session) -> bool;

    /// Return a session to its post-login state before reuse.
    fn reset(&self, session: &mut Self::Session) -> Result<(), PoolError>;

    /// Close a session for good.
    fn destroy(&self, session: Self::Session);
}

/// [`SessionManager`] opening TCP sessions from a [`Config`].
#[derive(Clone)]
pub struct TdsSessionManager {
    config: Config,
}

impl TdsSessionManager {
    /// Create a manager that opens sessions with `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The configuration new sessions are opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for TdsSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdsSessionManager")
            .field("key", &self.config.key())
            .finish()
    }
}

impl SessionManager for TdsSessionManager {
    type Session = Session;

    fn connect(&self) -> Result<Session, PoolError> {
        Ok(Session::connect(self.config.clone())?)
    }

    fn probe(&self, session: &mut Session) -> bool {
        session.is_alive()
    }

    fn reset(&self, session: &mut Session) -> Result<(), PoolError> {
        if session.reset()? {
            Ok(())
        } else {
            Err(PoolError::Session(tds_client::Error::SessionDead))
        }
    }

    fn destroy(&self, mut session: Session) {
        if let Err(e) = session.close() {
            tracing::debug!(error = %e, "error closing pooled session");
        }
    }
}

/// Bookkeeping for one pooled session.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    /// Unique identifier within the pool.
    pub id: u64,
    /// Pool generation the session was opened in.
    pub generation: u64,
    /// When the session was opened.
    pub created_at: Instant,
    /// When the session was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the session has been checked out.
    pub checkout_count: u64,
    /// Whether a caller currently holds the session.
    pub in_use: bool,
}

impl SessionMetadata {
    /// Create metadata for a freshly opened session.
    #[must_use]
    pub fn new(id: u64, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            generation,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            in_use: false,
        }
    }

    /// Time since the session was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the session was last handed out or returned.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the session as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.in_use = true;
    }

    /// Mark the session as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.in_use = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_metadata_new() {
        let meta = SessionMetadata::new(1, 3);
        assert_eq!(meta.id, 1);
        assert_eq!(meta.generation, 3);
        assert_eq!(meta.checkout_count, 0);
        assert!(!meta.in_use);
    }

    #[test]
    fn test_session_metadata_checkout_checkin() {
        let mut meta = SessionMetadata::new(1, 0);
        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 1);
        assert!(meta.in_use);

        meta.mark_checkin();
        assert!(!meta.in_use);
        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 2);
    }

    #[test]
    fn test_manager_debug_hides_password() {
        let config = Config::new().host("db").sql_login("sa", "hunter2");
        let manager = TdsSessionManager::new(config);
        let shown = format!("{manager:?}");
        assert!(shown.contains("sa@db"));
        assert!(!shown.contains("hunter2"));
    }
}
