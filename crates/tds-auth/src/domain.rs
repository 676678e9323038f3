//! Windows domain login.
//!
//! The NTLM messages themselves are produced outside this workspace. A
//! [`DomainAuthenticator`] hands over the Type-1 negotiation blob appended
//! to the login packet and answers the server's SSPI challenge.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::AuthError;
use crate::provider::{AuthData, AuthMethod, AuthProvider};

/// Producer of opaque domain-login tokens.
///
/// One authenticator may serve many connections, so implementations keep
/// any per-handshake state behind their own synchronization.
pub trait DomainAuthenticator: Send + Sync {
    /// Initial negotiation message (NTLM Type-1).
    fn negotiate(&self) -> Result<Bytes, AuthError>;

    /// Answer to the server challenge carried in an SSPI token.
    fn respond(&self, challenge: &[u8]) -> Result<Bytes, AuthError>;
}

/// [`AuthProvider`] backed by a [`DomainAuthenticator`].
#[derive(Clone)]
pub struct DomainAuth {
    authenticator: Arc<dyn DomainAuthenticator>,
}

impl DomainAuth {
    /// Wrap an authenticator.
    pub fn new(authenticator: Arc<dyn DomainAuthenticator>) -> Self {
        Self { authenticator }
    }

    /// Answer a server challenge.
    pub fn respond(&self, challenge: &[u8]) -> Result<Bytes, AuthError> {
        let reply = self.authenticator.respond(challenge)?;
        tracing::debug!(
            challenge_len = challenge.len(),
            reply_len = reply.len(),
            "answered SSPI challenge"
        );
        Ok(reply)
    }
}

impl fmt::Debug for DomainAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainAuth").finish_non_exhaustive()
    }
}

impl AuthProvider for DomainAuth {
    fn method(&self) -> AuthMethod {
        AuthMethod::Domain
    }

    fn authenticate(&self) -> Result<AuthData, AuthError> {
        let blob = self.authenticator.negotiate()?;
        if blob.is_empty() {
            return Err(AuthError::Sspi("empty negotiation message".into()));
        }
        Ok(AuthData::Sspi { blob })
    }
}
