//! The seam between a login packet and whoever supplies its credentials.

use bytes::Bytes;

use crate::error::AuthError;

/// Which credential block a login carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// User name and scrambled password in the login record.
    SqlServer,
    /// Integrated security; the login record carries a negotiation blob.
    Domain,
}

impl AuthMethod {
    /// Whether the login sets the integrated-security flag.
    #[must_use]
    pub fn is_sspi(&self) -> bool {
        matches!(self, Self::Domain)
    }
}

/// Credential block for one login.
#[derive(Debug, Clone)]
pub enum AuthData {
    /// Server login.
    SqlServer {
        /// Login name.
        username: String,
        /// Password, already UTF-16LE and scrambled.
        password_bytes: Bytes,
    },
    /// Domain login.
    Sspi {
        /// First negotiation message.
        blob: Bytes,
    },
}

/// Source of credentials for TDS 7.0 and 8.0 logins.
pub trait AuthProvider: Send + Sync {
    /// Credential block this provider fills in.
    fn method(&self) -> AuthMethod;

    /// Build the credentials for a single login attempt.
    fn authenticate(&self) -> Result<AuthData, AuthError>;
}
