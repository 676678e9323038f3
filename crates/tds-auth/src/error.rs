//! Errors raised while preparing login credentials.

use thiserror::Error;

/// Failure to produce the credential part of a login.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Username or password rejected before anything was sent.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The requested login flavour does not exist for this protocol version.
    #[error("login method not available: {0}")]
    UnsupportedMethod(String),

    /// The domain authenticator did not hand back a negotiation blob.
    #[error("domain authenticator failed: {0}")]
    Sspi(String),

    /// Unscrambled password bytes are not UTF-16LE.
    #[error("scrambled password is malformed: {0}")]
    MalformedPassword(String),
}
