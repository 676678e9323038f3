//! # tds-auth
//!
//! Credential handling for TDS logins.
//!
//! Login packets never carry a password in the clear: every login variant
//! obfuscates it with the nibble-swap scramble in [`scramble`]. Domain
//! (Windows) logins carry an opaque negotiation blob instead, produced by an
//! external [`DomainAuthenticator`].
//!
//! ## Supported Authentication Methods
//!
//! | Method | Provider | Description |
//! |--------|----------|-------------|
//! | SQL Authentication | [`SqlAuthenticator`] | Username/password |
//! | Domain login | [`DomainAuth`] | NTLM blob from a [`DomainAuthenticator`] |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod domain;
pub mod error;
pub mod provider;
pub mod scramble;
pub mod sql_auth;

pub use credentials::Credentials;
pub use domain::{DomainAuth, DomainAuthenticator};
pub use error::AuthError;
pub use provider::{AuthData, AuthMethod, AuthProvider};
pub use scramble::{scramble_bytes, scramble_password, unscramble_bytes, unscramble_password};
pub use sql_auth::SqlAuthenticator;
