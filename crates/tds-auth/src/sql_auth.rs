//! Server (username/password) authentication.

use crate::credentials::Credentials;
use crate::error::AuthError;
use crate::provider::{AuthData, AuthMethod, AuthProvider};
use crate::scramble::scramble_password;

/// Produces scrambled login credentials.
#[derive(Debug, Clone)]
pub struct SqlAuthenticator {
    credentials: Credentials,
}

impl SqlAuthenticator {
    /// Create an authenticator for server credentials.
    pub fn new(credentials: Credentials) -> Result<Self, AuthError> {
        if !credentials.is_sql_auth() {
            return Err(AuthError::UnsupportedMethod(
                "SqlAuthenticator only supports SQL Server credentials".into(),
            ));
        }
        Ok(Self { credentials })
    }
}

impl AuthProvider for SqlAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::SqlServer
    }

    fn authenticate(&self) -> Result<AuthData, AuthError> {
        let Credentials::SqlServer { username, password } = &self.credentials else {
            return Err(AuthError::UnsupportedMethod(
                self.credentials.method_name().into(),
            ));
        };
        if username.is_empty() {
            return Err(AuthError::InvalidCredentials("empty user name".into()));
        }

        tracing::debug!(username = %username, "building server authentication data");

        Ok(AuthData::SqlServer {
            username: username.to_string(),
            password_bytes: scramble_password(password),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::scramble::unscramble_password;

    #[test]
    fn test_password_is_scrambled() {
        let auth = SqlAuthenticator::new(Credentials::sql_server("sa", "test")).unwrap();
        match auth.authenticate().unwrap() {
            AuthData::SqlServer {
                username,
                password_bytes,
            } => {
                assert_eq!(username, "sa");
                assert_eq!(password_bytes.len(), 8);
                assert_ne!(&password_bytes[..], b"t\0e\0s\0t\0");
                assert_eq!(unscramble_password(&password_bytes).unwrap(), "test");
            }
            other => panic!("unexpected auth data: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_credentials() {
        let result = SqlAuthenticator::new(Credentials::domain("CORP", "alice"));
        assert!(matches!(result, Err(AuthError::UnsupportedMethod(_))));
    }

    #[test]
    fn test_empty_username_rejected() {
        let auth = SqlAuthenticator::new(Credentials::sql_server("", "x")).unwrap();
        assert!(matches!(
            auth.authenticate(),
            Err(AuthError::InvalidCredentials(_))
        ));
    }
}
