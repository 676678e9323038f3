//! Credential types for authentication.

use std::borrow::Cow;

/// Credentials presented at login.
///
/// Credentials are designed to minimize copying of sensitive data.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Server authentication with username and password.
    SqlServer {
        /// Username.
        username: Cow<'static, str>,
        /// Password.
        password: Cow<'static, str>,
    },

    /// Windows domain login.
    ///
    /// The login packet carries no user name or password; the negotiation
    /// blob comes from a [`crate::DomainAuthenticator`].
    Domain {
        /// Domain name.
        domain: Cow<'static, str>,
        /// Account name.
        username: Cow<'static, str>,
    },
}

impl Credentials {
    /// Create server credentials.
    pub fn sql_server(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::SqlServer {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Create domain credentials.
    pub fn domain(
        domain: impl Into<Cow<'static, str>>,
        username: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::Domain {
            domain: domain.into(),
            username: username.into(),
        }
    }

    /// Check if these credentials use server authentication.
    #[must_use]
    pub fn is_sql_auth(&self) -> bool {
        matches!(self, Self::SqlServer { .. })
    }

    /// Check if these credentials request a domain login.
    #[must_use]
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain { .. })
    }

    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::SqlServer { username, .. } | Self::Domain { username, .. } => username,
        }
    }

    /// Get the authentication method name.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::SqlServer { .. } => "SQL Server Authentication",
            Self::Domain { .. } => "Domain Authentication",
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::sql_server("sa", "")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose sensitive data in debug output
        match self {
            Self::SqlServer { username, .. } => f
                .debug_struct("SqlServer")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Domain { domain, username } => f
                .debug_struct("Domain")
                .field("domain", domain)
                .field("username", username)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::sql_server("sa", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("sa"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_method_classification() {
        assert!(Credentials::sql_server("sa", "").is_sql_auth());
        let domain = Credentials::domain("CORP", "alice");
        assert!(domain.is_domain());
        assert_eq!(domain.username(), "alice");
        assert_eq!(domain.method_name(), "Domain Authentication");
    }
}
