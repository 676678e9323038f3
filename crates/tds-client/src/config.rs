//! Session configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tds_auth::{Credentials, DomainAuthenticator};
use tds_protocol::charset::encoding_for_charset;
use tds_protocol::packet::{MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use tds_protocol::version::TdsVersion;

use crate::error::{Error, Result};

/// Parameters of one server connection.
///
/// Built with the setter methods and checked by [`Config::validate`]
/// before any socket is opened. A session copies its config at connect
/// time; later changes do not affect it.
#[derive(Clone)]
pub struct Config {
    /// Server host name or address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Login credentials.
    pub credentials: Credentials,
    /// Producer of domain-login tokens, required with domain credentials.
    pub authenticator: Option<Arc<dyn DomainAuthenticator>>,
    /// Initial database; empty keeps the login default.
    pub database: String,
    /// Application name reported to the server.
    pub application_name: String,
    /// Client library name (TDS 7.0+).
    pub library_name: String,
    /// Program name (legacy logins).
    pub program_name: String,
    /// Client host name reported to the server.
    pub client_host: String,
    /// Requested packet size in bytes.
    pub packet_size: u16,
    /// Protocol version; fixed for the lifetime of a session.
    pub tds_version: TdsVersion,
    /// Initial language; empty keeps the server default.
    pub language: String,
    /// Character set name for legacy logins.
    pub charset: String,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Socket read timeout; `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    /// Socket write timeout; `None` blocks indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            credentials: Credentials::default(),
            authenticator: None,
            database: String::new(),
            application_name: "tds-client".to_string(),
            library_name: "tds-rs".to_string(),
            program_name: "tds-rs".to_string(),
            client_host: String::new(),
            packet_size: 4096,
            tds_version: TdsVersion::V8_0,
            language: String::new(),
            charset: "iso_1".to_string(),
            connect_timeout: Duration::from_secs(15),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use server authentication.
    #[must_use]
    pub fn sql_login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::sql_server(user.into(), password.into());
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use domain login through the given authenticator.
    #[must_use]
    pub fn domain_login(
        mut self,
        domain: impl Into<String>,
        user: impl Into<String>,
        authenticator: Arc<dyn DomainAuthenticator>,
    ) -> Self {
        self.credentials = Credentials::domain(domain.into(), user.into());
        self.authenticator = Some(authenticator);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the client library name.
    #[must_use]
    pub fn library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = name.into();
        self
    }

    /// Set the program name.
    #[must_use]
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    /// Set the client host name.
    #[must_use]
    pub fn client_host(mut self, name: impl Into<String>) -> Self {
        self.client_host = name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the legacy character set name.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set socket read and write timeouts.
    #[must_use]
    pub fn socket_timeouts(mut self, read: Option<Duration>, write: Option<Duration>) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Check the configuration for values no server would accept.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".into()));
        }
        let size = usize::from(self.packet_size);
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(Error::Config(format!(
                "packet size {size} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}"
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect timeout must be positive".into()));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero())
            || self.write_timeout.is_some_and(|t| t.is_zero())
        {
            return Err(Error::Config("socket timeouts must be positive".into()));
        }
        if self.credentials.is_sql_auth() && self.credentials.username().is_empty() {
            return Err(Error::Config("user name must not be empty".into()));
        }
        if self.credentials.is_domain() {
            if self.tds_version.is_legacy() {
                return Err(Error::Config(format!(
                    "domain login is not available on TDS {}",
                    self.tds_version
                )));
            }
            if self.authenticator.is_none() {
                return Err(Error::Config(
                    "domain login requires an authenticator".into(),
                ));
            }
        }
        if self.tds_version.is_legacy() && encoding_for_charset(&self.charset).is_none() {
            return Err(Error::Config(format!(
                "unknown character set {:?}",
                self.charset
            )));
        }
        Ok(())
    }

    /// Key identifying sessions that are interchangeable.
    ///
    /// Two configs with equal keys produce sessions a pool may hand out
    /// for one another.
    #[must_use]
    pub fn key(&self) -> ConfigKey {
        let (user, secret) = match &self.credentials {
            Credentials::SqlServer { username, password } => {
                (username.to_string(), password.to_string())
            }
            Credentials::Domain { domain, username } => {
                (format!("{domain}\\{username}"), String::new())
            }
        };
        ConfigKey {
            host: self.host.to_ascii_lowercase(),
            port: self.port,
            user,
            secret,
            database: self.database.clone(),
            application_name: self.application_name.clone(),
            packet_size: self.packet_size,
            tds_version: self.tds_version,
            language: self.language.clone(),
            charset: self.charset.clone(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials)
            .field("authenticator", &self.authenticator.is_some())
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("packet_size", &self.packet_size)
            .field("tds_version", &self.tds_version)
            .field("charset", &self.charset)
            .finish_non_exhaustive()
    }
}

/// Hashable identity of a [`Config`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    host: String,
    port: u16,
    user: String,
    secret: String,
    database: String,
    application_name: String,
    packet_size: u16,
    tds_version: TdsVersion,
    language: String,
    charset: String,
}

impl fmt::Debug for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{} (TDS {})",
            self.user, self.host, self.port, self.database, self.tds_version
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tds_auth::AuthError;

    struct NoopAuth;

    impl DomainAuthenticator for NoopAuth {
        fn negotiate(&self) -> std::result::Result<Bytes, AuthError> {
            Ok(Bytes::from_static(b"NTLMSSP\0"))
        }

        fn respond(&self, _challenge: &[u8]) -> std::result::Result<Bytes, AuthError> {
            Ok(Bytes::new())
        }
    }

    fn base() -> Config {
        Config::new().host("db").sql_login("sa", "")
    }

    #[test]
    fn test_defaults_validate() {
        let config = base();
        assert_eq!(config.port, 1433);
        assert_eq!(config.tds_version, TdsVersion::V8_0);
        config.validate().unwrap();
    }

    #[test]
    fn test_packet_size_bounds() {
        assert!(base().packet_size(511).validate().is_err());
        assert!(base().packet_size(512).validate().is_ok());
        assert!(base().packet_size(32767).validate().is_ok());
        assert!(base().packet_size(32768).validate().is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        let err = base().host(" ").validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_user_rejected() {
        assert!(base().sql_login("", "x").validate().is_err());
    }

    #[test]
    fn test_domain_login_rules() {
        let auth: Arc<dyn DomainAuthenticator> = Arc::new(NoopAuth);
        let config = base().domain_login("CORP", "alice", Arc::clone(&auth));
        config.validate().unwrap();

        let legacy = config.clone().tds_version(TdsVersion::V5_0);
        assert!(legacy.validate().is_err());

        let mut missing = base().credentials(Credentials::domain("CORP", "alice"));
        missing.authenticator = None;
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_legacy_charset_must_be_known() {
        let config = base().tds_version(TdsVersion::V4_2);
        config.validate().unwrap();
        assert!(config.charset("klingon").validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(base().connect_timeout(Duration::ZERO).validate().is_err());
        assert!(
            base()
                .socket_timeouts(Some(Duration::ZERO), None)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_key_equality() {
        let a = base().database("master");
        let b = base().database("master").host("DB");
        let c = base().database("tempdb");
        assert!(a.key() == b.key());
        assert!(a.key() != c.key());
        assert!(a.key() != base().database("master").sql_login("sa", "other").key());
    }

    #[test]
    fn test_debug_hides_password() {
        let text = format!("{:?}", base().sql_login("sa", "hunter2"));
        assert!(!text.contains("hunter2"));
    }
}
