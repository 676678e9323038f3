//! Login packet construction.
//!
//! TDS 4.2 and 5.0 send one fixed-layout login packet (type 0x02) with
//! strings in the connection character set. TDS 7.0 and 8.0 send Login70
//! (type 0x10) with UCS-2 strings, carrying either a scrambled password
//! or, for domain logins, the negotiation blob of a
//! [`DomainAuthenticator`](tds_auth::DomainAuthenticator).

use bytes::Bytes;
use encoding_rs::Encoding;
use tds_auth::{AuthData, AuthProvider, DomainAuth, SqlAuthenticator, scramble_bytes};
use tds_protocol::codec::encode_narrow;
use tds_protocol::{LegacyLogin, Login70, PacketType};

use crate::config::Config;
use crate::error::{Error, Result};

/// Host name reported when the configuration leaves it empty.
fn client_host(config: &Config) -> String {
    if config.client_host.is_empty() {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    } else {
        config.client_host.clone()
    }
}

/// An encoded login request.
#[derive(Debug)]
pub(crate) struct LoginRequest {
    /// Packet type carrying the payload.
    pub packet_type: PacketType,
    /// Encoded login record.
    pub payload: Bytes,
    /// Answers SSPI challenges of a domain login.
    pub domain_auth: Option<DomainAuth>,
}

/// Build the login request for the configured protocol version.
///
/// `encoding` is the connection character set used by legacy logins.
pub(crate) fn build_login(config: &Config, encoding: &'static Encoding) -> Result<LoginRequest> {
    if config.tds_version.is_legacy() {
        build_legacy(config, encoding)
    } else {
        build_login70(config)
    }
}

fn build_legacy(config: &Config, encoding: &'static Encoding) -> Result<LoginRequest> {
    let tds_auth::Credentials::SqlServer { username, password } = &config.credentials else {
        return Err(Error::Config(format!(
            "{} is not available on TDS {}",
            config.credentials.method_name(),
            config.tds_version
        )));
    };

    let password = scramble_bytes(&encode_narrow(password, encoding));
    let payload = LegacyLogin::new(config.tds_version)
        .with_credentials(username.to_string(), password)
        .with_hostname(client_host(config))
        .with_app_name(config.application_name.clone())
        .with_server_name(config.host.clone())
        .with_program_name(config.program_name.clone())
        .with_language(config.language.clone())
        .with_charset(config.charset.clone())
        .with_packet_size(u32::from(config.packet_size))
        .encode(encoding)?;

    Ok(LoginRequest {
        packet_type: PacketType::Login,
        payload,
        domain_auth: None,
    })
}

fn build_login70(config: &Config) -> Result<LoginRequest> {
    let login = Login70::new()
        .with_tds_version(config.tds_version)
        .with_hostname(client_host(config))
        .with_app_name(config.application_name.clone())
        .with_server_name(config.host.clone())
        .with_library_name(config.library_name.clone())
        .with_language(config.language.clone())
        .with_database(config.database.clone())
        .with_packet_size(u32::from(config.packet_size));

    let (login, domain_auth) = if config.credentials.is_domain() {
        let authenticator = config
            .authenticator
            .clone()
            .ok_or_else(|| Error::Config("domain login requires an authenticator".into()))?;
        let provider = DomainAuth::new(authenticator);
        match provider.authenticate()? {
            AuthData::Sspi { blob } => (login.with_domain_auth(blob), Some(provider)),
            AuthData::SqlServer { .. } => {
                return Err(Error::Config("domain provider returned a password".into()));
            }
        }
    } else {
        let provider = SqlAuthenticator::new(config.credentials.clone())?;
        match provider.authenticate()? {
            AuthData::SqlServer {
                username,
                password_bytes,
            } => (login.with_sql_auth(username, password_bytes), None),
            AuthData::Sspi { .. } => {
                return Err(Error::Config("server provider returned an SSPI blob".into()));
            }
        }
    };

    Ok(LoginRequest {
        packet_type: PacketType::Login70,
        payload: login.encode()?,
        domain_auth,
    })
}
