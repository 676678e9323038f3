//! TDS 4.2 / 5.0 login packet construction.
//!
//! The legacy login is a single packet of fixed-width fields. Every string
//! field is padded (or truncated) to its width and followed by a byte giving
//! the number of meaningful bytes. Strings use the connection character set.
//! TDS 5.0 appends a capability token after the fixed fields.

use bytes::Bytes;
use encoding_rs::Encoding;

use crate::codec::{MessageWriter, StringMode, TdsWrite, encode_narrow};
use crate::error::ProtocolError;
use crate::token::TokenType;
use crate::version::TdsVersion;

/// Width of the name fields (host, user, password, application, ...).
pub const NAME_FIELD_WIDTH: usize = 30;

/// Width of the remote-password field.
pub const REMOTE_PASSWORD_WIDTH: usize = 253;

/// Width of the program name field.
pub const PROGRAM_NAME_WIDTH: usize = 10;

/// Width of the decimal packet-size field.
pub const PACKET_SIZE_WIDTH: usize = 6;

/// Host process id sent in place of a real one.
pub const DEFAULT_HOST_PROCESS: &str = "00000116";

/// Application-type bytes that follow the host process field.
const APP_TYPE_MAGIC: [u8; 6] = [0x00, 0xA0, 0x24, 0xCC, 0x50, 0x12];

/// Format codes: int2, int4, char, float, date (little-endian ASCII IEEE).
const FORMAT_CODES: [u8; 5] = [0x03, 0x01, 0x06, 0x0A, 0x09];

/// Client program version.
const PROGRAM_VERSION: [u8; 4] = [0x06, 0x00, 0x00, 0x00];

/// 4-byte float and date formats.
const FLOAT4_FORMAT: u8 = 0x0D;
const DATE4_FORMAT: u8 = 0x11;

/// Capability bitmaps sent by TDS 5.0 clients (request and response).
const CAPABILITIES: [u8; 22] = [
    0x01, 0x09, 0x00, 0x00, 0x06, 0x6D, 0x7F, 0xFF, 0xFF, 0xFF, 0xFE, 0x02, 0x09, 0x00, 0x00,
    0x00, 0x00, 0x02, 0x68, 0x00, 0x00, 0x00,
];

/// Legacy login packet builder.
#[derive(Debug, Clone)]
pub struct LegacyLogin {
    /// Protocol version; must be 4.2 or 5.0.
    pub tds_version: TdsVersion,
    /// Client host name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Scrambled password bytes.
    pub password: Bytes,
    /// Host process identifier.
    pub host_process: String,
    /// Application name.
    pub app_name: String,
    /// Server name.
    pub server_name: String,
    /// Program name.
    pub program_name: String,
    /// Initial language.
    pub language: String,
    /// Character set name.
    pub charset: String,
    /// Requested packet size.
    pub packet_size: u32,
}

impl Default for LegacyLogin {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V4_2,
            hostname: String::new(),
            username: String::new(),
            password: Bytes::new(),
            host_process: DEFAULT_HOST_PROCESS.to_string(),
            app_name: String::new(),
            server_name: String::new(),
            program_name: String::new(),
            language: String::new(),
            charset: "iso_1".to_string(),
            packet_size: 512,
        }
    }
}

impl LegacyLogin {
    /// Create a new builder for `version`.
    #[must_use]
    pub fn new(version: TdsVersion) -> Self {
        Self {
            tds_version: version,
            ..Self::default()
        }
    }

    /// Set the login name and scrambled password.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Bytes) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }

    /// Set the client host name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the program name.
    #[must_use]
    pub fn with_program_name(mut self, program_name: impl Into<String>) -> Self {
        self.program_name = program_name.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the character set name.
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the login payload with strings in `encoding`.
    pub fn encode(&self, encoding: &'static Encoding) -> Result<Bytes, ProtocolError> {
        if !self.tds_version.is_legacy() {
            return Err(ProtocolError::UnsupportedVersion {
                version: self.tds_version.to_string(),
                context: "legacy login",
            });
        }

        let mut w = MessageWriter::new(StringMode::narrow(encoding));
        let text = |s: &str| encode_narrow(s, encoding);

        put_field(&mut w, &text(&self.hostname), NAME_FIELD_WIDTH)?;
        put_field(&mut w, &text(&self.username), NAME_FIELD_WIDTH)?;
        put_field(&mut w, &self.password, NAME_FIELD_WIDTH)?;

        // host process: 8 bytes of id, padding and the application-type
        // magic fill the 30-byte field
        let host_process = text(&self.host_process);
        let kept = w.write_padded(&host_process, 8, 0)?;
        w.write_padded(&[], 16, 0)?;
        w.write_slice(&APP_TYPE_MAGIC)?;
        w.write_u8(kept as u8)?;

        w.write_slice(&FORMAT_CODES)?;
        w.write_u8(1)?; // notify on use-database
        w.write_u8(1)?; // disallow dump/load and bulk insert
        w.write_u8(0)?; // interface spare
        w.write_u8(0)?; // network type
        w.write_padded(&[], 7, 0)?;

        put_field(&mut w, &text(&self.app_name), NAME_FIELD_WIDTH)?;
        put_field(&mut w, &text(&self.server_name), NAME_FIELD_WIDTH)?;

        // remote password: server-name length (none), password length,
        // password, then the total of both plus their length bytes
        let remote = &self.password[..self.password.len().min(REMOTE_PASSWORD_WIDTH)];
        w.write_u8(0)?;
        w.write_u8(remote.len() as u8)?;
        w.write_padded(remote, REMOTE_PASSWORD_WIDTH, 0)?;
        w.write_u8((remote.len() + 2) as u8)?;

        w.write_slice(&self.tds_version.legacy_version_bytes())?;
        put_field(&mut w, &text(&self.program_name), PROGRAM_NAME_WIDTH)?;
        w.write_slice(&PROGRAM_VERSION)?;
        w.write_u8(0)?; // no auto-conversion of short floats
        w.write_u8(FLOAT4_FORMAT)?;
        w.write_u8(DATE4_FORMAT)?;

        put_field(&mut w, &text(&self.language), NAME_FIELD_WIDTH)?;
        w.write_u8(1)?; // notify on language change
        w.write_padded(&[], 2, 0)?; // security label hierarchy
        w.write_padded(&[], 8, 0)?; // security components
        w.write_padded(&[], 2, 0)?; // spare
        w.write_u8(0)?; // login role

        put_field(&mut w, &text(&self.charset), NAME_FIELD_WIDTH)?;
        put_field(&mut w, self.packet_size.to_string().as_bytes(), PACKET_SIZE_WIDTH)?;
        w.write_padded(&[], 8, 0)?;

        if self.tds_version == TdsVersion::V5_0 {
            w.write_u8(TokenType::Capability as u8)?;
            w.write_u16(CAPABILITIES.len() as u16)?;
            w.write_slice(&CAPABILITIES)?;
        }

        Ok(w.freeze())
    }
}

/// Write a padded fixed-width field followed by its meaningful length.
fn put_field(w: &mut MessageWriter, value: &[u8], width: usize) -> Result<(), ProtocolError> {
    let kept = w.write_padded(value, width, 0)?;
    w.write_u8(kept as u8)
}
