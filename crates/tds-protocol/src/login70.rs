//! TDS 7.0 / 8.0 login packet construction.
//!
//! The Login70 packet starts with an 86-byte fixed prefix: the total length,
//! requested version and packet size, a block of client capability fields,
//! then offset/length pairs locating each variable field. The variable
//! fields follow as UTF-16LE strings, in the order the pairs list them.
//!
//! ## Authentication
//!
//! SQL authentication sends the user name and the scrambled password.
//! Domain authentication sends both empty, sets the integrated-security
//! flag and appends an NTLM negotiate message as the SSPI field.

use bytes::{Bytes, BytesMut};

use crate::codec::{MessageWriter, StringMode, TdsWrite, utf16_byte_len, write_utf16_string};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed Login70 prefix.
pub const LOGIN70_HEADER_SIZE: usize = 86;

/// Login70 option flags 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionFlags1 {
    /// Use big-endian byte order.
    pub byte_order_be: bool,
    /// Character set is EBCDIC.
    pub char_ebcdic: bool,
    /// Dump/load off.
    pub dump_load_off: bool,
    /// Warn on database change.
    pub use_db_notify: bool,
    /// Failure to change to the initial database is fatal.
    pub database_fatal: bool,
    /// Warn on language change.
    pub set_lang_warn: bool,
}

impl OptionFlags1 {
    /// Convert to byte.
    ///
    /// Layout: bit 0 byte order, bit 1 character set, bits 2-3 float format
    /// (IEEE is 0), bit 4 dump/load, bit 5 use-db, bit 6 database, bit 7
    /// set-language.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.byte_order_be {
            flags |= 0x01;
        }
        if self.char_ebcdic {
            flags |= 0x02;
        }
        if self.dump_load_off {
            flags |= 0x10;
        }
        if self.use_db_notify {
            flags |= 0x20;
        }
        if self.database_fatal {
            flags |= 0x40;
        }
        if self.set_lang_warn {
            flags |= 0x80;
        }
        flags
    }
}

/// Login70 option flags 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionFlags2 {
    /// Failure to set the initial language is fatal.
    pub language_fatal: bool,
    /// ODBC client.
    pub odbc: bool,
    /// Integrated (domain) security.
    pub integrated_security: bool,
}

impl OptionFlags2 {
    /// Convert to byte.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.language_fatal {
            flags |= 0x01;
        }
        if self.odbc {
            flags |= 0x02;
        }
        if self.integrated_security {
            flags |= 0x80;
        }
        flags
    }
}

/// Login70 type flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeFlags {
    /// SQL type (0 = default, 1 = T-SQL).
    pub sql_type: u8,
    /// OLE DB client.
    pub oledb: bool,
}

impl TypeFlags {
    /// Convert to byte.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = self.sql_type & 0x0F;
        if self.oledb {
            flags |= 0x10;
        }
        flags
    }
}

/// Login70 packet builder.
#[derive(Debug, Clone)]
pub struct Login70 {
    /// TDS version to request (7.0 or 8.0).
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Connection id.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Client time zone offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client host name.
    pub hostname: String,
    /// Login name (empty for domain login).
    pub username: String,
    /// Scrambled password, UTF-16LE (empty for domain login).
    pub password: Bytes,
    /// Application name.
    pub app_name: String,
    /// Server name.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client id (network address, usually zeros).
    pub client_id: [u8; 6],
    /// NTLM negotiate message for domain login.
    pub sspi_data: Bytes,
    /// Database file to attach.
    pub attach_db_file: String,
}

impl Default for Login70 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_0,
            packet_size: 4096,
            client_prog_version: 0x0600_0000,
            client_pid: 0xFFF8_F283,
            connection_id: 0,
            option_flags1: OptionFlags1 {
                use_db_notify: true,
                database_fatal: true,
                set_lang_warn: true,
                ..Default::default()
            },
            option_flags2: OptionFlags2 {
                language_fatal: true,
                odbc: true,
                ..Default::default()
            },
            type_flags: TypeFlags::default(),
            client_timezone: -120,
            client_lcid: 0x0436,
            hostname: String::new(),
            username: String::new(),
            password: Bytes::new(),
            app_name: String::new(),
            server_name: String::new(),
            library_name: String::new(),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            sspi_data: Bytes::new(),
            attach_db_file: String::new(),
        }
    }
}

impl Login70 {
    /// Create a new Login70 builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Configure SQL authentication with a scrambled password.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: Bytes) -> Self {
        self.username = username.into();
        self.password = password;
        self.option_flags2.integrated_security = false;
        self
    }

    /// Configure domain authentication with an NTLM negotiate message.
    ///
    /// Also switches the client capability block to the values domain
    /// logins are sent with.
    #[must_use]
    pub fn with_domain_auth(mut self, negotiate: Bytes) -> Self {
        self.username.clear();
        self.password = Bytes::new();
        self.sspi_data = negotiate;
        self.option_flags2.integrated_security = true;
        self.client_pid = 0xFFFD_0F7D;
        self.client_timezone = 360;
        self.client_lcid = 0x0409;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
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

    /// Set the client library name.
    #[must_use]
    pub fn with_library_name(mut self, library_name: impl Into<String>) -> Self {
        self.library_name = library_name.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the Login70 payload.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.tds_version.is_legacy() {
            return Err(ProtocolError::UnsupportedVersion {
                version: self.tds_version.to_string(),
                context: "Login70",
            });
        }
        if self.password.len() % 2 != 0 {
            return Err(ProtocolError::InvalidValueLength {
                type_name: "scrambled password",
                length: self.password.len(),
            });
        }

        let mut strings = BytesMut::new();
        let mut pairs: Vec<(u16, u16)> = Vec::with_capacity(9);

        push_text(&mut strings, &mut pairs, &self.hostname)?;
        push_text(&mut strings, &mut pairs, &self.username)?;
        push_field(&mut strings, &mut pairs, &self.password, self.password.len() / 2)?;
        push_text(&mut strings, &mut pairs, &self.app_name)?;
        push_text(&mut strings, &mut pairs, &self.server_name)?;
        push_text(&mut strings, &mut pairs, "")?;
        push_text(&mut strings, &mut pairs, &self.library_name)?;
        push_text(&mut strings, &mut pairs, &self.language)?;
        push_text(&mut strings, &mut pairs, &self.database)?;

        let sspi_offset = field_u16("sspi offset", LOGIN70_HEADER_SIZE + strings.len())?;
        let sspi_len = field_u16("sspi", self.sspi_data.len())?;
        strings.extend_from_slice(&self.sspi_data);

        let attach_offset = field_u16("attach db offset", LOGIN70_HEADER_SIZE + strings.len())?;
        let attach_len = field_u16("attach db", self.attach_db_file.encode_utf16().count())?;
        write_utf16_string(&mut strings, &self.attach_db_file);

        let total_length = LOGIN70_HEADER_SIZE + strings.len();

        let mut w = MessageWriter::new(StringMode::unicode());
        w.write_u32(total_length as u32)?;
        w.write_u32(self.tds_version.login70_raw())?;
        w.write_u32(self.packet_size)?;
        w.write_u32(self.client_prog_version)?;
        w.write_u32(self.client_pid)?;
        w.write_u32(self.connection_id)?;
        w.write_u8(self.option_flags1.to_byte())?;
        w.write_u8(self.option_flags2.to_byte())?;
        w.write_u8(self.type_flags.to_byte())?;
        w.write_u8(0)?; // reserved
        w.write_i32(self.client_timezone)?;
        w.write_u32(self.client_lcid)?;
        for (off, len) in pairs {
            w.write_u16(off)?;
            w.write_u16(len)?;
        }
        w.write_slice(&self.client_id)?;
        w.write_u16(sspi_offset)?;
        w.write_u16(sspi_len)?;
        w.write_u16(attach_offset)?;
        w.write_u16(attach_len)?;
        w.write_slice(&strings)?;

        Ok(w.freeze())
    }
}

/// Append a variable field and record its (offset, character count) pair.
fn push_field(
    strings: &mut BytesMut,
    pairs: &mut Vec<(u16, u16)>,
    bytes: &[u8],
    chars: usize,
) -> Result<(), ProtocolError> {
    let offset = field_u16("login field offset", LOGIN70_HEADER_SIZE + strings.len())?;
    pairs.push((offset, field_u16("login field", chars)?));
    strings.extend_from_slice(bytes);
    Ok(())
}

fn push_text(
    strings: &mut BytesMut,
    pairs: &mut Vec<(u16, u16)>,
    s: &str,
) -> Result<(), ProtocolError> {
    let mut encoded = BytesMut::with_capacity(utf16_byte_len(s));
    write_utf16_string(&mut encoded, s);
    push_field(strings, pairs, &encoded, s.encode_utf16().count())
}

fn field_u16(field: &'static str, value: usize) -> Result<u16, ProtocolError> {
    u16::try_from(value).map_err(|_| ProtocolError::ValueTooLarge {
        field,
        len: value,
        max: usize::from(u16::MAX),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn u16_at(b: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([b[at], b[at + 1]])
    }

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn test_sql_auth_capability_block() {
        let bytes = Login70::new()
            .with_packet_size(512)
            .with_sql_auth("sa", Bytes::new())
            .encode()
            .unwrap();

        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x70]);
        assert_eq!(&bytes[8..12], &[0x00, 0x02, 0x00, 0x00]);
        // 3 zero bytes then the 21-byte capability block
        assert_eq!(
            &bytes[12..36],
            &[
                0x00, 0x00, 0x00, 0x06, 0x83, 0xF2, 0xF8, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xE0,
                0x03, 0x00, 0x00, 0x88, 0xFF, 0xFF, 0xFF, 0x36, 0x04, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_domain_capability_block() {
        let bytes = Login70::new()
            .with_tds_version(TdsVersion::V8_0)
            .with_domain_auth(Bytes::from_static(b"NTLMSSP\0\x01\0\0\0"))
            .encode()
            .unwrap();

        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x00, 0x71]);
        assert_eq!(
            &bytes[12..36],
            &[
                0x00, 0x00, 0x00, 0x06, 0x7D, 0x0F, 0xFD, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xE0,
                0x83, 0x00, 0x00, 0x68, 0x01, 0x00, 0x00, 0x09, 0x04, 0x00, 0x00
            ]
        );
        // user and password empty, SSPI blob at the end
        assert_eq!(u16_at(&bytes, 42), 0);
        assert_eq!(u16_at(&bytes, 46), 0);
        let sspi_offset = usize::from(u16_at(&bytes, 78));
        let sspi_len = usize::from(u16_at(&bytes, 80));
        assert_eq!(sspi_len, 12);
        assert_eq!(&bytes[sspi_offset..sspi_offset + sspi_len], b"NTLMSSP\0\x01\0\0\0");
    }

    #[test]
    fn test_variable_fields() {
        let scrambled = Bytes::from_static(&[0xB3, 0xA5, 0x93, 0xA5]);
        let bytes = Login70::new()
            .with_hostname("HOST")
            .with_sql_auth("sa", scrambled.clone())
            .with_app_name("app")
            .with_database("master")
            .encode()
            .unwrap();

        let total = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(total, bytes.len());

        // host
        assert_eq!(u16_at(&bytes, 36), 86);
        assert_eq!(u16_at(&bytes, 38), 4);
        assert_eq!(&bytes[86..94], &utf16("HOST")[..]);
        // user
        assert_eq!(u16_at(&bytes, 40), 94);
        assert_eq!(u16_at(&bytes, 42), 2);
        // password follows the user name
        assert_eq!(u16_at(&bytes, 44), 98);
        assert_eq!(u16_at(&bytes, 46), 2);
        assert_eq!(&bytes[98..102], &scrambled[..]);
        // app name
        assert_eq!(u16_at(&bytes, 48), 102);
        assert_eq!(&bytes[102..108], &utf16("app")[..]);
        // database is the ninth pair
        let db_offset = usize::from(u16_at(&bytes, 68));
        assert_eq!(u16_at(&bytes, 70), 6);
        assert_eq!(&bytes[db_offset..db_offset + 12], &utf16("master")[..]);
    }

    #[test]
    fn test_rejects_legacy_version() {
        assert!(Login70::new()
            .with_tds_version(TdsVersion::V4_2)
            .encode()
            .is_err());
    }

    #[test]
    fn test_rejects_odd_password() {
        assert!(Login70::new()
            .with_sql_auth("sa", Bytes::from_static(&[1, 2, 3]))
            .encode()
            .is_err());
    }
}
