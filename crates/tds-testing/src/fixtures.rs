//! Token stream fixtures.
//!
//! [`TokenBuilder`] writes server tokens the way a server of a given
//! protocol version would: column descriptions as COLMETADATA (7.0/8.0),
//! ROWFMT (5.0) or COLNAME plus COLFMT (4.2), strings as UCS-2 or in a
//! single-byte character set.
//!
//! ```
//! use tds_protocol::{DoneStatus, TdsVersion};
//! use tds_testing::fixtures::{TokenBuilder, int_column};
//! use tds_types::SqlValue;
//!
//! let columns = [int_column("")];
//! let tokens = TokenBuilder::new(TdsVersion::V7_0)
//!     .columns(&columns)?
//!     .row(&columns, &[SqlValue::Int(1)])?
//!     .done(DoneStatus::COUNT, 1)?
//!     .finish();
//! assert!(!tokens.is_empty());
//! # Ok::<(), tds_testing::MockServerError>(())
//! ```

use bytes::Bytes;
use encoding_rs::Encoding;
use tds_protocol::column::{encode_col_metadata, encode_col_name_fmt, encode_format};
use tds_protocol::token::{login_status, write_framed};
use tds_protocol::types::TypeId;
use tds_protocol::{
    ColumnInfo, Done, DoneKind, DoneStatus, EnvChange, FormatKind, LoginAck, MessageWriter,
    OP_SELECT, ServerMessage, StringMode, TdsVersion, TdsWrite, TokenType, TypeInfo,
};
use tds_types::{SqlValue, encode_row_value};

use crate::error::Result;

/// Interface byte a TDS 7.0/8.0 server reports for T-SQL.
const INTERFACE_SQL: u8 = 1;

/// Product version reported in login acknowledgments.
const PROG_VERSION: [u8; 4] = [8, 0, 0x07, 0xD0];

/// Builds a server response token by token.
#[derive(Debug)]
pub struct TokenBuilder {
    version: TdsVersion,
    w: MessageWriter,
}

impl TokenBuilder {
    /// Create a builder for `version`, using Windows-1252 for narrow strings.
    #[must_use]
    pub fn new(version: TdsVersion) -> Self {
        Self::with_encoding(version, encoding_rs::WINDOWS_1252)
    }

    /// Create a builder whose narrow strings use `encoding`.
    #[must_use]
    pub fn with_encoding(version: TdsVersion, encoding: &'static Encoding) -> Self {
        let mode = if version.uses_unicode() {
            StringMode::unicode()
        } else {
            StringMode::narrow(encoding)
        };
        Self {
            version,
            w: MessageWriter::new(mode),
        }
    }

    /// Protocol version tokens are written for.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.version
    }

    /// Append an environment change.
    pub fn env_change(mut self, change: &EnvChange) -> Result<Self> {
        change.encode(&mut self.w)?;
        Ok(self)
    }

    /// Append a database change.
    pub fn database(self, new: &str, old: &str) -> Result<Self> {
        self.env_change(&EnvChange::Database {
            new: new.to_string(),
            old: old.to_string(),
        })
    }

    /// Append a packet size change.
    pub fn packet_size(self, new: u32, old: u32) -> Result<Self> {
        self.env_change(&EnvChange::PacketSize {
            new,
            old: old.to_string(),
        })
    }

    /// Append a successful login acknowledgment.
    pub fn login_ack(self, server_name: &str) -> Result<Self> {
        let interface = if self.version.is_legacy() {
            login_status::SUCCEED
        } else {
            INTERFACE_SQL
        };
        self.login_ack_with(interface, server_name)
    }

    /// Append a login acknowledgment with a raw interface/status byte.
    pub fn login_ack_with(mut self, interface: u8, server_name: &str) -> Result<Self> {
        let tds_version = match self.version {
            TdsVersion::V8_0 => [0x71, 0x00, 0x00, 0x01],
            TdsVersion::V7_0 => [0x07, 0x00, 0x00, 0x00],
            v => v.legacy_version_bytes(),
        };
        LoginAck {
            interface,
            tds_version,
            prog_name: server_name.to_string(),
            prog_version: PROG_VERSION,
        }
        .encode(&mut self.w)?;
        Ok(self)
    }

    /// Append an error or informational message.
    pub fn message(mut self, message: &ServerMessage) -> Result<Self> {
        message.encode(&mut self.w)?;
        Ok(self)
    }

    /// Append an informational message (severity 0).
    pub fn info(self, number: i32, text: &str) -> Result<Self> {
        self.message(&ServerMessage {
            number,
            message: text.to_string(),
            server: "MOCK".to_string(),
            ..ServerMessage::default()
        })
    }

    /// Append an error message.
    pub fn error(self, number: i32, severity: u8, text: &str) -> Result<Self> {
        self.message(&ServerMessage {
            number,
            state: 1,
            severity,
            message: text.to_string(),
            server: "MOCK".to_string(),
            line: 1,
            ..ServerMessage::default()
        })
    }

    /// Append the column description of a result set.
    pub fn columns(mut self, columns: &[ColumnInfo]) -> Result<Self> {
        match self.version {
            TdsVersion::V4_2 => encode_col_name_fmt(&mut self.w, columns, self.version)?,
            TdsVersion::V5_0 => encode_format(&mut self.w, columns, FormatKind::Row)?,
            _ => encode_col_metadata(&mut self.w, columns, self.version)?,
        }
        Ok(self)
    }

    /// Append one row; values are encoded against `columns`.
    pub fn row(mut self, columns: &[ColumnInfo], values: &[SqlValue]) -> Result<Self> {
        self.w.write_u8(TokenType::Row as u8)?;
        for (column, value) in columns.iter().zip(values) {
            let bytes =
                encode_row_value(value, &column.type_info, self.version, self.w.string_mode())?;
            self.w.write_slice(&bytes)?;
        }
        Ok(self)
    }

    /// Append a procedure return status.
    pub fn return_status(mut self, status: i32) -> Result<Self> {
        self.w.write_u8(TokenType::ReturnStatus as u8)?;
        self.w.write_i32(status)?;
        Ok(self)
    }

    /// Append an output parameter value.
    pub fn return_value(
        mut self,
        ordinal: u16,
        name: &str,
        type_info: &TypeInfo,
        value: &SqlValue,
    ) -> Result<Self> {
        let mode = self.w.string_mode();
        let encoded = encode_row_value(value, type_info, self.version, mode)?;
        self.w.write_u8(TokenType::ReturnValue as u8)?;

        if self.version.is_legacy() {
            // the declared length covers the header, not the value
            let mut header = MessageWriter::new(mode);
            header.write_b_varchar(name)?;
            header.write_u8(1)?;
            if self.version == TdsVersion::V5_0 {
                header.write_u32(0)?;
            } else {
                header.write_u16(0)?;
            }
            type_info.encode(&mut header, self.version)?;
            write_framed(&mut self.w, &header.freeze())?;
        } else {
            self.w.write_u16(ordinal)?;
            self.w.write_b_varchar(name)?;
            self.w.write_u8(1)?;
            self.w.write_u16(0)?;
            self.w.write_u16(0)?;
            type_info.encode(&mut self.w, self.version)?;
        }
        self.w.write_slice(&encoded)?;
        Ok(self)
    }

    /// Append a DONE token.
    pub fn done(self, status: DoneStatus, row_count: i32) -> Result<Self> {
        self.done_token(Done {
            kind: DoneKind::Done,
            status,
            cur_cmd: 0,
            row_count,
        })
    }

    /// Append a DONE token closing a SELECT.
    pub fn done_select(self, status: DoneStatus, row_count: i32) -> Result<Self> {
        self.done_token(Done {
            kind: DoneKind::Done,
            status: status | DoneStatus::COUNT,
            cur_cmd: OP_SELECT,
            row_count,
        })
    }

    /// Append a DONEPROC token.
    pub fn done_proc(self, status: DoneStatus, row_count: i32) -> Result<Self> {
        self.done_token(Done {
            kind: DoneKind::DoneProc,
            status,
            cur_cmd: 0,
            row_count,
        })
    }

    /// Append any done token.
    pub fn done_token(mut self, done: Done) -> Result<Self> {
        done.encode(&mut self.w)?;
        Ok(self)
    }

    /// Append pre-encoded bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Result<Self> {
        self.w.write_slice(bytes)?;
        Ok(self)
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.w.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    /// Finish and return the token stream.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.w.freeze()
    }
}

/// A non-nullable 4-byte integer column.
#[must_use]
pub fn int_column(name: &str) -> ColumnInfo {
    ColumnInfo::new(name, TypeInfo::new(TypeId::Int4)).not_null()
}

/// A nullable integer column of the given width (1, 2, 4 or 8 bytes).
#[must_use]
pub fn intn_column(name: &str, width: u32) -> ColumnInfo {
    ColumnInfo::new(name, TypeInfo::with_length(TypeId::IntN, width))
}

/// A nullable single-byte character column.
#[must_use]
pub fn varchar_column(name: &str, max_len: u32) -> ColumnInfo {
    ColumnInfo::new(name, TypeInfo::with_length(TypeId::VarChar, max_len))
}

/// A nullable UCS-2 character column of `max_chars` characters.
#[must_use]
pub fn nvarchar_column(name: &str, max_chars: u32) -> ColumnInfo {
    ColumnInfo::new(name, TypeInfo::with_length(TypeId::NVarChar, max_chars * 2))
}
