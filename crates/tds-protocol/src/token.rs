//! TDS token definitions and decoders.
//!
//! A server response is a stream of tokens, each introduced by a one-byte
//! tag. This module holds the tag table and the decoders for every token
//! whose layout does not depend on column types. Column metadata lives in
//! [`crate::column`]; row and return values are decoded by `tds-types`.
//!
//! Decoders are generic over [`TdsRead`], so the same code runs over a
//! blocking packet transport and over an assembled in-memory message.
//! Tokens that carry a length prefix are read into a framed sub-reader first,
//! which keeps a short or padded token from desynchronizing the stream.

use bitflags::bitflags;

use crate::charset::Collation;
use crate::codec::{MessageWriter, TdsRead, TdsWrite};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Token type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Sybase 5.0 language (SQL text) request.
    Language = 0x21,
    /// Column offset information.
    Offset = 0x78,
    /// Return status of a stored procedure.
    ReturnStatus = 0x79,
    /// Column metadata (TDS 7.0/8.0).
    ColMetaData = 0x81,
    /// Column names (TDS 4.2/5.0).
    ColName = 0xA0,
    /// Column formats (TDS 4.2/5.0).
    ColFmt = 0xA1,
    /// Table names of a browse-mode result.
    TabName = 0xA4,
    /// Column browse information.
    ColInfo = 0xA5,
    /// ORDER BY column list.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Output parameter value.
    ReturnValue = 0xAC,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Compute control information.
    Control = 0xAE,
    /// Row data.
    Row = 0xD1,
    /// Output parameters (TDS 5.0).
    Params = 0xD7,
    /// Capability negotiation (TDS 5.0).
    Capability = 0xE2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Extended error message (TDS 5.0).
    Eed = 0xE5,
    /// Remote procedure call request (TDS 5.0).
    DbRpc = 0xE6,
    /// Parameter formats (TDS 5.0).
    ParamFmt = 0xEC,
    /// SSPI authentication challenge.
    Sspi = 0xED,
    /// Row formats (TDS 5.0).
    RowFmt = 0xEE,
    /// End of a SQL statement.
    Done = 0xFD,
    /// End of a stored procedure.
    DoneProc = 0xFE,
    /// End of a statement inside a stored procedure.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x21 => Some(Self::Language),
            0x78 => Some(Self::Offset),
            0x79 => Some(Self::ReturnStatus),
            0x81 => Some(Self::ColMetaData),
            0xA0 => Some(Self::ColName),
            0xA1 => Some(Self::ColFmt),
            0xA4 => Some(Self::TabName),
            0xA5 => Some(Self::ColInfo),
            0xA9 => Some(Self::Order),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAC => Some(Self::ReturnValue),
            0xAD => Some(Self::LoginAck),
            0xAE => Some(Self::Control),
            0xD1 => Some(Self::Row),
            0xD7 => Some(Self::Params),
            0xE2 => Some(Self::Capability),
            0xE3 => Some(Self::EnvChange),
            0xE5 => Some(Self::Eed),
            0xE6 => Some(Self::DbRpc),
            0xEC => Some(Self::ParamFmt),
            0xED => Some(Self::Sspi),
            0xEE => Some(Self::RowFmt),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            _ => None,
        }
    }

    /// Whether this token ends a statement.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done | Self::DoneProc | Self::DoneInProc)
    }

    /// Whether this token is skipped by its two-byte length without
    /// interpretation.
    #[must_use]
    pub const fn is_skippable(self) -> bool {
        matches!(
            self,
            Self::Offset
                | Self::TabName
                | Self::ColInfo
                | Self::Order
                | Self::Control
                | Self::Capability
        )
    }
}

bitflags! {
    /// Status bits of a done token.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// Row count is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention (cancel) request.
        const ATTN = 0x0020;
        /// A server error terminated the statement.
        const SRV_ERROR = 0x0100;
    }
}

/// Operation code the server reports for a SELECT statement.
pub const OP_SELECT: u16 = 0xC1;

/// Which of the three done tokens was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoneKind {
    /// End of a statement in a batch.
    Done,
    /// End of a stored procedure.
    DoneProc,
    /// End of a statement inside a stored procedure.
    DoneInProc,
}

impl DoneKind {
    /// Token tag of this kind.
    #[must_use]
    pub const fn token_type(self) -> TokenType {
        match self {
            Self::Done => TokenType::Done,
            Self::DoneProc => TokenType::DoneProc,
            Self::DoneInProc => TokenType::DoneInProc,
        }
    }
}

/// Done, DoneProc or DoneInProc token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Which token this is.
    pub kind: DoneKind,
    /// Status flags.
    pub status: DoneStatus,
    /// Operation code of the completed statement.
    pub cur_cmd: u16,
    /// Row count exactly as sent by the server.
    pub row_count: i32,
}

impl Done {
    /// Size of a done token body (excluding the tag byte).
    pub const SIZE: usize = 8;

    /// Create a final done token carrying a row count.
    #[must_use]
    pub fn with_count(kind: DoneKind, row_count: i32) -> Self {
        Self {
            kind,
            status: DoneStatus::COUNT,
            cur_cmd: 0,
            row_count,
        }
    }

    /// Decode a done token body; the tag has already been consumed.
    pub fn decode<R: TdsRead>(src: &mut R, kind: DoneKind) -> Result<Self, R::Error> {
        let status = DoneStatus::from_bits_retain(src.read_u16()?);
        let cur_cmd = src.read_u16()?;
        let row_count = src.read_i32()?;
        Ok(Self {
            kind,
            status,
            cur_cmd,
            row_count,
        })
    }

    /// Encode the token including its tag.
    pub fn encode<W: TdsWrite>(&self, dst: &mut W) -> Result<(), W::Error> {
        dst.write_u8(self.kind.token_type() as u8)?;
        dst.write_u16(self.status.bits())?;
        dst.write_u16(self.cur_cmd)?;
        dst.write_i32(self.row_count)
    }

    /// More results follow this token.
    #[must_use]
    pub const fn more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// The statement failed.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR)
    }

    /// The token acknowledges an attention request.
    #[must_use]
    pub const fn is_attention(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Row count as reported to callers.
    ///
    /// A SELECT reports 0 affected records and a statement inside a
    /// procedure reports -1; otherwise the raw count is returned.
    #[must_use]
    pub const fn records_affected(&self) -> i32 {
        if matches!(self.kind, DoneKind::DoneInProc) {
            -1
        } else if self.cur_cmd == OP_SELECT {
            0
        } else {
            self.row_count
        }
    }
}

/// Error or informational message sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class.
    pub severity: u8,
    /// Message text.
    pub message: String,
    /// Name of the server that raised the message.
    pub server: String,
    /// Procedure that raised the message, if any.
    pub procedure: String,
    /// Line number inside the batch or procedure.
    pub line: u32,
    /// SQLSTATE of an extended error message.
    pub sql_state: Option<String>,
}

/// Severity above which a message is an error rather than information.
pub const ERROR_SEVERITY_THRESHOLD: u8 = 10;

impl ServerMessage {
    /// Decode an Error (0xAA) or Info (0xAB) token body.
    pub fn decode<R: TdsRead>(src: &mut R) -> Result<Self, R::Error> {
        let len = usize::from(src.read_u16()?);
        let mut body = src.read_framed(len)?;

        let number = body.read_i32()?;
        let state = body.read_u8()?;
        let severity = body.read_u8()?;
        let message = body.read_us_varchar()?;
        let server = body.read_b_varchar()?;
        let procedure = body.read_b_varchar()?;
        let line = read_line_number(&mut body)?;

        Ok(Self {
            number,
            state,
            severity,
            message,
            server,
            procedure,
            line,
            sql_state: None,
        })
    }

    /// Decode a TDS 5.0 extended error (0xE5) token body.
    pub fn decode_eed<R: TdsRead>(src: &mut R) -> Result<Self, R::Error> {
        let len = usize::from(src.read_u16()?);
        let mut body = src.read_framed(len)?;

        let number = body.read_i32()?;
        let state = body.read_u8()?;
        let severity = body.read_u8()?;
        let sql_state_len = usize::from(body.read_u8()?);
        let sql_state = body.read_narrow(sql_state_len)?;
        let _status = body.read_u8()?;
        let _tran_state = body.read_u16()?;
        let message = body.read_us_varchar()?;
        let server = body.read_b_varchar()?;
        let procedure = body.read_b_varchar()?;
        let line = read_line_number(&mut body)?;

        Ok(Self {
            number,
            state,
            severity,
            message,
            server,
            procedure,
            line,
            sql_state: Some(sql_state),
        })
    }

    /// Encode as an Error or Info token, tag included.
    ///
    /// The tag is chosen from the severity.
    pub fn encode<W: TdsWrite>(&self, dst: &mut W) -> Result<(), W::Error> {
        let mut body = MessageWriter::new(dst.string_mode()).with_byte_order(dst.byte_order());
        body.write_i32(self.number)?;
        body.write_u8(self.state)?;
        body.write_u8(self.severity)?;
        body.write_us_varchar(&self.message)?;
        body.write_b_varchar(&self.server)?;
        body.write_b_varchar(&self.procedure)?;
        body.write_u16(self.line as u16)?;

        let tag = if self.is_error() {
            TokenType::Error
        } else {
            TokenType::Info
        };
        dst.write_u8(tag as u8)?;
        write_framed(dst, &body.freeze())
    }

    /// Whether the message reports an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.severity > ERROR_SEVERITY_THRESHOLD
    }
}

impl std::fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Msg {}, Level {}, State {}: {}",
            self.number, self.severity, self.state, self.message
        )
    }
}

fn read_line_number<R: TdsRead>(body: &mut R) -> Result<u32, R::Error> {
    // Two bytes on every version this crate speaks; tolerate a missing field.
    match body.read_u16() {
        Ok(line) => Ok(u32::from(line)),
        Err(_) => Ok(0),
    }
}

/// Login acknowledgment outcome reported by legacy servers.
pub mod login_status {
    /// Login accepted.
    pub const SUCCEED: u8 = 5;
    /// Login rejected.
    pub const FAIL: u8 = 6;
    /// Further negotiation required.
    pub const NEGOTIATE: u8 = 7;
}

/// Login acknowledgment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface (TDS 7+) or login status (legacy) byte.
    pub interface: u8,
    /// TDS version bytes as sent by the server.
    pub tds_version: [u8; 4],
    /// Server product name with trailing NULs removed.
    pub prog_name: String,
    /// Server product version bytes.
    pub prog_version: [u8; 4],
}

impl LoginAck {
    /// Decode a login acknowledgment body.
    pub fn decode<R: TdsRead>(src: &mut R) -> Result<Self, R::Error> {
        let len = usize::from(src.read_u16()?);
        let mut body = src.read_framed(len)?;

        let interface = body.read_u8()?;
        let mut tds_version = [0u8; 4];
        body.read_exact_into(&mut tds_version)?;
        let name = body.read_b_varchar()?;
        let mut prog_version = [0u8; 4];
        let n = body.remaining().min(4);
        body.read_exact_into(&mut prog_version[..n])?;

        Ok(Self {
            interface,
            tds_version,
            prog_name: name.trim_end_matches('\0').to_string(),
            prog_version,
        })
    }

    /// Encode the token, tag included.
    pub fn encode<W: TdsWrite>(&self, dst: &mut W) -> Result<(), W::Error> {
        let mut body = MessageWriter::new(dst.string_mode()).with_byte_order(dst.byte_order());
        body.write_u8(self.interface)?;
        body.write_slice(&self.tds_version)?;
        body.write_b_varchar(&self.prog_name)?;
        body.write_slice(&self.prog_version)?;

        dst.write_u8(TokenType::LoginAck as u8)?;
        write_framed(dst, &body.freeze())
    }

    /// Whether a legacy server rejected the login.
    #[must_use]
    pub const fn is_rejected(&self, version: TdsVersion) -> bool {
        version.is_legacy() && self.interface == login_status::FAIL
    }

    /// Server product version in the notation of its product line.
    ///
    /// TDS 7.0/8.0 servers report `MM.mm.bbbb`; legacy servers `major.minor`.
    #[must_use]
    pub fn product_version(&self, version: TdsVersion) -> String {
        let [major, minor, hi, lo] = self.prog_version;
        if version.is_legacy() {
            format!("{major}.{minor}")
        } else {
            let build = u16::from(hi) * 256 + u16::from(lo);
            format!("{major:02}.{minor:02}.{build:04}")
        }
    }
}

/// Environment change type codes.
pub mod env_type {
    /// Current database.
    pub const DATABASE: u8 = 1;
    /// Session language.
    pub const LANGUAGE: u8 = 2;
    /// Character set.
    pub const CHARSET: u8 = 3;
    /// Packet size.
    pub const PACKET_SIZE: u8 = 4;
    /// Sort order (Unicode locale id on TDS 7+).
    pub const SORT_ORDER: u8 = 5;
    /// Unicode comparison style.
    pub const COMPARISON_STYLE: u8 = 6;
    /// SQL collation (TDS 8.0).
    pub const COLLATION: u8 = 7;
}

/// Environment change token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Database changed.
    Database {
        /// New database.
        new: String,
        /// Database the server believes was current.
        old: String,
    },
    /// Language changed.
    Language {
        /// New language.
        new: String,
        /// Previous language.
        old: String,
    },
    /// Character set changed.
    Charset {
        /// New character set name.
        new: String,
        /// Previous character set name.
        old: String,
    },
    /// Packet size renegotiated.
    PacketSize {
        /// New packet size in bytes.
        new: u32,
        /// Previous packet size as sent.
        old: String,
    },
    /// Sort order changed.
    SortOrder {
        /// New sort order description.
        new: String,
    },
    /// Default collation changed (TDS 8.0).
    Collation {
        /// New collation, if the server sent one.
        new: Option<Collation>,
    },
    /// Any other change; contents skipped.
    Other {
        /// Raw type code.
        env_type: u8,
    },
}

impl EnvChange {
    /// Decode an environment change body.
    pub fn decode<R: TdsRead>(src: &mut R) -> Result<Self, R::Error> {
        let len = usize::from(src.read_u16()?);
        let mut body = src.read_framed(len)?;
        let env_type = body.read_u8()?;

        let change = match env_type {
            env_type::DATABASE => {
                let (new, old) = read_string_pair(&mut body)?;
                Self::Database { new, old }
            }
            env_type::LANGUAGE => {
                let (new, old) = read_string_pair(&mut body)?;
                Self::Language { new, old }
            }
            env_type::CHARSET => {
                let (new, old) = read_string_pair(&mut body)?;
                Self::Charset { new, old }
            }
            env_type::PACKET_SIZE => {
                let (new, old) = read_string_pair(&mut body)?;
                let size = new.trim().parse::<u32>().map_err(|_| {
                    ProtocolError::InvalidEnvChange(format!("packet size {new:?}"))
                })?;
                Self::PacketSize { new: size, old }
            }
            env_type::SORT_ORDER => {
                let (new, _) = read_string_pair(&mut body)?;
                Self::SortOrder { new }
            }
            env_type::COLLATION => {
                let n = usize::from(body.read_u8()?);
                let raw = body.read_bytes(n)?;
                let new = if n == Collation::WIRE_SIZE {
                    Some(Collation::from_bytes(&raw)?)
                } else {
                    None
                };
                Self::Collation { new }
            }
            other => Self::Other { env_type: other },
        };
        Ok(change)
    }

    /// Encode the token, tag included.
    pub fn encode<W: TdsWrite>(&self, dst: &mut W) -> Result<(), W::Error> {
        let mut body = MessageWriter::new(dst.string_mode()).with_byte_order(dst.byte_order());
        match self {
            Self::Database { new, old } => {
                write_string_pair(&mut body, env_type::DATABASE, new, old)?;
            }
            Self::Language { new, old } => {
                write_string_pair(&mut body, env_type::LANGUAGE, new, old)?;
            }
            Self::Charset { new, old } => {
                write_string_pair(&mut body, env_type::CHARSET, new, old)?;
            }
            Self::PacketSize { new, old } => {
                write_string_pair(&mut body, env_type::PACKET_SIZE, &new.to_string(), old)?;
            }
            Self::SortOrder { new } => {
                write_string_pair(&mut body, env_type::SORT_ORDER, new, "")?;
            }
            Self::Collation { new } => {
                body.write_u8(env_type::COLLATION)?;
                match new {
                    Some(collation) => {
                        body.write_u8(Collation::WIRE_SIZE as u8)?;
                        body.write_slice(&collation.to_bytes())?;
                    }
                    None => body.write_u8(0)?,
                }
                body.write_u8(0)?;
            }
            Self::Other { env_type } => {
                body.write_u8(*env_type)?;
            }
        }
        dst.write_u8(TokenType::EnvChange as u8)?;
        write_framed(dst, &body.freeze())
    }
}

fn read_string_pair<R: TdsRead>(body: &mut R) -> Result<(String, String), R::Error> {
    let new = body.read_b_varchar()?;
    // Some servers omit the old value entirely.
    let old = match body.peek_u8() {
        Ok(_) => body.read_b_varchar()?,
        Err(_) => String::new(),
    };
    Ok((new, old))
}

fn write_string_pair(
    body: &mut MessageWriter,
    code: u8,
    new: &str,
    old: &str,
) -> Result<(), ProtocolError> {
    body.write_u8(code)?;
    body.write_b_varchar(new)?;
    body.write_b_varchar(old)
}

/// Write a two-byte length followed by `body`.
pub fn write_framed<W: TdsWrite>(dst: &mut W, body: &[u8]) -> Result<(), W::Error> {
    if body.len() > usize::from(u16::MAX) {
        return Err(ProtocolError::ValueTooLarge {
            field: "token body",
            len: body.len(),
            max: usize::from(u16::MAX),
        }
        .into());
    }
    dst.write_u16(body.len() as u16)?;
    dst.write_slice(body)
}

/// Decode a return status body.
pub fn decode_return_status<R: TdsRead>(src: &mut R) -> Result<i32, R::Error> {
    src.read_i32()
}

/// Decode an SSPI challenge body.
pub fn decode_sspi<R: TdsRead>(src: &mut R) -> Result<bytes::Bytes, R::Error> {
    let len = usize::from(src.read_u16()?);
    src.read_bytes(len)
}

/// Skip a token body carrying a two-byte length.
///
/// Returns the number of bytes skipped.
pub fn skip_token<R: TdsRead>(src: &mut R) -> Result<usize, R::Error> {
    let len = usize::from(src.read_u16()?);
    src.skip(len)?;
    Ok(len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{SliceReader, StringMode};

    fn reader(w: MessageWriter, mode: StringMode) -> SliceReader {
        SliceReader::new(w.freeze(), mode)
    }

    #[test]
    fn test_token_type_from_u8() {
        assert_eq!(TokenType::from_u8(0xFD), Some(TokenType::Done));
        assert_eq!(TokenType::from_u8(0xA1), Some(TokenType::ColFmt));
        assert_eq!(TokenType::from_u8(0xEE), Some(TokenType::RowFmt));
        assert_eq!(TokenType::from_u8(0x01), None);
        assert!(TokenType::DoneInProc.is_done());
        assert!(TokenType::Order.is_skippable());
        assert!(!TokenType::Row.is_skippable());
    }

    #[test]
    fn test_done_roundtrip() {
        let done = Done {
            kind: DoneKind::Done,
            status: DoneStatus::COUNT,
            cur_cmd: OP_SELECT,
            row_count: 1,
        };
        let mut w = MessageWriter::new(StringMode::unicode());
        done.encode(&mut w).unwrap();
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[0xFD, 0x10, 0x00, 0xC1, 0x00, 0x01, 0x00, 0x00, 0x00]);

        let mut r = SliceReader::new(bytes.slice(1..), StringMode::unicode());
        let decoded = Done::decode(&mut r, DoneKind::Done).unwrap();
        assert_eq!(decoded, done);
        assert!(!decoded.more());
        assert_eq!(decoded.row_count, 1);
    }

    #[test]
    fn test_done_records_affected_mapping() {
        let select = Done {
            kind: DoneKind::Done,
            status: DoneStatus::COUNT,
            cur_cmd: OP_SELECT,
            row_count: 7,
        };
        assert_eq!(select.records_affected(), 0);

        let update = Done {
            cur_cmd: 0xC5,
            ..select
        };
        assert_eq!(update.records_affected(), 7);

        let in_proc = Done {
            kind: DoneKind::DoneInProc,
            cur_cmd: 0xC5,
            ..select
        };
        assert_eq!(in_proc.records_affected(), -1);
    }

    #[test]
    fn test_done_status_unknown_bits_retained() {
        let mut r = SliceReader::new(vec![0x21, 0x80, 0, 0, 0, 0, 0, 0], StringMode::default());
        let done = Done::decode(&mut r, DoneKind::DoneProc).unwrap();
        assert!(done.more());
        assert!(done.is_attention());
        assert_eq!(done.status.bits(), 0x8021);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage {
            number: 208,
            state: 1,
            severity: 16,
            message: "Invalid object name 'nope'.".into(),
            server: "DB1".into(),
            procedure: String::new(),
            line: 1,
            sql_state: None,
        };
        let mut w = MessageWriter::new(StringMode::unicode());
        msg.encode(&mut w).unwrap();
        let mut r = reader(w, StringMode::unicode());
        assert_eq!(r.read_u8().unwrap(), TokenType::Error as u8);
        let decoded = ServerMessage::decode(&mut r).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.is_error());
        assert!(r.is_empty());
    }

    #[test]
    fn test_info_is_not_error() {
        let msg = ServerMessage {
            number: 5701,
            severity: 10,
            message: "Changed database context to 'master'.".into(),
            ..Default::default()
        };
        assert!(!msg.is_error());
        let mut w = MessageWriter::new(StringMode::default());
        msg.encode(&mut w).unwrap();
        assert_eq!(w.freeze()[0], TokenType::Info as u8);
    }

    #[test]
    fn test_eed_decode() {
        let mode = StringMode::default();
        let mut body = MessageWriter::new(mode);
        body.write_i32(2812).unwrap();
        body.write_u8(5).unwrap();
        body.write_u8(16).unwrap();
        body.write_u8(5).unwrap();
        body.write_slice(b"ZZZZZ").unwrap();
        body.write_u8(0).unwrap();
        body.write_u16(0).unwrap();
        body.write_us_varchar("Stored procedure 'x' not found.").unwrap();
        body.write_b_varchar("SYB").unwrap();
        body.write_b_varchar("").unwrap();
        body.write_u16(1).unwrap();
        let body = body.freeze();

        let mut w = MessageWriter::new(mode);
        write_framed(&mut w, &body).unwrap();
        let mut r = reader(w, mode);
        let msg = ServerMessage::decode_eed(&mut r).unwrap();
        assert_eq!(msg.number, 2812);
        assert_eq!(msg.sql_state.as_deref(), Some("ZZZZZ"));
        assert_eq!(msg.server, "SYB");
        assert!(msg.is_error());
    }

    #[test]
    fn test_login_ack_modern_version_string() {
        let ack = LoginAck {
            interface: 1,
            tds_version: [0x07, 0x01, 0x00, 0x00],
            prog_name: "Microsoft SQL Server\0\0".into(),
            prog_version: [8, 0, 0x02, 0xC2],
        };
        let mut w = MessageWriter::new(StringMode::unicode());
        ack.encode(&mut w).unwrap();
        let mut r = reader(w, StringMode::unicode());
        r.read_u8().unwrap();
        let decoded = LoginAck::decode(&mut r).unwrap();
        assert_eq!(decoded.prog_name, "Microsoft SQL Server");
        assert_eq!(decoded.product_version(TdsVersion::V8_0), "08.00.0706");
        assert!(!decoded.is_rejected(TdsVersion::V8_0));
    }

    #[test]
    fn test_login_ack_legacy() {
        let ack = LoginAck {
            interface: login_status::FAIL,
            tds_version: [5, 0, 0, 0],
            prog_name: "sql server".into(),
            prog_version: [12, 5, 0, 0],
        };
        let mut w = MessageWriter::new(StringMode::default());
        ack.encode(&mut w).unwrap();
        let mut r = reader(w, StringMode::default());
        r.read_u8().unwrap();
        let decoded = LoginAck::decode(&mut r).unwrap();
        assert_eq!(decoded.product_version(TdsVersion::V5_0), "12.5");
        assert!(decoded.is_rejected(TdsVersion::V5_0));
    }

    #[test]
    fn test_env_change_database() {
        let change = EnvChange::Database {
            new: "pubs".into(),
            old: "master".into(),
        };
        let mut w = MessageWriter::new(StringMode::unicode());
        change.encode(&mut w).unwrap();
        let mut r = reader(w, StringMode::unicode());
        assert_eq!(r.read_u8().unwrap(), 0xE3);
        assert_eq!(EnvChange::decode(&mut r).unwrap(), change);
    }

    #[test]
    fn test_env_change_packet_size() {
        let change = EnvChange::PacketSize {
            new: 4096,
            old: "512".into(),
        };
        let mut w = MessageWriter::new(StringMode::default());
        change.encode(&mut w).unwrap();
        let mut r = reader(w, StringMode::default());
        r.read_u8().unwrap();
        assert_eq!(EnvChange::decode(&mut r).unwrap(), change);
    }

    #[test]
    fn test_env_change_bad_packet_size() {
        let mode = StringMode::default();
        let mut body = MessageWriter::new(mode);
        body.write_u8(env_type::PACKET_SIZE).unwrap();
        body.write_b_varchar("big").unwrap();
        body.write_b_varchar("512").unwrap();
        let mut w = MessageWriter::new(mode);
        write_framed(&mut w, &body.freeze()).unwrap();
        let mut r = reader(w, mode);
        assert!(matches!(
            EnvChange::decode(&mut r).unwrap_err(),
            ProtocolError::InvalidEnvChange(_)
        ));
    }

    #[test]
    fn test_env_change_collation() {
        let collation = Collation {
            lcid: 0x0409,
            flags: 0x0D,
            version: 0,
            sort_id: 0x34,
        };
        let change = EnvChange::Collation {
            new: Some(collation),
        };
        let mut w = MessageWriter::new(StringMode::unicode());
        change.encode(&mut w).unwrap();
        let mut r = reader(w, StringMode::unicode());
        r.read_u8().unwrap();
        assert_eq!(EnvChange::decode(&mut r).unwrap(), change);
    }

    #[test]
    fn test_env_change_missing_old_value() {
        let mode = StringMode::default();
        let mut body = MessageWriter::new(mode);
        body.write_u8(env_type::CHARSET).unwrap();
        body.write_b_varchar("iso_1").unwrap();
        let mut w = MessageWriter::new(mode);
        write_framed(&mut w, &body.freeze()).unwrap();
        let mut r = reader(w, mode);
        assert_eq!(
            EnvChange::decode(&mut r).unwrap(),
            EnvChange::Charset {
                new: "iso_1".into(),
                old: String::new()
            }
        );
    }

    #[test]
    fn test_skip_token() {
        let mut r = SliceReader::new(vec![0x03, 0x00, 1, 2, 3, 0xFD], StringMode::default());
        assert_eq!(skip_token(&mut r).unwrap(), 3);
        assert_eq!(r.peek_u8().unwrap(), 0xFD);
    }
}
