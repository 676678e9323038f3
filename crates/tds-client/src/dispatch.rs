//! Token dispatch.
//!
//! [`read_token`] reads one token tag from any [`TdsRead`] source and
//! decodes its body. Column lists live in a [`DispatchContext`] that
//! persists across calls, since ROW tokens are only meaningful against the
//! most recent column description.
//!
//! | Tag | Token | Result |
//! |-----|-------|--------|
//! | 0xE3 | ENVCHANGE | [`Token::EnvChange`] |
//! | 0xAA / 0xAB / 0xE5 | ERROR / INFO / EED | [`Token::Message`] |
//! | 0xAD | LOGINACK | [`Token::LoginAck`] |
//! | 0x79 | RETURNSTATUS | [`Token::ReturnStatus`] |
//! | 0xAC | RETURNVALUE | [`Token::ReturnValue`] |
//! | 0x81 / 0xA1 / 0xEE | COLMETADATA / COLFMT / ROWFMT | [`Token::ColumnMetadata`] |
//! | 0xA0 / 0xEC | COLNAME / PARAMFMT | [`Token::Skipped`] (kept in the context) |
//! | 0xD1 | ROW | [`Token::Row`] |
//! | 0xD7 | PARAMS | [`Token::Params`] |
//! | 0xFD / 0xFE / 0xFF | DONE family | [`Token::Done`] |
//! | 0xED | SSPI | [`Token::Sspi`] |
//!
//! Offset, table name, column info, order, control and capability tokens
//! are skipped. An unknown tag is a protocol violation.

use std::sync::Arc;

use bytes::Bytes;
use encoding_rs::Encoding;
use tds_protocol::charset::default_encoding;
use tds_protocol::column::{decode_col_fmt, decode_col_metadata, decode_col_names, decode_format};
use tds_protocol::token::{decode_return_status, decode_sspi, skip_token};
use tds_protocol::{
    ColumnInfo, Done, DoneKind, EnvChange, FormatKind, LoginAck, ProtocolError, ServerMessage,
    TdsRead, TdsVersion, TokenType, TypeInfo,
};
use tds_types::{SqlValue, decode_value};

use crate::row::{Columns, Row};

/// Size of an OFFSET token body.
const OFFSET_BODY_SIZE: usize = 4;

/// Decoder state carried between tokens of one session.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Protocol version of the session.
    pub version: TdsVersion,
    /// Connection character set for single-byte data.
    pub charset: &'static Encoding,
    /// Columns of the current result set.
    pub columns: Columns,
    /// Names from a legacy COLNAME awaiting their COLFMT.
    pub pending_names: Vec<String>,
    /// Parameter formats from a TDS 5.0 PARAMFMT.
    pub param_formats: Columns,
}

impl DispatchContext {
    /// Create a context for a session speaking `version`.
    #[must_use]
    pub fn new(version: TdsVersion) -> Self {
        Self {
            version,
            charset: default_encoding(),
            columns: Arc::default(),
            pending_names: Vec::new(),
            param_formats: Arc::default(),
        }
    }

    /// Forget result-set state at the start of a new request.
    pub fn clear(&mut self) {
        self.columns = Arc::default();
        self.pending_names.clear();
        self.param_formats = Arc::default();
    }
}

/// A returned output parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    /// Parameter name as sent by the server.
    pub name: String,
    /// Status byte.
    pub status: u8,
    /// Wire type of the value.
    pub type_info: TypeInfo,
    /// The value.
    pub value: SqlValue,
}

/// One decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Environment change.
    EnvChange(EnvChange),
    /// Error, informational or extended error message.
    Message(ServerMessage),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Procedure return status.
    ReturnStatus(i32),
    /// Output parameter value.
    ReturnValue(ReturnValue),
    /// A new result set begins with these columns.
    ColumnMetadata(Columns),
    /// Result row.
    Row(Row),
    /// TDS 5.0 output parameter values.
    Params(Vec<SqlValue>),
    /// Statement completion.
    Done(Done),
    /// Authentication challenge.
    Sspi(Bytes),
    /// Token consumed without a result.
    Skipped(TokenType),
}

impl Token {
    /// Whether this is a done token.
    #[must_use]
    pub fn as_done(&self) -> Option<&Done> {
        match self {
            Self::Done(done) => Some(done),
            _ => None,
        }
    }
}

/// Read and decode one token.
pub fn read_token<R: TdsRead>(src: &mut R, ctx: &mut DispatchContext) -> Result<Token, R::Error> {
    let tag = src.read_u8()?;
    let token_type = TokenType::from_u8(tag).ok_or(ProtocolError::InvalidTokenType(tag))?;

    let token = match token_type {
        TokenType::EnvChange => Token::EnvChange(EnvChange::decode(src)?),
        TokenType::Error | TokenType::Info => Token::Message(ServerMessage::decode(src)?),
        TokenType::Eed => Token::Message(ServerMessage::decode_eed(src)?),
        TokenType::LoginAck => Token::LoginAck(LoginAck::decode(src)?),
        TokenType::ReturnStatus => Token::ReturnStatus(decode_return_status(src)?),
        TokenType::ReturnValue => Token::ReturnValue(read_return_value(src, ctx)?),
        TokenType::ColMetaData => {
            let columns = decode_col_metadata(src, ctx.version)?;
            set_columns(ctx, columns)
        }
        TokenType::ColName => {
            ctx.pending_names = decode_col_names(src)?;
            Token::Skipped(token_type)
        }
        TokenType::ColFmt => {
            let names = std::mem::take(&mut ctx.pending_names);
            let columns = decode_col_fmt(src, &names, names.len(), ctx.version)?;
            set_columns(ctx, columns)
        }
        TokenType::RowFmt => {
            let columns = decode_format(src, FormatKind::Row)?;
            set_columns(ctx, columns)
        }
        TokenType::ParamFmt => {
            ctx.param_formats = Arc::new(decode_format(src, FormatKind::Param)?);
            Token::Skipped(token_type)
        }
        TokenType::Row => {
            let columns = Arc::clone(&ctx.columns);
            let values = read_values(src, &columns, ctx)?;
            Token::Row(Row::from_decoded(columns, values))
        }
        TokenType::Params => {
            let formats = Arc::clone(&ctx.param_formats);
            Token::Params(read_values(src, &formats, ctx)?)
        }
        TokenType::Done => Token::Done(Done::decode(src, DoneKind::Done)?),
        TokenType::DoneProc => Token::Done(Done::decode(src, DoneKind::DoneProc)?),
        TokenType::DoneInProc => Token::Done(Done::decode(src, DoneKind::DoneInProc)?),
        TokenType::Sspi => Token::Sspi(decode_sspi(src)?),
        TokenType::Offset => {
            src.skip(OFFSET_BODY_SIZE)?;
            Token::Skipped(token_type)
        }
        TokenType::TabName
        | TokenType::ColInfo
        | TokenType::Order
        | TokenType::Control
        | TokenType::Capability => {
            let skipped = skip_token(src)?;
            tracing::trace!(token = ?token_type, bytes = skipped, "skipped token");
            Token::Skipped(token_type)
        }
        // request-only tokens never arrive from a server
        TokenType::Language | TokenType::DbRpc => {
            return Err(ProtocolError::InvalidTokenType(tag).into());
        }
    };
    Ok(token)
}

fn set_columns(ctx: &mut DispatchContext, columns: Vec<ColumnInfo>) -> Token {
    tracing::trace!(columns = columns.len(), "result set metadata");
    ctx.columns = Arc::new(columns);
    Token::ColumnMetadata(Arc::clone(&ctx.columns))
}

fn read_values<R: TdsRead>(
    src: &mut R,
    columns: &[ColumnInfo],
    ctx: &DispatchContext,
) -> Result<Vec<SqlValue>, R::Error> {
    if columns.is_empty() {
        return Err(ProtocolError::MissingColumnMetadata.into());
    }
    columns
        .iter()
        .map(|col| decode_value(src, &col.type_info, ctx.version, ctx.charset))
        .collect()
}

fn read_return_value<R: TdsRead>(
    src: &mut R,
    ctx: &DispatchContext,
) -> Result<ReturnValue, R::Error> {
    if ctx.version.is_legacy() {
        // legacy tokens declare their header length but the value follows it
        let _len = src.read_u16()?;
        let name = src.read_b_varchar()?;
        let status = src.read_u8()?;
        let _user_type = if ctx.version == TdsVersion::V5_0 {
            src.read_u32()?
        } else {
            u32::from(src.read_u16()?)
        };
        let type_info = TypeInfo::decode(src, ctx.version)?;
        let value = decode_value(src, &type_info, ctx.version, ctx.charset)?;
        return Ok(ReturnValue {
            name,
            status,
            type_info,
            value,
        });
    }

    let _ordinal = src.read_u16()?;
    let name = src.read_b_varchar()?;
    let status = src.read_u8()?;
    let _user_type = src.read_u16()?;
    let _flags = src.read_u16()?;
    let type_info = TypeInfo::decode(src, ctx.version)?;
    let value = decode_value(src, &type_info, ctx.version, ctx.charset)?;
    Ok(ReturnValue {
        name,
        status,
        type_info,
        value,
    })
}
