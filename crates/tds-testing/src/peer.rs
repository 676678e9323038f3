//! Scripted server side of a TDS conversation.
//!
//! A `MockPeer` turns each complete client message into the reply a
//! server would send. It is transport-agnostic: [`MockTdsServer`] runs
//! one per TCP connection and [`MockStream`] runs one in memory.
//!
//! [`MockTdsServer`]: crate::mock_server::MockTdsServer
//! [`MockStream`]: crate::stream::MockStream

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tds_protocol::codec::{decode_narrow, decode_ucs2};
use tds_protocol::token::login_status;
use tds_protocol::{
    ColumnInfo, Done, DoneKind, DoneStatus, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType, SliceReader, StringMode, TdsRead, TdsVersion, TokenType, TypeInfo,
};
use tds_types::{SqlValue, type_info_for};

use crate::error::{MockServerError, Result};
use crate::fixtures::TokenBuilder;

/// Payload bytes per reply packet.
const REPLY_CHUNK: usize = 512 - PACKET_HEADER_SIZE;

/// Login failure number reported for rejected logins.
const LOGIN_FAILED: i32 = 18456;

/// Offset of the database (offset, length) pair in a Login70 record.
const LOGIN70_DATABASE_PAIR: usize = 68;

/// Offset of the user (offset, length) pair in a Login70 record.
const LOGIN70_USER_PAIR: usize = 40;

/// Offset of the version bytes in a legacy login record.
const LEGACY_VERSION_OFFSET: usize = 458;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return a single unnamed column holding one value.
    Scalar(SqlValue),

    /// Return a result set.
    Rows {
        /// Column definitions.
        columns: Vec<ColumnInfo>,
        /// Row data.
        rows: Vec<Vec<SqlValue>>,
    },

    /// Return an error.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// Return a records-affected count.
    RowsAffected(u64),

    /// Return a procedure's status and output values.
    Procedure {
        /// Return status.
        status: i32,
        /// Output parameters in declaration order.
        outputs: Vec<MockOutput>,
    },

    /// Answer each statement of a batch in turn.
    Batch(Vec<MockResponse>),

    /// Send a result set without its final done token, then wait for an
    /// attention signal.
    Partial {
        /// Column definitions.
        columns: Vec<ColumnInfo>,
        /// Row data.
        rows: Vec<Vec<SqlValue>>,
    },

    /// Close the connection without replying.
    Disconnect,

    /// Return raw pre-encoded TDS tokens.
    Raw(Bytes),

    /// Compute the response from the request text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Rows { columns, rows } | Self::Partial { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", &columns.len())
                .field("rows", &rows.len())
                .finish(),
            Self::Error {
                number,
                message,
                severity,
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .field("severity", severity)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Procedure { status, outputs } => f
                .debug_struct("Procedure")
                .field("status", status)
                .field("outputs", outputs)
                .finish(),
            Self::Batch(parts) => f.debug_tuple("Batch").field(parts).finish(),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a scalar response.
    pub fn scalar(value: impl Into<SqlValue>) -> Self {
        Self::Scalar(value.into())
    }

    /// Create an empty result response.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create a rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response with severity 16.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// Create a result set response.
    pub fn rows(columns: Vec<ColumnInfo>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Create a procedure response.
    pub fn procedure(status: i32, outputs: Vec<MockOutput>) -> Self {
        Self::Procedure { status, outputs }
    }
}

/// One output parameter of a [`MockResponse::Procedure`].
#[derive(Debug, Clone)]
pub struct MockOutput {
    /// Parameter name including the `@`.
    pub name: String,
    /// Wire type of the value.
    pub type_info: TypeInfo,
    /// Returned value.
    pub value: SqlValue,
}

impl MockOutput {
    /// Create an output value.
    pub fn new(name: impl Into<String>, type_info: TypeInfo, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            type_info,
            value,
        }
    }
}

/// Configuration shared by every connection of a mock server.
pub struct MockServerConfig {
    pub(crate) responses: HashMap<String, MockResponse>,
    pub(crate) procedures: HashMap<String, MockResponse>,
    pub(crate) default_response: Option<MockResponse>,
    pub(crate) server_name: String,
    pub(crate) database: String,
    pub(crate) packet_size: Option<u32>,
    pub(crate) reject_logins: Option<String>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            procedures: HashMap::new(),
            default_response: None,
            server_name: "Mock SQL Server".to_string(),
            database: "master".to_string(),
            packet_size: None,
            reject_logins: None,
        }
    }
}

impl fmt::Debug for MockServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServerConfig")
            .field("responses", &self.responses.len())
            .field("procedures", &self.procedures.len())
            .field("server_name", &self.server_name)
            .field("database", &self.database)
            .field("packet_size", &self.packet_size)
            .finish_non_exhaustive()
    }
}

impl MockServerConfig {
    fn find_response(&self, sql: &str) -> Option<MockResponse> {
        self.responses.get(&normalize(sql)).cloned()
    }

    fn find_procedure(&self, name: &str) -> MockResponse {
        self.procedures
            .get(&normalize(name))
            .cloned()
            .or_else(|| self.default_response.clone())
            .unwrap_or_else(|| MockResponse::procedure(0, Vec::new()))
    }
}

pub(crate) fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_uppercase()
}

/// One client message as the mock received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    /// Packet type of the message.
    pub packet_type: PacketType,
    /// Joined payload of all its packets.
    pub payload: Bytes,
    /// Whether the first packet carried the reset-connection flag.
    pub reset: bool,
    /// SQL text, procedure name or login user, when the mock decoded one.
    pub text: Option<String>,
}

/// Shared log of the messages a mock peer received.
#[derive(Debug, Clone, Default)]
pub struct PacketRecorder {
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
}

impl PacketRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message.
    pub fn record(&self, message: RecordedMessage) {
        self.messages.lock().push(message);
    }

    /// Snapshot of every recorded message.
    #[must_use]
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().clone()
    }

    /// SQL batches received, in order.
    #[must_use]
    pub fn sql_batches(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| matches!(m.packet_type, PacketType::Query | PacketType::Normal))
            .filter_map(|m| m.text.clone())
            .collect()
    }

    /// Number of messages of one packet type.
    #[must_use]
    pub fn count(&self, packet_type: PacketType) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.packet_type == packet_type)
            .count()
    }

    /// Number of recorded messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Forget every recorded message.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

/// One complete client message.
#[derive(Debug)]
pub(crate) struct Request {
    pub packet_type: PacketType,
    /// Status of the first packet.
    pub status: PacketStatus,
    pub payload: Bytes,
}

/// Joins incoming bytes into client messages.
#[derive(Debug, Default)]
pub(crate) struct RequestAssembler {
    buf: BytesMut,
    first: Option<(PacketType, PacketStatus)>,
    payload: BytesMut,
}

impl RequestAssembler {
    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete message, if its last packet has arrived.
    pub(crate) fn next_message(&mut self) -> Result<Option<Request>> {
        loop {
            if self.buf.len() < PACKET_HEADER_SIZE {
                return Ok(None);
            }
            let header = PacketHeader::decode(&mut &self.buf[..PACKET_HEADER_SIZE], MAX_PACKET_SIZE)?;
            let length = usize::from(header.length);
            if self.buf.len() < length {
                return Ok(None);
            }

            let packet = self.buf.split_to(length);
            let (packet_type, status) = *self
                .first
                .get_or_insert((header.packet_type, header.status));
            self.payload.extend_from_slice(&packet[PACKET_HEADER_SIZE..]);

            if header.is_end_of_message() {
                self.first = None;
                return Ok(Some(Request {
                    packet_type,
                    status,
                    payload: self.payload.split().freeze(),
                }));
            }
        }
    }
}

/// What the transport should do after a message.
#[derive(Debug)]
pub(crate) enum Reply {
    /// Send these framed packets.
    Send(Bytes),
    /// Close the connection.
    Close,
}

/// Server-side state of one connection.
pub(crate) struct MockPeer {
    config: Arc<MockServerConfig>,
    recorder: PacketRecorder,
    version: TdsVersion,
    login_database: String,
    database: String,
    logged_in: bool,
}

impl MockPeer {
    pub(crate) fn new(config: Arc<MockServerConfig>, recorder: PacketRecorder) -> Self {
        let database = config.database.clone();
        Self {
            config,
            recorder,
            version: TdsVersion::V7_0,
            login_database: database.clone(),
            database,
            logged_in: false,
        }
    }

    fn string_mode(&self) -> StringMode {
        if self.version.uses_unicode() {
            StringMode::unicode()
        } else {
            StringMode::default()
        }
    }

    /// Answer one complete client message.
    pub(crate) fn handle(&mut self, request: Request) -> Result<Reply> {
        let Request {
            packet_type,
            status,
            payload,
        } = request;
        let reset = status.contains(PacketStatus::RESET_CONNECTION);
        if reset {
            tracing::debug!(database = %self.login_database, "connection reset");
            self.database = self.login_database.clone();
        }

        let (text, reply) = match packet_type {
            PacketType::Login70 => {
                let user = self.accept_login70(&payload)?;
                (Some(user), self.login_reply()?)
            }
            PacketType::Login => {
                let user = self.accept_legacy_login(&payload)?;
                (Some(user), self.login_reply()?)
            }
            PacketType::Query => {
                let sql = if self.version.uses_unicode() {
                    decode_ucs2(&payload)?
                } else {
                    decode_narrow(&payload, encoding_rs::WINDOWS_1252)
                };
                let reply = self.batch_reply(&sql)?;
                (Some(sql), reply)
            }
            PacketType::Normal => self.normal_reply(&payload)?,
            PacketType::Rpc => {
                let mut r = SliceReader::new(payload.clone(), self.string_mode());
                let name = if self.version.uses_unicode() {
                    r.read_us_varchar()?
                } else {
                    r.read_b_varchar()?
                };
                let response = self.config.find_procedure(&name);
                let reply = self.respond(&name, response)?;
                (Some(name), reply)
            }
            PacketType::Cancel => (None, self.attention_reply()?),
            PacketType::Bulk => (None, self.bulk_reply(&payload)?),
            other => {
                return Err(MockServerError::Unexpected(format!(
                    "packet type {other:?}"
                )));
            }
        };

        self.recorder.record(RecordedMessage {
            packet_type,
            payload,
            reset,
            text,
        });
        Ok(reply)
    }

    fn accept_login70(&mut self, payload: &[u8]) -> Result<String> {
        if payload.len() < LOGIN70_DATABASE_PAIR + 4 {
            return Err(MockServerError::Unexpected("short Login70 record".into()));
        }
        let raw = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        self.version = if raw == TdsVersion::V8_0.login70_raw() {
            TdsVersion::V8_0
        } else {
            TdsVersion::V7_0
        };

        let user = login70_field(payload, LOGIN70_USER_PAIR)?;
        let database = login70_field(payload, LOGIN70_DATABASE_PAIR)?;
        if !database.is_empty() {
            self.login_database = database;
        }
        tracing::debug!(version = %self.version, user = %user, "Login70 received");
        Ok(user)
    }

    fn accept_legacy_login(&mut self, payload: &[u8]) -> Result<String> {
        if payload.len() < LEGACY_VERSION_OFFSET + 4 {
            return Err(MockServerError::Unexpected("short legacy login record".into()));
        }
        self.version = if payload[LEGACY_VERSION_OFFSET] == 5 {
            TdsVersion::V5_0
        } else {
            TdsVersion::V4_2
        };
        let user_len = usize::from(payload[61]).min(30);
        let user = decode_narrow(&payload[31..31 + user_len], encoding_rs::WINDOWS_1252);
        tracing::debug!(version = %self.version, user = %user, "legacy login received");
        Ok(user)
    }

    fn login_reply(&mut self) -> Result<Reply> {
        let b = TokenBuilder::new(self.version);

        if let Some(message) = &self.config.reject_logins {
            let b = b.error(LOGIN_FAILED, 14, message)?;
            let b = if self.version.is_legacy() {
                b.login_ack_with(login_status::FAIL, &self.config.server_name)?
            } else {
                b
            };
            let tokens = b.done(DoneStatus::ERROR, 0)?.finish();
            return Ok(Reply::Send(frame(&tokens, true)));
        }

        // legacy logins name no database; the server puts them in its default
        if self.version.is_legacy() {
            self.login_database = self.config.database.clone();
        }
        self.database = self.login_database.clone();
        self.logged_in = true;

        let mut b = b.database(&self.database, "master")?;
        if let Some(size) = self.config.packet_size {
            b = b.packet_size(size, 512)?;
        }
        let tokens = b
            .info(5701, &format!("Changed database context to '{}'.", self.database))?
            .login_ack(&self.config.server_name)?
            .done(DoneStatus::empty(), 0)?
            .finish();
        Ok(Reply::Send(frame(&tokens, true)))
    }

    fn normal_reply(&mut self, payload: &Bytes) -> Result<(Option<String>, Reply)> {
        let mut r = SliceReader::new(payload.clone(), self.string_mode());
        let tag = r.read_u8()?;
        if tag == TokenType::Language as u8 {
            let len = r.read_u32()? as usize;
            let _status = r.read_u8()?;
            let sql = r.read_narrow(len.saturating_sub(1))?;
            let reply = self.batch_reply(&sql)?;
            Ok((Some(sql), reply))
        } else if tag == TokenType::DbRpc as u8 {
            let _len = r.read_u16()?;
            let name = r.read_b_varchar()?;
            let response = self.config.find_procedure(&name);
            let reply = self.respond(&name, response)?;
            Ok((Some(name), reply))
        } else {
            Err(MockServerError::Unexpected(format!(
                "normal packet starting with 0x{tag:02X}"
            )))
        }
    }

    fn batch_reply(&mut self, sql: &str) -> Result<Reply> {
        if !self.logged_in {
            return Err(MockServerError::Unexpected("batch before login".into()));
        }
        match self.config.find_response(sql) {
            Some(response) => self.respond(sql, response),
            None => match use_target(sql) {
                Some(db) => {
                    let old = std::mem::replace(&mut self.database, db);
                    let tokens = TokenBuilder::new(self.version)
                        .database(&self.database, &old)?
                        .done(DoneStatus::empty(), 0)?
                        .finish();
                    Ok(Reply::Send(frame(&tokens, true)))
                }
                None => {
                    let response = self
                        .config
                        .default_response
                        .clone()
                        .unwrap_or_else(MockResponse::empty);
                    self.respond(sql, response)
                }
            },
        }
    }

    fn respond(&self, request: &str, response: MockResponse) -> Result<Reply> {
        if matches!(response, MockResponse::Disconnect) {
            return Ok(Reply::Close);
        }
        let partial = matches!(response, MockResponse::Partial { .. });
        let b = TokenBuilder::new(self.version);
        let b = self.encode(b, request, response, false)?;
        Ok(Reply::Send(frame(&b.finish(), !partial)))
    }

    fn encode(
        &self,
        b: TokenBuilder,
        request: &str,
        response: MockResponse,
        more: bool,
    ) -> Result<TokenBuilder> {
        let more_flag = if more {
            DoneStatus::MORE
        } else {
            DoneStatus::empty()
        };
        let b = match response {
            MockResponse::Scalar(value) => {
                let info = type_info_for(&value, self.version)?;
                let columns = vec![ColumnInfo::new("", info)];
                b.columns(&columns)?
                    .row(&columns, &[value])?
                    .done_select(more_flag, 1)?
            }
            MockResponse::Rows { columns, rows } => {
                let mut b = b.columns(&columns)?;
                for row in &rows {
                    b = b.row(&columns, row)?;
                }
                b.done_select(more_flag, row_count(rows.len()))?
            }
            MockResponse::Partial { columns, rows } => {
                let mut b = b.columns(&columns)?;
                for row in &rows {
                    b = b.row(&columns, row)?;
                }
                b
            }
            MockResponse::Error {
                number,
                message,
                severity,
            } => b
                .error(number, severity, &message)?
                .done(more_flag | DoneStatus::ERROR, 0)?,
            MockResponse::RowsAffected(n) => {
                b.done(more_flag | DoneStatus::COUNT, row_count(n as usize))?
            }
            MockResponse::Procedure { status, outputs } => {
                let mut b = b.return_status(status)?;
                for (i, out) in outputs.iter().enumerate() {
                    b = b.return_value(i as u16, &out.name, &out.type_info, &out.value)?;
                }
                b.done_proc(more_flag, 0)?
            }
            MockResponse::Batch(parts) => {
                let last = parts.len().saturating_sub(1);
                let mut b = b;
                for (i, part) in parts.into_iter().enumerate() {
                    b = self.encode(b, request, part, more || i < last)?;
                }
                b
            }
            MockResponse::Raw(bytes) => b.raw(&bytes)?,
            MockResponse::Custom(handler) => {
                self.encode(b, request, handler(request), more)?
            }
            MockResponse::Disconnect => b,
        };
        Ok(b)
    }

    fn attention_reply(&self) -> Result<Reply> {
        let tokens = TokenBuilder::new(self.version)
            .done_token(Done {
                kind: DoneKind::Done,
                status: DoneStatus::ATTN,
                cur_cmd: 0,
                row_count: 0,
            })?
            .finish();
        Ok(Reply::Send(frame(&tokens, true)))
    }

    fn bulk_reply(&self, payload: &[u8]) -> Result<Reply> {
        // the client closes its rows with a done token carrying their count
        let count = payload
            .len()
            .checked_sub(Done::SIZE + 1)
            .and_then(|at| {
                (payload[at] == TokenType::Done as u8).then(|| {
                    let n = &payload[payload.len() - 4..];
                    i32::from_le_bytes([n[0], n[1], n[2], n[3]])
                })
            })
            .ok_or_else(|| MockServerError::Unexpected("bulk data without done".into()))?;
        let tokens = TokenBuilder::new(self.version)
            .done(DoneStatus::COUNT, count)?
            .finish();
        Ok(Reply::Send(frame(&tokens, true)))
    }
}

impl fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPeer")
            .field("version", &self.version)
            .field("database", &self.database)
            .field("logged_in", &self.logged_in)
            .finish_non_exhaustive()
    }
}

fn row_count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Read a UCS-2 field of a Login70 record through its (offset, length) pair.
fn login70_field(payload: &[u8], pair: usize) -> Result<String> {
    let offset = usize::from(u16::from_le_bytes([payload[pair], payload[pair + 1]]));
    let chars = usize::from(u16::from_le_bytes([payload[pair + 2], payload[pair + 3]]));
    let bytes = payload
        .get(offset..offset + chars * 2)
        .ok_or_else(|| MockServerError::Unexpected("Login70 field out of range".into()))?;
    Ok(decode_ucs2(bytes)?)
}

/// Database named by a `use <db>` statement.
fn use_target(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    let keyword = words.next()?;
    let db = words.next()?;
    (keyword.eq_ignore_ascii_case("use") && words.next().is_none())
        .then(|| db.trim_end_matches(';').to_string())
}

/// Split a token stream into reply packets.
///
/// The last packet carries end-of-message only when `last` is set, so a
/// partial reply leaves the client waiting for more.
pub(crate) fn frame(tokens: &[u8], last: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(tokens.len() + PACKET_HEADER_SIZE);
    let mut chunks = tokens.chunks(REPLY_CHUNK).peekable();
    let mut packet_id = 1u8;

    if chunks.peek().is_none() {
        write_packet(&mut out, &[], last, packet_id);
        return out.freeze();
    }
    while let Some(chunk) = chunks.next() {
        let eom = last && chunks.peek().is_none();
        write_packet(&mut out, chunk, eom, packet_id);
        packet_id = packet_id.wrapping_add(1);
    }
    out.freeze()
}

fn write_packet(out: &mut BytesMut, payload: &[u8], eom: bool, packet_id: u8) {
    let status = if eom {
        PacketStatus::END_OF_MESSAGE
    } else {
        PacketStatus::NORMAL
    };
    let length = (PACKET_HEADER_SIZE + payload.len()) as u16;
    PacketHeader::new(PacketType::Reply, status, length)
        .with_packet_id(packet_id)
        .encode(out);
    out.put_slice(payload);
}
