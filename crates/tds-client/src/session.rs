//! Protocol session.
//!
//! A [`Session`] owns one transport and drives the login handshake, request
//! encoding and token dispatch over it. Sessions are synchronous and
//! single-owner; every operation takes `&mut self`.
//!
//! Results are consumed incrementally. After [`Session::execute`] or
//! [`Session::execute_procedure`] the caller pulls tokens, rows or whole
//! result sets until the terminal done token; a new request first drains
//! whatever is left of the previous one. Server error messages never stop
//! the stream: they are collected and reported once the batch completes.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use tds_auth::DomainAuth;
use tds_codec::{CodecError, PacketTransport, TransportStream};
use tds_protocol::charset::{default_encoding, encoding_for_charset};
use tds_protocol::column::encode_col_metadata;
use tds_protocol::{
    ByteOrder, Collation, ColumnInfo, Done, DoneKind, DoneStatus, EnvChange, LoginAck,
    MAX_PACKET_SIZE, MIN_PACKET_SIZE, PacketType, ProtocolError, RpcRequest, ServerMessage,
    TdsVersion, TdsWrite, TokenType, batch_packet_type, encode_sql_batch,
};
use tds_types::{SqlValue, encode_row_value};

use crate::config::Config;
use crate::dispatch::{DispatchContext, Token, read_token};
use crate::error::{Error, Result};
use crate::login::build_login;
use crate::params::{OutputValues, Parameter};
use crate::row::{ResultSet, Row};
use crate::state::SessionState;

/// Callback receiving every server message as it arrives.
pub type MessageHandler = Box<dyn FnMut(&ServerMessage) + Send>;

/// Packet size used until the server negotiates another.
const LOGIN_PACKET_SIZE: usize = MIN_PACKET_SIZE;

/// A logged-in connection to one server.
pub struct Session<S: TransportStream = TcpStream> {
    transport: PacketTransport<S>,
    config: Config,
    ctx: DispatchContext,
    state: SessionState,

    database: String,
    original_database: String,
    language: String,
    charset: String,
    sort_order: Option<String>,
    collation: Option<Collation>,
    login_ack: Option<LoginAck>,

    in_batch: bool,
    new_result_pending: bool,
    messages: Vec<ServerMessage>,
    outputs: OutputValues,
    handler: Option<MessageHandler>,
    domain_auth: Option<DomainAuth>,
}

impl Session<TcpStream> {
    /// Open a TCP connection and log in.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| Error::Transport(CodecError::from_io(e)))?;

        let mut last_err = None;
        for addr in addrs {
            tracing::debug!(%addr, "connecting");
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| Error::Transport(CodecError::from_io(e)))?;
                    return Self::connect_stream(stream, config);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Transport(CodecError::from_io(e)),
            None => Error::Config(format!("{} resolved to no addresses", config.host)),
        })
    }
}

impl<S: TransportStream> Session<S> {
    /// Log in over an already connected stream.
    pub fn connect_stream(stream: S, config: Config) -> Result<Self> {
        config.validate()?;

        let version = config.tds_version;
        let encoding = if version.is_legacy() {
            encoding_for_charset(&config.charset).unwrap_or_else(default_encoding)
        } else {
            default_encoding()
        };

        let mut transport = PacketTransport::new(stream, LOGIN_PACKET_SIZE, ByteOrder::LittleEndian);
        transport.set_version(version);
        transport.set_encoding(encoding);
        transport.set_timeouts(config.read_timeout, config.write_timeout)?;

        let mut ctx = DispatchContext::new(version);
        ctx.charset = encoding;

        let mut session = Self {
            transport,
            ctx,
            state: SessionState::Disconnected,
            database: String::new(),
            original_database: String::new(),
            language: config.language.clone(),
            charset: config.charset.clone(),
            sort_order: None,
            collation: None,
            login_ack: None,
            in_batch: false,
            new_result_pending: false,
            messages: Vec::new(),
            outputs: OutputValues::default(),
            handler: None,
            domain_auth: None,
            config,
        };
        session.login()?;
        Ok(session)
    }

    fn login(&mut self) -> Result<()> {
        let request = build_login(&self.config, self.ctx.charset)?;
        self.domain_auth = request.domain_auth;

        tracing::debug!(
            host = %self.config.host,
            version = %self.config.tds_version,
            user = self.config.credentials.username(),
            "sending login"
        );
        self.state = SessionState::LoggingOn;
        if let Err(e) = self
            .transport
            .send_message(request.packet_type, &request.payload)
        {
            self.state = SessionState::Failed;
            return Err(e.into());
        }
        self.in_batch = true;

        let mut rejected = false;
        while self.in_batch {
            let token = match self.next_token() {
                Ok(Some(token)) => token,
                Ok(None) => break,
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e);
                }
            };
            match token {
                Token::LoginAck(ack) => {
                    rejected |= ack.is_rejected(self.config.tds_version);
                    self.login_ack = Some(ack);
                }
                Token::Sspi(challenge) => {
                    if let Err(e) = self.answer_challenge(&challenge) {
                        self.state = SessionState::Failed;
                        return Err(e);
                    }
                }
                _ => {}
            }
        }

        if rejected || self.messages.iter().any(ServerMessage::is_error) {
            self.state = SessionState::Failed;
            tracing::warn!(host = %self.config.host, "login rejected");
            return Err(Error::Login {
                messages: std::mem::take(&mut self.messages),
            });
        }

        self.state = SessionState::Connected;
        // legacy logins carry no database
        if self.config.tds_version.is_legacy()
            && !self.config.database.is_empty()
            && !self.database.eq_ignore_ascii_case(&self.config.database)
        {
            let sql = format!("use {}", self.config.database);
            self.execute(&sql)?;
            self.skip_to_end()?;
        }
        self.original_database = self.database.clone();
        tracing::info!(
            host = %self.config.host,
            database = %self.database,
            packet_size = self.transport.packet_size(),
            server = self.login_ack.as_ref().map_or("", |a| a.prog_name.as_str()),
            "logged in"
        );
        Ok(())
    }

    fn answer_challenge(&mut self, challenge: &[u8]) -> Result<()> {
        let auth = self
            .domain_auth
            .as_ref()
            .ok_or(ProtocolError::InvalidTokenType(TokenType::Sspi as u8))?;
        let reply = auth.respond(challenge)?;
        self.transport.send_message(PacketType::SspAuth, &reply)?;
        Ok(())
    }

    // =========================================================================
    // Requests
    // =========================================================================

    fn begin_request(&mut self) -> Result<()> {
        if !self.state.is_usable() {
            return Err(Error::SessionDead);
        }
        if self.in_batch {
            tracing::debug!("draining unread results of the previous request");
            // errors of an abandoned batch are not the new request's errors
            match self.skip_to_end() {
                Ok(()) | Err(Error::Server(_)) => {}
                Err(e) => tracing::debug!(error = %e, "draining previous response failed"),
            }
            if !self.state.is_usable() {
                return Err(Error::SessionDead);
            }
        }
        self.messages.clear();
        self.ctx.clear();
        self.outputs = OutputValues::default();
        self.new_result_pending = false;
        Ok(())
    }

    fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        match self.transport.send_message(packet_type, payload) {
            Ok(()) => {
                self.in_batch = true;
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Send a SQL batch.
    pub fn execute(&mut self, sql: &str) -> Result<()> {
        self.begin_request()?;
        let version = self.config.tds_version;
        let payload = encode_sql_batch(sql, version, TdsWrite::string_mode(&self.transport))?;
        tracing::debug!(sql_len = sql.len(), "executing batch");
        self.send(batch_packet_type(version), &payload)
    }

    /// Call a stored procedure.
    ///
    /// Output parameters receive their values positionally; read them with
    /// [`Session::outputs`] once the call has been drained.
    pub fn execute_procedure(&mut self, name: &str, params: &[Parameter]) -> Result<()> {
        self.begin_request()?;
        let version = self.config.tds_version;
        let mode = TdsWrite::string_mode(&self.transport);

        let mut request = RpcRequest::new(name);
        for param in params {
            request = request.param(param.to_rpc(version, mode)?);
        }
        let payload = request.encode(version, mode)?;
        self.outputs = OutputValues::for_params(params);

        tracing::debug!(procedure = name, params = params.len(), "calling procedure");
        self.send(RpcRequest::packet_type(version), &payload)
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Read and apply one token of the current response.
    ///
    /// Returns `None` once the terminal done token has been consumed.
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        if !self.in_batch {
            return Ok(None);
        }
        let token = match read_token(&mut self.transport, &mut self.ctx) {
            Ok(token) => token,
            Err(e) => return Err(self.fail(e.into())),
        };

        match &token {
            Token::EnvChange(change) => self.apply_env_change(change)?,
            Token::Message(message) => {
                if message.is_error() {
                    tracing::debug!(number = message.number, severity = message.severity, "server error");
                } else {
                    tracing::trace!(number = message.number, "server message");
                }
                if let Some(handler) = self.handler.as_mut() {
                    handler(message);
                }
                self.messages.push(message.clone());
            }
            Token::ReturnStatus(status) => self.outputs.set_return_status(*status),
            Token::ReturnValue(rv) => {
                if !self.outputs.bind_next(rv.value.clone()) {
                    tracing::warn!(name = %rv.name, "return value without output parameter");
                }
            }
            Token::Params(values) => {
                for value in values {
                    self.outputs.bind_next(value.clone());
                }
            }
            Token::Done(done) => {
                if !done.more()
                    && !self.transport.has_buffered_input()
                    && self.transport.responses_pending() == 0
                {
                    self.in_batch = false;
                    tracing::trace!(row_count = done.row_count, "response complete");
                }
            }
            _ => {}
        }
        Ok(Some(token))
    }

    /// Advance to the next result set.
    ///
    /// Skips unread rows of the current set. Returns `false` when the
    /// response holds no further result sets.
    pub fn next_result(&mut self) -> Result<bool> {
        if std::mem::take(&mut self.new_result_pending) {
            return Ok(true);
        }
        while let Some(token) = self.next_token()? {
            if matches!(token, Token::ColumnMetadata(_)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read the next row of the current result set.
    ///
    /// Returns `None` at the end of the set; call [`Session::next_result`]
    /// to move on.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.new_result_pending {
            return Ok(None);
        }
        while let Some(token) = self.next_token()? {
            match token {
                Token::Row(row) => return Ok(Some(row)),
                Token::Done(_) => return Ok(None),
                Token::ColumnMetadata(_) => {
                    self.new_result_pending = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Drain the current response.
    ///
    /// Fails with [`Error::Server`] if the batch produced error messages.
    pub fn skip_to_end(&mut self) -> Result<()> {
        self.new_result_pending = false;
        while self.next_token()?.is_some() {}
        self.batch_result()
    }

    fn batch_result(&self) -> Result<()> {
        let errors: Vec<ServerMessage> = self.errors().cloned().collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Server(errors))
        }
    }

    /// Run a batch and collect every result set.
    pub fn query(&mut self, sql: &str) -> Result<Vec<ResultSet>> {
        self.execute(sql)?;
        let sets = self.collect_results()?;
        self.batch_result()?;
        Ok(sets)
    }

    /// Run a batch that returns no rows.
    ///
    /// Returns the total number of records affected by its statements.
    pub fn run(&mut self, sql: &str) -> Result<u64> {
        self.execute(sql)?;
        let mut total = 0u64;
        while let Some(token) = self.next_token()? {
            if let Token::Done(done) = token {
                total += counted_rows(&done);
            }
        }
        self.batch_result()?;
        Ok(total)
    }

    fn collect_results(&mut self) -> Result<Vec<ResultSet>> {
        let mut sets = Vec::new();
        let mut current: Option<ResultSet> = None;
        while let Some(token) = self.next_token()? {
            match token {
                Token::ColumnMetadata(columns) => {
                    sets.extend(current.take());
                    current = Some(ResultSet {
                        columns,
                        ..ResultSet::default()
                    });
                }
                Token::Row(row) => {
                    if let Some(set) = current.as_mut() {
                        set.rows.push(row);
                    }
                }
                Token::Done(done) => {
                    if let Some(mut set) = current.take() {
                        if done.status.contains(DoneStatus::COUNT) {
                            set.records_affected = Some(done.row_count);
                        }
                        sets.push(set);
                    }
                }
                _ => {}
            }
        }
        sets.extend(current);
        Ok(sets)
    }

    // =========================================================================
    // Session control
    // =========================================================================

    /// Cancel the running request.
    ///
    /// Sends an attention signal and discards tokens up to the done token
    /// acknowledging it.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.in_batch {
            return Ok(());
        }
        tracing::debug!("cancelling request");
        if let Err(e) = self.transport.send_cancel() {
            return Err(self.fail(e.into()));
        }
        loop {
            let token = match read_token(&mut self.transport, &mut self.ctx) {
                Ok(token) => token,
                Err(e) => return Err(self.fail(e.into())),
            };
            if let Token::Done(done) = token {
                if done.is_attention() {
                    break;
                }
            }
        }
        self.transport.attention_acknowledged();
        self.in_batch = false;
        self.new_result_pending = false;
        self.ctx.clear();
        Ok(())
    }

    /// Return the session to its post-login state.
    ///
    /// Drains any pending response and restores the original database.
    /// TDS 7.0+ flags the next request with reset-connection; legacy
    /// versions switch the database back explicitly. Returns whether the
    /// session is still alive.
    pub fn reset(&mut self) -> Result<bool> {
        if !self.state.is_usable() {
            return Ok(false);
        }
        if self.in_batch {
            self.cancel()?;
        }
        self.messages.clear();
        self.outputs = OutputValues::default();
        self.ctx.clear();

        if self.config.tds_version.supports_reset_connection() {
            self.transport.set_reset_connection();
            self.database = self.original_database.clone();
        } else if !self.original_database.is_empty()
            && !self.database.eq_ignore_ascii_case(&self.original_database)
        {
            let sql = format!("use {}", self.original_database);
            self.execute(&sql)?;
            self.skip_to_end()?;
        }
        Ok(self.is_alive())
    }

    /// Probe whether the session can still be used.
    pub fn is_alive(&mut self) -> bool {
        self.state.is_usable() && self.transport.is_alive()
    }

    /// Close the transport.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Dead {
            return Ok(());
        }
        self.state = SessionState::Dead;
        self.in_batch = false;
        tracing::debug!(host = %self.config.host, "closing session");
        self.transport.close()?;
        Ok(())
    }

    /// Bulk-load rows into a table prepared with `insert bulk`.
    ///
    /// Sends one bulk packet holding the column description, a ROW token
    /// per row and a done token, then drains the response. Returns the
    /// number of rows the server reports.
    pub fn bulk_load(&mut self, columns: &[ColumnInfo], rows: &[Vec<SqlValue>]) -> Result<i32> {
        let version = self.config.tds_version;
        if version.is_legacy() {
            return Err(Error::Unsupported {
                operation: "bulk load",
                version,
            });
        }
        self.begin_request()?;

        let mode = TdsWrite::string_mode(&self.transport);
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                return Err(Error::Type(tds_types::TypeError::Truncation(format!(
                    "bulk row has {} values for {} columns",
                    row.len(),
                    columns.len()
                ))));
            }
            let mut values = Vec::with_capacity(row.len());
            for (value, column) in row.iter().zip(columns) {
                values.push(encode_row_value(value, &column.type_info, version, mode)?);
            }
            encoded.push(values);
        }
        let row_count = i32::try_from(rows.len()).map_err(|_| ProtocolError::ValueTooLarge {
            field: "bulk row count",
            len: rows.len(),
            max: i32::MAX as usize,
        })?;

        tracing::debug!(columns = columns.len(), rows = rows.len(), "sending bulk rows");
        let written = (|| -> std::result::Result<(), CodecError> {
            self.transport.start_message(PacketType::Bulk);
            encode_col_metadata(&mut self.transport, columns, version)?;
            for values in &encoded {
                self.transport.write_u8(TokenType::Row as u8)?;
                for value in values {
                    self.transport.write_slice(value)?;
                }
            }
            Done::with_count(DoneKind::Done, row_count).encode(&mut self.transport)?;
            self.transport.end_message()
        })();
        if let Err(e) = written {
            return Err(self.fail(e.into()));
        }
        self.in_batch = true;

        let mut loaded = 0;
        while let Some(token) = self.next_token()? {
            if let Token::Done(done) = token {
                if done.status.contains(DoneStatus::COUNT) {
                    loaded = done.row_count;
                }
            }
        }
        self.batch_result()?;
        Ok(loaded)
    }

    // =========================================================================
    // Environment
    // =========================================================================

    fn apply_env_change(&mut self, change: &EnvChange) -> Result<()> {
        match change {
            EnvChange::PacketSize { new, .. } => {
                let size = (*new as usize).clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
                if size != *new as usize {
                    tracing::warn!(requested = new, applied = size, "packet size out of range");
                }
                if let Err(e) = self.transport.set_packet_size(size) {
                    return Err(self.fail(e.into()));
                }
                tracing::info!(packet_size = size, "packet size changed");
            }
            EnvChange::Charset { new, .. } => match encoding_for_charset(new) {
                Some(encoding) => {
                    self.transport.set_encoding(encoding);
                    self.ctx.charset = encoding;
                    self.charset = new.clone();
                    tracing::info!(charset = %new, "character set changed");
                }
                None => tracing::warn!(charset = %new, "unknown character set, keeping current"),
            },
            EnvChange::Database { new, old } => {
                if !self.database.is_empty()
                    && !old.is_empty()
                    && !old.eq_ignore_ascii_case(&self.database)
                {
                    let err = ProtocolError::InvalidEnvChange(format!(
                        "server left database {old:?} but session was in {:?}",
                        self.database
                    ));
                    return Err(self.fail(err.into()));
                }
                tracing::info!(database = %new, "database changed");
                self.database = new.clone();
            }
            EnvChange::Language { new, .. } => {
                tracing::debug!(language = %new, "language changed");
                self.language = new.clone();
            }
            EnvChange::SortOrder { new } => {
                self.sort_order = Some(new.clone());
            }
            EnvChange::Collation { new } => {
                if let Some(collation) = new {
                    self.ctx.charset = collation.encoding();
                }
                self.collation = *new;
            }
            EnvChange::Other { env_type } => {
                tracing::trace!(env_type, "ignored environment change");
            }
        }
        Ok(())
    }

    /// Mark the session dead when `err` is fatal.
    fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            tracing::warn!(error = %err, "session failed");
            self.in_batch = false;
            if self.state != SessionState::LoggingOn {
                self.state = SessionState::Dead;
            }
        }
        err
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a response is still being read.
    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.in_batch
    }

    /// All messages of the current batch.
    #[must_use]
    pub fn messages(&self) -> &[ServerMessage] {
        &self.messages
    }

    /// Error-severity messages of the current batch.
    pub fn errors(&self) -> impl Iterator<Item = &ServerMessage> {
        self.messages.iter().filter(|m| m.is_error())
    }

    /// Receive every server message as it is decoded.
    pub fn set_message_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&ServerMessage) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Output parameters and return status of the last procedure call.
    #[must_use]
    pub fn outputs(&self) -> &OutputValues {
        &self.outputs
    }

    /// Return status of the last procedure call.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.outputs.return_status()
    }

    /// Current database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Current language.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Current character set name.
    #[must_use]
    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Sort order reported by the server.
    #[must_use]
    pub fn sort_order(&self) -> Option<&str> {
        self.sort_order.as_deref()
    }

    /// Default collation (TDS 8.0).
    #[must_use]
    pub fn collation(&self) -> Option<Collation> {
        self.collation
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.transport.packet_size()
    }

    /// Protocol version of the session.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        self.config.tds_version
    }

    /// Login acknowledgment sent by the server.
    #[must_use]
    pub fn login_ack(&self) -> Option<&LoginAck> {
        self.login_ack.as_ref()
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Columns of the current result set.
    #[must_use]
    pub fn columns(&self) -> Arc<Vec<ColumnInfo>> {
        Arc::clone(&self.ctx.columns)
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &PacketTransport<S> {
        &self.transport
    }
}

/// Rows a done token counts toward a batch total.
fn counted_rows(done: &Done) -> u64 {
    if done.status.contains(DoneStatus::COUNT) {
        u64::try_from(done.records_affected()).unwrap_or(0)
    } else {
        0
    }
}

impl<S: TransportStream> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("version", &self.config.tds_version)
            .field("state", &self.state)
            .field("database", &self.database)
            .field("in_batch", &self.in_batch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counted_rows() {
        let mut done = Done::with_count(DoneKind::Done, 3);
        assert_eq!(counted_rows(&done), 3);
        done.cur_cmd = tds_protocol::OP_SELECT;
        assert_eq!(counted_rows(&done), 0);
        let in_proc = Done::with_count(DoneKind::DoneInProc, 3);
        assert_eq!(counted_rows(&in_proc), 0);
        let mut no_count = Done::with_count(DoneKind::Done, 3);
        no_count.status = DoneStatus::empty();
        assert_eq!(counted_rows(&no_count), 0);
    }
}
