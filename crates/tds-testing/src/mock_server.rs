//! Mock TDS server for client tests.
//!
//! This module provides a TCP server that speaks enough of the protocol to
//! log clients in and answer their requests from a script, so session and
//! pool behavior can be tested without a real database.
//!
//! ## Features
//!
//! - Accepts TDS 4.2, 5.0, 7.0 and 8.0 logins
//! - Configurable responses for SQL batches and procedure calls
//! - Honors `use <database>`, reset-connection and attention signals
//! - One thread per connection, any number of concurrent clients
//!
//! ## Example
//!
//! ```rust,no_run
//! use tds_testing::mock_server::MockTdsServer;
//! use tds_testing::peer::MockResponse;
//!
//! let server = MockTdsServer::builder()
//!     .with_response("select 1", MockResponse::scalar(1i32))
//!     .build()
//!     .unwrap();
//!
//! let addr = server.addr();
//! // Connect your client to addr...
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;
use crate::peer::{
    MockPeer, MockResponse, MockServerConfig, PacketRecorder, Reply, RequestAssembler, normalize,
};
use crate::stream::MockStream;

/// How often idle connection threads check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builder for [`MockTdsServer`] and [`MockStream`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a SQL batch (matched ignoring case and surrounding blanks).
    #[must_use]
    pub fn with_response(mut self, sql: impl AsRef<str>, response: MockResponse) -> Self {
        self.config.responses.insert(normalize(sql.as_ref()), response);
        self
    }

    /// Answer calls of a stored procedure.
    #[must_use]
    pub fn with_procedure(mut self, name: impl AsRef<str>, response: MockResponse) -> Self {
        self.config
            .procedures
            .insert(normalize(name.as_ref()), response);
        self
    }

    /// Answer every unmatched request.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Set the server name reported in the login acknowledgment.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Set the database logins land in when they name none.
    #[must_use]
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Negotiate a packet size during login.
    #[must_use]
    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Reject every login with the given message.
    #[must_use]
    pub fn reject_logins(mut self, message: impl Into<String>) -> Self {
        self.config.reject_logins = Some(message.into());
        self
    }

    /// Finish the configuration.
    #[must_use]
    pub fn into_config(self) -> MockServerConfig {
        self.config
    }

    /// Start a TCP server on an available local port.
    pub fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config)
    }

    /// Create an in-memory stream answered by this configuration.
    #[must_use]
    pub fn stream(self) -> MockStream {
        MockStream::new(self.config)
    }
}

/// Mock TDS server listening on the loopback interface.
#[derive(Debug)]
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    connection_count: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    recorder: PacketRecorder,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockTdsServer {
    /// Create a new builder for the mock server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let config = Arc::new(config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let connection_count = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));
        let recorder = PacketRecorder::new();

        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let connection_count = Arc::clone(&connection_count);
            let accepted = Arc::clone(&accepted);
            let recorder = recorder.clone();
            std::thread::Builder::new()
                .name("mock-tds-accept".into())
                .spawn(move || {
                    for stream in listener.incoming() {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        let stream = match stream {
                            Ok(stream) => stream,
                            Err(e) => {
                                tracing::error!("accept error: {e}");
                                break;
                            }
                        };
                        accepted.fetch_add(1, Ordering::AcqRel);
                        connection_count.fetch_add(1, Ordering::AcqRel);

                        let config = Arc::clone(&config);
                        let recorder = recorder.clone();
                        let shutdown = Arc::clone(&shutdown);
                        let count = Arc::clone(&connection_count);
                        let spawned = std::thread::Builder::new()
                            .name("mock-tds-conn".into())
                            .spawn(move || {
                                if let Err(e) = handle_connection(stream, config, recorder, &shutdown)
                                {
                                    tracing::debug!("connection error: {e}");
                                }
                                count.fetch_sub(1, Ordering::AcqRel);
                            });
                        if let Err(e) = spawned {
                            tracing::error!("could not spawn connection thread: {e}");
                            connection_count.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                })?
        };

        tracing::debug!(%addr, "mock server listening");
        Ok(Self {
            addr,
            shutdown,
            connection_count,
            accepted,
            recorder,
            accept_thread: Some(accept_thread),
        })
    }

    /// Get the server's listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Acquire)
    }

    /// Number of connections accepted since start.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::Acquire)
    }

    /// Log of every message received on any connection.
    #[must_use]
    pub fn recorder(&self) -> &PacketRecorder {
        &self.recorder
    }

    /// Stop accepting connections and signal open ones to close.
    pub fn stop(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // wake the accept loop
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serve one client until it disconnects or the server stops.
fn handle_connection(
    mut stream: TcpStream,
    config: Arc<MockServerConfig>,
    recorder: PacketRecorder,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_nodelay(true)?;

    let mut peer = MockPeer::new(config, recorder);
    let mut assembler = RequestAssembler::default();
    let mut buf = [0u8; 4096];

    loop {
        while let Some(request) = assembler.next_message()? {
            match peer.handle(request)? {
                Reply::Send(bytes) => {
                    stream.write_all(&bytes)?;
                    stream.flush()?;
                }
                Reply::Close => {
                    tracing::debug!("closing connection on request");
                    let _ = stream.shutdown(Shutdown::Both);
                    return Ok(());
                }
            }
        }

        if shutdown.load(Ordering::Acquire) {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(());
        }
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => assembler.push(&buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

    #[test]
    fn test_server_accepts_and_counts_connections() {
        let mut server = MockTdsServer::builder().build().unwrap();
        let client = TcpStream::connect(server.addr()).unwrap();

        for _ in 0..100 {
            if server.accepted_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.accepted_count(), 1);
        drop(client);
        server.stop();
    }

    #[test]
    fn test_server_closes_on_garbage() {
        let server = MockTdsServer::builder().build().unwrap();
        let mut client = TcpStream::connect(server.addr()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        // a batch before login is refused by closing the connection
        let mut packet = bytes::BytesMut::new();
        PacketHeader::new(
            PacketType::Query,
            PacketStatus::END_OF_MESSAGE,
            (PACKET_HEADER_SIZE + 2) as u16,
        )
        .encode(&mut packet);
        packet.extend_from_slice(b"x\0");
        client.write_all(&packet).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
