//! In-memory transport answered by a mock peer.
//!
//! A [`MockStream`] plays the server inside the client's own thread: every
//! complete message written to it is answered immediately, and the reply
//! becomes readable. Reading with nothing queued fails with
//! [`ErrorKind::TimedOut`], the way a socket with a read timeout would.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BytesMut};
use tds_codec::TransportStream;

use crate::peer::{MockPeer, MockServerConfig, PacketRecorder, Reply, RequestAssembler};

/// Severs a [`MockStream`] from outside, as if the server went away.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    open: Arc<AtomicBool>,
}

impl DisconnectHandle {
    /// Drop the connection.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// In-memory byte stream answered by a scripted peer.
#[derive(Debug)]
pub struct MockStream {
    peer: MockPeer,
    assembler: RequestAssembler,
    pending: BytesMut,
    open: Arc<AtomicBool>,
    recorder: PacketRecorder,
}

impl MockStream {
    /// Create a stream answered from `config`.
    #[must_use]
    pub fn new(config: MockServerConfig) -> Self {
        let recorder = PacketRecorder::new();
        Self {
            peer: MockPeer::new(Arc::new(config), recorder.clone()),
            assembler: RequestAssembler::default(),
            pending: BytesMut::new(),
            open: Arc::new(AtomicBool::new(true)),
            recorder,
        }
    }

    /// Log of the messages this stream received.
    #[must_use]
    pub fn recorder(&self) -> PacketRecorder {
        self.recorder.clone()
    }

    /// Handle that can sever the stream after it moved into a session.
    #[must_use]
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            open: Arc::clone(&self.open),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn process(&mut self) -> io::Result<()> {
        while let Some(request) = self.assembler.next_message().map_err(invalid)? {
            match self.peer.handle(request).map_err(invalid)? {
                Reply::Send(bytes) => self.pending.extend_from_slice(&bytes),
                Reply::Close => {
                    self.open.store(false, Ordering::Release);
                    self.pending.clear();
                    break;
                }
            }
        }
        Ok(())
    }
}

fn invalid(e: crate::MockServerError) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, e)
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "no reply queued"));
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "mock peer closed"));
        }
        self.assembler.push(buf);
        self.process()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportStream for MockStream {
    fn is_alive(&mut self) -> bool {
        self.is_open()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{
        PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType, StringMode, TdsVersion,
        encode_sql_batch,
    };

    fn packet(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::new();
        let length = (PACKET_HEADER_SIZE + payload.len()) as u16;
        PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, length).encode(&mut out);
        out.extend_from_slice(payload);
        out.to_vec()
    }

    #[test]
    fn test_read_without_reply_times_out() {
        let mut stream = MockStream::new(MockServerConfig::default());
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_disconnect_handle_closes_stream() {
        let mut stream = MockStream::new(MockServerConfig::default());
        let handle = stream.disconnect_handle();
        assert!(stream.is_alive());

        handle.disconnect();
        assert!(!stream.is_alive());
        assert_eq!(stream.read(&mut [0u8; 4]).unwrap(), 0);
        assert_eq!(
            stream.write(&[0u8; 4]).unwrap_err().kind(),
            ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_batch_before_login_is_invalid() {
        let mut stream = MockStream::new(MockServerConfig::default());
        let sql = encode_sql_batch("select 1", TdsVersion::V7_0, StringMode::default()).unwrap();
        let err = stream.write(&packet(PacketType::Query, &sql)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(stream.recorder().is_empty());
    }
}
