//! Async message connection.
//!
//! The transport is split into read and write halves so an attention
//! packet can be sent from another task while a read is pending.
//!
//! Futures returned by [`AsyncConnection::read_message`] and
//! [`AsyncConnection::send_message`] must run to completion. If one is
//! dropped after part of a message went over the wire, the byte stream
//! position is unknown; the connection is poisoned and every later call
//! fails with [`CodecError::ConnectionPoisoned`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{
    MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};
use tds_protocol::token::{Done, DoneKind, TokenType};
use tds_protocol::{ByteOrder, ProtocolError, SliceReader, StringMode, TdsVersion};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::{Packet, TdsCodec};

type SharedWriter<T> = Arc<Mutex<PacketWriter<WriteHalf<T>>>>;

/// Message-level connection over an async transport.
pub struct AsyncConnection<T> {
    reader: PacketReader<ReadHalf<T>>,
    writer: SharedWriter<T>,
    assembler: MessageAssembler,
    packet_size: usize,
    byte_order: ByteOrder,
    reset_pending: bool,
    read_in_flight: bool,
    write_in_flight: Arc<AtomicBool>,
    cancelling: Arc<AtomicBool>,
    poisoned: bool,
}

impl<T> AsyncConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Split a transport into a connection for the given protocol version.
    pub fn new(transport: T, version: TdsVersion, packet_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let codec = TdsCodec::for_version(version);
        Self {
            reader: PacketReader::with_codec(read_half, codec.clone()),
            writer: Arc::new(Mutex::new(PacketWriter::with_codec(write_half, codec))),
            assembler: MessageAssembler::new(),
            packet_size: packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE),
            byte_order: ByteOrder::LittleEndian,
            reset_pending: false,
            read_in_flight: false,
            write_in_flight: Arc::new(AtomicBool::new(false)),
            cancelling: Arc::new(AtomicBool::new(false)),
            poisoned: false,
        }
    }

    /// Outgoing packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Change the outgoing packet size after a packet-size env change.
    pub fn set_packet_size(&mut self, packet_size: usize) -> Result<(), CodecError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
            return Err(ProtocolError::InvalidPacketLength {
                length: packet_size,
                min: MIN_PACKET_SIZE,
                max: MAX_PACKET_SIZE,
            }
            .into());
        }
        self.packet_size = packet_size;
        Ok(())
    }

    /// Byte order of integers inside token streams.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Flag the first packet of the next message with reset-connection.
    pub fn set_reset_connection(&mut self) {
        self.reset_pending = true;
    }

    /// Check if an interrupted read or write poisoned the connection.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Handle for sending attention from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            write_in_flight: Arc::clone(&self.write_in_flight),
            cancelling: Arc::clone(&self.cancelling),
        }
    }

    fn check_poisoned(&mut self) -> Result<(), CodecError> {
        if self.poisoned {
            return Err(CodecError::ConnectionPoisoned);
        }
        let read_interrupted = self.read_in_flight
            && (self.assembler.has_partial() || !self.reader.read_buffer().is_empty());
        if read_interrupted || self.write_in_flight.load(Ordering::Acquire) {
            tracing::warn!(
                read_interrupted,
                "previous operation dropped mid-message, poisoning connection"
            );
            self.poisoned = true;
            return Err(CodecError::ConnectionPoisoned);
        }
        Ok(())
    }

    /// Split a payload into packets and send them.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), CodecError>
    where
        T: Unpin,
    {
        self.check_poisoned()?;
        let reset = std::mem::take(&mut self.reset_pending);
        let max_payload = self.packet_size - PACKET_HEADER_SIZE;

        let mut writer = self.writer.lock().await;
        self.write_in_flight.store(true, Ordering::Release);

        let total = payload.len().div_ceil(max_payload).max(1);
        for index in 0..total {
            let start = index * max_payload;
            let end = (start + max_payload).min(payload.len());
            let mut status = if index + 1 == total {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            if index == 0 && reset {
                status |= PacketStatus::RESET_CONNECTION;
            }
            let header = PacketHeader::new(packet_type, status, 0);
            writer
                .feed(Packet::new(header, BytesMut::from(&payload[start..end])))
                .await?;
        }
        writer.flush().await?;

        self.write_in_flight.store(false, Ordering::Release);
        tracing::debug!(?packet_type, len = payload.len(), packets = total, "sent message");
        Ok(())
    }

    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between
    /// messages. While a cancel is pending, messages are drained until the
    /// one acknowledging the attention, and `Ok(None)` is returned.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError>
    where
        T: Unpin,
    {
        self.check_poisoned()?;
        self.read_in_flight = true;
        let result = self.read_message_inner().await;
        self.read_in_flight = false;
        result
    }

    async fn read_message_inner(&mut self) -> Result<Option<Message>, CodecError>
    where
        T: Unpin,
    {
        loop {
            let message = match self.reader.next().await {
                Some(Ok(packet)) => {
                    if !packet.header.packet_type.is_legal_incoming() {
                        return Err(ProtocolError::UnexpectedPacketType(
                            packet.header.packet_type as u8,
                        )
                        .into());
                    }
                    match self.assembler.push(packet) {
                        Some(message) => message,
                        None => continue,
                    }
                }
                Some(Err(e)) => return Err(e),
                None if self.assembler.has_partial() => return Err(CodecError::ConnectionLost),
                None => return Ok(None),
            };

            if !self.cancelling.load(Ordering::Acquire) {
                return Ok(Some(message));
            }
            if self.acknowledges_attention(&message) {
                tracing::debug!("attention acknowledged");
                self.cancelling.store(false, Ordering::Release);
                return Ok(None);
            }
            tracing::trace!(len = message.len(), "discarding message after attention");
        }
    }

    fn acknowledges_attention(&self, message: &Message) -> bool {
        let done_len = 1 + Done::SIZE;
        let Some(start) = message.payload.len().checked_sub(done_len) else {
            return false;
        };
        let tail = message.payload.slice(start..);
        let kind = match TokenType::from_u8(tail[0]) {
            Some(TokenType::Done) => DoneKind::Done,
            Some(TokenType::DoneProc) => DoneKind::DoneProc,
            Some(TokenType::DoneInProc) => DoneKind::DoneInProc,
            _ => return false,
        };
        let mut reader =
            SliceReader::new(tail.slice(1..), StringMode::unicode()).with_byte_order(self.byte_order);
        Done::decode(&mut reader, kind).is_ok_and(|done| done.is_attention())
    }
}

impl<T> std::fmt::Debug for AsyncConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("packet_size", &self.packet_size)
            .field("poisoned", &self.poisoned)
            .field("cancelling", &self.cancelling.load(Ordering::Relaxed))
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

/// Sends attention on a connection from another task.
pub struct CancelHandle<T> {
    writer: SharedWriter<T>,
    write_in_flight: Arc<AtomicBool>,
    cancelling: Arc<AtomicBool>,
}

impl<T> CancelHandle<T>
where
    T: AsyncWrite + Unpin,
{
    /// Send an attention packet. The owning connection then drains the
    /// current response up to the acknowledging done token.
    pub async fn cancel(&self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        if self.write_in_flight.load(Ordering::Acquire) {
            return Err(CodecError::ConnectionPoisoned);
        }
        self.cancelling.store(true, Ordering::Release);
        tracing::debug!("sending attention");

        let header = PacketHeader::new(PacketType::Cancel, PacketStatus::END_OF_MESSAGE, 0);
        writer.send(Packet::new(header, BytesMut::new())).await
    }

    /// Check if an attention is waiting for its acknowledgement.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }
}

impl<T> Clone for CancelHandle<T> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            write_in_flight: Arc::clone(&self.write_in_flight),
            cancelling: Arc::clone(&self.cancelling),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelling", &self.cancelling.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn reply_packet(status: PacketStatus, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut header = PacketHeader::new(
            PacketType::Reply,
            status,
            (PACKET_HEADER_SIZE + payload.len()) as u16,
        );
        header.packet_id = 1;
        header.encode(&mut out);
        out.extend_from_slice(payload);
        out
    }

    fn done_bytes(status: u16) -> Vec<u8> {
        let mut out = vec![TokenType::Done as u8];
        out.extend_from_slice(&status.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn test_send_message_splits_packets() {
        let (client, mut server) = tokio::io::duplex(8192);
        let mut conn = AsyncConnection::new(client, TdsVersion::V7_0, 512);
        conn.set_reset_connection();
        conn.send_message(PacketType::Query, Bytes::from(vec![7u8; 1200]))
            .await
            .unwrap();

        let mut wire = vec![0u8; 1200 + 3 * PACKET_HEADER_SIZE];
        server.read_exact(&mut wire).await.unwrap();

        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), 512);
        assert_eq!(wire[1], PacketStatus::RESET_CONNECTION.bits());
        assert_eq!(wire[6], 1);
        let second = 512;
        assert_eq!(wire[second + 1], 0);
        assert_eq!(wire[second + 6], 2);
        let third = 1024;
        assert_eq!(wire[third + 1], PacketStatus::END_OF_MESSAGE.bits());
        assert_eq!(u16::from_be_bytes([wire[third + 2], wire[third + 3]]), 1200 - 2 * 504 + 8);
    }

    #[tokio::test]
    async fn test_read_message_joins_packets() {
        let (client, mut server) = tokio::io::duplex(8192);
        let mut conn = AsyncConnection::new(client, TdsVersion::V7_0, 4096);

        let mut wire = reply_packet(PacketStatus::NORMAL, b"abc");
        wire.extend(reply_packet(PacketStatus::END_OF_MESSAGE, b"def"));
        server.write_all(&wire).await.unwrap();

        let message = conn.read_message().await.unwrap().unwrap();
        assert_eq!(message.packet_type, PacketType::Reply);
        assert_eq!(&message.payload[..], b"abcdef");

        drop(server);
        assert!(conn.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_client_packet_type_rejected() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut conn = AsyncConnection::new(client, TdsVersion::V7_0, 4096);
        let mut wire = reply_packet(PacketStatus::END_OF_MESSAGE, b"x");
        wire[0] = PacketType::Query as u8;
        server.write_all(&wire).await.unwrap();
        let err = conn.read_message().await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::UnexpectedPacketType(0x01))
        ));
    }

    #[tokio::test]
    async fn test_dropped_read_poisons_connection() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut conn = AsyncConnection::new(client, TdsVersion::V7_0, 4096);

        server
            .write_all(&reply_packet(PacketStatus::NORMAL, b"partial"))
            .await
            .unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(50), conn.read_message()).await;
        assert!(timed_out.is_err());

        let err = conn.read_message().await.unwrap_err();
        assert!(matches!(err, CodecError::ConnectionPoisoned));
        assert!(conn.is_poisoned());
        let err = conn
            .send_message(PacketType::Query, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::ConnectionPoisoned));
    }

    #[tokio::test]
    async fn test_idle_read_timeout_does_not_poison() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut conn = AsyncConnection::new(client, TdsVersion::V7_0, 4096);

        let timed_out = tokio::time::timeout(Duration::from_millis(20), conn.read_message()).await;
        assert!(timed_out.is_err());

        server
            .write_all(&reply_packet(PacketStatus::END_OF_MESSAGE, b"ok"))
            .await
            .unwrap();
        let message = conn.read_message().await.unwrap().unwrap();
        assert_eq!(&message.payload[..], b"ok");
    }

    #[tokio::test]
    async fn test_cancel_drains_to_attention_ack() {
        let (client, mut server) = tokio::io::duplex(8192);
        let mut conn = AsyncConnection::new(client, TdsVersion::V7_0, 4096);
        let handle = conn.cancel_handle();

        handle.cancel().await.unwrap();
        assert!(handle.is_cancelling());

        let mut attention = [0u8; PACKET_HEADER_SIZE];
        server.read_exact(&mut attention).await.unwrap();
        assert_eq!(attention[0], PacketType::Cancel as u8);

        let mut wire = reply_packet(PacketStatus::END_OF_MESSAGE, &done_bytes(0x0001));
        wire.extend(reply_packet(PacketStatus::END_OF_MESSAGE, &done_bytes(0x0020)));
        wire.extend(reply_packet(PacketStatus::END_OF_MESSAGE, b"next"));
        server.write_all(&wire).await.unwrap();

        assert!(conn.read_message().await.unwrap().is_none());
        assert!(!handle.is_cancelling());
        let message = conn.read_message().await.unwrap().unwrap();
        assert_eq!(&message.payload[..], b"next");
    }
}
