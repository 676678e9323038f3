//! Message reassembly.
//!
//! A message spans one or more packets; the last one carries the
//! end-of-message status bit.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::PacketType;

use crate::packet_codec::Packet;

/// A complete message joined from one or more packets.
#[derive(Debug, Clone)]
pub struct Message {
    /// Packet type of the first packet.
    pub packet_type: PacketType,
    /// All payloads concatenated.
    pub payload: Bytes,
}

impl Message {
    /// Create a message from a single packet.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Self {
        Self {
            packet_type: packet.header.packet_type,
            payload: packet.payload.freeze(),
        }
    }

    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Buffers packets until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler with a pre-sized buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Add a packet. Returns the message when this packet completes it.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);
        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            ?packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.is_end_of_message(),
            "assembling message"
        );

        if !packet.is_end_of_message() {
            return None;
        }
        self.packet_type = None;
        self.packet_count = 0;
        Some(Message {
            packet_type,
            payload: self.buffer.split().freeze(),
        })
    }

    /// Check if part of a message is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Number of packets buffered for the current message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Bytes buffered for the current message.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::packet::{PacketHeader, PacketStatus};

    fn packet(status: PacketStatus, payload: &[u8]) -> Packet {
        Packet::new(
            PacketHeader::new(PacketType::Reply, status, 0),
            BytesMut::from(payload),
        )
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler
            .push(packet(PacketStatus::END_OF_MESSAGE, b"hello"))
            .unwrap();
        assert_eq!(message.packet_type, PacketType::Reply);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(packet(PacketStatus::NORMAL, b"hel")).is_none());
        assert!(assembler.has_partial());
        assert_eq!(assembler.packet_count(), 1);
        let message = assembler
            .push(packet(PacketStatus::END_OF_MESSAGE, b"lo"))
            .unwrap();
        assert_eq!(&message.payload[..], b"hello");
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_clear_drops_partial() {
        let mut assembler = MessageAssembler::new();
        assembler.push(packet(PacketStatus::NORMAL, b"abc"));
        assembler.clear();
        assert!(!assembler.has_partial());
        let message = assembler
            .push(packet(PacketStatus::END_OF_MESSAGE, b"x"))
            .unwrap();
        assert_eq!(&message.payload[..], b"x");
    }
}
