//! TDS packet header definitions.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest packet size the header length field can describe.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Smallest packet size a client may negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Packet size used until the server renegotiates it.
pub const DEFAULT_PACKET_SIZE: usize = 512;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL text batch.
    Query = 0x01,
    /// Legacy (4.2 / 5.0) login request, also the tag of legacy login responses.
    Login = 0x02,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular reply.
    Reply = 0x04,
    /// Attention (cancel) signal.
    Cancel = 0x06,
    /// Bulk load data.
    Bulk = 0x07,
    /// Sybase 5.0 normal packet carrying tokens (queries, DBRPC, responses).
    Normal = 0x0F,
    /// TDS 7.0/8.0 login request.
    Login70 = 0x10,
    /// SSPI (NTLM) authentication round.
    SspAuth = 0x11,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Query),
            0x02 => Ok(Self::Login),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::Reply),
            0x06 => Ok(Self::Cancel),
            0x07 => Ok(Self::Bulk),
            0x0F => Ok(Self::Normal),
            0x10 => Ok(Self::Login70),
            0x11 => Ok(Self::SspAuth),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }

    /// Whether a server may send a packet of this type.
    ///
    /// Servers answer with a login response, a query response or a reply.
    #[must_use]
    pub const fn is_legal_incoming(self) -> bool {
        matches!(self, Self::Login | Self::Reply | Self::Normal)
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Normal packet, more packets to follow.
        const NORMAL = 0x00;
        /// End of message (last packet).
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event (attention acknowledgment).
        const IGNORE_EVENT = 0x02;
        /// Reset the connection before processing the message.
        const RESET_CONNECTION = 0x08;
    }
}

/// TDS packet header.
///
/// Every packet begins with an 8-byte header:
/// `type, status, length (big-endian), spid, packet number, window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Server process ID (always 0 from clients).
    pub spid: u16,
    /// Packet sequence number (TDS 7.0+, 0 for legacy versions).
    pub packet_id: u8,
    /// Window (unused, 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    ///
    /// Unknown status bits are tolerated (servers set bits this client never
    /// requests); an unknown type byte or a length outside
    /// `PACKET_HEADER_SIZE..=max_length` is rejected.
    pub fn decode(src: &mut impl Buf, max_length: usize) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status = PacketStatus::from_bits_retain(src.get_u8());
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        let len = usize::from(length);
        if !(PACKET_HEADER_SIZE..=max_length).contains(&len) {
            return Err(ProtocolError::InvalidPacketLength {
                length: len,
                min: PACKET_HEADER_SIZE,
                max: max_length,
            });
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Encode the packet header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the packet ID (sequence number).
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::Query,
            status: PacketStatus::END_OF_MESSAGE,
            length: 100,
            spid: 54,
            packet_id: 1,
            window: 0,
        };

        let bytes = header.encode_to_bytes();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE);
        // length is big-endian
        assert_eq!(&bytes[2..4], &[0x00, 0x64]);

        let mut cursor = bytes.as_ref();
        let decoded = PacketHeader::decode(&mut cursor, MAX_PACKET_SIZE).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_payload_length() {
        let header = PacketHeader::new(PacketType::Query, PacketStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(0x01).unwrap(), PacketType::Query);
        assert_eq!(PacketType::from_u8(0x10).unwrap(), PacketType::Login70);
        assert!(PacketType::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_legal_incoming_types() {
        assert!(PacketType::Reply.is_legal_incoming());
        assert!(PacketType::Login.is_legal_incoming());
        assert!(PacketType::Normal.is_legal_incoming());
        assert!(!PacketType::Query.is_legal_incoming());
        assert!(!PacketType::Login70.is_legal_incoming());
    }

    #[test]
    fn test_rejects_short_length() {
        let bytes = [0x04, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        let err = PacketHeader::decode(&mut bytes.as_ref(), MAX_PACKET_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPacketLength { length: 4, .. }));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let bytes = [0x04, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00];
        let err = PacketHeader::decode(&mut bytes.as_ref(), 512).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPacketLength { length: 4096, .. }));
    }

    proptest! {
        #[test]
        fn decoded_length_stays_in_bounds(
            raw in proptest::collection::vec(any::<u8>(), 0..16),
            max in PACKET_HEADER_SIZE..=MAX_PACKET_SIZE,
        ) {
            if let Ok(header) = PacketHeader::decode(&mut raw.as_slice(), max) {
                let len = usize::from(header.length);
                prop_assert!((PACKET_HEADER_SIZE..=max).contains(&len));
                prop_assert_eq!(header.packet_type as u8, raw[0]);
                prop_assert_eq!(header.payload_length(), len - PACKET_HEADER_SIZE);
            }
        }
    }
}
