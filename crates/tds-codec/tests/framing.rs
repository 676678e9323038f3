//! Framing properties of the blocking transport and the async connection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{self, Cursor, Read, Write};

use bytes::Bytes;
use proptest::prelude::*;
use tds_codec::{AsyncConnection, PacketTransport, TransportStream};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tds_protocol::{ByteOrder, TdsVersion};

/// Peer that replays a canned response and records what the client sent.
struct MockPeer {
    response: Cursor<Vec<u8>>,
    sent: Vec<u8>,
}

impl MockPeer {
    fn new(response: Vec<u8>) -> Self {
        Self {
            response: Cursor::new(response),
            sent: Vec::new(),
        }
    }
}

impl Read for MockPeer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.response.read(buf)
    }
}

impl Write for MockPeer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportStream for MockPeer {
    fn is_alive(&mut self) -> bool {
        true
    }
}

/// Split a wire capture into headers and payloads.
fn split_packets(mut wire: &[u8]) -> Vec<(PacketHeader, Vec<u8>)> {
    let mut packets = Vec::new();
    while !wire.is_empty() {
        let header = PacketHeader::decode(&mut &wire[..PACKET_HEADER_SIZE], 32767).unwrap();
        let len = usize::from(header.length);
        packets.push((header, wire[PACKET_HEADER_SIZE..len].to_vec()));
        wire = &wire[len..];
    }
    packets
}

/// Re-frame a payload as reply packets of the given size.
fn reply_packets(payload: &[u8], packet_size: usize) -> Vec<u8> {
    let room = packet_size - PACKET_HEADER_SIZE;
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[]]
    } else {
        payload.chunks(room).collect()
    };
    let mut wire = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let status = if i + 1 == chunks.len() {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        PacketHeader::new(
            PacketType::Reply,
            status,
            (PACKET_HEADER_SIZE + chunk.len()) as u16,
        )
        .with_packet_id((i + 1) as u8)
        .encode(&mut wire);
        wire.extend_from_slice(chunk);
    }
    wire
}

fn any_version() -> impl Strategy<Value = TdsVersion> {
    prop_oneof![
        Just(TdsVersion::V4_2),
        Just(TdsVersion::V5_0),
        Just(TdsVersion::V7_0),
        Just(TdsVersion::V8_0),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn outgoing_framing_is_exact(
        payload in proptest::collection::vec(any::<u8>(), 0..5000),
        packet_size in 512usize..2048,
        version in any_version(),
    ) {
        let mut transport = PacketTransport::new(MockPeer::new(Vec::new()), packet_size, ByteOrder::LittleEndian);
        transport.set_version(version);
        transport.send_message(PacketType::Query, &payload).unwrap();

        let packets = split_packets(&transport.get_ref().sent);
        let room = packet_size - PACKET_HEADER_SIZE;
        prop_assert_eq!(packets.len(), payload.len().div_ceil(room).max(1));

        let eom_count = packets.iter().filter(|(h, _)| h.is_end_of_message()).count();
        prop_assert_eq!(eom_count, 1);
        prop_assert!(packets.last().unwrap().0.is_end_of_message());

        let mut joined = Vec::new();
        for (i, (header, body)) in packets.iter().enumerate() {
            prop_assert_eq!(usize::from(header.length), PACKET_HEADER_SIZE + body.len());
            prop_assert!(usize::from(header.length) <= packet_size);
            let expected_id = if version.numbers_packets() { (i + 1) as u8 } else { 0 };
            prop_assert_eq!(header.packet_id, expected_id);
            joined.extend_from_slice(body);
        }
        prop_assert_eq!(joined, payload);
    }

    #[test]
    fn incoming_reassembly_across_packets(
        payload in proptest::collection::vec(any::<u8>(), 1..5000),
        packet_size in 512usize..2048,
    ) {
        let wire = reply_packets(&payload, packet_size);
        let mut transport = PacketTransport::new(MockPeer::new(wire), 512, ByteOrder::LittleEndian);
        transport.set_version(TdsVersion::V7_0);
        transport.send_message(PacketType::Query, b"select 1").unwrap();

        let received = transport.get_bytes(payload.len()).unwrap();
        prop_assert_eq!(&received[..], &payload[..]);
        prop_assert!(!transport.has_buffered_input());
    }
}

#[test]
fn blocking_round_trip_through_mock_peer() {
    let wire = reply_packets(&[0xFD, 0x10, 0x00, 0xC1, 0x00, 0x01, 0x00, 0x00, 0x00], 512);
    let mut transport = PacketTransport::new(MockPeer::new(wire), 512, ByteOrder::LittleEndian);
    transport.set_version(TdsVersion::V7_0);

    transport.start_message(PacketType::Query);
    transport.append_string("select 1").unwrap();
    transport.end_message().unwrap();

    let sent = split_packets(&transport.get_ref().sent);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.len(), 16);

    assert_eq!(transport.get_u8().unwrap(), 0xFD);
    assert_eq!(transport.get_u16().unwrap(), 0x0010);
    assert_eq!(transport.get_u16().unwrap(), 0x00C1);
    assert_eq!(transport.get_i32().unwrap(), 1);
    assert!(transport.get_u8().is_err());
}

#[tokio::test]
async fn async_connection_against_scripted_io() {
    let mut request = Vec::new();
    PacketHeader::new(PacketType::Query, PacketStatus::END_OF_MESSAGE, 12)
        .with_packet_id(1)
        .encode(&mut request);
    request.extend_from_slice(b"ping");

    let response = reply_packets(b"pong", 512);

    let io = tokio_test::io::Builder::new()
        .write(&request)
        .read(&response)
        .build();

    let mut conn = AsyncConnection::new(io, TdsVersion::V8_0, 512);
    conn.send_message(PacketType::Query, Bytes::from_static(b"ping"))
        .await
        .unwrap();
    let message = conn.read_message().await.unwrap().unwrap();
    assert_eq!(message.packet_type, PacketType::Reply);
    assert_eq!(&message.payload[..], b"pong");
}
