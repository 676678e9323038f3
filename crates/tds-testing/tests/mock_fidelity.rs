//! Mock TDS server fidelity tests.
//!
//! These tests talk to the mock over a raw socket and decode its replies
//! with the protocol crate alone, so a mock that drifts from the wire
//! format fails here before it confuses a client test.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tds_protocol::column::decode_col_metadata;
use tds_protocol::{
    Done, DoneKind, EnvChange, LoginAck, Login70, MAX_PACKET_SIZE, PACKET_HEADER_SIZE,
    PacketHeader, PacketStatus, PacketType, ServerMessage, SliceReader, StringMode, TdsRead,
    TdsVersion, TokenType, encode_sql_batch,
};
use tds_testing::fixtures::int_column;
use tds_testing::{MockResponse, MockTdsServer};
use tds_types::SqlValue;

fn send(stream: &mut TcpStream, packet_type: PacketType, payload: &[u8]) {
    let mut packet = BytesMut::new();
    let length = (PACKET_HEADER_SIZE + payload.len()) as u16;
    PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, length)
        .with_packet_id(1)
        .encode(&mut packet);
    packet.extend_from_slice(payload);
    stream.write_all(&packet).unwrap();
}

/// Read packets until end of message and return the joined payload.
fn receive(stream: &mut TcpStream) -> Bytes {
    let mut message = BytesMut::new();
    loop {
        let mut raw = [0u8; PACKET_HEADER_SIZE];
        stream.read_exact(&mut raw).unwrap();
        let header = PacketHeader::decode(&mut &raw[..], MAX_PACKET_SIZE).unwrap();
        assert_eq!(header.packet_type, PacketType::Reply);

        let mut payload = vec![0u8; usize::from(header.length) - PACKET_HEADER_SIZE];
        stream.read_exact(&mut payload).unwrap();
        message.extend_from_slice(&payload);
        if header.status.contains(PacketStatus::END_OF_MESSAGE) {
            return message.freeze();
        }
    }
}

fn connect(server: &MockTdsServer) -> TcpStream {
    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let login = Login70::new()
        .with_tds_version(TdsVersion::V7_0)
        .with_sql_auth("sa", Bytes::new())
        .with_database("master")
        .encode()
        .unwrap();
    send(&mut stream, PacketType::Login70, &login);
    stream
}

fn tag(reader: &mut SliceReader) -> TokenType {
    TokenType::from_u8(reader.read_u8().unwrap()).unwrap()
}

#[test]
fn test_login_reply_decodes() {
    let server = MockTdsServer::builder()
        .with_server_name("FidelityTest")
        .with_database("testdb")
        .build()
        .unwrap();
    let mut stream = connect(&server);

    let mut reader = SliceReader::new(receive(&mut stream), StringMode::unicode());

    assert_eq!(tag(&mut reader), TokenType::EnvChange);
    match EnvChange::decode(&mut reader).unwrap() {
        EnvChange::Database { new, .. } => assert_eq!(new, "master"),
        other => panic!("expected database change, got {other:?}"),
    }

    assert_eq!(tag(&mut reader), TokenType::Info);
    let info = ServerMessage::decode(&mut reader).unwrap();
    assert!(!info.is_error());

    assert_eq!(tag(&mut reader), TokenType::LoginAck);
    let ack = LoginAck::decode(&mut reader).unwrap();
    assert_eq!(ack.prog_name, "FidelityTest");

    assert_eq!(tag(&mut reader), TokenType::Done);
    let done = Done::decode(&mut reader, DoneKind::Done).unwrap();
    assert!(!done.more());
    assert!(reader.is_empty());
}

#[test]
fn test_select_reply_decodes() {
    let server = MockTdsServer::builder()
        .with_response(
            "select 1",
            MockResponse::rows(vec![int_column("")], vec![vec![SqlValue::Int(1)]]),
        )
        .build()
        .unwrap();
    let mut stream = connect(&server);
    receive(&mut stream);

    let batch = encode_sql_batch("select 1", TdsVersion::V7_0, StringMode::unicode()).unwrap();
    send(&mut stream, PacketType::Query, &batch);
    let mut reader = SliceReader::new(receive(&mut stream), StringMode::unicode());

    assert_eq!(tag(&mut reader), TokenType::ColMetaData);
    let columns = decode_col_metadata(&mut reader, TdsVersion::V7_0).unwrap();
    assert_eq!(columns.len(), 1);

    assert_eq!(tag(&mut reader), TokenType::Row);
    let value = tds_types::decode_value(
        &mut reader,
        &columns[0].type_info,
        TdsVersion::V7_0,
        encoding_rs::WINDOWS_1252,
    )
    .unwrap();
    assert_eq!(value, SqlValue::Int(1));

    assert_eq!(tag(&mut reader), TokenType::Done);
    let done = Done::decode(&mut reader, DoneKind::Done).unwrap();
    assert_eq!(done.row_count, 1);
    assert!(reader.is_empty());
}

#[test]
fn test_error_reply_decodes() {
    let server = MockTdsServer::builder()
        .with_response("select * from nope", MockResponse::error(208, "Invalid object name."))
        .build()
        .unwrap();
    let mut stream = connect(&server);
    receive(&mut stream);

    let batch =
        encode_sql_batch("select * from nope", TdsVersion::V7_0, StringMode::unicode()).unwrap();
    send(&mut stream, PacketType::Query, &batch);
    let mut reader = SliceReader::new(receive(&mut stream), StringMode::unicode());

    assert_eq!(tag(&mut reader), TokenType::Error);
    let error = ServerMessage::decode(&mut reader).unwrap();
    assert_eq!(error.number, 208);
    assert!(error.is_error());

    assert_eq!(tag(&mut reader), TokenType::Done);
    let done = Done::decode(&mut reader, DoneKind::Done).unwrap();
    assert!(done.status.contains(tds_protocol::DoneStatus::ERROR));
}
