#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};

fuzz_target!(|data: &[u8]| {
    if data.len() >= PACKET_HEADER_SIZE {
        let mut cursor = data;
        if let Ok(header) = PacketHeader::decode(&mut cursor, MAX_PACKET_SIZE) {
            assert!(usize::from(header.length) >= PACKET_HEADER_SIZE);
            assert!(usize::from(header.length) <= MAX_PACKET_SIZE);
        }
    }
});
