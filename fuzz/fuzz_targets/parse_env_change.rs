#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{EnvChange, SliceReader, StringMode};

fuzz_target!(|data: &[u8]| {
    let Some((&unicode, body)) = data.split_first() else {
        return;
    };
    let mode = if unicode & 1 == 1 {
        StringMode::unicode()
    } else {
        StringMode::default()
    };
    let mut reader = SliceReader::new(Bytes::copy_from_slice(body), mode);
    let _ = EnvChange::decode(&mut reader);
});
