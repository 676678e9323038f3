#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_client::{DispatchContext, read_token};
use tds_protocol::{SliceReader, StringMode, TdsVersion};

const VERSIONS: [TdsVersion; 4] = [
    TdsVersion::V4_2,
    TdsVersion::V5_0,
    TdsVersion::V7_0,
    TdsVersion::V8_0,
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, stream)) = data.split_first() else {
        return;
    };
    let version = VERSIONS[usize::from(selector) % VERSIONS.len()];
    let mode = if version.uses_unicode() {
        StringMode::unicode()
    } else {
        StringMode::default()
    };

    let mut reader = SliceReader::new(Bytes::copy_from_slice(stream), mode);
    let mut ctx = DispatchContext::new(version);

    // every token consumes input, so this ends at the first error
    while read_token(&mut reader, &mut ctx).is_ok() {}
});
