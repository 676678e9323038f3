#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{SliceReader, StringMode, TdsVersion, TypeId, TypeInfo};

/// Arbitrary column description for fuzzing.
#[derive(Debug, Arbitrary)]
struct FuzzTypeInfo {
    type_id: u8,
    max_length: u32,
    precision: u8,
    scale: u8,
}

/// Fuzz input combining a column description with raw value bytes.
#[derive(Debug, Arbitrary)]
struct FuzzInput {
    modern: bool,
    type_info: FuzzTypeInfo,
    data: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let Some(type_id) = TypeId::from_u8(input.type_info.type_id) else {
        return;
    };
    let mut info = TypeInfo::new(type_id);
    info.max_length = input.type_info.max_length;
    info.precision = input.type_info.precision;
    info.scale = input.type_info.scale;

    let (version, mode) = if input.modern {
        (TdsVersion::V7_0, StringMode::unicode())
    } else {
        (TdsVersion::V4_2, StringMode::default())
    };
    let mut reader = SliceReader::new(input.data, mode);
    let _ = tds_types::decode_value(&mut reader, &info, version, encoding_rs::WINDOWS_1252);
});
