//! Value codec tests across protocol versions.
//!
//! Covers:
//! - every supported value class encoded then decoded on each version
//! - decimal precision/scale boundaries
//! - both date/time resolutions
//! - conversion into Rust types after decoding

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use tds_protocol::{StringMode, TdsVersion, TypeId, TypeInfo};
use tds_types::decode::decode_bytes;
use tds_types::numeric::{MAX_PRECISION, Numeric};
use tds_types::{FromSql, SqlValue, encode_param_value, encode_row_value, type_info_for};

const LATIN1: &encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

const ALL_VERSIONS: [TdsVersion; 4] = [
    TdsVersion::V4_2,
    TdsVersion::V5_0,
    TdsVersion::V7_0,
    TdsVersion::V8_0,
];

fn round_trip(value: &SqlValue, info: &TypeInfo, version: TdsVersion) -> SqlValue {
    let mode = if version.uses_unicode() {
        StringMode::unicode()
    } else {
        StringMode::narrow(LATIN1)
    };
    let bytes = encode_row_value(value, info, version, mode).unwrap();
    decode_bytes(bytes, info, version, LATIN1).unwrap()
}

mod fixed_width {
    use super::*;

    #[test]
    fn test_integer_widths() {
        for (type_id, value) in [
            (TypeId::Int1, 255),
            (TypeId::Int2, i64::from(i16::MIN)),
            (TypeId::Int4, i64::from(i32::MAX)),
            (TypeId::Int8, i64::MIN),
        ] {
            let info = TypeInfo::new(type_id);
            assert_eq!(
                round_trip(&SqlValue::Int(value), &info, TdsVersion::V5_0),
                SqlValue::Int(value)
            );
        }
    }

    #[test]
    fn test_intn_each_length() {
        for (len, value) in [(1u32, 200i64), (2, -300), (4, 70_000), (8, -(1 << 40))] {
            let info = TypeInfo::with_length(TypeId::IntN, len);
            assert_eq!(
                round_trip(&SqlValue::Int(value), &info, TdsVersion::V8_0),
                SqlValue::Int(value)
            );
        }
    }

    #[test]
    fn test_smallmoney_range() {
        let info = TypeInfo::new(TypeId::Money4);
        let max = SqlValue::Decimal(Numeric::from_money(i64::from(i32::MAX)));
        assert_eq!(round_trip(&max, &info, TdsVersion::V4_2), max);

        let too_big = SqlValue::Decimal(Numeric::from_money(i64::from(i32::MAX) + 1));
        assert!(
            encode_row_value(&too_big, &info, TdsVersion::V4_2, StringMode::narrow(LATIN1))
                .is_err()
        );
    }

    #[test]
    fn test_bit_and_float() {
        let info = TypeInfo::new(TypeId::Bit);
        assert_eq!(
            round_trip(&SqlValue::Bool(true), &info, TdsVersion::V4_2),
            SqlValue::Bool(true)
        );
        let info = TypeInfo::with_length(TypeId::FloatN, 4);
        assert_eq!(
            round_trip(&SqlValue::Float(0.5), &info, TdsVersion::V7_0),
            SqlValue::Float(0.5)
        );
    }
}

mod character_data {
    use super::*;

    #[test]
    fn test_strings_on_every_version() {
        let value = SqlValue::String("caf\u{e9} au lait".into());
        for version in ALL_VERSIONS {
            let info = type_info_for(&value, version).unwrap();
            assert_eq!(round_trip(&value, &info, version), value, "{version}");
        }
    }

    #[test]
    fn test_long_text_becomes_blob() {
        let value = SqlValue::String("x".repeat(5000));
        let info = type_info_for(&value, TdsVersion::V5_0).unwrap();
        assert_eq!(info.type_id, TypeId::Text);
        assert_eq!(round_trip(&value, &info, TdsVersion::V5_0), value);

        let value = SqlValue::String("y".repeat(5000));
        let info = type_info_for(&value, TdsVersion::V7_0).unwrap();
        assert_eq!(info.type_id, TypeId::NText);
        assert_eq!(round_trip(&value, &info, TdsVersion::V7_0), value);
    }

    #[test]
    fn test_oversized_varchar_is_rejected() {
        let info = TypeInfo::with_length(TypeId::VarChar, 255);
        let value = SqlValue::String("z".repeat(256));
        assert!(
            encode_param_value(&value, &info, TdsVersion::V4_2, StringMode::narrow(LATIN1))
                .is_err()
        );
    }

    #[test]
    fn test_binary_and_image() {
        let small = SqlValue::Binary(Bytes::from_static(&[0, 1, 2, 0xFF]));
        let big = SqlValue::Binary(Bytes::from(vec![7u8; 9000]));
        for version in ALL_VERSIONS {
            for value in [&small, &big] {
                let info = type_info_for(value, version).unwrap();
                assert_eq!(&round_trip(value, &info, version), value);
            }
        }
    }
}

mod conversions {
    use super::*;

    #[test]
    fn test_decoded_values_convert() {
        let info = TypeInfo::with_length(TypeId::IntN, 2);
        let decoded = round_trip(&SqlValue::Int(12), &info, TdsVersion::V7_0);
        assert_eq!(i16::from_sql(&decoded).unwrap(), 12);
        assert_eq!(Option::<i64>::from_sql(&decoded).unwrap(), Some(12));
    }

    #[test]
    fn test_null_for_each_type_class() {
        for info in [
            TypeInfo::with_length(TypeId::IntN, 4),
            TypeInfo::with_length(TypeId::NVarChar, 100),
            TypeInfo::new(TypeId::Text),
            TypeInfo::decimal(TypeId::NumericN, 18, 2),
        ] {
            let decoded = round_trip(&SqlValue::Null, &info, TdsVersion::V8_0);
            assert!(decoded.is_null(), "{:?}", info.type_id);
        }
    }
}

fn datetime_strategy() -> impl Strategy<Value = NaiveDateTime> {
    // 1753-01-01 .. 9999-12-31 in days, plus 1/300 s ticks
    (-53_690i64..2_958_463, 0u32..25_920_000).prop_map(|(days, ticks)| {
        let base = NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let millis_exact = i64::from(ticks) * 10 / 3;
        base + chrono::Duration::days(days) + chrono::Duration::milliseconds(millis_exact)
    })
}

proptest! {
    #[test]
    fn prop_decimal_every_precision_and_scale(
        precision in 1u8..=MAX_PRECISION,
        scale_seed in any::<u8>(),
        digits_seed in any::<u128>(),
        negative in any::<bool>(),
    ) {
        let scale = scale_seed % (precision + 1);
        let bound = 10u128.pow(u32::from(precision));
        let magnitude = (digits_seed % bound) as i128;
        let value = SqlValue::Decimal(Numeric::new(
            if negative { -magnitude } else { magnitude },
            scale,
        ));
        for version in ALL_VERSIONS {
            let info = TypeInfo::decimal(TypeId::DecimalN, precision, scale);
            prop_assert_eq!(round_trip(&value, &info, version), value.clone());
        }
    }

    #[test]
    fn prop_datetime_round_trip(dt in datetime_strategy()) {
        let decoded = round_trip(
            &SqlValue::DateTime(dt),
            &TypeInfo::new(TypeId::DateTime),
            TdsVersion::V7_0,
        );
        let SqlValue::DateTime(back) = decoded else {
            return Err(TestCaseError::fail("not a datetime"));
        };
        // a tick is 3.33ms; the exact-millisecond input rounds to within one
        prop_assert!((back - dt).num_milliseconds().abs() <= 2);
    }

    #[test]
    fn prop_smalldatetime_round_trip(days in 0u16..u16::MAX, minutes in 0u16..1440) {
        let dt = NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(i64::from(days))
            + chrono::Duration::minutes(i64::from(minutes));
        let value = SqlValue::DateTime(dt);
        let info = TypeInfo::new(TypeId::DateTime4);
        prop_assert_eq!(round_trip(&value, &info, TdsVersion::V4_2), value);
    }

    #[test]
    fn prop_int_round_trip(v in any::<i64>()) {
        let value = SqlValue::Int(v);
        let info = type_info_for(&value, TdsVersion::V8_0).unwrap();
        prop_assert_eq!(round_trip(&value, &info, TdsVersion::V8_0), value);
    }

    #[test]
    fn prop_money_round_trip(raw in any::<i64>()) {
        let value = SqlValue::Decimal(Numeric::from_money(raw));
        let info = TypeInfo::new(TypeId::Money);
        prop_assert_eq!(round_trip(&value, &info, TdsVersion::V5_0), value);
    }
}
