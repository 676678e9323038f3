//! TDS binary decoding for SQL values.
//!
//! [`decode_value`] reads one value described by a [`TypeInfo`]: first the
//! length prefix its type calls for (none, one byte, two bytes, or the
//! text-pointer header of a blob), then the payload.

use bytes::Bytes;
use encoding_rs::Encoding;
use tds_protocol::codec::{SliceReader, TdsRead, decode_narrow, decode_ucs2};
use tds_protocol::{Collation, LengthPrefix, ProtocolError, TdsVersion, TypeId, TypeInfo};
use uuid::Uuid;

use crate::datetime::{DateTime4, DateTime8};
use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::value::SqlValue;

/// Null marker of two-byte length prefixes.
pub const USHORT_NULL: u16 = 0xFFFF;

/// Size of the text pointer of a non-null blob.
pub const TEXT_POINTER_SIZE: u8 = 16;

/// Size of the timestamp following a text pointer.
pub const TEXT_TIMESTAMP_SIZE: usize = 8;

/// Largest magnitude a decimal carries, in bytes.
const MAX_DECIMAL_MAGNITUDE: usize = 16;

fn invalid(type_id: TypeId, err: TypeError) -> ProtocolError {
    ProtocolError::InvalidValue {
        type_name: type_id.name(),
        reason: err.to_string(),
    }
}

fn bad_length(type_id: TypeId, length: usize) -> ProtocolError {
    ProtocolError::InvalidValueLength {
        type_name: type_id.name(),
        length,
    }
}

/// Decode one value.
///
/// `charset` is the connection character set, used for single-byte data
/// whose column carries no collation.
pub fn decode_value<R: TdsRead>(
    src: &mut R,
    info: &TypeInfo,
    version: TdsVersion,
    charset: &'static Encoding,
) -> Result<SqlValue, R::Error> {
    let type_id = info.type_id;
    match type_id.length_prefix() {
        LengthPrefix::Fixed(_) => decode_fixed(src, type_id),
        LengthPrefix::Byte => {
            let len = usize::from(src.read_u8()?);
            if len == 0 {
                return Ok(SqlValue::Null);
            }
            decode_data(src, info, len, version, charset)
        }
        LengthPrefix::UShort => {
            let len = src.read_u16()?;
            if len == USHORT_NULL {
                return Ok(SqlValue::Null);
            }
            decode_data(src, info, usize::from(len), version, charset)
        }
        LengthPrefix::Blob => {
            let pointer_len = usize::from(src.read_u8()?);
            if pointer_len == 0 {
                return Ok(SqlValue::Null);
            }
            src.skip(pointer_len + TEXT_TIMESTAMP_SIZE)?;
            let len = src.read_u32()? as usize;
            decode_data(src, info, len, version, charset)
        }
        LengthPrefix::Long => decode_variant(src, version, charset),
    }
}

/// Decode a value of a fixed-length type.
fn decode_fixed<R: TdsRead>(src: &mut R, type_id: TypeId) -> Result<SqlValue, R::Error> {
    Ok(match type_id {
        TypeId::Null => SqlValue::Null,
        TypeId::Int1 => SqlValue::Int(i64::from(src.read_u8()?)),
        TypeId::Bit => SqlValue::Bool(src.read_u8()? != 0),
        TypeId::Int2 => SqlValue::Int(i64::from(src.read_i16()?)),
        TypeId::Int4 => SqlValue::Int(i64::from(src.read_i32()?)),
        TypeId::Int8 => SqlValue::Int(src.read_i64()?),
        TypeId::Float4 => SqlValue::Float(f64::from(src.read_f32()?)),
        TypeId::Float8 => SqlValue::Float(src.read_f64()?),
        TypeId::Money => read_money8(src)?,
        TypeId::Money4 => SqlValue::Decimal(Numeric::from_money(i64::from(src.read_i32()?))),
        TypeId::DateTime => read_datetime8(src)?,
        TypeId::DateTime4 => read_datetime4(src)?,
        other => return Err(ProtocolError::UnknownDataType(other as u8).into()),
    })
}

fn read_money8<R: TdsRead>(src: &mut R) -> Result<SqlValue, R::Error> {
    let high = i64::from(src.read_i32()?);
    let low = i64::from(src.read_u32()?);
    Ok(SqlValue::Decimal(Numeric::from_money((high << 32) | low)))
}

fn read_datetime8<R: TdsRead>(src: &mut R) -> Result<SqlValue, R::Error> {
    let raw = DateTime8 {
        days: src.read_i32()?,
        ticks: src.read_u32()?,
    };
    let value = raw.to_naive().map_err(|e| invalid(TypeId::DateTime, e))?;
    Ok(SqlValue::DateTime(value))
}

fn read_datetime4<R: TdsRead>(src: &mut R) -> Result<SqlValue, R::Error> {
    let raw = DateTime4 {
        days: src.read_u16()?,
        minutes: src.read_u16()?,
    };
    let value = raw.to_naive().map_err(|e| invalid(TypeId::DateTime4, e))?;
    Ok(SqlValue::DateTime(value))
}

/// Decode the `len`-byte payload of a variable-length type.
fn decode_data<R: TdsRead>(
    src: &mut R,
    info: &TypeInfo,
    len: usize,
    version: TdsVersion,
    charset: &'static Encoding,
) -> Result<SqlValue, R::Error> {
    let type_id = info.type_id;
    match type_id {
        TypeId::IntN => Ok(match len {
            1 => SqlValue::Int(i64::from(src.read_u8()?)),
            2 => SqlValue::Int(i64::from(src.read_i16()?)),
            4 => SqlValue::Int(i64::from(src.read_i32()?)),
            8 => SqlValue::Int(src.read_i64()?),
            _ => return Err(bad_length(type_id, len).into()),
        }),
        TypeId::BitN => match len {
            1 => Ok(SqlValue::Bool(src.read_u8()? != 0)),
            _ => Err(bad_length(type_id, len).into()),
        },
        TypeId::FloatN => Ok(match len {
            4 => SqlValue::Float(f64::from(src.read_f32()?)),
            8 => SqlValue::Float(src.read_f64()?),
            _ => return Err(bad_length(type_id, len).into()),
        }),
        TypeId::MoneyN => match len {
            4 => Ok(SqlValue::Decimal(Numeric::from_money(i64::from(
                src.read_i32()?,
            )))),
            8 => read_money8(src),
            _ => Err(bad_length(type_id, len).into()),
        },
        TypeId::DateTimeN => match len {
            4 => read_datetime4(src),
            8 => read_datetime8(src),
            _ => Err(bad_length(type_id, len).into()),
        },
        TypeId::Guid => {
            if len != 16 {
                return Err(bad_length(type_id, len).into());
            }
            let mut raw = [0u8; 16];
            src.read_exact_into(&mut raw)?;
            Ok(SqlValue::Guid(Uuid::from_bytes_le(raw)))
        }
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            decode_decimal(src, type_id, len, info.scale, version)
        }
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => {
            let raw = src.read_bytes(len)?;
            // legacy servers send a single blank for an empty varchar
            if version.is_legacy() && type_id == TypeId::VarChar && &raw[..] == b" " {
                return Ok(SqlValue::String(String::new()));
            }
            Ok(SqlValue::String(decode_narrow(&raw, info.encoding(charset))))
        }
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => {
            if len % 2 != 0 {
                return Err(bad_length(type_id, len).into());
            }
            let raw = src.read_bytes(len)?;
            Ok(SqlValue::String(decode_ucs2(&raw)?))
        }
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image => Ok(SqlValue::Binary(src.read_bytes(len)?)),
        other => Err(ProtocolError::UnknownDataType(other as u8).into()),
    }
}

/// Decode a sign byte followed by the magnitude.
///
/// TDS 7.0+ writes sign 1 for positive values and the magnitude
/// little-endian; legacy versions write sign 1 for negative values and the
/// magnitude big-endian.
fn decode_decimal<R: TdsRead>(
    src: &mut R,
    type_id: TypeId,
    len: usize,
    scale: u8,
    version: TdsVersion,
) -> Result<SqlValue, R::Error> {
    let magnitude_len = len.checked_sub(1).ok_or_else(|| bad_length(type_id, len))?;
    if magnitude_len > MAX_DECIMAL_MAGNITUDE {
        return Err(bad_length(type_id, len).into());
    }
    let sign = src.read_u8()?;
    let raw = src.read_bytes(magnitude_len)?;

    let magnitude = if version.is_legacy() {
        raw.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b))
    } else {
        raw.iter().rev().fold(0u128, |acc, &b| (acc << 8) | u128::from(b))
    };
    let magnitude = i128::try_from(magnitude).map_err(|_| {
        ProtocolError::InvalidValue {
            type_name: type_id.name(),
            reason: "magnitude exceeds 128 bits".into(),
        }
    })?;

    let negative = if version.is_legacy() { sign == 1 } else { sign == 0 };
    let value = if negative { -magnitude } else { magnitude };
    Ok(SqlValue::Decimal(Numeric::new(value, scale)))
}

/// Decode an `sql_variant`: total length, base type, property bytes, data.
fn decode_variant<R: TdsRead>(
    src: &mut R,
    version: TdsVersion,
    charset: &'static Encoding,
) -> Result<SqlValue, R::Error> {
    let total = src.read_u32()? as usize;
    if total == 0 {
        return Ok(SqlValue::Null);
    }
    if total < 2 {
        return Err(bad_length(TypeId::Variant, total).into());
    }
    let base = TypeId::try_from_u8(src.read_u8()?)?;
    let prop_len = usize::from(src.read_u8()?);
    let data_len = total
        .checked_sub(2 + prop_len)
        .ok_or_else(|| bad_length(TypeId::Variant, total))?;

    let mut props = src.read_framed(prop_len)?;
    let info = variant_type_info(&mut props, base)?;

    match base.length_prefix() {
        LengthPrefix::Fixed(size) if size == data_len => decode_fixed(src, base),
        LengthPrefix::Fixed(_) => Err(bad_length(base, data_len).into()),
        LengthPrefix::Byte | LengthPrefix::UShort => {
            decode_data(src, &info, data_len, version, charset)
        }
        LengthPrefix::Blob | LengthPrefix::Long => Err(ProtocolError::InvalidValue {
            type_name: TypeId::Variant.name(),
            reason: format!("{} cannot be a variant base type", base.name()),
        }
        .into()),
    }
}

fn variant_type_info(props: &mut SliceReader, base: TypeId) -> Result<TypeInfo, ProtocolError> {
    let mut info = TypeInfo::new(base);
    if base.is_decimal() {
        info.precision = props.read_u8()?;
        info.scale = props.read_u8()?;
    } else if base.is_collated() {
        let mut raw = [0u8; Collation::WIRE_SIZE];
        props.read_exact_into(&mut raw)?;
        info.collation = Some(Collation::from_bytes(&raw)?);
        info.max_length = u32::from(props.read_u16()?);
    } else if matches!(base, TypeId::BigBinary | TypeId::BigVarBinary) {
        info.max_length = u32::from(props.read_u16()?);
    }
    Ok(info)
}

/// Decode a standalone UCS-2 buffer.
pub fn decode_utf16_string(data: &[u8]) -> Result<String, TypeError> {
    Ok(decode_ucs2(data)?)
}

/// Decode a value held in memory.
pub fn decode_bytes(
    data: Bytes,
    info: &TypeInfo,
    version: TdsVersion,
    charset: &'static Encoding,
) -> Result<SqlValue, TypeError> {
    let mut src = SliceReader::new(data, tds_protocol::StringMode::narrow(charset));
    Ok(decode_value(&mut src, info, version, charset)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LATIN1: &Encoding = encoding_rs::WINDOWS_1252;

    fn decode(data: &[u8], info: TypeInfo, version: TdsVersion) -> Result<SqlValue, TypeError> {
        decode_bytes(Bytes::copy_from_slice(data), &info, version, LATIN1)
    }

    #[test]
    fn test_fixed_integers() {
        let info = TypeInfo::new(TypeId::Int4);
        assert_eq!(
            decode(&(-7i32).to_le_bytes(), info, TdsVersion::V7_0).unwrap(),
            SqlValue::Int(-7)
        );
        let info = TypeInfo::new(TypeId::Int1);
        assert_eq!(
            decode(&[200], info, TdsVersion::V4_2).unwrap(),
            SqlValue::Int(200)
        );
    }

    #[test]
    fn test_intn_widths_and_null() {
        let info = TypeInfo::with_length(TypeId::IntN, 8);
        assert_eq!(decode(&[0], info, TdsVersion::V7_0).unwrap(), SqlValue::Null);

        let mut data = vec![8];
        data.extend_from_slice(&i64::MIN.to_le_bytes());
        assert_eq!(
            decode(&data, info, TdsVersion::V8_0).unwrap(),
            SqlValue::Int(i64::MIN)
        );

        assert!(matches!(
            decode(&[3, 1, 2, 3], info, TdsVersion::V7_0),
            Err(TypeError::Protocol(ProtocolError::InvalidValueLength { length: 3, .. }))
        ));
    }

    #[test]
    fn test_money() {
        // 1.5 = 15000 ten-thousandths, high word first
        let mut data = Vec::new();
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&15_000u32.to_le_bytes());
        assert_eq!(
            decode(&data, TypeInfo::new(TypeId::Money), TdsVersion::V7_0).unwrap(),
            SqlValue::Decimal(Numeric::new(15_000, 4))
        );

        let mut data = vec![4];
        data.extend_from_slice(&(-25_000i32).to_le_bytes());
        assert_eq!(
            decode(&data, TypeInfo::with_length(TypeId::MoneyN, 4), TdsVersion::V7_0).unwrap(),
            SqlValue::Decimal(Numeric::new(-25_000, 4))
        );
    }

    #[test]
    fn test_decimal_modern_and_legacy_signs() {
        let info = TypeInfo::decimal(TypeId::NumericN, 10, 2);

        // 7.0: sign 0 = negative, magnitude little-endian
        let data = [5, 0, 0x39, 0x30, 0, 0];
        assert_eq!(
            decode(&data, info, TdsVersion::V7_0).unwrap(),
            SqlValue::Decimal(Numeric::new(-12_345, 2))
        );

        // legacy: sign 1 = negative, magnitude big-endian
        let data = [5, 1, 0, 0, 0x30, 0x39];
        assert_eq!(
            decode(&data, info, TdsVersion::V5_0).unwrap(),
            SqlValue::Decimal(Numeric::new(-12_345, 2))
        );
        let data = [5, 0, 0, 0, 0x30, 0x39];
        assert_eq!(
            decode(&data, info, TdsVersion::V4_2).unwrap(),
            SqlValue::Decimal(Numeric::new(12_345, 2))
        );
    }

    #[test]
    fn test_datetime_forms() {
        let mut data = Vec::new();
        data.extend_from_slice(&36_524i32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        let expected = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            decode(&data, TypeInfo::new(TypeId::DateTime), TdsVersion::V7_0).unwrap(),
            SqlValue::DateTime(expected)
        );

        let mut data = vec![4];
        data.extend_from_slice(&36_524u16.to_le_bytes());
        data.extend_from_slice(&60u16.to_le_bytes());
        assert_eq!(
            decode(&data, TypeInfo::with_length(TypeId::DateTimeN, 4), TdsVersion::V4_2)
                .unwrap(),
            SqlValue::DateTime(expected + chrono::Duration::hours(1))
        );
    }

    #[test]
    fn test_legacy_blank_varchar_is_empty() {
        let info = TypeInfo::with_length(TypeId::VarChar, 30);
        assert_eq!(
            decode(&[1, b' '], info, TdsVersion::V4_2).unwrap(),
            SqlValue::String(String::new())
        );
        assert_eq!(
            decode(&[1, b' '], info, TdsVersion::V7_0).unwrap(),
            SqlValue::String(" ".into())
        );
        assert_eq!(decode(&[0], info, TdsVersion::V4_2).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_narrow_text_uses_charset() {
        let info = TypeInfo::with_length(TypeId::VarChar, 30);
        assert_eq!(
            decode(&[3, b'c', 0xE9, b'!'], info, TdsVersion::V5_0).unwrap(),
            SqlValue::String("cé!".into())
        );
    }

    #[test]
    fn test_nvarchar_and_null() {
        let info = TypeInfo::with_length(TypeId::NVarChar, 100);
        let data = [4, 0, b'h', 0, b'i', 0];
        assert_eq!(
            decode(&data, info, TdsVersion::V7_0).unwrap(),
            SqlValue::String("hi".into())
        );
        assert_eq!(
            decode(&[0xFF, 0xFF], info, TdsVersion::V7_0).unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_text_blob_header() {
        let info = TypeInfo::new(TypeId::Text);
        let mut data = vec![16];
        data.extend_from_slice(&[0xAA; 16]);
        data.extend_from_slice(&[0xBB; 8]);
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(b"hello");
        assert_eq!(
            decode(&data, info, TdsVersion::V4_2).unwrap(),
            SqlValue::String("hello".into())
        );
        assert_eq!(decode(&[0], info, TdsVersion::V4_2).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_guid_mixed_endian() {
        let uuid = Uuid::parse_str("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        let mut data = vec![16];
        data.extend_from_slice(&uuid.to_bytes_le());
        assert_eq!(
            decode(&data, TypeInfo::new(TypeId::Guid), TdsVersion::V7_0).unwrap(),
            SqlValue::Guid(uuid)
        );
    }

    #[test]
    fn test_variant_int() {
        let mut data = Vec::new();
        data.extend_from_slice(&6u32.to_le_bytes());
        data.push(TypeId::Int4 as u8);
        data.push(0);
        data.extend_from_slice(&99i32.to_le_bytes());
        assert_eq!(
            decode(&data, TypeInfo::new(TypeId::Variant), TdsVersion::V8_0).unwrap(),
            SqlValue::Int(99)
        );
        assert_eq!(
            decode(&0u32.to_le_bytes(), TypeInfo::new(TypeId::Variant), TdsVersion::V8_0)
                .unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_variant_varchar_with_collation() {
        let mut data = Vec::new();
        data.extend_from_slice(&(2u32 + 7 + 3).to_le_bytes());
        data.push(TypeId::BigVarChar as u8);
        data.push(7);
        data.extend_from_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        data.extend_from_slice(&30u16.to_le_bytes());
        data.extend_from_slice(b"abc");
        assert_eq!(
            decode(&data, TypeInfo::new(TypeId::Variant), TdsVersion::V8_0).unwrap(),
            SqlValue::String("abc".into())
        );
    }

    #[test]
    fn test_variant_decimal_without_sign_byte() {
        // numeric(10, 2) base type with no data bytes
        let data = [4, 0, 0, 0, TypeId::NumericN as u8, 2, 10, 2];
        assert!(matches!(
            decode(&data, TypeInfo::new(TypeId::Variant), TdsVersion::V8_0),
            Err(TypeError::Protocol(ProtocolError::InvalidValueLength { length: 0, .. }))
        ));
    }

    #[test]
    fn test_truncated_value() {
        let info = TypeInfo::with_length(TypeId::IntN, 4);
        assert!(matches!(
            decode(&[4, 1, 2], info, TdsVersion::V7_0),
            Err(TypeError::Protocol(ProtocolError::UnexpectedEof))
        ));
    }
}
