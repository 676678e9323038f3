//! TDS binary encoding for SQL values.
//!
//! Values are written in one of two framings. Inside a ROW token a blob
//! carries a text pointer and timestamp; as an RPC parameter or a bulk-copy
//! value it carries only a four-byte length. Every other type is framed the
//! same way in both.

use std::borrow::Cow;

use bytes::Bytes;
use chrono::NaiveDateTime;
use tds_protocol::codec::{encode_narrow, utf16_byte_len};
use tds_protocol::column::decimal_storage_size;
use tds_protocol::{
    Collation, LengthPrefix, MessageWriter, StringMode, TdsVersion, TdsWrite, TypeId, TypeInfo,
};

use crate::datetime::{DateTime4, DateTime8};
use crate::decode::{TEXT_POINTER_SIZE, TEXT_TIMESTAMP_SIZE, USHORT_NULL};
use crate::error::TypeError;
use crate::numeric::{MAX_PRECISION, Numeric};
use crate::value::SqlValue;

/// Null marker of a blob sent as a parameter.
pub const BLOB_PARAM_NULL: u32 = 0xFFFF_FFFF;

/// Largest payload of a two-byte length prefix.
pub const MAX_USHORT_LEN: usize = 8000;

/// Largest payload of a one-byte length prefix.
pub const MAX_BYTE_LEN: usize = 255;

/// Framing context of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueContext {
    /// Inside a ROW token.
    Row,
    /// RPC parameter or bulk-copy value.
    Param,
}

/// Encode a value as it appears inside a ROW token.
pub fn encode_row_value(
    value: &SqlValue,
    info: &TypeInfo,
    version: TdsVersion,
    mode: StringMode,
) -> Result<Bytes, TypeError> {
    let mut dst = MessageWriter::new(mode);
    write_value(&mut dst, value, info, version, ValueContext::Row)?;
    Ok(dst.freeze())
}

/// Encode a value as an RPC parameter or bulk-copy value.
pub fn encode_param_value(
    value: &SqlValue,
    info: &TypeInfo,
    version: TdsVersion,
    mode: StringMode,
) -> Result<Bytes, TypeError> {
    let mut dst = MessageWriter::new(mode);
    write_value(&mut dst, value, info, version, ValueContext::Param)?;
    Ok(dst.freeze())
}

/// Pick the wire type used to send `value` to a server speaking `version`.
pub fn type_info_for(value: &SqlValue, version: TdsVersion) -> Result<TypeInfo, TypeError> {
    let modern = !version.is_legacy();
    let info = match value {
        SqlValue::Null | SqlValue::String(_) if modern => {
            let len = match value {
                SqlValue::String(s) => utf16_byte_len(s),
                _ => 0,
            };
            let mut info = if len > MAX_USHORT_LEN {
                TypeInfo::new(TypeId::NText)
            } else {
                TypeInfo::with_length(TypeId::NVarChar, MAX_USHORT_LEN as u32)
            };
            if version.has_collations() {
                info.collation = Some(Collation::default());
            }
            info
        }
        SqlValue::Null => TypeInfo::with_length(TypeId::VarChar, MAX_BYTE_LEN as u32),
        SqlValue::String(s) => {
            if s.len() > MAX_BYTE_LEN {
                TypeInfo::new(TypeId::Text)
            } else {
                TypeInfo::with_length(TypeId::VarChar, MAX_BYTE_LEN as u32)
            }
        }
        SqlValue::Int(v) => {
            if i32::try_from(*v).is_ok() {
                TypeInfo::with_length(TypeId::IntN, 4)
            } else if version.supports_bigint() {
                TypeInfo::with_length(TypeId::IntN, 8)
            } else {
                return Err(TypeError::OutOfRange { target_type: "int" });
            }
        }
        SqlValue::Float(_) => TypeInfo::with_length(TypeId::FloatN, 8),
        SqlValue::Decimal(n) => {
            if n.scale > MAX_PRECISION {
                return Err(TypeError::OutOfRange {
                    target_type: "numeric",
                });
            }
            let mut info = TypeInfo::decimal(TypeId::NumericN, MAX_PRECISION, n.scale);
            info.max_length = u32::from(decimal_wire_len(MAX_PRECISION, version)) + 1;
            info
        }
        SqlValue::Bool(_) if modern => TypeInfo::with_length(TypeId::BitN, 1),
        SqlValue::Bool(_) => TypeInfo::new(TypeId::Bit),
        SqlValue::DateTime(_) => TypeInfo::with_length(TypeId::DateTimeN, 8),
        SqlValue::Binary(b) if modern => {
            if b.len() > MAX_USHORT_LEN {
                TypeInfo::new(TypeId::Image)
            } else {
                TypeInfo::with_length(TypeId::BigVarBinary, MAX_USHORT_LEN as u32)
            }
        }
        SqlValue::Binary(b) => {
            if b.len() > MAX_BYTE_LEN {
                TypeInfo::new(TypeId::Image)
            } else {
                TypeInfo::with_length(TypeId::VarBinary, MAX_BYTE_LEN as u32)
            }
        }
        SqlValue::Guid(_) if modern => TypeInfo::with_length(TypeId::Guid, 16),
        SqlValue::Guid(_) => TypeInfo::with_length(TypeId::VarBinary, 16),
    };
    Ok(info)
}

/// Magnitude size of a decimal of `precision` digits, excluding the sign.
///
/// TDS 7.0+ uses fixed 4, 8, 12 or 16 byte magnitudes; legacy versions use
/// the fewest bytes that hold `10^precision - 1`.
#[must_use]
pub fn decimal_wire_len(precision: u8, version: TdsVersion) -> u8 {
    let precision = if precision == 0 || precision > MAX_PRECISION {
        MAX_PRECISION
    } else {
        precision
    };
    if version.is_legacy() {
        let max = 10u128.pow(u32::from(precision)) - 1;
        let bits = 128 - max.leading_zeros();
        bits.div_ceil(8) as u8
    } else {
        decimal_storage_size(precision) - 1
    }
}

/// Write one value, including its length prefix.
pub fn write_value<W: TdsWrite>(
    dst: &mut W,
    value: &SqlValue,
    info: &TypeInfo,
    version: TdsVersion,
    context: ValueContext,
) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let type_id = info.type_id;
    if value.is_null() {
        return write_null(dst, type_id, context);
    }

    match type_id.length_prefix() {
        LengthPrefix::Fixed(_) => write_fixed(dst, value, type_id),
        LengthPrefix::Byte => write_byte_framed(dst, value, info, version),
        LengthPrefix::UShort => {
            let data = variable_payload(dst, value, info, version)?;
            if data.len() > MAX_USHORT_LEN {
                return Err(TypeError::Truncation(format!(
                    "{} bytes exceed {} maximum of {MAX_USHORT_LEN}",
                    data.len(),
                    type_id.name()
                )));
            }
            dst.write_u16(data.len() as u16)?;
            dst.write_slice(&data)?;
            Ok(())
        }
        LengthPrefix::Blob => {
            let data = variable_payload(dst, value, info, version)?;
            let len = u32::try_from(data.len()).map_err(|_| {
                TypeError::Truncation(format!("{} bytes exceed blob maximum", data.len()))
            })?;
            if context == ValueContext::Row {
                dst.write_u8(TEXT_POINTER_SIZE)?;
                dst.write_slice(&[0u8; TEXT_POINTER_SIZE as usize])?;
                dst.write_slice(&[0u8; TEXT_TIMESTAMP_SIZE])?;
            }
            dst.write_u32(len)?;
            dst.write_slice(&data)?;
            Ok(())
        }
        LengthPrefix::Long => Err(TypeError::UnsupportedConversion {
            from: value.type_name().to_string(),
            to: type_id.name(),
        }),
    }
}

fn write_null<W: TdsWrite>(
    dst: &mut W,
    type_id: TypeId,
    context: ValueContext,
) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    match type_id.length_prefix() {
        LengthPrefix::Fixed(_) if type_id == TypeId::Null => Ok(()),
        LengthPrefix::Fixed(_) => Err(TypeError::UnexpectedNull),
        LengthPrefix::Byte => Ok(dst.write_u8(0)?),
        LengthPrefix::UShort => Ok(dst.write_u16(USHORT_NULL)?),
        LengthPrefix::Blob => match context {
            ValueContext::Row => Ok(dst.write_u8(0)?),
            ValueContext::Param => Ok(dst.write_u32(BLOB_PARAM_NULL)?),
        },
        LengthPrefix::Long => Ok(dst.write_u32(0)?),
    }
}

fn write_fixed<W: TdsWrite>(dst: &mut W, value: &SqlValue, type_id: TypeId) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    match type_id {
        TypeId::Null => {}
        TypeId::Int1 => dst.write_u8(narrow_int(value, type_id)?)?,
        TypeId::Bit => dst.write_u8(u8::from(as_int(value, type_id)? != 0))?,
        TypeId::Int2 => dst.write_i16(narrow_int(value, type_id)?)?,
        TypeId::Int4 => dst.write_i32(narrow_int(value, type_id)?)?,
        TypeId::Int8 => dst.write_i64(as_int(value, type_id)?)?,
        TypeId::Float4 => dst.write_f32(as_float(value, type_id)? as f32)?,
        TypeId::Float8 => dst.write_f64(as_float(value, type_id)?)?,
        TypeId::Money => write_money(dst, as_numeric(value, type_id)?)?,
        TypeId::Money4 => write_smallmoney(dst, as_numeric(value, type_id)?)?,
        TypeId::DateTime => write_datetime8(dst, value, type_id)?,
        TypeId::DateTime4 => write_datetime4(dst, value, type_id)?,
        other => {
            return Err(TypeError::UnsupportedConversion {
                from: value.type_name().to_string(),
                to: other.name(),
            });
        }
    }
    Ok(())
}

fn write_byte_framed<W: TdsWrite>(
    dst: &mut W,
    value: &SqlValue,
    info: &TypeInfo,
    version: TdsVersion,
) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let type_id = info.type_id;
    match type_id {
        TypeId::IntN => match info.max_length {
            1 => {
                dst.write_u8(1)?;
                dst.write_u8(narrow_int(value, type_id)?)?;
            }
            2 => {
                dst.write_u8(2)?;
                dst.write_i16(narrow_int(value, type_id)?)?;
            }
            8 => {
                dst.write_u8(8)?;
                dst.write_i64(as_int(value, type_id)?)?;
            }
            _ => {
                dst.write_u8(4)?;
                dst.write_i32(narrow_int(value, type_id)?)?;
            }
        },
        TypeId::BitN => {
            dst.write_u8(1)?;
            dst.write_u8(u8::from(as_int(value, type_id)? != 0))?;
        }
        TypeId::FloatN => {
            let v = as_float(value, type_id)?;
            if info.max_length == 4 {
                dst.write_u8(4)?;
                dst.write_f32(v as f32)?;
            } else {
                dst.write_u8(8)?;
                dst.write_f64(v)?;
            }
        }
        TypeId::MoneyN => {
            let n = as_numeric(value, type_id)?;
            if info.max_length == 4 {
                dst.write_u8(4)?;
                write_smallmoney(dst, n)?;
            } else {
                dst.write_u8(8)?;
                write_money(dst, n)?;
            }
        }
        TypeId::DateTimeN => {
            if info.max_length == 4 {
                dst.write_u8(4)?;
                write_datetime4(dst, value, type_id)?;
            } else {
                dst.write_u8(8)?;
                write_datetime8(dst, value, type_id)?;
            }
        }
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            write_decimal(dst, as_numeric(value, type_id)?, info, version)?;
        }
        _ => {
            let data = variable_payload(dst, value, info, version)?;
            if data.len() > MAX_BYTE_LEN {
                return Err(TypeError::Truncation(format!(
                    "{} bytes exceed {} maximum of {MAX_BYTE_LEN}",
                    data.len(),
                    type_id.name()
                )));
            }
            dst.write_u8(data.len() as u8)?;
            dst.write_slice(&data)?;
        }
    }
    Ok(())
}

/// Payload bytes of a character, binary or guid value.
fn variable_payload<'a, W: TdsWrite>(
    dst: &W,
    value: &'a SqlValue,
    info: &TypeInfo,
    version: TdsVersion,
) -> Result<Cow<'a, [u8]>, TypeError> {
    let type_id = info.type_id;
    if type_id == TypeId::Guid {
        return match value {
            SqlValue::Guid(g) => Ok(Cow::Owned(g.to_bytes_le().to_vec())),
            SqlValue::String(s) => uuid::Uuid::parse_str(s)
                .map(|g| Cow::Owned(g.to_bytes_le().to_vec()))
                .map_err(|e| TypeError::TypeMismatch {
                    expected: "uniqueidentifier",
                    actual: e.to_string(),
                }),
            _ => Err(mismatch(value, type_id)),
        };
    }

    if type_id.is_collated() {
        let text = as_text(value, type_id)?;
        if type_id.is_unicode() {
            let mut out = Vec::with_capacity(utf16_byte_len(&text));
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            return Ok(Cow::Owned(out));
        }
        // legacy servers cannot store an empty varchar
        if text.is_empty() && version.is_legacy() && type_id == TypeId::VarChar {
            return Ok(Cow::Borrowed(b" "));
        }
        let encoding = info.encoding(dst.string_mode().encoding);
        return Ok(Cow::Owned(encode_narrow(&text, encoding)));
    }

    match value {
        SqlValue::Binary(b) => Ok(Cow::Borrowed(&b[..])),
        SqlValue::Guid(g) => Ok(Cow::Owned(g.to_bytes_le().to_vec())),
        _ => Err(mismatch(value, type_id)),
    }
}

/// Write a decimal as length byte, sign byte and magnitude.
///
/// The value is rescaled to `info.scale` and checked against
/// `info.precision` (0 meaning the maximum).
pub fn write_decimal<W: TdsWrite>(
    dst: &mut W,
    n: Numeric,
    info: &TypeInfo,
    version: TdsVersion,
) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let precision = if info.precision == 0 {
        MAX_PRECISION
    } else {
        info.precision
    };
    let n = n.rescale(info.scale)?;
    if n.digits() > u32::from(precision) {
        return Err(TypeError::OutOfRange {
            target_type: info.type_id.name(),
        });
    }

    let size = usize::from(decimal_wire_len(precision, version));
    let magnitude = n.value.unsigned_abs().to_le_bytes();
    let negative = n.value < 0;

    dst.write_u8(size as u8 + 1)?;
    if version.is_legacy() {
        dst.write_u8(u8::from(negative))?;
        let be: Vec<u8> = magnitude[..size].iter().rev().copied().collect();
        dst.write_slice(&be)?;
    } else {
        dst.write_u8(u8::from(!negative))?;
        dst.write_slice(&magnitude[..size])?;
    }
    Ok(())
}

/// Write an 8-byte money amount, high half first.
pub fn write_money<W: TdsWrite>(dst: &mut W, n: Numeric) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let raw = n.to_money()?;
    dst.write_i32((raw >> 32) as i32)?;
    dst.write_u32(raw as u32)?;
    Ok(())
}

/// Write a 4-byte money amount.
pub fn write_smallmoney<W: TdsWrite>(dst: &mut W, n: Numeric) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let raw = i32::try_from(n.to_money()?).map_err(|_| TypeError::OutOfRange {
        target_type: "smallmoney",
    })?;
    dst.write_i32(raw)?;
    Ok(())
}

fn write_datetime8<W: TdsWrite>(
    dst: &mut W,
    value: &SqlValue,
    type_id: TypeId,
) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let SqlValue::DateTime(dt) = value else {
        return Err(mismatch(value, type_id));
    };
    write_datetime(dst, *dt)
}

/// Write an 8-byte date/time (days, then 1/300 s ticks).
pub fn write_datetime<W: TdsWrite>(dst: &mut W, dt: NaiveDateTime) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let raw = DateTime8::from_naive(dt)?;
    dst.write_i32(raw.days)?;
    dst.write_u32(raw.ticks)?;
    Ok(())
}

fn write_datetime4<W: TdsWrite>(
    dst: &mut W,
    value: &SqlValue,
    type_id: TypeId,
) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let SqlValue::DateTime(dt) = value else {
        return Err(mismatch(value, type_id));
    };
    write_smalldatetime(dst, *dt)
}

/// Write a 4-byte date/time (days, then minutes).
pub fn write_smalldatetime<W: TdsWrite>(dst: &mut W, dt: NaiveDateTime) -> Result<(), TypeError>
where
    TypeError: From<W::Error>,
{
    let raw = DateTime4::from_naive(dt)?;
    dst.write_u16(raw.days)?;
    dst.write_u16(raw.minutes)?;
    Ok(())
}

fn mismatch(value: &SqlValue, type_id: TypeId) -> TypeError {
    TypeError::TypeMismatch {
        expected: type_id.name(),
        actual: value.type_name().to_string(),
    }
}

fn as_int(value: &SqlValue, type_id: TypeId) -> Result<i64, TypeError> {
    match value {
        SqlValue::Int(v) => Ok(*v),
        SqlValue::Bool(v) => Ok(i64::from(*v)),
        _ => Err(mismatch(value, type_id)),
    }
}

fn narrow_int<T: TryFrom<i64>>(value: &SqlValue, type_id: TypeId) -> Result<T, TypeError> {
    T::try_from(as_int(value, type_id)?).map_err(|_| TypeError::OutOfRange {
        target_type: type_id.name(),
    })
}

fn as_float(value: &SqlValue, type_id: TypeId) -> Result<f64, TypeError> {
    match value {
        SqlValue::Float(v) => Ok(*v),
        SqlValue::Int(v) => Ok(*v as f64),
        SqlValue::Decimal(n) => Ok(n.to_f64()),
        _ => Err(mismatch(value, type_id)),
    }
}

fn as_numeric(value: &SqlValue, type_id: TypeId) -> Result<Numeric, TypeError> {
    match value {
        SqlValue::Decimal(n) => Ok(*n),
        SqlValue::Int(v) => Ok(Numeric::new(i128::from(*v), 0)),
        _ => Err(mismatch(value, type_id)),
    }
}

fn as_text(value: &SqlValue, type_id: TypeId) -> Result<Cow<'_, str>, TypeError> {
    match value {
        SqlValue::String(s) => Ok(Cow::Borrowed(s.as_str())),
        SqlValue::Int(v) => Ok(Cow::Owned(v.to_string())),
        SqlValue::Decimal(n) => Ok(Cow::Owned(n.to_string())),
        SqlValue::Guid(g) => Ok(Cow::Owned(g.to_string())),
        _ => Err(mismatch(value, type_id)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::decode_bytes;
    use chrono::NaiveDate;

    const LATIN1: &encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

    fn narrow() -> StringMode {
        StringMode::narrow(LATIN1)
    }

    #[test]
    fn test_intn_framing() {
        let info = TypeInfo::with_length(TypeId::IntN, 4);
        let bytes = encode_param_value(&SqlValue::Int(-2), &info, TdsVersion::V7_0, narrow())
            .unwrap();
        assert_eq!(&bytes[..], &[4, 0xFE, 0xFF, 0xFF, 0xFF]);

        let bytes =
            encode_param_value(&SqlValue::Null, &info, TdsVersion::V7_0, narrow()).unwrap();
        assert_eq!(&bytes[..], &[0]);
    }

    #[test]
    fn test_out_of_range_int() {
        let info = TypeInfo::with_length(TypeId::IntN, 2);
        assert!(matches!(
            encode_param_value(&SqlValue::Int(70_000), &info, TdsVersion::V7_0, narrow()),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_fixed_type_rejects_null() {
        let info = TypeInfo::new(TypeId::Int4);
        assert!(matches!(
            encode_row_value(&SqlValue::Null, &info, TdsVersion::V4_2, narrow()),
            Err(TypeError::UnexpectedNull)
        ));
    }

    #[test]
    fn test_nvarchar_null_and_value() {
        let info = TypeInfo::with_length(TypeId::NVarChar, 8000);
        let bytes =
            encode_param_value(&SqlValue::Null, &info, TdsVersion::V7_0, narrow()).unwrap();
        assert_eq!(&bytes[..], &[0xFF, 0xFF]);

        let bytes = encode_param_value(&"ab".into(), &info, TdsVersion::V7_0, narrow()).unwrap();
        assert_eq!(&bytes[..], &[4, 0, b'a', 0, b'b', 0]);
    }

    #[test]
    fn test_legacy_empty_varchar_sent_as_blank() {
        let info = TypeInfo::with_length(TypeId::VarChar, 255);
        let bytes = encode_param_value(&"".into(), &info, TdsVersion::V4_2, narrow()).unwrap();
        assert_eq!(&bytes[..], &[1, b' ']);
        let value = decode_bytes(bytes, &info, TdsVersion::V4_2, LATIN1).unwrap();
        assert_eq!(value, SqlValue::String(String::new()));
    }

    #[test]
    fn test_blob_framing_by_context() {
        let info = TypeInfo::new(TypeId::Image);
        let value = SqlValue::Binary(Bytes::from_static(b"xyz"));

        let row = encode_row_value(&value, &info, TdsVersion::V5_0, narrow()).unwrap();
        assert_eq!(row.len(), 1 + 16 + 8 + 4 + 3);
        assert_eq!(row[0], 16);

        let param = encode_param_value(&value, &info, TdsVersion::V5_0, narrow()).unwrap();
        assert_eq!(&param[..], &[3, 0, 0, 0, b'x', b'y', b'z']);

        let null = encode_param_value(&SqlValue::Null, &info, TdsVersion::V5_0, narrow()).unwrap();
        assert_eq!(&null[..], &[0xFF, 0xFF, 0xFF, 0xFF]);
        let null = encode_row_value(&SqlValue::Null, &info, TdsVersion::V5_0, narrow()).unwrap();
        assert_eq!(&null[..], &[0]);
    }

    #[test]
    fn test_decimal_wire_len() {
        assert_eq!(decimal_wire_len(9, TdsVersion::V7_0), 4);
        assert_eq!(decimal_wire_len(38, TdsVersion::V7_0), 16);
        assert_eq!(decimal_wire_len(2, TdsVersion::V5_0), 1);
        assert_eq!(decimal_wire_len(10, TdsVersion::V5_0), 5);
        assert_eq!(decimal_wire_len(38, TdsVersion::V4_2), 16);
    }

    #[test]
    fn test_decimal_round_trip_each_version() {
        let value = SqlValue::Decimal(Numeric::new(-1_234_567, 3));
        for version in [TdsVersion::V4_2, TdsVersion::V5_0, TdsVersion::V7_0, TdsVersion::V8_0] {
            let info = type_info_for(&value, version).unwrap();
            let bytes = encode_row_value(&value, &info, version, narrow()).unwrap();
            assert_eq!(decode_bytes(bytes, &info, version, LATIN1).unwrap(), value);
        }
    }

    #[test]
    fn test_decimal_precision_overflow() {
        let info = TypeInfo::decimal(TypeId::NumericN, 3, 0);
        let value = SqlValue::Decimal(Numeric::new(1000, 0));
        assert!(matches!(
            encode_row_value(&value, &info, TdsVersion::V7_0, narrow()),
            Err(TypeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_money_split() {
        let info = TypeInfo::new(TypeId::Money);
        let value = SqlValue::Decimal(Numeric::from_money(-1));
        let bytes = encode_row_value(&value, &info, TdsVersion::V7_0, narrow()).unwrap();
        assert_eq!(&bytes[..], &[0xFF; 8]);
    }

    #[test]
    fn test_type_info_for() {
        assert_eq!(
            type_info_for(&SqlValue::Int(1), TdsVersion::V7_0).unwrap().max_length,
            4
        );
        assert_eq!(
            type_info_for(&SqlValue::Int(i64::MAX), TdsVersion::V8_0)
                .unwrap()
                .max_length,
            8
        );
        assert!(type_info_for(&SqlValue::Int(i64::MAX), TdsVersion::V7_0).is_err());
        assert_eq!(
            type_info_for(&SqlValue::Bool(true), TdsVersion::V4_2).unwrap().type_id,
            TypeId::Bit
        );
        assert_eq!(
            type_info_for(&"x".into(), TdsVersion::V5_0).unwrap().type_id,
            TypeId::VarChar
        );
        assert_eq!(
            type_info_for(&"x".repeat(300).into(), TdsVersion::V5_0)
                .unwrap()
                .type_id,
            TypeId::Text
        );
        let nv = type_info_for(&"x".into(), TdsVersion::V8_0).unwrap();
        assert_eq!(nv.type_id, TypeId::NVarChar);
        assert!(nv.collation.is_some());
    }

    #[test]
    fn test_datetime_round_trip() {
        let dt = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 990)
            .unwrap();
        let value = SqlValue::DateTime(dt);
        let info = type_info_for(&value, TdsVersion::V5_0).unwrap();
        let bytes = encode_param_value(&value, &info, TdsVersion::V5_0, narrow()).unwrap();
        assert_eq!(bytes[0], 8);
        assert_eq!(
            decode_bytes(bytes, &info, TdsVersion::V5_0, LATIN1).unwrap(),
            value
        );
    }

    #[test]
    fn test_variant_not_encodable() {
        let info = TypeInfo::new(TypeId::Variant);
        assert!(matches!(
            encode_param_value(&SqlValue::Int(1), &info, TdsVersion::V8_0, narrow()),
            Err(TypeError::UnsupportedConversion { .. })
        ));
    }
}
