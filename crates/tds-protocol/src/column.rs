//! Column metadata.
//!
//! Result-set shape arrives in one of three layouts depending on the
//! protocol version:
//!
//! - TDS 7.0/8.0: a single COLMETADATA token (`0x81`) with counted columns.
//! - TDS 4.2: a COLNAME token (`0xA0`) listing names, then a COLFMT token
//!   (`0xA1`) with one format per name.
//! - TDS 5.0: a ROWFMT token (`0xEE`); parameters use PARAMFMT (`0xEC`).
//!
//! All three build the same [`ColumnInfo`] sequence. The legacy layouts are
//! length-prefixed and the declared length must match exactly what the
//! columns consume.

use encoding_rs::Encoding;

use crate::charset::Collation;
use crate::codec::{MessageWriter, SliceReader, TdsRead, TdsWrite};
use crate::error::ProtocolError;
use crate::token::{TokenType, write_framed};
use crate::types::{ColumnFlags, LengthPrefix, TypeId, Updateable};
use crate::version::TdsVersion;

/// Column count marking "no metadata" in a COLMETADATA token.
pub const NO_METADATA: u16 = 0xFFFF;

/// Wire type of a column or parameter and its type-specific attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// Type tag.
    pub type_id: TypeId,
    /// Declared maximum size in bytes.
    pub max_length: u32,
    /// Precision of decimal/numeric types.
    pub precision: u8,
    /// Scale of decimal/numeric types.
    pub scale: u8,
    /// Collation of character types (TDS 8.0 only).
    pub collation: Option<Collation>,
}

impl TypeInfo {
    /// Type info with the natural size of a type and no attributes.
    #[must_use]
    pub fn new(type_id: TypeId) -> Self {
        let max_length = match type_id.length_prefix() {
            LengthPrefix::Fixed(n) => n as u32,
            LengthPrefix::Byte => 255,
            LengthPrefix::UShort => 8000,
            LengthPrefix::Blob | LengthPrefix::Long => 0x7FFF_FFFF,
        };
        Self {
            type_id,
            max_length,
            precision: 0,
            scale: 0,
            collation: None,
        }
    }

    /// Type info with an explicit size.
    #[must_use]
    pub fn with_length(type_id: TypeId, max_length: u32) -> Self {
        Self {
            max_length,
            ..Self::new(type_id)
        }
    }

    /// Decimal type info.
    #[must_use]
    pub fn decimal(type_id: TypeId, precision: u8, scale: u8) -> Self {
        Self {
            max_length: u32::from(decimal_storage_size(precision)),
            precision,
            scale,
            ..Self::new(type_id)
        }
    }

    /// Decode a type tag and its attributes.
    ///
    /// Blob table names are not part of the type info; column decoders read
    /// them separately.
    pub fn decode<R: TdsRead>(src: &mut R, version: TdsVersion) -> Result<Self, R::Error> {
        let tag = src.read_u8()?;
        let type_id = TypeId::try_from_u8(tag)?;
        let mut info = Self::new(type_id);

        match type_id.length_prefix() {
            LengthPrefix::Fixed(_) => {}
            LengthPrefix::Byte => {
                info.max_length = u32::from(src.read_u8()?);
                if type_id.is_decimal() {
                    info.precision = src.read_u8()?;
                    info.scale = src.read_u8()?;
                }
            }
            LengthPrefix::UShort => {
                info.max_length = u32::from(src.read_u16()?);
            }
            LengthPrefix::Blob | LengthPrefix::Long => {
                info.max_length = src.read_u32()?;
            }
        }

        if version.has_collations() && type_id.is_collated() {
            let mut raw = [0u8; Collation::WIRE_SIZE];
            src.read_exact_into(&mut raw)?;
            info.collation = Some(Collation::from_bytes(&raw)?);
        }

        Ok(info)
    }

    /// Encode the type tag and its attributes.
    pub fn encode<W: TdsWrite>(&self, dst: &mut W, version: TdsVersion) -> Result<(), W::Error> {
        dst.write_u8(self.type_id as u8)?;
        match self.type_id.length_prefix() {
            LengthPrefix::Fixed(_) => {}
            LengthPrefix::Byte => {
                dst.write_u8(self.max_length.min(255) as u8)?;
                if self.type_id.is_decimal() {
                    dst.write_u8(self.precision)?;
                    dst.write_u8(self.scale)?;
                }
            }
            LengthPrefix::UShort => {
                dst.write_u16(self.max_length.min(u32::from(u16::MAX)) as u16)?;
            }
            LengthPrefix::Blob | LengthPrefix::Long => {
                dst.write_u32(self.max_length)?;
            }
        }

        if version.has_collations() && self.type_id.is_collated() {
            let collation = self.collation.unwrap_or_default();
            dst.write_slice(&collation.to_bytes())?;
        }
        Ok(())
    }

    /// Code page for single-byte data of this type.
    ///
    /// Uses the column collation when present, otherwise `fallback`
    /// (the connection character set).
    #[must_use]
    pub fn encoding(&self, fallback: &'static Encoding) -> &'static Encoding {
        match self.collation {
            Some(collation) if collation.lcid != 0 || collation.sort_id != 0 => {
                collation.encoding()
            }
            _ => fallback,
        }
    }
}

/// Bytes needed to store the magnitude of a decimal of `precision` digits.
///
/// The returned size includes the sign byte.
#[must_use]
pub const fn decimal_storage_size(precision: u8) -> u8 {
    match precision {
        0..=9 => 5,
        10..=19 => 9,
        20..=28 => 13,
        _ => 17,
    }
}

/// Description of one result-set column or procedure parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Zero-based position in the result set.
    pub ordinal: usize,
    /// Column name; empty for unnamed expressions.
    pub name: String,
    /// Server user type.
    pub user_type: u32,
    /// Nullability, updateability and identity.
    pub flags: ColumnFlags,
    /// Wire type and attributes.
    pub type_info: TypeInfo,
    /// Source table of a text, ntext or image column.
    pub table_name: Option<String>,
    /// Output parameter (parameter formats only).
    pub is_output: bool,
    /// Hidden browse-mode key column.
    pub hidden: bool,
}

impl ColumnInfo {
    /// Create a nullable, read-only column.
    #[must_use]
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            ordinal: 0,
            name: name.into(),
            user_type: 0,
            flags: ColumnFlags {
                nullable: true,
                ..ColumnFlags::default()
            },
            type_info,
            table_name: None,
            is_output: false,
            hidden: false,
        }
    }

    /// Mark the column non-nullable.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.flags.nullable = false;
        self
    }

    /// Type tag.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_info.type_id
    }

    /// Declared size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.type_info.max_length
    }

    /// Decimal precision.
    #[must_use]
    pub fn precision(&self) -> u8 {
        self.type_info.precision
    }

    /// Decimal scale.
    #[must_use]
    pub fn scale(&self) -> u8 {
        self.type_info.scale
    }

    /// Whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.nullable
    }

    /// Whether the column is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.flags.is_read_only()
    }

    /// Whether the column is an identity (auto-increment) column.
    #[must_use]
    pub fn is_auto_increment(&self) -> bool {
        self.flags.identity
    }
}

fn number(mut columns: Vec<ColumnInfo>) -> Vec<ColumnInfo> {
    for (i, col) in columns.iter_mut().enumerate() {
        col.ordinal = i;
    }
    columns
}

fn read_table_name<R: TdsRead>(src: &mut R, type_id: TypeId) -> Result<Option<String>, R::Error> {
    if type_id.is_blob() {
        Ok(Some(src.read_us_varchar()?))
    } else {
        Ok(None)
    }
}

/// Decode a TDS 7.0/8.0 COLMETADATA body (tag already consumed).
///
/// Returns an empty list when the server sends the "no metadata" marker.
pub fn decode_col_metadata<R: TdsRead>(
    src: &mut R,
    version: TdsVersion,
) -> Result<Vec<ColumnInfo>, R::Error> {
    let count = src.read_u16()?;
    if count == NO_METADATA {
        return Ok(Vec::new());
    }

    let mut columns = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let user_type = u32::from(src.read_u16()?);
        let flags = ColumnFlags::from_bits(src.read_u16()?);
        let type_info = TypeInfo::decode(src, version)?;
        let table_name = read_table_name(src, type_info.type_id)?;
        let name = src.read_b_varchar()?;

        columns.push(ColumnInfo {
            ordinal: 0,
            name,
            user_type,
            flags,
            type_info,
            table_name,
            is_output: false,
            hidden: false,
        });
    }
    tracing::trace!(columns = columns.len(), "decoded column metadata");
    Ok(number(columns))
}

/// Encode a TDS 7.0/8.0 COLMETADATA token, tag included.
pub fn encode_col_metadata<W: TdsWrite>(
    dst: &mut W,
    columns: &[ColumnInfo],
    version: TdsVersion,
) -> Result<(), W::Error> {
    if columns.len() >= usize::from(NO_METADATA) {
        return Err(ProtocolError::ValueTooLarge {
            field: "column count",
            len: columns.len(),
            max: usize::from(NO_METADATA) - 1,
        }
        .into());
    }
    dst.write_u8(TokenType::ColMetaData as u8)?;
    dst.write_u16(columns.len() as u16)?;
    for col in columns {
        dst.write_u16(col.user_type as u16)?;
        dst.write_u16(col.flags.to_bits())?;
        col.type_info.encode(dst, version)?;
        if col.type_info.type_id.is_blob() {
            dst.write_us_varchar(col.table_name.as_deref().unwrap_or_default())?;
        }
        dst.write_b_varchar(&col.name)?;
    }
    Ok(())
}

/// Check that a framed legacy token was consumed exactly.
fn finish_framed(
    result: Result<(), ProtocolError>,
    body: &SliceReader,
    context: &'static str,
    declared: usize,
) -> Result<(), ProtocolError> {
    let consumed = declared - body.remaining();
    match result {
        // ran past the declared end
        Err(ProtocolError::UnexpectedEof) => Err(ProtocolError::LengthMismatch {
            context,
            declared,
            consumed: declared + 1,
        }),
        Err(e) => Err(e),
        Ok(()) if consumed != declared => Err(ProtocolError::LengthMismatch {
            context,
            declared,
            consumed,
        }),
        Ok(()) => Ok(()),
    }
}

/// Decode a legacy COLNAME body into a list of names.
pub fn decode_col_names<R: TdsRead>(src: &mut R) -> Result<Vec<String>, R::Error> {
    let len = usize::from(src.read_u16()?);
    let mut body = src.read_framed(len)?;
    let mut names = Vec::new();
    while !body.is_empty() {
        names.push(body.read_b_varchar()?);
    }
    Ok(names)
}

/// Decode a legacy COLFMT body, pairing formats with previously sent names.
///
/// When fewer names than formats were sent the extra columns are unnamed.
pub fn decode_col_fmt<R: TdsRead>(
    src: &mut R,
    names: &[String],
    count: usize,
    version: TdsVersion,
) -> Result<Vec<ColumnInfo>, R::Error> {
    let len = usize::from(src.read_u16()?);
    let mut body = src.read_framed(len)?;
    let mut columns = Vec::with_capacity(count);

    let result = (|| -> Result<(), ProtocolError> {
        for i in 0..count {
            let (user_type, flags) = if version == TdsVersion::V5_0 {
                (body.read_u32()?, None)
            } else {
                let user_type = u32::from(body.read_u16()?);
                (user_type, Some(ColumnFlags::from_bits(body.read_u16()?)))
            };
            let type_info = TypeInfo::decode(&mut body, version)?;
            let table_name = read_table_name(&mut body, type_info.type_id)?;
            let flags = flags.unwrap_or(ColumnFlags {
                nullable: !type_info.type_id.is_fixed_length(),
                ..ColumnFlags::default()
            });
            columns.push(ColumnInfo {
                ordinal: i,
                name: names.get(i).cloned().unwrap_or_default(),
                user_type,
                flags,
                type_info,
                table_name,
                is_output: false,
                hidden: false,
            });
        }
        Ok(())
    })();

    finish_framed(result, &body, "COLFMT", len)?;
    Ok(columns)
}

/// Status bits of a TDS 5.0 ROWFMT / PARAMFMT entry.
pub mod fmt_status {
    /// Parameter is an output parameter (PARAMFMT).
    pub const OUTPUT: u8 = 0x01;
    /// Hidden browse-mode column (ROWFMT).
    pub const HIDDEN: u8 = 0x01;
    /// Key column.
    pub const KEY: u8 = 0x02;
    /// Updatable column.
    pub const UPDATABLE: u8 = 0x10;
    /// Nullable column.
    pub const NULLABLE: u8 = 0x20;
    /// Identity column.
    pub const IDENTITY: u8 = 0x40;
}

/// Which list a TDS 5.0 format token describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Result-set columns (ROWFMT).
    Row,
    /// Procedure parameters (PARAMFMT).
    Param,
}

impl FormatKind {
    const fn token_type(self) -> TokenType {
        match self {
            Self::Row => TokenType::RowFmt,
            Self::Param => TokenType::ParamFmt,
        }
    }

    const fn context(self) -> &'static str {
        match self {
            Self::Row => "ROWFMT",
            Self::Param => "PARAMFMT",
        }
    }
}

/// Decode a TDS 5.0 ROWFMT or PARAMFMT body.
pub fn decode_format<R: TdsRead>(src: &mut R, kind: FormatKind) -> Result<Vec<ColumnInfo>, R::Error> {
    let len = usize::from(src.read_u16()?);
    let mut body = src.read_framed(len)?;
    let mut columns = Vec::new();

    let result = (|| -> Result<(), ProtocolError> {
        let count = body.read_u16()?;
        for i in 0..usize::from(count) {
            let name = body.read_b_varchar()?;
            let status = body.read_u8()?;
            let user_type = body.read_u32()?;
            let type_info = TypeInfo::decode(&mut body, TdsVersion::V5_0)?;
            let table_name = read_table_name(&mut body, type_info.type_id)?;
            let _locale = body.read_b_varchar()?;

            let flags = ColumnFlags {
                nullable: status & fmt_status::NULLABLE != 0,
                case_sensitive: false,
                updateable: if status & fmt_status::UPDATABLE != 0 {
                    Updateable::ReadWrite
                } else {
                    Updateable::ReadOnly
                },
                identity: status & fmt_status::IDENTITY != 0,
            };
            let (is_output, hidden) = match kind {
                FormatKind::Param => (status & fmt_status::OUTPUT != 0, false),
                FormatKind::Row => (false, status & fmt_status::HIDDEN != 0),
            };
            columns.push(ColumnInfo {
                ordinal: i,
                name,
                user_type,
                flags,
                type_info,
                table_name,
                is_output,
                hidden,
            });
        }
        Ok(())
    })();

    finish_framed(result, &body, kind.context(), len)?;
    Ok(columns)
}

/// Encode a TDS 5.0 ROWFMT or PARAMFMT token, tag included.
pub fn encode_format<W: TdsWrite>(
    dst: &mut W,
    columns: &[ColumnInfo],
    kind: FormatKind,
) -> Result<(), W::Error> {
    let mut body = MessageWriter::new(dst.string_mode()).with_byte_order(dst.byte_order());
    body.write_u16(columns.len() as u16)?;
    for col in columns {
        let mut status = 0u8;
        if col.flags.nullable {
            status |= fmt_status::NULLABLE;
        }
        match kind {
            FormatKind::Param if col.is_output => status |= fmt_status::OUTPUT,
            FormatKind::Row if col.hidden => status |= fmt_status::HIDDEN,
            _ => {}
        }
        if col.flags.identity {
            status |= fmt_status::IDENTITY;
        }
        body.write_b_varchar(&col.name)?;
        body.write_u8(status)?;
        body.write_u32(col.user_type)?;
        col.type_info.encode(&mut body, TdsVersion::V5_0)?;
        if col.type_info.type_id.is_blob() {
            body.write_us_varchar(col.table_name.as_deref().unwrap_or_default())?;
        }
        body.write_u8(0)?;
    }
    dst.write_u8(kind.token_type() as u8)?;
    write_framed(dst, &body.freeze())
}

/// Encode legacy COLNAME and COLFMT tokens, tags included.
pub fn encode_col_name_fmt<W: TdsWrite>(
    dst: &mut W,
    columns: &[ColumnInfo],
    version: TdsVersion,
) -> Result<(), W::Error> {
    let mut names = MessageWriter::new(dst.string_mode()).with_byte_order(dst.byte_order());
    for col in columns {
        names.write_b_varchar(&col.name)?;
    }
    dst.write_u8(TokenType::ColName as u8)?;
    write_framed(dst, &names.freeze())?;

    let mut fmt = MessageWriter::new(dst.string_mode()).with_byte_order(dst.byte_order());
    for col in columns {
        if version == TdsVersion::V5_0 {
            fmt.write_u32(col.user_type)?;
        } else {
            fmt.write_u16(col.user_type as u16)?;
            fmt.write_u16(col.flags.to_bits())?;
        }
        col.type_info.encode(&mut fmt, version)?;
        if col.type_info.type_id.is_blob() {
            fmt.write_us_varchar(col.table_name.as_deref().unwrap_or_default())?;
        }
    }
    dst.write_u8(TokenType::ColFmt as u8)?;
    write_framed(dst, &fmt.freeze())
}
