//! TDS data type definitions.
//!
//! The set of type tags is closed: any byte outside [`TypeId`] is a fatal
//! decode error. [`TypeId::length_prefix`] is the lookup table that tells a
//! decoder how a value of each type is framed on the wire.

use crate::error::ProtocolError;

/// TDS data type identifiers.
///
/// These correspond to the type bytes sent in column metadata and parameter definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length types (no length prefix)
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer (tinyint).
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer (TDS 8.0).
    Int8 = 0x7F,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,

    // Byte-length-prefixed types
    /// Unique identifier (GUID).
    Guid = 0x24,
    /// Variable-width integer.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Variable-width bit.
    BitN = 0x68,
    /// Nullable decimal.
    DecimalN = 0x6A,
    /// Nullable numeric.
    NumericN = 0x6C,
    /// Variable-width float.
    FloatN = 0x6D,
    /// Variable-width money.
    MoneyN = 0x6E,
    /// Variable-width datetime.
    DateTimeN = 0x6F,
    /// Fixed-length character.
    Char = 0x2F,
    /// Variable-length character.
    VarChar = 0x27,
    /// Fixed-length binary.
    Binary = 0x2D,
    /// Variable-length binary.
    VarBinary = 0x25,

    // Two-byte-length-prefixed types (TDS 7.0+)
    /// Large variable-length character.
    BigVarChar = 0xA7,
    /// Large variable-length binary.
    BigVarBinary = 0xA5,
    /// Large fixed-length character.
    BigChar = 0xAF,
    /// Large fixed-length binary.
    BigBinary = 0xAD,
    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,

    // Four-byte-length-prefixed blob types
    /// Text.
    Text = 0x23,
    /// Image.
    Image = 0x22,
    /// Unicode text.
    NText = 0x63,
    /// SQL variant (TDS 8.0).
    Variant = 0x62,
}

/// How a value of a given type is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    /// No length prefix; the value always has this many bytes.
    Fixed(usize),
    /// One length byte; 0 marks NULL.
    Byte,
    /// Two length bytes; 0xFFFF marks NULL.
    UShort,
    /// Text-pointer presence byte followed by a four-byte length.
    Blob,
    /// Four length bytes; 0 marks NULL.
    Long,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x1F => Some(Self::Null),
            0x30 => Some(Self::Int1),
            0x32 => Some(Self::Bit),
            0x34 => Some(Self::Int2),
            0x38 => Some(Self::Int4),
            0x7F => Some(Self::Int8),
            0x3B => Some(Self::Float4),
            0x3E => Some(Self::Float8),
            0x3C => Some(Self::Money),
            0x7A => Some(Self::Money4),
            0x3D => Some(Self::DateTime),
            0x3A => Some(Self::DateTime4),
            0x24 => Some(Self::Guid),
            0x26 => Some(Self::IntN),
            0x37 => Some(Self::Decimal),
            0x3F => Some(Self::Numeric),
            0x68 => Some(Self::BitN),
            0x6A => Some(Self::DecimalN),
            0x6C => Some(Self::NumericN),
            0x6D => Some(Self::FloatN),
            0x6E => Some(Self::MoneyN),
            0x6F => Some(Self::DateTimeN),
            0x2F => Some(Self::Char),
            0x27 => Some(Self::VarChar),
            0x2D => Some(Self::Binary),
            0x25 => Some(Self::VarBinary),
            0xA7 => Some(Self::BigVarChar),
            0xA5 => Some(Self::BigVarBinary),
            0xAF => Some(Self::BigChar),
            0xAD => Some(Self::BigBinary),
            0xEF => Some(Self::NChar),
            0xE7 => Some(Self::NVarChar),
            0x23 => Some(Self::Text),
            0x22 => Some(Self::Image),
            0x63 => Some(Self::NText),
            0x62 => Some(Self::Variant),
            _ => None,
        }
    }

    /// Like [`TypeId::from_u8`] but reports an unknown tag as a protocol error.
    pub fn try_from_u8(value: u8) -> Result<Self, ProtocolError> {
        Self::from_u8(value).ok_or(ProtocolError::UnknownDataType(value))
    }

    /// Framing of this type's values.
    #[must_use]
    pub const fn length_prefix(&self) -> LengthPrefix {
        match self.fixed_size() {
            Some(size) => LengthPrefix::Fixed(size),
            None => match self {
                Self::BigVarChar
                | Self::BigVarBinary
                | Self::BigChar
                | Self::BigBinary
                | Self::NChar
                | Self::NVarChar => LengthPrefix::UShort,
                Self::Text | Self::Image | Self::NText => LengthPrefix::Blob,
                Self::Variant => LengthPrefix::Long,
                _ => LengthPrefix::Byte,
            },
        }
    }

    /// Check if this is a fixed-length type.
    #[must_use]
    pub const fn is_fixed_length(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Check if this is a text, ntext or image blob.
    #[must_use]
    pub const fn is_blob(&self) -> bool {
        matches!(self, Self::Text | Self::Image | Self::NText)
    }

    /// Check if this is a Unicode type.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if this type carries single-byte character data.
    #[must_use]
    pub const fn is_character(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::BigChar | Self::BigVarChar | Self::Text
        )
    }

    /// Check if this type carries a collation in TDS 8.0 metadata.
    #[must_use]
    pub const fn is_collated(&self) -> bool {
        self.is_character() || self.is_unicode()
    }

    /// Check if this is a decimal or numeric type.
    #[must_use]
    pub const fn is_decimal(&self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Numeric | Self::DecimalN | Self::NumericN
        )
    }

    /// Check if this is a date/time type.
    #[must_use]
    pub const fn is_datetime(&self) -> bool {
        matches!(self, Self::DateTime | Self::DateTime4 | Self::DateTimeN)
    }

    /// Get the fixed size of this type in bytes, if applicable.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 => Some(1),
            Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 => Some(4),
            Self::Int8 => Some(8),
            Self::Float4 => Some(4),
            Self::Float8 => Some(8),
            Self::Money => Some(8),
            Self::Money4 => Some(4),
            Self::DateTime => Some(8),
            Self::DateTime4 => Some(4),
            _ => None,
        }
    }

    /// Display name used in logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int1 => "tinyint",
            Self::Bit | Self::BitN => "bit",
            Self::Int2 => "smallint",
            Self::Int4 => "int",
            Self::Int8 => "bigint",
            Self::IntN => "intn",
            Self::Float4 => "real",
            Self::Float8 | Self::FloatN => "float",
            Self::Money | Self::MoneyN => "money",
            Self::Money4 => "smallmoney",
            Self::DateTime | Self::DateTimeN => "datetime",
            Self::DateTime4 => "smalldatetime",
            Self::Guid => "uniqueidentifier",
            Self::Decimal | Self::DecimalN => "decimal",
            Self::Numeric | Self::NumericN => "numeric",
            Self::Char | Self::BigChar => "char",
            Self::VarChar | Self::BigVarChar => "varchar",
            Self::Binary | Self::BigBinary => "binary",
            Self::VarBinary | Self::BigVarBinary => "varbinary",
            Self::NChar => "nchar",
            Self::NVarChar => "nvarchar",
            Self::Text => "text",
            Self::Image => "image",
            Self::NText => "ntext",
            Self::Variant => "sql_variant",
        }
    }
}

/// Column flags from column metadata.
///
/// TDS 7.0/8.0 carry a two-byte flags field; legacy formats carry a status
/// byte with the same low bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Column is nullable.
    pub nullable: bool,
    /// Column allows case-sensitive comparison.
    pub case_sensitive: bool,
    /// Column is updateable.
    pub updateable: Updateable,
    /// Column is an identity (auto-increment) column.
    pub identity: bool,
}

/// Update mode for a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Updateable {
    /// Column is read-only.
    #[default]
    ReadOnly,
    /// Column is read-write.
    ReadWrite,
    /// Updateability unknown.
    Unknown,
}

impl ColumnFlags {
    /// Parse column flags from the flags field.
    #[must_use]
    pub fn from_bits(flags: u16) -> Self {
        Self {
            nullable: (flags & 0x0001) != 0,
            case_sensitive: (flags & 0x0002) != 0,
            updateable: match (flags >> 2) & 0x03 {
                0 => Updateable::ReadOnly,
                1 => Updateable::ReadWrite,
                _ => Updateable::Unknown,
            },
            identity: (flags & 0x0010) != 0,
        }
    }

    /// Convert flags back to bits.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        let mut flags = 0u16;
        if self.nullable {
            flags |= 0x0001;
        }
        if self.case_sensitive {
            flags |= 0x0002;
        }
        flags |= match self.updateable {
            Updateable::ReadOnly => 0,
            Updateable::ReadWrite => 1 << 2,
            Updateable::Unknown => 2 << 2,
        };
        if self.identity {
            flags |= 0x0010;
        }
        flags
    }

    /// Whether the column cannot be written through an updateable cursor.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.updateable == Updateable::ReadOnly
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(0x38), Some(TypeId::Int4));
        assert_eq!(TypeId::from_u8(0xE7), Some(TypeId::NVarChar));
        assert_eq!(TypeId::from_u8(0x99), None);
        assert_eq!(
            TypeId::try_from_u8(0x99).unwrap_err(),
            ProtocolError::UnknownDataType(0x99)
        );
    }

    #[test]
    fn test_length_prefix_table() {
        assert_eq!(TypeId::Int4.length_prefix(), LengthPrefix::Fixed(4));
        assert_eq!(TypeId::Null.length_prefix(), LengthPrefix::Fixed(0));
        assert_eq!(TypeId::IntN.length_prefix(), LengthPrefix::Byte);
        assert_eq!(TypeId::VarChar.length_prefix(), LengthPrefix::Byte);
        assert_eq!(TypeId::NVarChar.length_prefix(), LengthPrefix::UShort);
        assert_eq!(TypeId::Text.length_prefix(), LengthPrefix::Blob);
        assert_eq!(TypeId::Image.length_prefix(), LengthPrefix::Blob);
        assert_eq!(TypeId::Variant.length_prefix(), LengthPrefix::Long);
    }

    #[test]
    fn test_every_known_tag_round_trips() {
        for byte in 0..=u8::MAX {
            if let Some(ty) = TypeId::from_u8(byte) {
                assert_eq!(ty as u8, byte);
            }
        }
    }

    #[test]
    fn test_column_flags_roundtrip() {
        let flags = ColumnFlags {
            nullable: true,
            identity: true,
            updateable: Updateable::ReadWrite,
            ..Default::default()
        };
        let restored = ColumnFlags::from_bits(flags.to_bits());
        assert_eq!(flags, restored);
        assert!(!restored.is_read_only());
    }
}
