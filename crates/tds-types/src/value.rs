//! SQL value representation.

use bytes::Bytes;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::numeric::Numeric;

/// A decoded column, return value or parameter.
///
/// The set of variants is closed: every wire type maps onto exactly one of
/// them, and NULL of any type is [`SqlValue::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL value.
    #[default]
    Null,
    /// Integer (TINYINT, SMALLINT, INT, BIGINT).
    Int(i64),
    /// Floating point (REAL, FLOAT).
    Float(f64),
    /// Fixed point (DECIMAL, NUMERIC, MONEY, SMALLMONEY).
    Decimal(Numeric),
    /// Boolean (BIT).
    Bool(bool),
    /// Date and time (DATETIME, SMALLDATETIME).
    DateTime(NaiveDateTime),
    /// Binary (BINARY, VARBINARY, IMAGE).
    Binary(Bytes),
    /// Character data (CHAR, VARCHAR, TEXT and the national variants).
    String(String),
    /// UNIQUEIDENTIFIER.
    Guid(Uuid),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as a bool, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an i64, if it is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an f64, if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Decimal(v) => Some(v.to_f64()),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as bytes, if it is binary.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Get the variant name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Int(_) => "INT",
            Self::Float(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::Bool(_) => "BIT",
            Self::DateTime(_) => "DATETIME",
            Self::Binary(_) => "VARBINARY",
            Self::String(_) => "VARCHAR",
            Self::Guid(_) => "UNIQUEIDENTIFIER",
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Numeric> for SqlValue {
    fn from(v: Numeric) -> Self {
        Self::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}
