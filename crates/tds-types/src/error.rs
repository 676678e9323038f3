//! Errors from converting between wire values and Rust values.

use tds_protocol::ProtocolError;
use thiserror::Error;

/// A value could not be encoded, decoded or converted.
#[derive(Debug, Error)]
pub enum TypeError {
    /// NULL where the target type has no null.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// The value's SQL type does not convert to the requested Rust type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested Rust type.
        expected: &'static str,
        /// SQL type of the value.
        actual: String,
    },

    /// The value does not fit the target.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type.
        target_type: &'static str,
    },

    /// Date outside the range of the column's date type.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// Decimal that cannot be represented at the column's precision.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Value does not fit the declared size and would be truncated.
    #[error("value truncated: {0}")]
    Truncation(String),

    /// No conversion exists between the two types.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// SQL type converted from.
        from: String,
        /// Target type.
        to: &'static str,
    },

    /// Encoding the value violated the wire format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
