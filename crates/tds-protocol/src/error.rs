//! Protocol-level error type.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
///
/// Every variant describes a violation of the wire format. A session that
/// observes one of these cannot resynchronize with the server and must be
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Packet type byte is not one of the known packet types.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet type is known but not legal in this direction.
    #[error("unexpected packet type from server: 0x{0:02X}")]
    UnexpectedPacketType(u8),

    /// Packet status byte carries unknown bits.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Declared packet length is smaller than the header or larger than allowed.
    #[error("invalid packet length {length} (allowed {min}..={max})")]
    InvalidPacketLength {
        /// Declared length.
        length: usize,
        /// Smallest legal length.
        min: usize,
        /// Largest legal length.
        max: usize,
    },

    /// Not enough bytes to finish a structure.
    #[error("incomplete packet: expected {expected} bytes, have {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The byte stream ended in the middle of a token.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Token tag is not recognized.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// Data type tag is outside the closed set of known types.
    #[error("unknown data type: 0x{0:02X}")]
    UnknownDataType(u8),

    /// A length field inside a token is inconsistent with its contents.
    #[error("length mismatch in {context}: declared {declared}, consumed {consumed}")]
    LengthMismatch {
        /// Structure being decoded.
        context: &'static str,
        /// Declared length.
        declared: usize,
        /// Bytes actually consumed.
        consumed: usize,
    },

    /// A value has a length that its type does not allow.
    #[error("invalid length {length} for {type_name}")]
    InvalidValueLength {
        /// Type being decoded.
        type_name: &'static str,
        /// Offending length.
        length: usize,
    },

    /// A value decoded to something its type cannot represent.
    #[error("invalid {type_name} value: {reason}")]
    InvalidValue {
        /// Type being decoded.
        type_name: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// A row arrived before any column metadata.
    #[error("row received without column metadata")]
    MissingColumnMetadata,

    /// Environment change carried a value that could not be applied.
    #[error("invalid environment change: {0}")]
    InvalidEnvChange(String),

    /// String data could not be decoded.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// A structure was requested for a protocol version that lacks it.
    #[error("{context} is not available in {version}")]
    UnsupportedVersion {
        /// Version that was requested.
        version: String,
        /// Structure being built.
        context: &'static str,
    },

    /// A value is too large for the field that must carry it.
    #[error("value too large for {field}: {len} > {max}")]
    ValueTooLarge {
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum length.
        max: usize,
    },
}
