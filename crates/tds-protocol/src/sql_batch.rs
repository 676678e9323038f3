//! SQL batch request encoding.
//!
//! TDS 4.2 and 7.x send the SQL text as the whole payload of a query packet
//! (type 0x01), in the connection character set or UCS-2 respectively.
//! TDS 5.0 wraps the text in a LANGUAGE token inside a normal packet:
//!
//! ```text
//! 0x21  length (u32, text + 1)  status (u8)  text
//! ```

use bytes::Bytes;

use crate::codec::{MessageWriter, StringMode, TdsWrite, encode_narrow};
use crate::error::ProtocolError;
use crate::packet::PacketType;
use crate::token::TokenType;
use crate::version::TdsVersion;

/// Packet type that carries a batch in `version`.
#[must_use]
pub fn batch_packet_type(version: TdsVersion) -> PacketType {
    if version == TdsVersion::V5_0 {
        PacketType::Normal
    } else {
        PacketType::Query
    }
}

/// Encode a SQL batch payload.
///
/// `mode` is the connection string mode and only matters for legacy
/// versions.
///
/// # Example
///
/// ```
/// use tds_protocol::codec::StringMode;
/// use tds_protocol::sql_batch::encode_sql_batch;
/// use tds_protocol::version::TdsVersion;
///
/// let payload = encode_sql_batch("select 1", TdsVersion::V7_0, StringMode::default()).unwrap();
/// assert_eq!(payload.len(), 16);
/// ```
pub fn encode_sql_batch(
    sql: &str,
    version: TdsVersion,
    mode: StringMode,
) -> Result<Bytes, ProtocolError> {
    if version.uses_unicode() {
        let mut w = MessageWriter::new(StringMode::unicode());
        w.write_string(sql)?;
        return Ok(w.freeze());
    }

    let text = encode_narrow(sql, mode.encoding);
    let mut w = MessageWriter::new(mode);
    if version == TdsVersion::V5_0 {
        let len = u32::try_from(text.len() + 1).map_err(|_| ProtocolError::ValueTooLarge {
            field: "language text",
            len: text.len(),
            max: u32::MAX as usize - 1,
        })?;
        w.write_u8(TokenType::Language as u8)?;
        w.write_u32(len)?;
        w.write_u8(0)?;
    }
    w.write_slice(&text)?;
    Ok(w.freeze())
}
