//! Stored-procedure call encoding.
//!
//! TDS 4.2, 7.0 and 8.0 send an RPC packet (type 0x03):
//!
//! ```text
//! proc name    b_varchar (4.2) / us_varchar (7.x)
//! options      u16
//! parameters   name (b_varchar), status (u8), TYPE_INFO, value
//! ```
//!
//! TDS 5.0 has no RPC packet; a DBRPC token followed by PARAMFMT and PARAMS
//! tokens travels in a normal (0x0F) packet instead.
//!
//! Parameter values arrive already encoded (length prefix included) so this
//! crate stays independent of the value layer.

use bitflags::bitflags;
use bytes::Bytes;

use crate::codec::{MessageWriter, StringMode, TdsWrite};
use crate::column::{ColumnInfo, FormatKind, TypeInfo, encode_format};
use crate::error::ProtocolError;
use crate::packet::PacketType;
use crate::token::{TokenType, write_framed};
use crate::version::TdsVersion;

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptions: u16 {
        /// Recompile the procedure before running it.
        const WITH_RECOMPILE = 0x0001;
        /// Server may omit column metadata.
        const NO_METADATA = 0x0002;
    }
}

/// DBRPC option announcing that parameters follow.
const DBRPC_HAS_PARAMS: u16 = 0x0002;

/// Parameter status bit for output parameters.
pub const PARAM_OUTPUT: u8 = 0x01;

/// One procedure parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParam {
    /// Parameter name including the `@`, or empty for positional.
    pub name: String,
    /// Whether the server should return the final value.
    pub is_output: bool,
    /// Declared wire type.
    pub type_info: TypeInfo,
    /// Encoded value, including its length prefix.
    pub value: Bytes,
}

impl RpcParam {
    /// Create an input parameter.
    pub fn new(name: impl Into<String>, type_info: TypeInfo, value: Bytes) -> Self {
        Self {
            name: name.into(),
            is_output: false,
            type_info,
            value,
        }
    }

    /// Mark the parameter as output.
    #[must_use]
    pub fn as_output(mut self) -> Self {
        self.is_output = true;
        self
    }

    fn status(&self) -> u8 {
        if self.is_output { PARAM_OUTPUT } else { 0 }
    }

    fn format(&self) -> ColumnInfo {
        ColumnInfo {
            is_output: self.is_output,
            ..ColumnInfo::new(self.name.clone(), self.type_info)
        }
    }
}

/// A stored-procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Procedure name.
    pub proc_name: String,
    /// Option flags.
    pub options: RpcOptions,
    /// Parameters in call order.
    pub params: Vec<RpcParam>,
}

impl RpcRequest {
    /// Call the named procedure.
    pub fn new(proc_name: impl Into<String>) -> Self {
        Self {
            proc_name: proc_name.into(),
            options: RpcOptions::empty(),
            params: Vec::new(),
        }
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Packet type that carries this request in `version`.
    #[must_use]
    pub fn packet_type(version: TdsVersion) -> PacketType {
        if version == TdsVersion::V5_0 {
            PacketType::Normal
        } else {
            PacketType::Rpc
        }
    }

    /// Encode the request payload.
    ///
    /// `mode` is the connection string mode; TDS 7.x always uses UCS-2.
    pub fn encode(&self, version: TdsVersion, mode: StringMode) -> Result<Bytes, ProtocolError> {
        let mode = if version.uses_unicode() {
            StringMode::unicode()
        } else {
            mode
        };
        let mut w = MessageWriter::new(mode);
        match version {
            TdsVersion::V5_0 => self.encode_dbrpc(&mut w)?,
            _ => self.encode_rpc(&mut w, version)?,
        }
        Ok(w.freeze())
    }

    fn encode_rpc(&self, w: &mut MessageWriter, version: TdsVersion) -> Result<(), ProtocolError> {
        if version.uses_unicode() {
            w.write_us_varchar(&self.proc_name)?;
        } else {
            w.write_b_varchar(&self.proc_name)?;
        }
        w.write_u16(self.options.bits())?;
        for param in &self.params {
            w.write_b_varchar(&param.name)?;
            w.write_u8(param.status())?;
            param.type_info.encode(w, version)?;
            w.write_slice(&param.value)?;
        }
        Ok(())
    }

    fn encode_dbrpc(&self, w: &mut MessageWriter) -> Result<(), ProtocolError> {
        let mut body = MessageWriter::new(w.string_mode()).with_byte_order(w.byte_order());
        body.write_b_varchar(&self.proc_name)?;
        let options = if self.params.is_empty() {
            0
        } else {
            DBRPC_HAS_PARAMS
        };
        body.write_u16(options)?;

        w.write_u8(TokenType::DbRpc as u8)?;
        write_framed(w, &body.freeze())?;

        if self.params.is_empty() {
            return Ok(());
        }

        let formats: Vec<ColumnInfo> = self.params.iter().map(RpcParam::format).collect();
        encode_format(w, &formats, FormatKind::Param)?;
        w.write_u8(TokenType::Params as u8)?;
        for param in &self.params {
            w.write_slice(&param.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{SliceReader, TdsRead};
    use crate::column::decode_format;
    use crate::types::TypeId;

    fn int_param(name: &str, v: i32) -> RpcParam {
        let mut value = vec![4u8];
        value.extend_from_slice(&v.to_le_bytes());
        RpcParam::new(name, TypeInfo::with_length(TypeId::IntN, 4), Bytes::from(value))
    }

    #[test]
    fn test_rpc_70_layout() {
        let req = RpcRequest::new("sp_who").param(int_param("@id", 7).as_output());
        let bytes = req.encode(TdsVersion::V7_0, StringMode::default()).unwrap();

        let mut r = SliceReader::new(bytes, StringMode::unicode());
        assert_eq!(r.read_us_varchar().unwrap(), "sp_who");
        assert_eq!(r.read_u16().unwrap(), 0);
        assert_eq!(r.read_b_varchar().unwrap(), "@id");
        assert_eq!(r.read_u8().unwrap(), PARAM_OUTPUT);
        let info = TypeInfo::decode(&mut r, TdsVersion::V7_0).unwrap();
        assert_eq!(info.type_id, TypeId::IntN);
        assert_eq!(r.read_u8().unwrap(), 4);
        assert_eq!(r.read_i32().unwrap(), 7);
        assert!(r.is_empty());
    }

    #[test]
    fn test_rpc_42_uses_narrow_names() {
        let req = RpcRequest::new("sp_help");
        let bytes = req.encode(TdsVersion::V4_2, StringMode::default()).unwrap();
        assert_eq!(bytes[0], 7);
        assert_eq!(&bytes[1..8], b"sp_help");
        assert_eq!(&bytes[8..], &[0, 0]);
        assert_eq!(RpcRequest::packet_type(TdsVersion::V4_2), PacketType::Rpc);
    }

    #[test]
    fn test_dbrpc_without_params() {
        let bytes = RpcRequest::new("sp_who")
            .encode(TdsVersion::V5_0, StringMode::default())
            .unwrap();
        assert_eq!(bytes[0], TokenType::DbRpc as u8);
        let mut r = SliceReader::new(bytes.slice(1..), StringMode::default());
        let len = r.read_u16().unwrap();
        assert_eq!(len, 1 + 6 + 2);
        assert_eq!(r.read_b_varchar().unwrap(), "sp_who");
        assert_eq!(r.read_u16().unwrap(), 0);
        assert!(r.is_empty());
        assert_eq!(RpcRequest::packet_type(TdsVersion::V5_0), PacketType::Normal);
    }

    #[test]
    fn test_dbrpc_with_params() {
        let req = RpcRequest::new("sp_add").param(int_param("@a", 1));
        let bytes = req.encode(TdsVersion::V5_0, StringMode::default()).unwrap();

        let mut r = SliceReader::new(bytes, StringMode::default());
        assert_eq!(r.read_u8().unwrap(), TokenType::DbRpc as u8);
        let len = usize::from(r.read_u16().unwrap());
        let mut body = r.read_framed(len).unwrap();
        assert_eq!(body.read_b_varchar().unwrap(), "sp_add");
        assert_eq!(body.read_u16().unwrap(), DBRPC_HAS_PARAMS);

        assert_eq!(r.read_u8().unwrap(), TokenType::ParamFmt as u8);
        let formats = decode_format(&mut r, FormatKind::Param).unwrap();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].name, "@a");

        assert_eq!(r.read_u8().unwrap(), TokenType::Params as u8);
        assert_eq!(r.read_u8().unwrap(), 4);
        assert_eq!(r.read_i32().unwrap(), 1);
        assert!(r.is_empty());
    }
}
