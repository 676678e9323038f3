//! # tds-protocol
//!
//! Wire formats of the Tabular Data Stream protocol spoken by Sybase SQL
//! Server and Microsoft SQL Server, for protocol versions 4.2, 5.0, 7.0 and
//! 8.0.
//!
//! The crate is IO-agnostic. Structures are decoded from anything that
//! implements [`TdsRead`] and encoded into anything that implements
//! [`TdsWrite`]; the blocking packet transport in `tds-codec` implements
//! both on top of a socket, and [`SliceReader`] / [`MessageWriter`] do so
//! over memory.
//!
//! ## Example
//!
//! ```rust
//! use tds_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::Query, PacketStatus::END_OF_MESSAGE, 100);
//! assert_eq!(header.payload_length(), 92);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod charset;
pub mod codec;
pub mod column;
pub mod error;
pub mod login;
pub mod login70;
pub mod packet;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use charset::Collation;
pub use codec::{ByteOrder, MessageWriter, SliceReader, StringMode, TdsRead, TdsWrite};
pub use column::{ColumnInfo, FormatKind, TypeInfo};
pub use error::ProtocolError;
pub use login::LegacyLogin;
pub use login70::{Login70, OptionFlags1, OptionFlags2, TypeFlags};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use rpc::{RpcOptions, RpcParam, RpcRequest};
pub use sql_batch::{batch_packet_type, encode_sql_batch};
pub use token::{
    Done, DoneKind, DoneStatus, EnvChange, LoginAck, OP_SELECT, ServerMessage, TokenType,
};
pub use types::{ColumnFlags, LengthPrefix, TypeId, Updateable};
pub use version::TdsVersion;
