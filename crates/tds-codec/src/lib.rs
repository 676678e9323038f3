//! # tds-codec
//!
//! Packet framing for the Tabular Data Stream protocol.
//!
//! Two front ends share the packet layout from `tds-protocol`:
//!
//! - [`PacketTransport`] is the blocking transport sessions run on. It
//!   streams values straight into fixed-size outgoing packets and reads
//!   values across incoming packet boundaries, implementing the
//!   `TdsRead`/`TdsWrite` traits so token and value decoders work on it
//!   directly.
//! - [`AsyncConnection`] frames packets over a tokio transport with
//!   [`TdsCodec`] and joins them into whole messages.
//!
//! ```text
//! socket → PacketTransport (packets ⇄ values) → token dispatch
//! socket → TdsCodec → MessageAssembler → AsyncConnection
//! ```
//!
//! Every [`CodecError`] except [`CodecError::Value`] leaves the stream at
//! an unknown position; the owner must discard the connection.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;
pub mod stream;
pub mod transport;

pub use connection::{AsyncConnection, CancelHandle};
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
pub use stream::TransportStream;
pub use transport::{PacketTransport, TransportStats};
