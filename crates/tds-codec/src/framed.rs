//! Packet halves of a split async transport.
//!
//! The read and write halves are framed separately so an attention packet
//! can go out while a read is pending.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::CodecError;
use crate::packet_codec::{Packet, TdsCodec};

pin_project! {
    /// Incoming packets of a read half.
    pub struct PacketReader<T> {
        #[pin]
        inner: FramedRead<T, TdsCodec>,
    }
}

impl<T: AsyncRead> PacketReader<T> {
    /// Frame a read half with `codec`.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// Bytes received but not yet decoded into a packet.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }
}

impl<T: AsyncRead + Unpin> Stream for PacketReader<T> {
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> fmt::Debug for PacketReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketReader")
            .field("buffered", &self.inner.read_buffer().len())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Outgoing packets of a write half; packet numbers come from the codec.
    pub struct PacketWriter<T> {
        #[pin]
        inner: FramedWrite<T, TdsCodec>,
    }
}

impl<T: AsyncWrite> PacketWriter<T> {
    /// Frame a write half with `codec`.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: FramedWrite::new(transport, codec),
        }
    }
}

impl<T: AsyncWrite + Unpin> Sink<Packet> for PacketWriter<T> {
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), CodecError>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Packet) -> Result<(), CodecError> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), CodecError>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), CodecError>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> fmt::Debug for PacketWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tds_protocol::packet::{PacketHeader, PacketStatus, PacketType};

    #[tokio::test]
    async fn test_halves_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut reader = PacketReader::with_codec(client, TdsCodec::new());
        let mut writer = PacketWriter::with_codec(server, TdsCodec::new());

        let header = PacketHeader::new(PacketType::Reply, PacketStatus::END_OF_MESSAGE, 0);
        writer
            .send(Packet::new(header, BytesMut::from(&b"payload"[..])))
            .await
            .unwrap();

        let packet = reader.next().await.unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::Reply);
        assert_eq!(packet.header.packet_id, 1);
        assert_eq!(&packet.payload[..], b"payload");
        assert!(reader.read_buffer().is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_ends_stream() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut reader = PacketReader::with_codec(client, TdsCodec::new());
        assert!(reader.next().await.is_none());
    }
}
