//! Blocking packet transport.
//!
//! [`PacketTransport`] turns a byte stream into a stream of TDS messages.
//! Outgoing data is appended into a buffer the size of one packet; when it
//! fills, a physical packet is written and the buffer reused. Incoming
//! packets are read one at a time into a second buffer, and readers move
//! transparently from one packet to the next.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};
use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use tds_protocol::codec::{ByteOrder, StringMode, TdsRead, TdsWrite};
use tds_protocol::packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
use tds_protocol::{MessageWriter, ProtocolError, TdsVersion, TypeInfo};
use tds_types::Numeric;
use tds_types::encode::{
    write_datetime, write_decimal, write_money, write_smalldatetime, write_smallmoney,
};

use crate::error::CodecError;
use crate::stream::TransportStream;

/// Running totals of framed traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Physical packets written.
    pub packets_sent: u64,
    /// Physical packets read.
    pub packets_received: u64,
    /// Messages completed by `end_message`.
    pub messages_sent: u64,
}

/// Packet framing over a blocking stream.
///
/// Reads and writes go through [`TdsRead`] and [`TdsWrite`]; the
/// `append_*`/`get_*` methods are the same operations under transport names
/// plus helpers for the composite wire values.
pub struct PacketTransport<S> {
    stream: S,
    byte_order: ByteOrder,
    string_mode: StringMode,
    numbered: bool,

    // outgoing
    out_buf: BytesMut,
    out_capacity: usize,
    out_type: PacketType,
    out_number: u8,
    out_first: bool,
    reset_pending: bool,

    // incoming
    in_buf: Vec<u8>,
    in_capacity: usize,
    in_pos: usize,
    in_len: usize,
    in_eom: bool,
    // replies owed by the server, not counting the one being read
    responses_pending: usize,
    max_in: usize,

    stats: TransportStats,
}

impl<S: TransportStream> PacketTransport<S> {
    /// Create a transport with the given outgoing packet size.
    pub fn new(stream: S, packet_size: usize, byte_order: ByteOrder) -> Self {
        let out_capacity = packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        Self {
            stream,
            byte_order,
            string_mode: StringMode::default(),
            numbered: false,
            out_buf: BytesMut::with_capacity(out_capacity),
            out_capacity,
            out_type: PacketType::Query,
            out_number: 0,
            out_first: true,
            reset_pending: false,
            in_buf: vec![0u8; DEFAULT_PACKET_SIZE],
            in_capacity: DEFAULT_PACKET_SIZE,
            in_pos: 0,
            in_len: 0,
            in_eom: true,
            responses_pending: 0,
            max_in: MAX_PACKET_SIZE,
            stats: TransportStats::default(),
        }
    }

    /// Configure numbering and string mode for a protocol version.
    ///
    /// TDS 7.0+ numbers packets and uses UCS-2 strings; legacy versions
    /// send packet number 0 and single-byte strings.
    pub fn set_version(&mut self, version: TdsVersion) {
        self.numbered = version.numbers_packets();
        self.set_wide_strings(version.uses_unicode());
    }

    /// Change the outgoing packet size.
    ///
    /// Must be called between messages.
    pub fn set_packet_size(&mut self, packet_size: usize) -> Result<(), CodecError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
            return Err(ProtocolError::InvalidPacketLength {
                length: packet_size,
                min: MIN_PACKET_SIZE,
                max: MAX_PACKET_SIZE,
            }
            .into());
        }
        if packet_size > self.out_buf.capacity() {
            self.out_buf.reserve(packet_size - self.out_buf.len());
        }
        self.out_capacity = packet_size;
        tracing::debug!(packet_size, "packet size changed");
        Ok(())
    }

    /// Current outgoing packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.out_capacity
    }

    /// Change the byte order of scalars.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Change the code page of single-byte strings.
    pub fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.string_mode.encoding = encoding;
    }

    /// Switch between UCS-2 and single-byte strings.
    pub fn set_wide_strings(&mut self, wide: bool) {
        self.string_mode.unicode = wide;
    }

    /// Flag the first packet of the next message with reset-connection.
    pub fn set_reset_connection(&mut self) {
        self.reset_pending = true;
    }

    /// Whether a reset-connection flag is waiting for the next message.
    #[must_use]
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Apply socket timeouts.
    pub fn set_timeouts(
        &mut self,
        read: Option<std::time::Duration>,
        write: Option<std::time::Duration>,
    ) -> Result<(), CodecError> {
        self.stream.set_timeouts(read, write).map_err(CodecError::Io)
    }

    /// Probe the stream.
    pub fn is_alive(&mut self) -> bool {
        self.stream.is_alive()
    }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Shut the stream down.
    pub fn close(&mut self) -> Result<(), CodecError> {
        self.stream.shutdown().map_err(CodecError::from_io)
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the transport and return the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    // =========================================================================
    // Outgoing
    // =========================================================================

    /// Begin a message of the given type, discarding anything unsent.
    pub fn start_message(&mut self, packet_type: PacketType) {
        self.out_buf.clear();
        self.out_type = packet_type;
        self.out_number = 1;
        self.out_first = true;
    }

    /// Flush the final packet of the message and the stream.
    pub fn end_message(&mut self) -> Result<(), CodecError> {
        self.flush_packet(true)?;
        self.stream.flush().map_err(CodecError::from_io)?;
        self.stats.messages_sent += 1;
        self.responses_pending += 1;
        Ok(())
    }

    /// Send a complete message in one call.
    pub fn send_message(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<(), CodecError> {
        self.start_message(packet_type);
        self.write_slice(payload)?;
        self.end_message()
    }

    /// Send an attention signal.
    pub fn send_cancel(&mut self) -> Result<(), CodecError> {
        tracing::debug!("sending attention");
        self.send_message(PacketType::Cancel, &[])
    }

    fn payload_room(&self) -> usize {
        self.out_capacity
            .saturating_sub(PACKET_HEADER_SIZE + self.out_buf.len())
    }

    fn flush_packet(&mut self, last: bool) -> Result<(), CodecError> {
        let mut status = if last {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        if self.out_first && self.reset_pending {
            status |= PacketStatus::RESET_CONNECTION;
            self.reset_pending = false;
        }

        let length = PACKET_HEADER_SIZE + self.out_buf.len();
        let packet_id = if self.numbered { self.out_number } else { 0 };
        let header = PacketHeader::new(self.out_type, status, length as u16).with_packet_id(packet_id);

        let mut packet = BytesMut::with_capacity(length);
        header.encode(&mut packet);
        packet.put_slice(&self.out_buf);
        self.stream
            .write_all(&packet)
            .map_err(CodecError::from_io)?;

        tracing::trace!(
            packet_type = ?self.out_type,
            length,
            packet_id,
            is_eom = last,
            "sent packet"
        );

        self.stats.packets_sent += 1;
        self.out_buf.clear();
        self.out_first = false;
        self.out_number = self.out_number.wrapping_add(1);
        if self.out_number == 0 {
            self.out_number = 1;
        }
        Ok(())
    }

    /// Append one byte.
    pub fn append_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.write_u8(v)
    }

    /// Append a 16-bit signed integer.
    pub fn append_i16(&mut self, v: i16) -> Result<(), CodecError> {
        self.write_i16(v)
    }

    /// Append a 16-bit unsigned integer.
    pub fn append_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.write_u16(v)
    }

    /// Append a 32-bit signed integer.
    pub fn append_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.write_i32(v)
    }

    /// Append a 32-bit unsigned integer.
    pub fn append_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.write_u32(v)
    }

    /// Append a 64-bit signed integer.
    pub fn append_i64(&mut self, v: i64) -> Result<(), CodecError> {
        self.write_i64(v)
    }

    /// Append an IEEE single.
    pub fn append_f32(&mut self, v: f32) -> Result<(), CodecError> {
        self.write_f32(v)
    }

    /// Append an IEEE double.
    pub fn append_f64(&mut self, v: f64) -> Result<(), CodecError> {
        self.write_f64(v)
    }

    /// Append raw bytes.
    pub fn append_bytes(&mut self, src: &[u8]) -> Result<(), CodecError> {
        self.write_slice(src)
    }

    /// Append `src` truncated or padded with `pad` to `width` bytes.
    pub fn append_padded(&mut self, src: &[u8], width: usize, pad: u8) -> Result<usize, CodecError> {
        self.write_padded(src, width, pad)
    }

    /// Append a string in the current string mode.
    pub fn append_string(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_string(s)
    }

    /// Append a length-prefixed decimal.
    pub fn append_decimal(
        &mut self,
        value: Numeric,
        info: &TypeInfo,
        version: TdsVersion,
    ) -> Result<(), CodecError> {
        let mut tmp = self.scratch();
        write_decimal(&mut tmp, value, info, version)?;
        self.write_slice(&tmp.freeze())
    }

    /// Append an 8-byte date/time.
    pub fn append_datetime(&mut self, value: NaiveDateTime) -> Result<(), CodecError> {
        let mut tmp = self.scratch();
        write_datetime(&mut tmp, value)?;
        self.write_slice(&tmp.freeze())
    }

    /// Append a 4-byte date/time.
    pub fn append_smalldatetime(&mut self, value: NaiveDateTime) -> Result<(), CodecError> {
        let mut tmp = self.scratch();
        write_smalldatetime(&mut tmp, value)?;
        self.write_slice(&tmp.freeze())
    }

    /// Append a money amount, 8 bytes or 4 bytes wide.
    pub fn append_money(&mut self, value: Numeric, wide: bool) -> Result<(), CodecError> {
        let mut tmp = self.scratch();
        if wide {
            write_money(&mut tmp, value)?;
        } else {
            write_smallmoney(&mut tmp, value)?;
        }
        self.write_slice(&tmp.freeze())
    }

    fn scratch(&self) -> MessageWriter {
        MessageWriter::new(self.string_mode).with_byte_order(self.byte_order)
    }

    // =========================================================================
    // Incoming
    // =========================================================================

    fn fill_exact(&mut self, start: usize, end: usize) -> Result<(), CodecError> {
        let mut pos = start;
        while pos < end {
            match self.stream.read(&mut self.in_buf[pos..end]) {
                Ok(0) => return Err(CodecError::ConnectionLost),
                Ok(n) => pos += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(CodecError::from_io(e)),
            }
        }
        Ok(())
    }

    /// Read the next physical packet into the input buffer.
    pub fn read_packet(&mut self) -> Result<PacketHeader, CodecError> {
        self.fill_exact(0, PACKET_HEADER_SIZE)?;
        let header = PacketHeader::decode(&mut &self.in_buf[..PACKET_HEADER_SIZE], self.max_in)?;
        if !header.packet_type.is_legal_incoming() {
            return Err(ProtocolError::UnexpectedPacketType(header.packet_type as u8).into());
        }

        let length = usize::from(header.length);
        if length > self.in_capacity {
            self.in_buf.resize(length, 0);
            self.in_capacity = length;
        }
        self.fill_exact(PACKET_HEADER_SIZE, length)?;

        self.in_pos = PACKET_HEADER_SIZE;
        self.in_len = length;
        self.in_eom = header.is_end_of_message();
        self.stats.packets_received += 1;

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            is_eom = self.in_eom,
            "received packet"
        );
        Ok(header)
    }

    /// Make at least one unread byte available.
    fn ensure_input(&mut self) -> Result<(), CodecError> {
        while self.in_pos >= self.in_len {
            if self.in_eom {
                if self.responses_pending == 0 {
                    // the message ended inside a structure
                    return Err(ProtocolError::UnexpectedEof.into());
                }
                self.responses_pending -= 1;
            }
            self.read_packet()?;
        }
        Ok(())
    }

    /// Whether unread bytes of the current response remain.
    #[must_use]
    pub fn has_buffered_input(&self) -> bool {
        self.in_pos < self.in_len || !self.in_eom
    }

    /// Number of replies sent for but not yet started.
    #[must_use]
    pub fn responses_pending(&self) -> usize {
        self.responses_pending
    }

    /// Forget owed replies once the server acknowledged an attention.
    ///
    /// The acknowledgement ends every response requested before it,
    /// whether or not the server closed them as separate messages.
    pub fn attention_acknowledged(&mut self) {
        self.responses_pending = 0;
    }

    /// Discard whatever is left of the current response.
    pub fn discard_input(&mut self) -> Result<(), CodecError> {
        while !self.in_eom {
            self.read_packet()?;
        }
        self.in_pos = self.in_len;
        Ok(())
    }

    /// Read one byte.
    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        self.read_u8()
    }

    /// Read a 16-bit signed integer.
    pub fn get_i16(&mut self) -> Result<i16, CodecError> {
        self.read_i16()
    }

    /// Read a 16-bit unsigned integer.
    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        self.read_u16()
    }

    /// Read a 32-bit signed integer.
    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        self.read_i32()
    }

    /// Read a 32-bit unsigned integer.
    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.read_u32()
    }

    /// Read a 64-bit signed integer.
    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        self.read_i64()
    }

    /// Read an IEEE single.
    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        self.read_f32()
    }

    /// Read an IEEE double.
    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        self.read_f64()
    }

    /// Read `n` bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<bytes::Bytes, CodecError> {
        self.read_bytes(n)
    }

    /// Read a string of `chars` characters in the current string mode.
    pub fn get_string(&mut self, chars: usize) -> Result<String, CodecError> {
        self.read_string(chars)
    }
}

impl<S: TransportStream> TdsWrite for PacketTransport<S> {
    type Error = CodecError;

    fn write_slice(&mut self, mut src: &[u8]) -> Result<(), CodecError> {
        while !src.is_empty() {
            if self.payload_room() == 0 {
                self.flush_packet(false)?;
            }
            let n = self.payload_room().min(src.len());
            self.out_buf.extend_from_slice(&src[..n]);
            src = &src[n..];
        }
        Ok(())
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn string_mode(&self) -> StringMode {
        self.string_mode
    }
}

impl<S: TransportStream> TdsRead for PacketTransport<S> {
    type Error = CodecError;

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure_input()?;
        let b = self.in_buf[self.in_pos];
        self.in_pos += 1;
        Ok(b)
    }

    fn peek_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure_input()?;
        Ok(self.in_buf[self.in_pos])
    }

    fn read_exact_into(&mut self, dst: &mut [u8]) -> Result<(), CodecError> {
        let mut filled = 0;
        while filled < dst.len() {
            self.ensure_input()?;
            let n = (self.in_len - self.in_pos).min(dst.len() - filled);
            dst[filled..filled + n].copy_from_slice(&self.in_buf[self.in_pos..self.in_pos + n]);
            self.in_pos += n;
            filled += n;
        }
        Ok(())
    }

    fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        let mut left = n;
        while left > 0 {
            self.ensure_input()?;
            let step = (self.in_len - self.in_pos).min(left);
            self.in_pos += step;
            left -= step;
        }
        Ok(())
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn string_mode(&self) -> StringMode {
        self.string_mode
    }
}

impl<S> std::fmt::Debug for PacketTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketTransport")
            .field("packet_size", &self.out_capacity)
            .field("numbered", &self.numbered)
            .field("string_mode", &self.string_mode)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
