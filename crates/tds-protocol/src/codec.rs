//! Scalar and string codecs shared by every TDS structure.
//!
//! Token decoders never see a socket. They pull bytes through [`TdsRead`]
//! and push bytes through [`TdsWrite`], so the same decoder runs over a
//! blocking packet transport, an assembled async message or a test slice.
//! Both traits carry the session's byte order and string mode.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use encoding_rs::Encoding;

use crate::error::ProtocolError;

/// Byte order of multi-byte scalars inside packet payloads.
///
/// The packet header length is always big-endian; everything else follows
/// the order negotiated at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    LittleEndian,
    /// Most significant byte first ("network" order).
    BigEndian,
}

/// How strings are represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringMode {
    /// Two bytes per character (UCS-2) when true.
    pub unicode: bool,
    /// Code page for single-byte character data.
    pub encoding: &'static Encoding,
}

impl StringMode {
    /// UCS-2 strings, single-byte data in Windows-1252.
    #[must_use]
    pub fn unicode() -> Self {
        Self {
            unicode: true,
            encoding: encoding_rs::WINDOWS_1252,
        }
    }

    /// Single-byte strings in the given code page.
    #[must_use]
    pub fn narrow(encoding: &'static Encoding) -> Self {
        Self {
            unicode: false,
            encoding,
        }
    }
}

impl Default for StringMode {
    fn default() -> Self {
        Self::narrow(encoding_rs::WINDOWS_1252)
    }
}

/// Decode UCS-2 little-endian bytes into a string.
pub fn decode_ucs2(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding(format!(
            "odd UCS-2 byte count {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Decode single-byte character data with a code page.
#[must_use]
pub fn decode_narrow(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Encode a string with a code page.
#[must_use]
pub fn encode_narrow(s: &str, encoding: &'static Encoding) -> Vec<u8> {
    let (bytes, _, _) = encoding.encode(s);
    bytes.into_owned()
}

/// Write a UTF-16LE string without length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Calculate the byte length of a UTF-16 encoded string.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Pull-based reader of a TDS byte stream.
///
/// Implementors supply raw byte access; scalar and string helpers are
/// provided on top, honouring [`TdsRead::byte_order`] and
/// [`TdsRead::string_mode`].
pub trait TdsRead {
    /// Error produced by the underlying source.
    type Error: From<ProtocolError>;

    /// Read one byte.
    fn read_u8(&mut self) -> Result<u8, Self::Error>;

    /// Look at the next byte without consuming it.
    fn peek_u8(&mut self) -> Result<u8, Self::Error>;

    /// Fill `dst` completely.
    fn read_exact_into(&mut self, dst: &mut [u8]) -> Result<(), Self::Error>;

    /// Byte order of scalars.
    fn byte_order(&self) -> ByteOrder;

    /// Current string mode.
    fn string_mode(&self) -> StringMode;

    /// Read `n` bytes into a new buffer.
    fn read_bytes(&mut self, n: usize) -> Result<Bytes, Self::Error> {
        let mut buf = vec![0u8; n];
        self.read_exact_into(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Discard `n` bytes.
    fn skip(&mut self, n: usize) -> Result<(), Self::Error> {
        let mut scratch = [0u8; 64];
        let mut left = n;
        while left > 0 {
            let step = left.min(scratch.len());
            self.read_exact_into(&mut scratch[..step])?;
            left -= step;
        }
        Ok(())
    }

    /// Read a signed byte.
    fn read_i8(&mut self) -> Result<i8, Self::Error> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a 16-bit unsigned integer.
    fn read_u16(&mut self) -> Result<u16, Self::Error> {
        let mut b = [0u8; 2];
        self.read_exact_into(&mut b)?;
        Ok(match self.byte_order() {
            ByteOrder::LittleEndian => u16::from_le_bytes(b),
            ByteOrder::BigEndian => u16::from_be_bytes(b),
        })
    }

    /// Read a 16-bit signed integer.
    fn read_i16(&mut self) -> Result<i16, Self::Error> {
        Ok(self.read_u16()? as i16)
    }

    /// Read a 32-bit unsigned integer.
    fn read_u32(&mut self) -> Result<u32, Self::Error> {
        let mut b = [0u8; 4];
        self.read_exact_into(&mut b)?;
        Ok(match self.byte_order() {
            ByteOrder::LittleEndian => u32::from_le_bytes(b),
            ByteOrder::BigEndian => u32::from_be_bytes(b),
        })
    }

    /// Read a 32-bit signed integer.
    fn read_i32(&mut self) -> Result<i32, Self::Error> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a 64-bit unsigned integer.
    fn read_u64(&mut self) -> Result<u64, Self::Error> {
        let mut b = [0u8; 8];
        self.read_exact_into(&mut b)?;
        Ok(match self.byte_order() {
            ByteOrder::LittleEndian => u64::from_le_bytes(b),
            ByteOrder::BigEndian => u64::from_be_bytes(b),
        })
    }

    /// Read a 64-bit signed integer.
    fn read_i64(&mut self) -> Result<i64, Self::Error> {
        Ok(self.read_u64()? as i64)
    }

    /// Read an IEEE single.
    fn read_f32(&mut self) -> Result<f32, Self::Error> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read an IEEE double.
    fn read_f64(&mut self) -> Result<f64, Self::Error> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read `chars` UCS-2 characters.
    fn read_ucs2(&mut self, chars: usize) -> Result<String, Self::Error> {
        let bytes = self.read_bytes(chars * 2)?;
        Ok(decode_ucs2(&bytes)?)
    }

    /// Read `len` bytes of single-byte character data.
    fn read_narrow(&mut self, len: usize) -> Result<String, Self::Error> {
        let bytes = self.read_bytes(len)?;
        Ok(decode_narrow(&bytes, self.string_mode().encoding))
    }

    /// Read a string of `len` characters in the current string mode.
    fn read_string(&mut self, len: usize) -> Result<String, Self::Error> {
        if self.string_mode().unicode {
            self.read_ucs2(len)
        } else {
            self.read_narrow(len)
        }
    }

    /// Read a string with a one-byte character count.
    fn read_b_varchar(&mut self) -> Result<String, Self::Error> {
        let len = usize::from(self.read_u8()?);
        self.read_string(len)
    }

    /// Read a string with a two-byte character count.
    fn read_us_varchar(&mut self) -> Result<String, Self::Error> {
        let len = usize::from(self.read_u16()?);
        self.read_string(len)
    }

    /// Read a length-delimited token body into its own reader.
    ///
    /// The returned reader inherits byte order and string mode, so fields
    /// can be decoded from it and any trailing bytes checked or ignored.
    fn read_framed(&mut self, len: usize) -> Result<SliceReader, Self::Error> {
        let body = self.read_bytes(len)?;
        Ok(SliceReader::new(body, self.string_mode()).with_byte_order(self.byte_order()))
    }

    /// Wire size in bytes of a string of `chars` characters.
    fn string_wire_len(&self, chars: usize) -> usize {
        if self.string_mode().unicode {
            chars * 2
        } else {
            chars
        }
    }
}

/// Push-based writer of a TDS byte stream.
pub trait TdsWrite {
    /// Error produced by the underlying sink.
    type Error: From<ProtocolError>;

    /// Write all of `src`.
    fn write_slice(&mut self, src: &[u8]) -> Result<(), Self::Error>;

    /// Byte order of scalars.
    fn byte_order(&self) -> ByteOrder;

    /// Current string mode.
    fn string_mode(&self) -> StringMode;

    /// Write one byte.
    fn write_u8(&mut self, v: u8) -> Result<(), Self::Error> {
        self.write_slice(&[v])
    }

    /// Write a 16-bit unsigned integer.
    fn write_u16(&mut self, v: u16) -> Result<(), Self::Error> {
        match self.byte_order() {
            ByteOrder::LittleEndian => self.write_slice(&v.to_le_bytes()),
            ByteOrder::BigEndian => self.write_slice(&v.to_be_bytes()),
        }
    }

    /// Write a 16-bit signed integer.
    fn write_i16(&mut self, v: i16) -> Result<(), Self::Error> {
        self.write_u16(v as u16)
    }

    /// Write a 32-bit unsigned integer.
    fn write_u32(&mut self, v: u32) -> Result<(), Self::Error> {
        match self.byte_order() {
            ByteOrder::LittleEndian => self.write_slice(&v.to_le_bytes()),
            ByteOrder::BigEndian => self.write_slice(&v.to_be_bytes()),
        }
    }

    /// Write a 32-bit signed integer.
    fn write_i32(&mut self, v: i32) -> Result<(), Self::Error> {
        self.write_u32(v as u32)
    }

    /// Write a 64-bit unsigned integer.
    fn write_u64(&mut self, v: u64) -> Result<(), Self::Error> {
        match self.byte_order() {
            ByteOrder::LittleEndian => self.write_slice(&v.to_le_bytes()),
            ByteOrder::BigEndian => self.write_slice(&v.to_be_bytes()),
        }
    }

    /// Write a 64-bit signed integer.
    fn write_i64(&mut self, v: i64) -> Result<(), Self::Error> {
        self.write_u64(v as u64)
    }

    /// Write an IEEE single.
    fn write_f32(&mut self, v: f32) -> Result<(), Self::Error> {
        self.write_u32(v.to_bits())
    }

    /// Write an IEEE double.
    fn write_f64(&mut self, v: f64) -> Result<(), Self::Error> {
        self.write_u64(v.to_bits())
    }

    /// Write `src` truncated or padded with `pad` to exactly `width` bytes.
    ///
    /// Returns the number of bytes of `src` that were kept.
    fn write_padded(&mut self, src: &[u8], width: usize, pad: u8) -> Result<usize, Self::Error> {
        let kept = src.len().min(width);
        self.write_slice(&src[..kept])?;
        for _ in kept..width {
            self.write_u8(pad)?;
        }
        Ok(kept)
    }

    /// Write a string in the current string mode, without length prefix.
    fn write_string(&mut self, s: &str) -> Result<(), Self::Error> {
        let mode = self.string_mode();
        if mode.unicode {
            for c in s.encode_utf16() {
                self.write_slice(&c.to_le_bytes())?;
            }
            Ok(())
        } else {
            self.write_slice(&encode_narrow(s, mode.encoding))
        }
    }

    /// Write a string with a one-byte character count.
    fn write_b_varchar(&mut self, s: &str) -> Result<(), Self::Error> {
        let chars = string_char_len(s, self.string_mode());
        if chars > usize::from(u8::MAX) {
            return Err(ProtocolError::ValueTooLarge {
                field: "b_varchar",
                len: chars,
                max: usize::from(u8::MAX),
            }
            .into());
        }
        self.write_u8(chars as u8)?;
        self.write_string(s)
    }

    /// Write a string with a two-byte character count.
    fn write_us_varchar(&mut self, s: &str) -> Result<(), Self::Error> {
        let chars = string_char_len(s, self.string_mode());
        if chars > usize::from(u16::MAX) {
            return Err(ProtocolError::ValueTooLarge {
                field: "us_varchar",
                len: chars,
                max: usize::from(u16::MAX),
            }
            .into());
        }
        self.write_u16(chars as u16)?;
        self.write_string(s)
    }
}

/// Character count of `s` as the wire counts it.
#[must_use]
pub fn string_char_len(s: &str, mode: StringMode) -> usize {
    if mode.unicode {
        s.encode_utf16().count()
    } else {
        encode_narrow(s, mode.encoding).len()
    }
}

/// [`TdsRead`] over an in-memory buffer.
///
/// Used for assembled messages (async transport, bulk responses) and in
/// tests. Running out of bytes is reported as [`ProtocolError::UnexpectedEof`].
#[derive(Debug, Clone)]
pub struct SliceReader {
    buf: Bytes,
    order: ByteOrder,
    mode: StringMode,
}

impl SliceReader {
    /// Create a little-endian reader in the given string mode.
    #[must_use]
    pub fn new(buf: impl Into<Bytes>, mode: StringMode) -> Self {
        Self {
            buf: buf.into(),
            order: ByteOrder::LittleEndian,
            mode,
        }
    }

    /// Set the byte order.
    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Change the string mode (charset switch).
    pub fn set_string_mode(&mut self, mode: StringMode) {
        self.mode = mode;
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }
}

impl TdsRead for SliceReader {
    type Error = ProtocolError;

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        if !self.buf.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.get_u8())
    }

    fn peek_u8(&mut self) -> Result<u8, ProtocolError> {
        self.buf.first().copied().ok_or(ProtocolError::UnexpectedEof)
    }

    fn read_exact_into(&mut self, dst: &mut [u8]) -> Result<(), ProtocolError> {
        if self.buf.remaining() < dst.len() {
            return Err(ProtocolError::UnexpectedEof);
        }
        self.buf.copy_to_slice(dst);
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.split_to(n))
    }

    fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::UnexpectedEof);
        }
        self.buf.advance(n);
        Ok(())
    }

    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn string_mode(&self) -> StringMode {
        self.mode
    }
}

/// [`TdsWrite`] into a growable buffer.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    buf: BytesMut,
    order: ByteOrder,
    mode: StringMode,
}

impl MessageWriter {
    /// Create a little-endian writer in the given string mode.
    #[must_use]
    pub fn new(mode: StringMode) -> Self {
        Self {
            buf: BytesMut::new(),
            order: ByteOrder::LittleEndian,
            mode,
        }
    }

    /// Set the byte order.
    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the written bytes.
    #[must_use]
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl TdsWrite for MessageWriter {
    type Error = ProtocolError;

    fn write_slice(&mut self, src: &[u8]) -> Result<(), ProtocolError> {
        self.buf.put_slice(src);
        Ok(())
    }

    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn string_mode(&self) -> StringMode {
        self.mode
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_b_varchar_roundtrip_unicode() {
        let original = "Hello, 世界!";
        let mut w = MessageWriter::new(StringMode::unicode());
        w.write_b_varchar(original).unwrap();

        let mut r = SliceReader::new(w.freeze(), StringMode::unicode());
        assert_eq!(r.read_b_varchar().unwrap(), original);
        assert!(r.is_empty());
    }

    #[test]
    fn test_us_varchar_roundtrip_narrow() {
        let mode = StringMode::narrow(encoding_rs::WINDOWS_1252);
        let mut w = MessageWriter::new(mode);
        w.write_us_varchar("caf\u{e9}").unwrap();
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[4, 0, b'c', b'a', b'f', 0xE9]);

        let mut r = SliceReader::new(bytes, mode);
        assert_eq!(r.read_us_varchar().unwrap(), "caf\u{e9}");
    }

    #[test]
    fn test_byte_order_is_honoured() {
        let mut w = MessageWriter::new(StringMode::default()).with_byte_order(ByteOrder::BigEndian);
        w.write_u32(0x0102_0304).unwrap();
        w.write_i16(-2).unwrap();
        let bytes = w.freeze();
        assert_eq!(&bytes[..], &[1, 2, 3, 4, 0xFF, 0xFE]);

        let mut r = SliceReader::new(bytes, StringMode::default()).with_byte_order(ByteOrder::BigEndian);
        assert_eq!(r.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(r.read_i16().unwrap(), -2);
    }

    #[test]
    fn test_padded_field() {
        let mut w = MessageWriter::new(StringMode::default());
        assert_eq!(w.write_padded(b"abc", 5, 0).unwrap(), 3);
        assert_eq!(w.write_padded(b"abcdef", 4, 0).unwrap(), 4);
        assert_eq!(&w.freeze()[..], b"abc\0\0abcd");
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut r = SliceReader::new(vec![0xFD, 0x00], StringMode::default());
        assert_eq!(r.peek_u8().unwrap(), 0xFD);
        assert_eq!(r.read_u8().unwrap(), 0xFD);
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn test_eof_is_reported() {
        let mut r = SliceReader::new(vec![0x01], StringMode::default());
        assert_eq!(r.read_u16().unwrap_err(), ProtocolError::UnexpectedEof);
    }

    #[test]
    fn test_b_varchar_too_long() {
        let mut w = MessageWriter::new(StringMode::unicode());
        let long = "x".repeat(300);
        assert!(matches!(
            w.write_b_varchar(&long).unwrap_err(),
            ProtocolError::ValueTooLarge { len: 300, .. }
        ));
    }

    #[test]
    fn test_utf16_byte_len() {
        assert_eq!(utf16_byte_len("Hello"), 10);
        assert_eq!(utf16_byte_len("世界"), 4);
    }
}
