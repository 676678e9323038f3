//! Character set and collation lookup tables.
//!
//! Legacy servers name their character set in the login packet and in
//! environment-change tokens ("iso_1", "cp850", "utf8", ...). TDS 8.0
//! servers describe single-byte column data with a 5-byte collation whose
//! LCID or sort order selects a Windows code page. Both lookups resolve to an
//! [`encoding_rs::Encoding`] through process-wide tables built once on first
//! use and shared by every session.

use std::collections::HashMap;

use encoding_rs::Encoding;
use once_cell::sync::Lazy;

use crate::error::ProtocolError;

/// Character set assumed when a name is unknown or absent.
#[must_use]
pub fn default_encoding() -> &'static Encoding {
    encoding_rs::WINDOWS_1252
}

/// Character set names as used by Sybase and early SQL Server releases.
static CHARSET_NAMES: Lazy<HashMap<&'static str, &'static Encoding>> = Lazy::new(|| {
    let entries: [(&'static str, &'static Encoding); 24] = [
        ("iso_1", encoding_rs::WINDOWS_1252),
        ("iso88591", encoding_rs::WINDOWS_1252),
        ("iso-8859-1", encoding_rs::WINDOWS_1252),
        ("ascii_8", encoding_rs::WINDOWS_1252),
        ("cp1252", encoding_rs::WINDOWS_1252),
        ("cp1250", encoding_rs::WINDOWS_1250),
        ("cp1251", encoding_rs::WINDOWS_1251),
        ("cp1253", encoding_rs::WINDOWS_1253),
        ("cp1254", encoding_rs::WINDOWS_1254),
        ("cp1255", encoding_rs::WINDOWS_1255),
        ("cp1256", encoding_rs::WINDOWS_1256),
        ("cp1257", encoding_rs::WINDOWS_1257),
        ("cp1258", encoding_rs::WINDOWS_1258),
        ("cp874", encoding_rs::WINDOWS_874),
        ("iso88592", encoding_rs::ISO_8859_2),
        ("iso88595", encoding_rs::ISO_8859_5),
        ("iso88597", encoding_rs::ISO_8859_7),
        ("koi8", encoding_rs::KOI8_R),
        ("mac", encoding_rs::MACINTOSH),
        ("utf8", encoding_rs::UTF_8),
        ("sjis", encoding_rs::SHIFT_JIS),
        ("eucjis", encoding_rs::EUC_JP),
        ("big5", encoding_rs::BIG5),
        ("eucgb", encoding_rs::GB18030),
    ];
    entries.into_iter().collect()
});

/// Windows code pages keyed by primary language id (low 16 bits of an LCID).
static LCID_ENCODINGS: Lazy<HashMap<u16, &'static Encoding>> = Lazy::new(|| {
    let mut map: HashMap<u16, &'static Encoding> = HashMap::new();
    map.insert(0x0411, encoding_rs::SHIFT_JIS);
    for lcid in [0x0804, 0x1004] {
        map.insert(lcid, encoding_rs::GB18030);
    }
    for lcid in [0x0404, 0x0C04, 0x1404] {
        map.insert(lcid, encoding_rs::BIG5);
    }
    map.insert(0x0412, encoding_rs::EUC_KR);
    map.insert(0x041E, encoding_rs::WINDOWS_874);
    map.insert(0x042A, encoding_rs::WINDOWS_1258);
    for lcid in [0x0405, 0x0415, 0x040E, 0x041A, 0x081A, 0x041B, 0x0424, 0x0418, 0x041C] {
        map.insert(lcid, encoding_rs::WINDOWS_1250);
    }
    for lcid in [0x0419, 0x0422, 0x0423, 0x0402, 0x042F, 0x0C1A] {
        map.insert(lcid, encoding_rs::WINDOWS_1251);
    }
    map.insert(0x0408, encoding_rs::WINDOWS_1253);
    map.insert(0x041F, encoding_rs::WINDOWS_1254);
    map.insert(0x040D, encoding_rs::WINDOWS_1255);
    for lcid in [0x0401, 0x0801, 0x0C01, 0x0429, 0x0420] {
        map.insert(lcid, encoding_rs::WINDOWS_1256);
    }
    for lcid in [0x0425, 0x0426, 0x0427] {
        map.insert(lcid, encoding_rs::WINDOWS_1257);
    }
    map
});

/// Code pages of SQL Server sort orders (non-zero sort id in a collation).
static SORT_ORDER_ENCODINGS: Lazy<HashMap<u8, &'static Encoding>> = Lazy::new(|| {
    let mut map: HashMap<u8, &'static Encoding> = HashMap::new();
    for id in 51..=56 {
        map.insert(id, encoding_rs::WINDOWS_1252);
    }
    for id in 80..=98 {
        map.insert(id, encoding_rs::WINDOWS_1250);
    }
    for id in 104..=108 {
        map.insert(id, encoding_rs::WINDOWS_1251);
    }
    for id in 112..=124 {
        map.insert(id, encoding_rs::WINDOWS_1253);
    }
    for id in 128..=130 {
        map.insert(id, encoding_rs::WINDOWS_1254);
    }
    for id in 136..=138 {
        map.insert(id, encoding_rs::WINDOWS_1255);
    }
    for id in 144..=146 {
        map.insert(id, encoding_rs::WINDOWS_1256);
    }
    for id in 152..=160 {
        map.insert(id, encoding_rs::WINDOWS_1257);
    }
    for id in 183..=186 {
        map.insert(id, encoding_rs::WINDOWS_1252);
    }
    map
});

/// Look up a legacy character set name.
///
/// Matching ignores ASCII case and surrounding whitespace.
#[must_use]
pub fn encoding_for_charset(name: &str) -> Option<&'static Encoding> {
    let key = name.trim().to_ascii_lowercase();
    CHARSET_NAMES.get(key.as_str()).copied()
}

/// Look up the code page of an LCID, defaulting to Windows-1252.
#[must_use]
pub fn encoding_for_lcid(lcid: u32) -> &'static Encoding {
    LCID_ENCODINGS
        .get(&((lcid & 0xFFFF) as u16))
        .copied()
        .unwrap_or_else(default_encoding)
}

/// TDS 8.0 collation: LCID, comparison flags, version and sort id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Collation {
    /// Locale id (20 bits).
    pub lcid: u32,
    /// Comparison flags (ignore case, accent, kana, width, binary).
    pub flags: u8,
    /// Collation version (4 bits).
    pub version: u8,
    /// SQL sort order id; 0 for Windows collations.
    pub sort_id: u8,
}

impl Collation {
    /// Size of a collation on the wire.
    pub const WIRE_SIZE: usize = 5;

    /// Decode the 5-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::WIRE_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: Self::WIRE_SIZE,
                actual: bytes.len(),
            });
        }
        let info = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Self {
            lcid: info & 0x000F_FFFF,
            flags: ((info >> 20) & 0xFF) as u8,
            version: ((info >> 28) & 0x0F) as u8,
            sort_id: bytes[4],
        })
    }

    /// Encode to the 5-byte wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 5] {
        let info = (self.lcid & 0x000F_FFFF)
            | (u32::from(self.flags) << 20)
            | (u32::from(self.version & 0x0F) << 28);
        let b = info.to_le_bytes();
        [b[0], b[1], b[2], b[3], self.sort_id]
    }

    /// Code page used for single-byte data in this collation.
    ///
    /// A non-zero sort id takes precedence over the LCID.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if self.sort_id != 0 {
            if let Some(enc) = SORT_ORDER_ENCODINGS.get(&self.sort_id).copied() {
                return enc;
            }
        }
        encoding_for_lcid(self.lcid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_names() {
        assert_eq!(encoding_for_charset("iso_1"), Some(encoding_rs::WINDOWS_1252));
        assert_eq!(encoding_for_charset(" UTF8 "), Some(encoding_rs::UTF_8));
        assert_eq!(encoding_for_charset("cp1251"), Some(encoding_rs::WINDOWS_1251));
        assert_eq!(encoding_for_charset("klingon"), None);
    }

    #[test]
    fn test_lcid_lookup() {
        assert_eq!(encoding_for_lcid(0x0411), encoding_rs::SHIFT_JIS);
        assert_eq!(encoding_for_lcid(0x0419), encoding_rs::WINDOWS_1251);
        assert_eq!(encoding_for_lcid(0x0409), encoding_rs::WINDOWS_1252);
        assert_eq!(encoding_for_lcid(0x9999), default_encoding());
    }

    #[test]
    fn test_collation_roundtrip() {
        // SQL_Latin1_General_CP1_CI_AS
        let raw = [0x09, 0x04, 0xD0, 0x00, 0x34];
        let collation = Collation::from_bytes(&raw).unwrap();
        assert_eq!(collation.lcid, 0x0409);
        assert_eq!(collation.flags, 0x0D);
        assert_eq!(collation.sort_id, 0x34);
        assert_eq!(collation.to_bytes(), raw);
        assert_eq!(collation.encoding(), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_collation_uses_lcid_without_sort_id() {
        let collation = Collation {
            lcid: 0x0419,
            ..Default::default()
        };
        assert_eq!(collation.encoding(), encoding_rs::WINDOWS_1251);
    }

    #[test]
    fn test_short_collation_rejected() {
        assert!(Collation::from_bytes(&[0x09, 0x04]).is_err());
    }
}
