//! TDS protocol version definitions.

use core::fmt;

/// TDS protocol version spoken by a session.
///
/// The version is fixed for the lifetime of a session. It selects the login
/// packet layout, the column-metadata token layout and the string encoding of
/// the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TdsVersion {
    /// TDS 4.2 (Sybase SQL Server 4.x, Microsoft SQL Server 4.2 - 6.5).
    V4_2,
    /// TDS 5.0 (Sybase SQL Server / ASE 10+).
    V5_0,
    /// TDS 7.0 (Microsoft SQL Server 7.0).
    #[default]
    V7_0,
    /// TDS 8.0 (Microsoft SQL Server 2000, wire version 7.1 rev 1).
    V8_0,
}

impl TdsVersion {
    /// Whether this version uses the legacy fixed-field login packet.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::V4_2 | Self::V5_0)
    }

    /// Whether strings on the wire are UCS-2 (two bytes per character).
    #[must_use]
    pub const fn uses_unicode(self) -> bool {
        !self.is_legacy()
    }

    /// Whether outgoing packet headers carry a packet sequence number.
    #[must_use]
    pub const fn numbers_packets(self) -> bool {
        !self.is_legacy()
    }

    /// Whether column metadata carries a 5-byte collation for character types.
    #[must_use]
    pub const fn has_collations(self) -> bool {
        matches!(self, Self::V8_0)
    }

    /// Whether the server honours the reset-connection packet status bit.
    #[must_use]
    pub const fn supports_reset_connection(self) -> bool {
        !self.is_legacy()
    }

    /// Whether the 8-byte integer and sql_variant types may appear.
    #[must_use]
    pub const fn supports_bigint(self) -> bool {
        matches!(self, Self::V8_0)
    }

    /// Version bytes written into the legacy login packet.
    #[must_use]
    pub const fn legacy_version_bytes(self) -> [u8; 4] {
        match self {
            Self::V4_2 => [4, 2, 0, 0],
            Self::V5_0 => [5, 0, 0, 0],
            Self::V7_0 => [7, 0, 0, 0],
            Self::V8_0 => [8, 0, 0, 0],
        }
    }

    /// Raw version value written (little-endian) into a Login70 packet.
    #[must_use]
    pub const fn login70_raw(self) -> u32 {
        match self {
            Self::V8_0 => 0x7100_0001,
            _ => 0x7000_0000,
        }
    }

    /// Get the server product line for this TDS version.
    #[must_use]
    pub const fn server_version_name(&self) -> &'static str {
        match self {
            Self::V4_2 => "Sybase SQL Server 4.x / SQL Server 6.x",
            Self::V5_0 => "Sybase SQL Server 10+",
            Self::V7_0 => "SQL Server 7.0",
            Self::V8_0 => "SQL Server 2000",
        }
    }

    /// Parse a TDS version from a string representation.
    ///
    /// Accepts "4.2", "5.0", "7.0", "8.0" and the short forms "42", "50",
    /// "70", "80", "5", "7", "8". Returns `None` for anything else.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "4.2" | "42" => Some(Self::V4_2),
            "5.0" | "50" | "5" => Some(Self::V5_0),
            "7.0" | "70" | "7" => Some(Self::V7_0),
            "8.0" | "80" | "8" => Some(Self::V8_0),
            _ => None,
        }
    }

    /// Get the major version number.
    #[must_use]
    pub const fn major(self) -> u8 {
        self.legacy_version_bytes()[0]
    }

    /// Get the minor version number.
    #[must_use]
    pub const fn minor(self) -> u8 {
        self.legacy_version_bytes()[1]
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TDS {}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(TdsVersion::V8_0 > TdsVersion::V7_0);
        assert!(TdsVersion::V7_0 > TdsVersion::V5_0);
        assert!(TdsVersion::V5_0 > TdsVersion::V4_2);
    }

    #[test]
    fn test_is_legacy() {
        assert!(TdsVersion::V4_2.is_legacy());
        assert!(TdsVersion::V5_0.is_legacy());
        assert!(!TdsVersion::V7_0.is_legacy());
        assert!(!TdsVersion::V8_0.is_legacy());
    }

    #[test]
    fn test_collations_only_on_8_0() {
        assert!(TdsVersion::V8_0.has_collations());
        assert!(!TdsVersion::V7_0.has_collations());
        assert!(!TdsVersion::V5_0.has_collations());
    }

    #[test]
    fn test_login70_raw() {
        assert_eq!(TdsVersion::V7_0.login70_raw().to_le_bytes(), [0x00, 0x00, 0x00, 0x70]);
        assert_eq!(TdsVersion::V8_0.login70_raw().to_le_bytes(), [0x01, 0x00, 0x00, 0x71]);
    }

    #[test]
    fn test_parse() {
        assert_eq!(TdsVersion::parse("4.2"), Some(TdsVersion::V4_2));
        assert_eq!(TdsVersion::parse("5.0"), Some(TdsVersion::V5_0));
        assert_eq!(TdsVersion::parse(" 7.0 "), Some(TdsVersion::V7_0));
        assert_eq!(TdsVersion::parse("80"), Some(TdsVersion::V8_0));
        assert_eq!(TdsVersion::parse("7.4"), None);
        assert_eq!(TdsVersion::parse("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V4_2.to_string(), "TDS 4.2");
        assert_eq!(TdsVersion::V5_0.to_string(), "TDS 5.0");
        assert_eq!(TdsVersion::V7_0.to_string(), "TDS 7.0");
        assert_eq!(TdsVersion::V8_0.to_string(), "TDS 8.0");
    }
}
