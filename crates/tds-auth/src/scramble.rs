//! Login password obfuscation.
//!
//! Each UTF-16 code unit is XORed with `0x5A5A`, then the two nibbles of
//! each of its bytes are swapped. The result is written little-endian.
//! This is wire-format obfuscation only and offers no secrecy; anyone who
//! sees the packet can undo it.
//!
//! Legacy logins carry single-byte passwords in the connection character
//! set; [`scramble_bytes`] applies the same transform to each byte.

use bytes::Bytes;

use crate::error::AuthError;

const MASK: u16 = 0x5A5A;

/// Swap the high and low nibble of every byte of `unit`.
const fn swap_nibbles(unit: u16) -> u16 {
    ((unit & 0x0F0F) << 4) | ((unit & 0xF0F0) >> 4)
}

const fn scramble_unit(unit: u16) -> u16 {
    swap_nibbles(unit ^ MASK)
}

const fn unscramble_unit(unit: u16) -> u16 {
    swap_nibbles(unit) ^ MASK
}

/// Scramble a password for a TDS 7.0/8.0 login.
///
/// # Example
///
/// ```
/// use tds_auth::scramble_password;
///
/// assert_eq!(&scramble_password("a")[..], &[0xB3, 0xA5]);
/// ```
#[must_use]
pub fn scramble_password(password: &str) -> Bytes {
    let mut out = Vec::with_capacity(password.len() * 2);
    for unit in password.encode_utf16() {
        out.extend_from_slice(&scramble_unit(unit).to_le_bytes());
    }
    Bytes::from(out)
}

/// Recover the password from scrambled UTF-16LE bytes.
pub fn unscramble_password(scrambled: &[u8]) -> Result<String, AuthError> {
    if scrambled.len() % 2 != 0 {
        return Err(AuthError::MalformedPassword(format!(
            "odd byte length {}",
            scrambled.len()
        )));
    }
    let units: Vec<u16> = scrambled
        .chunks_exact(2)
        .map(|pair| unscramble_unit(u16::from_le_bytes([pair[0], pair[1]])))
        .collect();
    String::from_utf16(&units).map_err(|e| AuthError::MalformedPassword(e.to_string()))
}

/// Scramble single-byte password text for a legacy login.
#[must_use]
pub fn scramble_bytes(password: &[u8]) -> Bytes {
    password
        .iter()
        .map(|&b| scramble_unit(u16::from(b)) as u8)
        .collect::<Vec<u8>>()
        .into()
}

/// Inverse of [`scramble_bytes`].
#[must_use]
pub fn unscramble_bytes(scrambled: &[u8]) -> Vec<u8> {
    scrambled
        .iter()
        .map(|&b| unscramble_unit(u16::from(b)) as u8)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vector() {
        // 'a' = 0x0061 -> 0x5A3B -> nibble swap -> 0xA5B3
        assert_eq!(&scramble_password("a")[..], &[0xB3, 0xA5]);
    }

    #[test]
    fn test_empty_password() {
        let scrambled = scramble_password("");
        assert!(scrambled.is_empty());
        assert_eq!(unscramble_password(&scrambled).unwrap(), "");
        assert!(scramble_bytes(b"").is_empty());
    }

    #[test]
    fn test_byte_form_matches_low_byte() {
        let wide = scramble_password("secret");
        let narrow = scramble_bytes(b"secret");
        let low: Vec<u8> = wide.chunks_exact(2).map(|p| p[0]).collect();
        assert_eq!(&narrow[..], &low[..]);
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(matches!(
            unscramble_password(&[0xB3]),
            Err(AuthError::MalformedPassword(_))
        ));
    }

    proptest! {
        #[test]
        fn unscramble_inverts_scramble(p in ".*") {
            let scrambled = scramble_password(&p);
            prop_assert_eq!(scrambled.len(), p.encode_utf16().count() * 2);
            prop_assert_eq!(unscramble_password(&scrambled).unwrap(), p);
        }

        #[test]
        fn unscramble_bytes_inverts_scramble_bytes(p in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(unscramble_bytes(&scramble_bytes(&p)), p);
        }
    }
}
