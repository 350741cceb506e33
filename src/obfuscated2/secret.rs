use std::fmt;

use crate::error::{ProxyError, Result};

pub const SECRET_LEN: usize = 16;

/// Prefix marking a secret that only accepts padded (secure) clients
const SECURE_PREFIX: &str = "dd";

/// Pre-shared proxy secret
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    bytes: [u8; SECRET_LEN],
    secure_only: bool,
}

impl Secret {
    /// Parse a 32-char hex secret, optionally prefixed with `dd`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (hex_part, secure_only) = if s.len() == SECRET_LEN * 2 + SECURE_PREFIX.len()
            && s
                .get(..SECURE_PREFIX.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(SECURE_PREFIX))
        {
            (&s[SECURE_PREFIX.len()..], true)
        } else {
            (s, false)
        };

        if hex_part.len() != SECRET_LEN * 2 {
            return Err(ProxyError::Config(format!(
                "secret must be {} hex characters, got {}",
                SECRET_LEN * 2,
                hex_part.len()
            )));
        }

        let mut bytes = [0u8; SECRET_LEN];
        hex::decode_to_slice(hex_part, &mut bytes)?;
        Ok(Self { bytes, secure_only })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_secure_only(&self) -> bool {
        self.secure_only
    }

    /// Hex form as handed to clients
    pub fn to_hex(&self) -> String {
        if self.secure_only {
            format!("{}{}", SECURE_PREFIX, hex::encode(self.bytes))
        } else {
            hex::encode(self.bytes)
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn test_parse_plain_secret() {
        let secret = Secret::parse(HEX).unwrap();
        assert!(!secret.is_secure_only());
        assert_eq!(secret.as_bytes()[0], 0x00);
        assert_eq!(secret.as_bytes()[15], 0xff);
        assert_eq!(secret.to_hex(), HEX);
    }

    #[test]
    fn test_parse_secure_secret() {
        let secret = Secret::parse(&format!("dd{}", HEX)).unwrap();
        assert!(secret.is_secure_only());
        assert_eq!(secret.as_bytes()[1], 0x11);
        assert_eq!(secret.to_hex(), format!("dd{}", HEX));
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert!(Secret::parse("0011").is_err());
        assert!(Secret::parse(&format!("{}00", HEX)).is_err());
        assert!(Secret::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let err = Secret::parse("zz112233445566778899aabbccddeeff").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_debug_is_hex() {
        let secret = Secret::parse(HEX).unwrap();
        assert_eq!(format!("{:?}", secret), HEX);
    }
}
