use std::{fmt, ops::Deref, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::utils::{hex_decode, hex_encode};

/// A torrent's 20-byte SHA-1 info hash, used as its tracker identity.
#[derive(Clone, Copy, Deserialize, Serialize, Debug, Eq, Hash, PartialEq)]
pub struct InfoHash(pub [u8; 20]);

impl From<[u8; 20]> for InfoHash {
    fn from(bytes: [u8; 20]) -> Self {
        InfoHash(bytes)
    }
}

impl TryFrom<&[u8]> for InfoHash {
    type Error = &'static str;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 20]>::try_from(bytes)
            .map(InfoHash)
            .map_err(|_| "info_hash must be 20 bytes")
    }
}

impl FromStr for InfoHash {
    type Err = &'static str;

    /// Parses a 40-character hex string, as used in the DB and in test data.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();

        if bytes.len() != 40 {
            return Err("info_hash hex string must be 40 characters");
        }

        let mut out = [0u8; 20];

        for (i, slot) in out.iter_mut().enumerate() {
            *slot = hex_decode([bytes[i * 2], bytes[i * 2 + 1]]).ok_or("invalid hex digit")?;
        }

        Ok(InfoHash(out))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [0u8; 40];

        for (i, byte) in self.0.iter().enumerate() {
            let [hi, lo] = hex_encode(*byte);
            out[i * 2] = hi;
            out[i * 2 + 1] = lo;
        }

        f.write_str(std::str::from_utf8(&out).unwrap())
    }
}

impl Deref for InfoHash {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A 20-byte client-chosen peer identifier.
#[derive(Clone, Copy, Deserialize, Serialize, Debug, Eq, Hash, PartialEq)]
pub struct PeerId(pub [u8; 20]);

impl From<[u8; 20]> for PeerId {
    fn from(bytes: [u8; 20]) -> Self {
        PeerId(bytes)
    }
}

impl Deref for PeerId {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PeerId {
    /// True if this peer id begins with the given client prefix, used for
    /// both the whitelist check and the legacy client-blacklist check.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

/// A user's 32-character opaque passkey, embedded in the announce URL.
#[derive(Clone, Copy, Deserialize, Serialize, Debug, Eq, Hash, PartialEq)]
pub struct Passkey(pub [u8; 32]);

impl FromStr for Passkey {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();

        if bytes.len() != 32 || !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return Err("passkey must be 32 ascii alphanumeric characters");
        }

        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);

        Ok(Passkey(out))
    }
}

impl fmt::Display for Passkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(&self.0).unwrap_or("<invalid-passkey>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_hash_display_roundtrips_through_from_str() {
        let hash = InfoHash([0xAB; 20]);
        let text = hash.to_string();
        let parsed: InfoHash = text.parse().unwrap();

        assert_eq!(hash, parsed);
    }

    #[test]
    fn passkey_rejects_wrong_length() {
        assert!(Passkey::from_str("tooshort").is_err());
    }

    #[test]
    fn passkey_accepts_32_chars() {
        let pk = "a".repeat(32);
        assert!(Passkey::from_str(&pk).is_ok());
    }
}
