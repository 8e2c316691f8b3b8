use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{KeyError, KeyResult};

/// Number of bytes in a [`VersionGuid`].
pub const GUID_LEN: usize = 12;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A 12-byte identifier pinning an immutable snapshot (a course structure or a
/// definition body).
///
/// Guids produced by [`VersionGuid::derive`] are content-addressed: the first
/// twelve bytes of a domain-separated BLAKE3 hash. The textual form is 24
/// lowercase hex characters; parsing is case-insensitive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionGuid([u8; GUID_LEN]);

impl VersionGuid {
    /// Derive a guid from content bytes under a domain tag.
    pub fn derive(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        let hash = hasher.finalize();
        let mut bytes = [0u8; GUID_LEN];
        bytes.copy_from_slice(&hash.as_bytes()[..GUID_LEN]);
        Self(bytes)
    }

    /// Generate a fresh guid: 4-byte big-endian seconds, 5 random bytes and a
    /// 3-byte process-wide counter.
    pub fn generate() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let mut bytes = [0u8; GUID_LEN];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[4..9]);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        bytes[9..].copy_from_slice(&count[1..]);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; GUID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GUID_LEN] {
        &self.0
    }

    /// Lowercase hex form (24 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 24-character hex string.
    pub fn from_hex(s: &str) -> KeyResult<Self> {
        if s.len() != GUID_LEN * 2 {
            return Err(KeyError::InvalidVersionGuid(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidVersionGuid(s.to_string()))?;
        let mut arr = [0u8; GUID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for VersionGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionGuid({})", self.to_hex())
    }
}

impl fmt::Display for VersionGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for VersionGuid {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for VersionGuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VersionGuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = VersionGuid::derive("structure", b"hello");
        let b = VersionGuid::derive("structure", b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_is_domain_separated() {
        let a = VersionGuid::derive("structure", b"hello");
        let b = VersionGuid::derive("definition", b"hello");
        assert_ne!(a, b);
    }

    #[test]
    fn generated_guids_are_unique() {
        let a = VersionGuid::generate();
        let b = VersionGuid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn parses_mixed_case_hex() {
        let guid = VersionGuid::from_hex("519665F6223EBD6980884F2B").unwrap();
        assert_eq!(guid.to_hex(), "519665f6223ebd6980884f2b");
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            VersionGuid::from_hex("0123ffff"),
            Err(KeyError::InvalidVersionGuid("0123ffff".into()))
        );
    }

    #[test]
    fn rejects_non_hex() {
        assert!(VersionGuid::from_hex("zz9665f6223ebd6980884f2b").is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let guid = VersionGuid::from_hex("519665f6223ebd6980884f2b").unwrap();
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, "\"519665f6223ebd6980884f2b\"");
        let back: VersionGuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, guid);
    }
}
