//! Cache key derivation from resource identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::entities::CacheKey;

/// Number of digest bytes kept in a SHA-256 key (32 hex characters).
const SHA256_KEY_BYTES: usize = 16;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Digest used to turn identifiers into cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDigest {
    /// Truncated SHA-256, hex encoded.
    #[default]
    Sha256,
    /// 64-bit FNV-1a of the identifier bytes.
    ///
    /// Deterministic across runs but far weaker against collisions. Only
    /// used when the configured digest is not available.
    Fnv1a,
}

impl KeyDigest {
    /// Resolves a digest by its configured name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Some(Self::Sha256),
            "fnv1a" | "fnv" => Some(Self::Fnv1a),
            _ => None,
        }
    }
}

/// Derives fixed-length hex cache keys from identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver {
    digest: KeyDigest,
}

impl KeyDeriver {
    /// Creates a deriver using `digest`.
    #[must_use]
    pub const fn new(digest: KeyDigest) -> Self {
        Self { digest }
    }

    /// Creates a deriver for the configured digest name.
    ///
    /// An unknown name never fails the caller: the deriver falls back to
    /// [`KeyDigest::Fnv1a`], which lowers collision resistance but keeps keys
    /// deterministic and stable across restarts.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        KeyDigest::from_name(name).map_or_else(
            || {
                warn!(digest = name, "Key digest unavailable, falling back to FNV-1a");
                Self::new(KeyDigest::Fnv1a)
            },
            Self::new,
        )
    }

    /// Derives the cache key for `identifier`.
    #[must_use]
    pub fn derive(&self, identifier: &str) -> CacheKey {
        match self.digest {
            KeyDigest::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(identifier.as_bytes());
                let result = hasher.finalize();
                CacheKey::new(hex::encode(&result[..SHA256_KEY_BYTES]))
            }
            KeyDigest::Fnv1a => CacheKey::new(format!("{:016x}", fnv1a(identifier.as_bytes()))),
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_key_is_fixed_length_hex() {
        let key = KeyDeriver::default().derive("https://example.com/a.png");
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_is_stable() {
        // First 16 bytes of SHA-256("abc").
        let key = KeyDeriver::default().derive("abc");
        assert_eq!(key.as_str(), "ba7816bf8f01cfea414140de5dae2223");
    }

    #[test]
    fn test_distinct_identifiers_get_distinct_keys() {
        let deriver = KeyDeriver::default();
        assert_ne!(
            deriver.derive("https://example.com/a.png"),
            deriver.derive("https://example.com/b.png")
        );
        assert_eq!(
            deriver.derive("https://example.com/a.png"),
            deriver.derive("https://example.com/a.png")
        );
    }

    #[test]
    fn test_unknown_digest_falls_back() {
        let deriver = KeyDeriver::from_name("whirlpool");

        let key = deriver.derive("");
        assert_eq!(key.as_str(), "cbf29ce484222325");
        assert_eq!(deriver.derive("a").as_str(), "af63dc4c8601ec8c");
    }

    #[test]
    fn test_digest_names() {
        assert_eq!(KeyDigest::from_name("SHA256"), Some(KeyDigest::Sha256));
        assert_eq!(KeyDigest::from_name(" fnv1a "), Some(KeyDigest::Fnv1a));
        assert_eq!(KeyDigest::from_name("md4"), None);
    }
}
