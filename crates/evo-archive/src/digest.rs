//! Content digests for patches
//!
//! Provides [`PatchDigest`], the `patch_reference` persisted with every
//! variant so downstream tools can locate and deduplicate diffs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3) of a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PatchDigest([u8; 32]);

impl PatchDigest {
    /// Create a digest from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute Blake3 hash of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Combine an ordered sequence of digests into one
    ///
    /// Used to fingerprint a resolved source tree (root patch first).
    #[must_use]
    pub fn chain<'a>(digests: impl IntoIterator<Item = &'a PatchDigest>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for digest in digests {
            hasher.update(&digest.0);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for PatchDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PatchDigest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for PatchDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PatchDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_deterministic() {
        let a = PatchDigest::compute(b"diff --git a/x b/x");
        let b = PatchDigest::compute(b"diff --git a/x b/x");
        assert_eq!(a, b);
        assert_ne!(a, PatchDigest::compute(b"other"));
    }

    #[test]
    fn digest_hex_roundtrip() {
        let digest = PatchDigest::compute(b"patch");
        let parsed: PatchDigest = digest.to_string().parse().unwrap();
        assert_eq!(digest, parsed);
        assert_eq!(digest.short().len(), 16);
    }

    #[test]
    fn chain_is_order_sensitive() {
        let a = PatchDigest::compute(b"a");
        let b = PatchDigest::compute(b"b");
        assert_ne!(PatchDigest::chain([&a, &b]), PatchDigest::chain([&b, &a]));
    }
}
