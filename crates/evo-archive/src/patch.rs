//! Opaque diff carried by a variant

use crate::digest::PatchDigest;
use serde::{Deserialize, Serialize};

/// A unified diff relative to the parent's resolved source tree
///
/// The archive never interprets the diff; only the sandbox applies it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(String);

impl Patch {
    /// Wrap diff text
    #[inline]
    #[must_use]
    pub fn new(diff: impl Into<String>) -> Self {
        Self(diff.into())
    }

    /// The no-op patch
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Raw diff text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the diff is empty or whitespace only
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Content digest used as the persisted patch reference
    #[inline]
    #[must_use]
    pub fn digest(&self) -> PatchDigest {
        PatchDigest::compute(self.0.as_bytes())
    }

    /// Number of diff lines
    #[inline]
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.0.lines().count()
    }
}

impl From<String> for Patch {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Patch {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_patch_is_blank() {
        assert!(Patch::empty().is_blank());
        assert!(Patch::new("   \n\t  ").is_blank());
        assert!(!Patch::new("+fn main() {}").is_blank());
    }

    #[test]
    fn digest_follows_content() {
        assert_eq!(Patch::new("a").digest(), Patch::from("a").digest());
        assert_ne!(Patch::new("a").digest(), Patch::new("b").digest());
    }
}
