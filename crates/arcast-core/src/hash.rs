//! Content hashing for uploaded images.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 hex digest of an image's bytes. Empty when never computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() > 12 {
            f.write_str(&self.0[..12])
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Whether features must be re-extracted for an image whose new hash is
/// `current`, given the hash stored with the previous version.
///
/// A missing or never-computed previous hash always recomputes.
pub fn needs_recompute(previous: Option<&ContentHash>, current: &ContentHash) -> bool {
    match previous {
        Some(prev) if !prev.is_empty() => prev != current,
        _ => true,
    }
}
