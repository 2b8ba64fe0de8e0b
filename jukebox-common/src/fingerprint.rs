//! Content fingerprints for cached media
//!
//! A fingerprint is derived from a normalized source URL and doubles as the
//! cache key and the on-disk file stem. The scheme is ignored and only word
//! characters take part, so `http://` and `https://` spellings of the same
//! address, or trailing punctuation, map to the same asset.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the digest
const FINGERPRINT_LEN: usize = 16;

/// Stable cache key for a source locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a source URL
    pub fn of(url: &str) -> Self {
        let without_scheme = match url.find("://") {
            Some(idx) => &url[idx + 3..],
            None => url,
        };

        let canonical: String = without_scheme
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();

        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex[..FINGERPRINT_LEN].to_string())
    }

    /// Rebuild a fingerprint from a cache file stem
    ///
    /// Returns `None` when the stem could not have been produced by [`Fingerprint::of`].
    pub fn from_stem(stem: &str) -> Option<Self> {
        let valid = stem.len() == FINGERPRINT_LEN
            && stem.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for this fingerprint with the given extension
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
