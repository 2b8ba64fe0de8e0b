//! Cached asset records

use jukebox_common::Fingerprint;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// A media file resident in the cache
///
/// Shared as `Arc<Asset>` by every request that resolved to the same
/// fingerprint. The record is immutable; eviction removes it from the index
/// and deletes the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub title: String,
    pub duration: Option<Duration>,
    /// Resolution time, or the on-disk timestamp for adopted files
    pub created_at: SystemTime,
}

impl Asset {
    /// Age relative to `now`; zero if `created_at` lies in the future
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }
}
