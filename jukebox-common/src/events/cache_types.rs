//! Cache-related type definitions

use serde::{Deserialize, Serialize};

/// Why a cached asset was removed from disk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Resident count exceeded the file cap; oldest asset reclaimed
    OverCapacity,
    /// Asset outlived the TTL
    Expired,
    /// Untracked file found on disk past the TTL
    Orphaned,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::OverCapacity => write!(f, "over_capacity"),
            EvictionReason::Expired => write!(f, "expired"),
            EvictionReason::Orphaned => write!(f, "orphaned"),
        }
    }
}
