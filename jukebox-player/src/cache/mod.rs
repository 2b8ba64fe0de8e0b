//! Content-addressed media cache
//!
//! Maps fingerprints to files under a single directory, deduplicates
//! concurrent fetches, and retires files by count and by age.

mod asset;
mod store;

pub use asset::Asset;
pub use store::{AssetPin, CacheSettings, CacheStore, SweepReport};
