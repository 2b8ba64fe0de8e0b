//! # Jukebox Common Library
//!
//! Shared code for the jukebox player and its tooling:
//! - Error types
//! - Bootstrap configuration (TOML file, directory resolution)
//! - Event types (JukeboxEvent enum) and the EventBus
//! - Cache fingerprints
//! - Human-readable duration helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod human_time;

pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
