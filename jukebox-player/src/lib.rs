//! # Jukebox Player Library (jukebox-player)
//!
//! Single-consumer playback orchestrator for a shared listening stream.
//!
//! **Purpose:** Admit play requests into a bounded FIFO, resolve each through
//! a deduplicating local cache, stream it to one output at a fixed block rate,
//! and let listeners pause, skip or vote the current item away.
//!
//! **Architecture:** One queue worker task drives the playback pipeline; the
//! HTTP/SSE API only touches the orchestrator's inbound operations.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod playback;
pub mod queue;
pub mod vote;
pub mod worker;

pub use error::{Error, Result};
pub use orchestrator::{Collaborators, Orchestrator};
