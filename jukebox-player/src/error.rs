//! Error types for jukebox-player
//!
//! One enum per concern so callers can match on exactly what can go wrong:
//! admission happens synchronously at enqueue time, resolution failures are
//! shared between every waiter on a fetch, and playback failures abandon the
//! current item only.

use thiserror::Error;

/// Synchronous enqueue rejection; the request never enters the queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Queue is full ({capacity} requests waiting)")]
    QueueFull { capacity: usize },

    #[error("Invalid source locator: {0}")]
    InvalidLocator(String),
}

/// Failure to turn a locator into a cached asset
///
/// `Clone` because a single in-flight fetch reports its result to every
/// concurrent caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Source not supported: {0}")]
    Unsupported(String),

    #[error("Track too long: {actual_secs}s exceeds limit of {limit_secs}s")]
    TooLong { actual_secs: u64, limit_secs: u64 },

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Fetch reported success but produced no file at {0}")]
    NoFile(String),

    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Resolution cancelled")]
    Cancelled,
}

impl From<std::io::Error> for ResolutionError {
    fn from(err: std::io::Error) -> Self {
        ResolutionError::Io(err.to_string())
    }
}

/// Output sink write failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink did not accept the block in time
    #[error("Sink backpressure")]
    Backpressure,

    /// The transport went away
    #[error("Sink closed")]
    Closed,

    #[error("Sink I/O error: {0}")]
    Io(String),
}

/// Failure while streaming an item; the item is abandoned, the asset stays cached
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Audio source error: {0}")]
    Source(String),

    #[error("Sink stalled for more than {0:?}")]
    Stalled(std::time::Duration),

    #[error("Playback I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Vote rejected before counting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("Can't vote if nothing is playing")]
    NothingPlaying,

    #[error("The item voted on is no longer playing")]
    ItemChanged,
}

/// Main error type for jukebox-player
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] jukebox_common::Error),
}

/// Convenience Result type using the jukebox-player Error
pub type Result<T> = std::result::Result<T, Error>;
