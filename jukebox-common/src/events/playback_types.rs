//! Playback-related type definitions

use serde::{Deserialize, Serialize};

/// Playback pipeline state
///
/// Exactly one pipeline exists per process, so this is the state of the
/// whole player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing loaded (startup, empty queue, sink disconnected)
    #[default]
    Idle,
    /// Streaming blocks to the sink
    Playing,
    /// Source and sink held open, position preserved
    Paused,
    /// Skip observed; flushing before the item is retired
    Skipping,
    /// Unrecoverable read/write error on the last item
    Failed,
    /// Last item reached its end (or was skipped/cancelled)
    Completed,
}

impl PlaybackState {
    /// True when nothing is streaming and the sink may be reconnected
    pub fn is_stopped(self) -> bool {
        matches!(
            self,
            PlaybackState::Idle | PlaybackState::Completed | PlaybackState::Failed
        )
    }

    /// An item owns the pipeline
    pub fn is_active(self) -> bool {
        !self.is_stopped()
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Skipping => write!(f, "skipping"),
            PlaybackState::Failed => write!(f, "failed"),
            PlaybackState::Completed => write!(f, "completed"),
        }
    }
}

/// How an item left the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackOutcome {
    /// Source reached end of data
    Completed,
    /// Skip signal observed (vote threshold or admin)
    Skipped,
    /// Read, write or backpressure error
    Failed,
    /// Shutdown requested mid-item
    Cancelled,
}

impl std::fmt::Display for TrackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackOutcome::Completed => write!(f, "completed"),
            TrackOutcome::Skipped => write!(f, "skipped"),
            TrackOutcome::Failed => write!(f, "failed"),
            TrackOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Who asked for a skip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SkipSource {
    Vote,
    Admin,
}
