//! Event types for the jukebox event system
//!
//! Provides the shared event definitions and the EventBus used by the
//! player's components and the SSE endpoint.

mod cache_types;
mod playback_types;

pub use cache_types::EvictionReason;
pub use playback_types::{PlaybackState, SkipSource, TrackOutcome};

use crate::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Jukebox event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeboxEvent {
    /// Playback pipeline changed state
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// A queued request started streaming
    TrackStarted {
        request_id: Uuid,
        fingerprint: Fingerprint,
        title: String,
        requester: String,
        timestamp: DateTime<Utc>,
    },

    /// A request left the pipeline
    TrackFinished {
        request_id: Uuid,
        fingerprint: Fingerprint,
        outcome: TrackOutcome,
        /// Error description when `outcome` is Failed
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Request admitted to the queue
    RequestEnqueued {
        request_id: Uuid,
        url: String,
        requester: String,
        /// 1-based position among waiting requests
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// Request refused at admission
    RequestRejected {
        url: String,
        requester: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Fetching a source failed
    ///
    /// `request_id` is None for fetch-only requests.
    ResolutionFailed {
        request_id: Option<Uuid>,
        url: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// New asset stored in the cache
    AssetResolved {
        fingerprint: Fingerprint,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// Asset removed from the cache
    AssetEvicted {
        fingerprint: Fingerprint,
        reason: EvictionReason,
        timestamp: DateTime<Utc>,
    },

    /// Skip vote counted for the current item
    VoteRecorded {
        request_id: Uuid,
        voter: String,
        votes: usize,
        threshold: usize,
        timestamp: DateTime<Utc>,
    },

    /// Skip raised on the current item
    SkipTriggered {
        request_id: Option<Uuid>,
        source: SkipSource,
        timestamp: DateTime<Utc>,
    },

    /// Waiting requests changed (append or dequeue)
    QueueChanged {
        queue: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },
}

impl JukeboxEvent {
    /// Event name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            JukeboxEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            JukeboxEvent::TrackStarted { .. } => "TrackStarted",
            JukeboxEvent::TrackFinished { .. } => "TrackFinished",
            JukeboxEvent::RequestEnqueued { .. } => "RequestEnqueued",
            JukeboxEvent::RequestRejected { .. } => "RequestRejected",
            JukeboxEvent::ResolutionFailed { .. } => "ResolutionFailed",
            JukeboxEvent::AssetResolved { .. } => "AssetResolved",
            JukeboxEvent::AssetEvicted { .. } => "AssetEvicted",
            JukeboxEvent::VoteRecorded { .. } => "VoteRecorded",
            JukeboxEvent::SkipTriggered { .. } => "SkipTriggered",
            JukeboxEvent::QueueChanged { .. } => "QueueChanged",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use jukebox_common::events::{EventBus, JukeboxEvent, PlaybackState};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(JukeboxEvent::PlaybackStateChanged {
///     old_state: PlaybackState::Idle,
///     new_state: PlaybackState::Playing,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JukeboxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: JukeboxEvent,
    ) -> Result<usize, broadcast::error::SendError<JukeboxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JukeboxEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(8);
        let result = bus.emit(JukeboxEvent::QueueChanged {
            queue: vec![],
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let delivered = bus
            .emit(JukeboxEvent::SkipTriggered {
                request_id: None,
                source: SkipSource::Admin,
                timestamp: Utc::now(),
            })
            .expect("two subscribers");
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.expect("event") {
                JukeboxEvent::SkipTriggered { source, .. } => assert_eq!(source, SkipSource::Admin),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = JukeboxEvent::AssetEvicted {
            fingerprint: Fingerprint::of("https://example.com/a"),
            reason: EvictionReason::OverCapacity,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "AssetEvicted");
        assert_eq!(json["reason"], "over_capacity");
        assert_eq!(event.event_type(), "AssetEvicted");
    }

    #[test]
    fn test_stopped_states() {
        assert!(PlaybackState::Idle.is_stopped());
        assert!(PlaybackState::Completed.is_stopped());
        assert!(PlaybackState::Failed.is_stopped());
        assert!(!PlaybackState::Playing.is_stopped());
        assert!(!PlaybackState::Paused.is_stopped());
        assert!(!PlaybackState::Skipping.is_stopped());
    }
}
