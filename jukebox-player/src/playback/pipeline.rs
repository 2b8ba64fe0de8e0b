//! Playback pipeline
//!
//! Streams one item at a time from a [`PcmSource`] to an [`AudioSink`] in
//! fixed-size blocks, owning the process-wide [`PlaybackState`]:
//!
//! ```text
//! Idle → Playing ⇄ Paused
//!          │
//!          ├─ skip ─────→ Skipping → Completed
//!          ├─ end of data ────────→ Completed
//!          └─ read/write error ───→ Failed
//! ```
//!
//! Pause, skip and cancellation are checked at every block boundary, so any
//! of them takes effect within one block of audio.

use super::format::OutputFormat;
use super::signals::ControlSignals;
use super::sink::AudioSink;
use super::source::{read_block, PcmSource};
use crate::error::PlaybackError;
use chrono::{DateTime, Utc};
use jukebox_common::events::{EventBus, JukeboxEvent, PlaybackState, TrackOutcome};
use jukebox_common::Fingerprint;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Item currently owned by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub request_id: Uuid,
    pub fingerprint: Fingerprint,
    pub title: String,
    pub requester: String,
    pub duration_secs: Option<u64>,
    pub started_at: DateTime<Utc>,
}

/// How a streamed item ended
#[derive(Debug)]
pub struct PlaybackReport {
    pub outcome: TrackOutcome,
    pub error: Option<PlaybackError>,
    pub bytes_written: u64,
}

impl PlaybackReport {
    fn new(outcome: TrackOutcome, bytes_written: u64) -> Self {
        Self {
            outcome,
            error: None,
            bytes_written,
        }
    }
}

/// Join handle for a streaming task
pub struct PlaybackHandle {
    task: JoinHandle<PlaybackReport>,
}

impl PlaybackHandle {
    /// Wait for the item to reach a terminal state
    pub async fn finished(self) -> PlaybackReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => PlaybackReport {
                outcome: TrackOutcome::Failed,
                error: Some(PlaybackError::Source(format!("streaming task aborted: {}", e))),
                bytes_written: 0,
            },
        }
    }
}

/// Single active playback pipeline
pub struct PlaybackPipeline {
    state: watch::Sender<PlaybackState>,
    signals: ControlSignals,
    format: OutputFormat,
    write_timeout: Duration,
    now_playing: Mutex<Option<NowPlaying>>,
    events: EventBus,
}

impl PlaybackPipeline {
    pub fn new(format: OutputFormat, write_timeout: Duration, events: EventBus) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            state,
            signals: ControlSignals::new(),
            format,
            write_timeout,
            now_playing: Mutex::new(None),
            events,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    /// True when nothing is streaming (Idle, Completed or Failed)
    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }

    /// Playing, Paused or Skipping
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.now_playing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_paused(&self, paused: bool) {
        debug!("Pause intent: {}", paused);
        self.signals.set_paused(paused);
    }

    /// Flip the pause intent; returns true if now paused
    pub fn toggle_pause(&self) -> bool {
        let paused = self.signals.toggle_pause();
        debug!("Pause intent toggled: {}", paused);
        paused
    }

    pub fn is_pause_requested(&self) -> bool {
        self.signals.is_paused()
    }

    /// Raise skip for the current item; false if nothing is streaming
    pub fn request_skip(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.signals.request_skip();
        true
    }

    /// Raise skip only if `request_id` is still the item streaming
    ///
    /// The check and the signal happen under the now-playing lock, which the
    /// next item cannot take over until this one has been released.
    pub fn request_skip_for(&self, request_id: Uuid) -> bool {
        let now_playing = self.now_playing.lock().unwrap_or_else(|e| e.into_inner());
        let current = now_playing
            .as_ref()
            .is_some_and(|item| item.request_id == request_id);
        if !current || self.is_stopped() {
            return false;
        }
        self.signals.request_skip();
        true
    }

    /// Report idle while waiting for work
    pub fn set_idle(&self) {
        self.transition(PlaybackState::Idle);
    }

    /// Start streaming an item
    ///
    /// Stale skip and pause intents from the previous item are discarded and
    /// the state passes through Idle before Playing.
    pub fn play(
        self: &Arc<Self>,
        item: NowPlaying,
        source: Box<dyn PcmSource>,
        sink: Box<dyn AudioSink>,
        cancel: CancellationToken,
    ) -> PlaybackHandle {
        self.signals.reset();
        self.transition(PlaybackState::Idle);

        info!("Now playing \"{}\" (requested by {})", item.title, item.requester);
        *self.now_playing.lock().unwrap_or_else(|e| e.into_inner()) = Some(item);

        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            let report = pipeline.stream(source, sink, cancel).await;
            pipeline
                .now_playing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            report
        });

        PlaybackHandle { task }
    }

    async fn stream(
        &self,
        mut source: Box<dyn PcmSource>,
        mut sink: Box<dyn AudioSink>,
        cancel: CancellationToken,
    ) -> PlaybackReport {
        let mut block = vec![0u8; self.format.block_size()];
        let mut written: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(written);
            }

            if self.signals.take_skip() {
                self.transition(PlaybackState::Skipping);
                if let Err(e) = sink.flush().await {
                    debug!("Flush after skip failed: {}", e);
                }
                self.transition(PlaybackState::Completed);
                info!("Skipped after {} bytes", written);
                return PlaybackReport::new(TrackOutcome::Skipped, written);
            }

            if self.signals.is_paused() {
                self.transition(PlaybackState::Paused);
                tokio::select! {
                    _ = cancel.cancelled() => return self.cancelled(written),
                    _ = self.signals.skip_requested() => {}
                    _ = self.signals.wait_resumed() => {}
                }
                continue;
            }

            self.transition(PlaybackState::Playing);

            let read = tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(written),
                read = read_block(source.as_mut(), &mut block) => read,
            };
            let n = match read {
                Ok(0) => {
                    if let Err(e) = sink.flush().await {
                        return self.failed(PlaybackError::Sink(e), written);
                    }
                    self.transition(PlaybackState::Completed);
                    debug!("End of data after {} bytes", written);
                    return PlaybackReport::new(TrackOutcome::Completed, written);
                }
                Ok(n) => n,
                Err(e) => return self.failed(e, written),
            };

            let write = tokio::time::timeout(self.write_timeout, sink.write(&block[..n]));
            let written_ok = tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(written),
                result = write => result,
            };
            match written_ok {
                Ok(Ok(())) => written += n as u64,
                Ok(Err(e)) => return self.failed(PlaybackError::Sink(e), written),
                Err(_) => return self.failed(PlaybackError::Stalled(self.write_timeout), written),
            }
        }
    }

    fn cancelled(&self, written: u64) -> PlaybackReport {
        self.transition(PlaybackState::Completed);
        debug!("Playback cancelled after {} bytes", written);
        PlaybackReport::new(TrackOutcome::Cancelled, written)
    }

    fn failed(&self, err: PlaybackError, written: u64) -> PlaybackReport {
        error!("Playback failed after {} bytes: {}", written, err);
        self.transition(PlaybackState::Failed);
        PlaybackReport {
            outcome: TrackOutcome::Failed,
            error: Some(err),
            bytes_written: written,
        }
    }

    fn transition(&self, new_state: PlaybackState) {
        let old_state = self.state.send_replace(new_state);
        if old_state != new_state {
            debug!("Playback state {} → {}", old_state, new_state);
            self.events.emit_lossy(JukeboxEvent::PlaybackStateChanged {
                old_state,
                new_state,
                timestamp: Utc::now(),
            });
        }
    }
}
