//! Queue worker
//!
//! The only consumer of the request queue. One pass:
//! 1. Wait while the output is disconnected or the queue is empty
//! 2. Pop the head and resolve it through the cache (pinned for playback)
//! 3. Open the decoder and an output stream
//! 4. Hand both to the pipeline and wait for a terminal outcome
//!
//! Waiting on step 4 is what keeps playback to one item at a time.

use crate::cache::CacheStore;
use crate::error::{PlaybackError, ResolutionError};
use crate::fetch::Fetcher;
use crate::playback::{NowPlaying, PlaybackPipeline, SinkConnector, SourceOpener};
use crate::queue::{Request, RequestQueue};
use crate::vote::VoteTally;
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent, TrackOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything the worker loop touches
#[derive(Clone)]
pub struct QueueWorker {
    pub queue: Arc<RequestQueue>,
    pub cache: CacheStore,
    pub votes: Arc<VoteTally>,
    pub pipeline: Arc<PlaybackPipeline>,
    pub fetcher: Arc<dyn Fetcher>,
    pub opener: Arc<dyn SourceOpener>,
    pub connector: Arc<dyn SinkConnector>,
    pub events: EventBus,
    pub idle_poll: Duration,
}

impl QueueWorker {
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("Queue worker started");

        while !cancel.is_cancelled() {
            if !self.connector.is_connected() {
                self.pipeline.set_idle();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_poll) => {}
                }
                continue;
            }

            let Some(request) = self.queue.pop_front() else {
                self.pipeline.set_idle();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.queue.wait_for_item(self.idle_poll) => {}
                }
                continue;
            };

            self.events.emit_lossy(JukeboxEvent::QueueChanged {
                queue: self.queue.ids(),
                timestamp: Utc::now(),
            });

            self.serve(request, &cancel).await;
        }

        info!("Queue worker stopped");
    }

    async fn serve(&self, request: Request, cancel: &CancellationToken) {
        debug!("Serving {} for {}", request.locator, request.requester);

        let acquired = tokio::select! {
            _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
            acquired = self.cache.acquire(&request.locator, self.fetcher.clone()) => acquired,
        };
        let (asset, pin) = match acquired {
            Ok(acquired) => acquired,
            Err(ResolutionError::Cancelled) => {
                debug!("Stopped resolving {} on shutdown", request.locator);
                return;
            }
            Err(e) => {
                warn!("Could not resolve {}: {}", request.locator, e);
                self.events.emit_lossy(JukeboxEvent::ResolutionFailed {
                    request_id: Some(request.id),
                    url: request.locator.url().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return;
            }
        };

        self.votes.begin_item(request.id);

        let streams = async {
            let source = self.opener.open(&asset).await?;
            let sink = self.connector.open_sink().await?;
            Ok::<_, PlaybackError>((source, sink))
        };
        let (source, sink) = match streams.await {
            Ok(streams) => streams,
            Err(e) => {
                error!("Could not start \"{}\": {}", asset.title, e);
                self.votes.reset();
                self.events.emit_lossy(JukeboxEvent::TrackFinished {
                    request_id: request.id,
                    fingerprint: asset.fingerprint.clone(),
                    outcome: TrackOutcome::Failed,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                });
                return;
            }
        };

        let item = NowPlaying {
            request_id: request.id,
            fingerprint: asset.fingerprint.clone(),
            title: asset.title.clone(),
            requester: request.requester.clone(),
            duration_secs: asset.duration.map(|d| d.as_secs()),
            started_at: Utc::now(),
        };
        self.events.emit_lossy(JukeboxEvent::TrackStarted {
            request_id: request.id,
            fingerprint: asset.fingerprint.clone(),
            title: asset.title.clone(),
            requester: request.requester.clone(),
            timestamp: Utc::now(),
        });

        let report = self
            .pipeline
            .play(item, source, sink, cancel.child_token())
            .finished()
            .await;

        self.votes.reset();
        drop(pin);

        info!(
            "Finished \"{}\": {} ({} bytes)",
            asset.title, report.outcome, report.bytes_written
        );
        self.events.emit_lossy(JukeboxEvent::TrackFinished {
            request_id: request.id,
            fingerprint: asset.fingerprint.clone(),
            outcome: report.outcome,
            error: report.error.map(|e| e.to_string()),
            timestamp: Utc::now(),
        });
    }
}
