//! Orchestrator
//!
//! Built once at startup and shared as `Arc<Orchestrator>`. Owns the queue,
//! cache, vote tally and pipeline together with the external collaborators,
//! and exposes the inbound operations used by the HTTP API.
//!
//! Background tasks started by [`Orchestrator::start`]:
//! - queue worker
//! - cache sweeper
//! - output keep-alive (reconnects the sink while playback is stopped)
//!
//! All of them observe children of one cancellation token;
//! [`Orchestrator::shutdown`] cancels it and waits for them.

use crate::cache::{Asset, CacheSettings, CacheStore};
use crate::config::PlayerSettings;
use crate::error::{AdmissionError, Error, ResolutionError, Result, VoteError};
use crate::fetch::{Fetcher, SourceLocator};
use crate::playback::{NowPlaying, OutputFormat, PlaybackPipeline, SinkConnector, SourceOpener};
use crate::queue::{Request, RequestQueue};
use crate::vote::{VoteOutcome, VoteTally};
use crate::worker::QueueWorker;
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent, PlaybackState, SkipSource};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// External components the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub opener: Arc<dyn SourceOpener>,
    pub connector: Arc<dyn SinkConnector>,
}

/// Accepted enqueue
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueReceipt {
    pub request_id: Uuid,
    pub url: String,
    /// 1-based position among waiting requests
    pub position: usize,
}

pub struct Orchestrator {
    settings: PlayerSettings,
    queue: Arc<RequestQueue>,
    cache: CacheStore,
    votes: Arc<VoteTally>,
    pipeline: Arc<PlaybackPipeline>,
    collaborators: Collaborators,
    events: EventBus,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(settings: PlayerSettings, collaborators: Collaborators) -> Result<Self> {
        settings.validate()?;

        let events = EventBus::new(settings.event_capacity);
        let cache = CacheStore::new(
            CacheSettings {
                directory: settings.cache_dir.clone(),
                extension: settings.cache_extension.clone(),
                max_files: settings.max_files,
                ttl: settings.ttl,
                sweep_interval: settings.sweep_interval,
            },
            events.clone(),
        )?;
        let pipeline = Arc::new(PlaybackPipeline::new(
            OutputFormat::new(settings.blocks_per_second),
            settings.write_timeout,
            events.clone(),
        ));

        Ok(Self {
            queue: Arc::new(RequestQueue::new(settings.max_requests)),
            cache,
            votes: Arc::new(VoteTally::new()),
            pipeline,
            collaborators,
            events,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            settings,
        })
    }

    /// Spawn the worker, sweeper and keep-alive tasks
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            warn!("Orchestrator already started");
            return;
        }

        let worker = QueueWorker {
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            votes: self.votes.clone(),
            pipeline: self.pipeline.clone(),
            fetcher: self.collaborators.fetcher.clone(),
            opener: self.collaborators.opener.clone(),
            connector: self.collaborators.connector.clone(),
            events: self.events.clone(),
            idle_poll: self.settings.idle_poll,
        };
        tasks.push(worker.spawn(self.shutdown.child_token()));
        tasks.push(self.cache.spawn_sweeper(self.shutdown.child_token()));
        tasks.push(self.spawn_keepalive());

        info!("Orchestrator started ({} background tasks)", tasks.len());
    }

    fn spawn_keepalive(&self) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let connector = self.collaborators.connector.clone();
        let period = self.settings.keepalive_interval;
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if pipeline.is_stopped() {
                            debug!("Playback stopped, refreshing output connection");
                            if let Err(e) = connector.reconnect().await {
                                warn!("Output reconnect failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Admit a play request
    ///
    /// Rejected requests never enter the queue. With prefetch enabled, the
    /// fetch starts immediately; the worker later joins the same in-flight
    /// resolution or hits the cache.
    pub fn enqueue(&self, url: &str, requester: &str) -> std::result::Result<EnqueueReceipt, AdmissionError> {
        let admitted = SourceLocator::parse(url).and_then(|locator| {
            let request = Request::new(locator, requester);
            let id = request.id;
            let locator = request.locator.clone();
            self.queue.push(request).map(|position| (id, locator, position))
        });

        let (request_id, locator, position) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                info!("Rejected request from {}: {}", requester, e);
                self.events.emit_lossy(JukeboxEvent::RequestRejected {
                    url: url.to_string(),
                    requester: requester.to_string(),
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };

        info!("Queued {} for {} at position {}", locator, requester, position);
        self.events.emit_lossy(JukeboxEvent::RequestEnqueued {
            request_id,
            url: locator.url().to_string(),
            requester: requester.to_string(),
            position,
            timestamp: Utc::now(),
        });
        self.events.emit_lossy(JukeboxEvent::QueueChanged {
            queue: self.queue.ids(),
            timestamp: Utc::now(),
        });

        if self.settings.prefetch_on_enqueue {
            self.prefetch(request_id, locator.clone());
        }

        Ok(EnqueueReceipt {
            request_id,
            url: locator.url().to_string(),
            position,
        })
    }

    fn prefetch(&self, request_id: Uuid, locator: SourceLocator) {
        let cache = self.cache.clone();
        let fetcher = self.collaborators.fetcher.clone();
        let events = self.events.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let resolved = tokio::select! {
                _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
                resolved = cache.resolve(&locator, fetcher) => resolved,
            };
            match resolved {
                Ok(_) => {}
                Err(ResolutionError::Cancelled) => debug!("Prefetch of {} cancelled", locator),
                Err(e) => events.emit_lossy(JukeboxEvent::ResolutionFailed {
                    request_id: Some(request_id),
                    url: locator.url().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                }),
            }
        });
    }

    /// Fetch into the cache without queueing playback
    pub async fn fetch_only(&self, url: &str) -> Result<Arc<Asset>> {
        let locator = SourceLocator::parse(url)?;
        match self
            .cache
            .resolve(&locator, self.collaborators.fetcher.clone())
            .await
        {
            Ok(asset) => Ok(asset),
            Err(e) => {
                self.events.emit_lossy(JukeboxEvent::ResolutionFailed {
                    request_id: None,
                    url: locator.url().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(Error::Resolution(e))
            }
        }
    }

    /// Count a skip vote against the current item
    pub fn vote(&self, voter: &str, listeners: usize) -> std::result::Result<VoteOutcome, VoteError> {
        let current = match self.pipeline.now_playing() {
            Some(item) if !self.pipeline.is_stopped() => item,
            _ => return Err(VoteError::NothingPlaying),
        };

        let outcome = self.votes.vote(current.request_id, voter, listeners)?;
        match outcome {
            VoteOutcome::Recorded { votes, threshold } => {
                self.events.emit_lossy(JukeboxEvent::VoteRecorded {
                    request_id: current.request_id,
                    voter: voter.to_string(),
                    votes,
                    threshold,
                    timestamp: Utc::now(),
                });
            }
            VoteOutcome::ThresholdReached { votes, threshold } => {
                if !self.pipeline.request_skip_for(current.request_id) {
                    debug!("\"{}\" ended before the vote skip landed", current.title);
                    return Ok(outcome);
                }
                info!("Vote skip on \"{}\" ({}/{})", current.title, votes, threshold);
                self.events.emit_lossy(JukeboxEvent::SkipTriggered {
                    request_id: Some(current.request_id),
                    source: SkipSource::Vote,
                    timestamp: Utc::now(),
                });
            }
            VoteOutcome::AlreadyVoted { .. } => {}
        }
        Ok(outcome)
    }

    pub fn set_pause(&self, paused: bool) {
        self.pipeline.set_paused(paused);
    }

    /// Returns true if now paused
    pub fn toggle_pause(&self) -> bool {
        self.pipeline.toggle_pause()
    }

    /// Skip the current item regardless of votes; false if nothing is playing
    pub fn force_skip(&self) -> bool {
        let current = self.pipeline.now_playing().map(|item| item.request_id);
        if !self.pipeline.request_skip() {
            return false;
        }
        info!("Admin skip");
        self.events.emit_lossy(JukeboxEvent::SkipTriggered {
            request_id: current,
            source: SkipSource::Admin,
            timestamp: Utc::now(),
        });
        true
    }

    /// Waiting requests, head first
    pub fn queue_snapshot(&self) -> Vec<Request> {
        self.queue.snapshot()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.pipeline.now_playing()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.pipeline.state()
    }

    pub fn is_paused(&self) -> bool {
        self.pipeline.is_pause_requested()
    }

    pub fn votes(&self) -> usize {
        self.votes.votes()
    }

    pub fn pipeline(&self) -> &Arc<PlaybackPipeline> {
        &self.pipeline
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel background work, wait for it, and release the output
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("Background task did not stop within 5s");
            }
        }

        let dropped = self.queue.clear();
        if dropped > 0 {
            info!("Dropped {} waiting requests", dropped);
        }
        self.collaborators.connector.disconnect().await;
        info!("Orchestrator stopped");
    }
}
