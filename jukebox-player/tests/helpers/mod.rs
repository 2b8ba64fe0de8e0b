//! Test helpers for jukebox-player integration tests
//!
//! In-memory stand-ins for the external collaborators:
//! - FakeFetcher: writes a small file, counts calls, can delay, fail or panic
//! - MemoryOpener / MemorySource: fixed-length PCM without a decoder
//! - FakeConnector / RecordingSink: captures output, can pace, fail or stall

#![allow(dead_code)]

use async_trait::async_trait;
use jukebox_player::cache::Asset;
use jukebox_player::config::PlayerSettings;
use jukebox_player::error::{PlaybackError, ResolutionError, SinkError};
use jukebox_player::fetch::{FetchMetadata, Fetcher, SourceLocator};
use jukebox_player::playback::{AudioSink, PcmSource, SinkConnector, SourceOpener};
use jukebox_player::{Collaborators, Orchestrator};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One output block at the default format
pub const BLOCK: usize = 3200;

// ============================================================================
// Fetcher
// ============================================================================

#[derive(Default)]
pub struct FakeFetcher {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    fail: AtomicBool,
    skip_file: AtomicBool,
    write_first: AtomicBool,
    panic_next: AtomicBool,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let fetcher = Self::default();
        *fetcher.delay.lock().unwrap() = delay;
        Arc::new(fetcher)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Report success without writing anything
    pub fn set_skip_file(&self, skip: bool) {
        self.skip_file.store(skip, Ordering::SeqCst);
    }

    /// Write the file before the delay, as a partial download would
    pub fn set_write_first(&self, early: bool) {
        self.write_first.store(early, Ordering::SeqCst);
    }

    /// Panic inside the next fetch only
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        locator: &SourceLocator,
        destination: &Path,
    ) -> Result<FetchMetadata, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("fetcher blew up on {}", locator);
        }

        let write_first = self.write_first.load(Ordering::SeqCst);
        if write_first {
            tokio::fs::write(destination, b"partial").await?;
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(ResolutionError::FetchFailed("simulated outage".into()));
        }
        if !self.skip_file.load(Ordering::SeqCst) && !write_first {
            tokio::fs::write(destination, b"fake media").await?;
        }

        Ok(FetchMetadata {
            title: title_of(locator.url()),
            duration: Some(Duration::from_secs(180)),
        })
    }
}

/// Title the fake fetcher reports: the last path segment or query value
pub fn title_of(url: &str) -> String {
    url.rsplit(['/', '=']).next().unwrap_or(url).to_string()
}

// ============================================================================
// Source
// ============================================================================

/// PCM source yielding `remaining` bytes of a fixed pattern
pub struct MemorySource {
    remaining: usize,
    chunk: usize,
}

impl MemorySource {
    pub fn new(len: usize) -> Self {
        Self {
            remaining: len,
            chunk: 1000,
        }
    }
}

#[async_trait]
impl PcmSource for MemorySource {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlaybackError> {
        let n = buf.len().min(self.remaining).min(self.chunk);
        buf[..n].fill(0x5a);
        self.remaining -= n;
        Ok(n)
    }
}

/// Opener handing out [`MemorySource`]s and recording what it opened
pub struct MemoryOpener {
    bytes_per_item: usize,
    fail: AtomicBool,
    opened: Mutex<Vec<String>>,
}

impl MemoryOpener {
    pub fn new(bytes_per_item: usize) -> Arc<Self> {
        Arc::new(Self {
            bytes_per_item,
            fail: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Titles opened so far, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceOpener for MemoryOpener {
    async fn open(&self, asset: &Asset) -> Result<Box<dyn PcmSource>, PlaybackError> {
        self.opened.lock().unwrap().push(asset.title.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlaybackError::Decode("simulated corrupt file".into()));
        }
        Ok(Box::new(MemorySource::new(self.bytes_per_item)))
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub enum SinkBehavior {
    #[default]
    Accept,
    /// Sleep this long per write
    Paced(Duration),
    /// Fail with Closed after this many successful writes
    CloseAfter(usize),
    /// Never complete a write
    Stall,
}

/// Everything any sink from one connector wrote
#[derive(Debug, Default)]
pub struct SinkLog {
    pub bytes: AtomicUsize,
    pub writes: AtomicUsize,
    pub flushes: AtomicUsize,
}

impl SinkLog {
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

pub struct RecordingSink {
    log: Arc<SinkLog>,
    behavior: SinkBehavior,
    writes: usize,
    block_sizes: Arc<Mutex<Vec<usize>>>,
}

impl RecordingSink {
    pub fn new(log: Arc<SinkLog>, behavior: SinkBehavior) -> Self {
        Self {
            log,
            behavior,
            writes: 0,
            block_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sizes of every block written, shared with the caller
    pub fn block_sizes(&self) -> Arc<Mutex<Vec<usize>>> {
        self.block_sizes.clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn write(&mut self, block: &[u8]) -> Result<(), SinkError> {
        match self.behavior {
            SinkBehavior::Accept => {}
            SinkBehavior::Paced(delay) => tokio::time::sleep(delay).await,
            SinkBehavior::CloseAfter(limit) if self.writes >= limit => {
                return Err(SinkError::Closed)
            }
            SinkBehavior::CloseAfter(_) => {}
            SinkBehavior::Stall => std::future::pending::<()>().await,
        }
        self.writes += 1;
        self.block_sizes.lock().unwrap().push(block.len());
        self.log.bytes.fetch_add(block.len(), Ordering::SeqCst);
        self.log.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.log.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector producing [`RecordingSink`]s that share one [`SinkLog`]
pub struct FakeConnector {
    connected: AtomicBool,
    behavior: Mutex<SinkBehavior>,
    reconnects: AtomicUsize,
    pub log: Arc<SinkLog>,
}

impl FakeConnector {
    pub fn new(behavior: SinkBehavior) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            behavior: Mutex::new(behavior),
            reconnects: AtomicUsize::new(0),
            log: Arc::new(SinkLog::default()),
        })
    }

    pub fn set_behavior(&self, behavior: SinkBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkConnector for FakeConnector {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        if !self.is_connected() {
            return Err(SinkError::Closed);
        }
        let behavior = *self.behavior.lock().unwrap();
        Ok(Box::new(RecordingSink::new(self.log.clone(), behavior)))
    }

    async fn reconnect(&self) -> Result<(), SinkError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Orchestrator wired to fakes, plus handles on each fake
pub struct TestJukebox {
    pub orchestrator: Arc<Orchestrator>,
    pub fetcher: Arc<FakeFetcher>,
    pub opener: Arc<MemoryOpener>,
    pub connector: Arc<FakeConnector>,
    _dir: tempfile::TempDir,
}

/// Settings with short timings suitable for tests
pub fn test_settings(cache_dir: &Path) -> PlayerSettings {
    let mut settings = PlayerSettings::with_cache_dir(cache_dir);
    settings.idle_poll = Duration::from_millis(20);
    settings.write_timeout = Duration::from_millis(500);
    settings
}

/// Build (but do not start) an orchestrator over fakes
pub fn build_jukebox(
    configure: impl FnOnce(&mut PlayerSettings),
    bytes_per_item: usize,
    behavior: SinkBehavior,
) -> TestJukebox {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = test_settings(dir.path());
    configure(&mut settings);

    let fetcher = FakeFetcher::new();
    let opener = MemoryOpener::new(bytes_per_item);
    let connector = FakeConnector::new(behavior);

    let orchestrator = Orchestrator::new(
        settings,
        Collaborators {
            fetcher: fetcher.clone(),
            opener: opener.clone(),
            connector: connector.clone(),
        },
    )
    .expect("orchestrator");

    TestJukebox {
        orchestrator: Arc::new(orchestrator),
        fetcher,
        opener,
        connector,
        _dir: dir,
    }
}

/// Poll `condition` every 10ms until true or `limit` elapses
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn url(n: usize) -> String {
    format!("https://www.youtube.com/watch?v=track{}", n)
}
