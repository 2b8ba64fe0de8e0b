//! Cache store
//!
//! **Resolution:** hit → return; in flight → join the same shared future;
//! miss → spawn exactly one fetch task and share its result with every
//! caller that arrives before it finishes.
//!
//! **Eviction:**
//! - Count: after each successful resolution, reclaim the oldest asset by
//!   creation time until at most `max_files` remain
//! - TTL: periodic sweep deletes tracked assets older than `ttl`
//! - Orphans: periodic sweep deletes stale untracked files and adopts fresh ones
//!
//! Fingerprints that are in flight or pinned for playback are never chosen
//! by any eviction pass.

use super::Asset;
use crate::error::ResolutionError;
use crate::fetch::{Fetcher, SourceLocator};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use jukebox_common::config::ensure_directory;
use jukebox_common::events::{EventBus, EvictionReason, JukeboxEvent};
use jukebox_common::Fingerprint;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedResolution = Shared<BoxFuture<'static, Result<Arc<Asset>, ResolutionError>>>;

type PinCounts = Arc<Mutex<HashMap<Fingerprint, usize>>>;

/// Cache store parameters
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub extension: String,
    pub max_files: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub orphans_deleted: usize,
    pub orphans_adopted: usize,
    pub expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.orphans_deleted == 0 && self.orphans_adopted == 0 && self.expired == 0
    }
}

struct InFlight {
    fetch_id: u64,
    shared: SharedResolution,
}

#[derive(Default)]
struct CacheIndex {
    assets: HashMap<Fingerprint, Arc<Asset>>,
    in_flight: HashMap<Fingerprint, InFlight>,
}

impl CacheIndex {
    /// Drop the in-flight marker if it still belongs to `fetch_id`
    fn finish_fetch(&mut self, fingerprint: &Fingerprint, fetch_id: u64) {
        if self
            .in_flight
            .get(fingerprint)
            .is_some_and(|pending| pending.fetch_id == fetch_id)
        {
            self.in_flight.remove(fingerprint);
        }
    }
}

struct Inner {
    settings: CacheSettings,
    index: AsyncMutex<CacheIndex>,
    next_fetch_id: AtomicU64,
    pins: PinCounts,
    events: EventBus,
}

/// Shared handle to the cache
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

/// Keeps an asset out of every eviction pass until dropped
#[derive(Debug)]
pub struct AssetPin {
    fingerprint: Fingerprint,
    pins: PinCounts,
}

impl AssetPin {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for AssetPin {
    fn drop(&mut self) {
        let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = pins.get_mut(&self.fingerprint) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.fingerprint);
            }
        }
    }
}

impl CacheStore {
    /// Create a store rooted at `settings.directory`, creating it if needed
    ///
    /// Existing files are not indexed here; the first sweep adopts them.
    pub fn new(settings: CacheSettings, events: EventBus) -> jukebox_common::Result<Self> {
        ensure_directory(&settings.directory)?;
        info!(
            "Cache store at {} (max {} files, ttl {:?})",
            settings.directory.display(),
            settings.max_files,
            settings.ttl
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                index: AsyncMutex::new(CacheIndex::default()),
                next_fetch_id: AtomicU64::new(0),
                pins: Arc::new(Mutex::new(HashMap::new())),
                events,
            }),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.inner.settings.directory
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Path a fingerprint's file lives at
    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.inner
            .settings
            .directory
            .join(fingerprint.file_name(&self.inner.settings.extension))
    }

    /// Resolve `locator` to a cached asset, fetching it if needed
    ///
    /// Concurrent calls for the same fingerprint share one fetch and receive
    /// the same asset or the same error. The fetch runs in its own task, so
    /// dropping this future does not abort it for the other waiters.
    pub async fn resolve(
        &self,
        locator: &SourceLocator,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Arc<Asset>, ResolutionError> {
        let fingerprint = locator.fingerprint().clone();

        let pending = {
            let mut index = self.inner.index.lock().await;

            if let Some(asset) = index.assets.get(&fingerprint).cloned() {
                if tokio::fs::try_exists(&asset.path).await.unwrap_or(false) {
                    debug!("Cache hit for {} ({})", fingerprint, asset.title);
                    return Ok(asset);
                }
                warn!(
                    "Cached file {} vanished, fetching again",
                    asset.path.display()
                );
                index.assets.remove(&fingerprint);
            }

            match index.in_flight.get(&fingerprint) {
                Some(existing) => {
                    debug!("Joining in-flight fetch for {}", fingerprint);
                    existing.shared.clone()
                }
                None => {
                    debug!("Cache miss for {}, starting fetch", fingerprint);
                    let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let shared = self.spawn_fetch(locator.clone(), fetcher, fetch_id);
                    index.in_flight.insert(
                        fingerprint,
                        InFlight {
                            fetch_id,
                            shared: shared.clone(),
                        },
                    );
                    shared
                }
            }
        };

        pending.await
    }

    /// Resolve and pin in one step
    ///
    /// The pin is taken under the index lock after confirming the asset is
    /// still tracked, so no eviction can slip in between.
    pub async fn acquire(
        &self,
        locator: &SourceLocator,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Arc<Asset>, AssetPin), ResolutionError> {
        loop {
            let asset = self.resolve(locator, fetcher.clone()).await?;

            let index = self.inner.index.lock().await;
            let still_tracked = index
                .assets
                .get(&asset.fingerprint)
                .is_some_and(|current| Arc::ptr_eq(current, &asset));
            if still_tracked {
                let pin = self.pin(&asset.fingerprint);
                return Ok((asset, pin));
            }
            drop(index);

            debug!("{} evicted before it could be pinned, resolving again", asset.fingerprint);
        }
    }

    /// Pin a fingerprint for playback
    pub fn pin(&self, fingerprint: &Fingerprint) -> AssetPin {
        let mut pins = self.inner.pins.lock().unwrap_or_else(|e| e.into_inner());
        *pins.entry(fingerprint.clone()).or_insert(0) += 1;
        AssetPin {
            fingerprint: fingerprint.clone(),
            pins: self.inner.pins.clone(),
        }
    }

    pub fn is_pinned(&self, fingerprint: &Fingerprint) -> bool {
        self.pinned().contains(fingerprint)
    }

    fn pinned(&self) -> HashSet<Fingerprint> {
        let pins = self.inner.pins.lock().unwrap_or_else(|e| e.into_inner());
        pins.keys().cloned().collect()
    }

    /// Run the fetch in its own task and share its result
    ///
    /// A fetch task that panics never reaches its own cleanup, so the shared
    /// wrapper clears the in-flight marker in that case.
    fn spawn_fetch(
        &self,
        locator: SourceLocator,
        fetcher: Arc<dyn Fetcher>,
        fetch_id: u64,
    ) -> SharedResolution {
        let fingerprint = locator.fingerprint().clone();
        let handle = {
            let store = self.clone();
            tokio::spawn(async move { store.run_fetch(locator, fetcher, fetch_id).await })
        };
        let store = self.clone();

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Fetch task for {} aborted: {}", fingerprint, e);
                    store
                        .inner
                        .index
                        .lock()
                        .await
                        .finish_fetch(&fingerprint, fetch_id);
                    Err(ResolutionError::FetchFailed(format!("fetch task aborted: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_fetch(
        &self,
        locator: SourceLocator,
        fetcher: Arc<dyn Fetcher>,
        fetch_id: u64,
    ) -> Result<Arc<Asset>, ResolutionError> {
        let fingerprint = locator.fingerprint().clone();
        let destination = self.path_for(&fingerprint);

        let fetched = fetcher.fetch(&locator, &destination).await;
        let fetched = match fetched {
            Ok(metadata) => match tokio::fs::try_exists(&destination).await {
                Ok(true) => Ok(metadata),
                Ok(false) => Err(ResolutionError::NoFile(destination.display().to_string())),
                Err(e) => Err(ResolutionError::from(e)),
            },
            Err(e) => Err(e),
        };

        let mut index = self.inner.index.lock().await;
        index.finish_fetch(&fingerprint, fetch_id);

        let metadata = match fetched {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Fetch of {} failed: {}", locator, e);
                return Err(e);
            }
        };

        let asset = Arc::new(Asset {
            fingerprint: fingerprint.clone(),
            path: destination,
            title: metadata.title,
            duration: metadata.duration,
            created_at: SystemTime::now(),
        });
        index.assets.insert(fingerprint.clone(), asset.clone());
        info!("Cached \"{}\" as {}", asset.title, fingerprint);

        self.inner.events.emit_lossy(JukeboxEvent::AssetResolved {
            fingerprint: fingerprint.clone(),
            title: asset.title.clone(),
            timestamp: Utc::now(),
        });

        self.evict_over_capacity(&mut index, &fingerprint).await;

        Ok(asset)
    }

    /// Reclaim oldest assets until the count cap holds
    async fn evict_over_capacity(&self, index: &mut CacheIndex, keep: &Fingerprint) {
        let max_files = self.inner.settings.max_files;
        let pinned = self.pinned();

        while index.assets.len() > max_files {
            let victim = index
                .assets
                .values()
                .filter(|a| &a.fingerprint != keep)
                .filter(|a| !index.in_flight.contains_key(&a.fingerprint))
                .filter(|a| !pinned.contains(&a.fingerprint))
                .min_by_key(|a| a.created_at)
                .map(|a| a.fingerprint.clone());

            let Some(victim) = victim else {
                warn!(
                    "Cache holds {} files (max {}) but every other file is in use",
                    index.assets.len(),
                    max_files
                );
                break;
            };

            if let Some(asset) = index.assets.remove(&victim) {
                debug!("Evicting {} (over capacity)", asset.fingerprint);
                remove_quietly(&asset.path).await;
                self.emit_evicted(victim, EvictionReason::OverCapacity);
            }
        }
    }

    /// Run the orphan and TTL passes against the current time
    pub async fn sweep(&self) -> std::io::Result<SweepReport> {
        self.sweep_at(SystemTime::now()).await
    }

    /// Run the orphan and TTL passes as if the current time were `now`
    pub async fn sweep_at(&self, now: SystemTime) -> std::io::Result<SweepReport> {
        let ttl = self.inner.settings.ttl;
        let mut report = SweepReport::default();

        let mut index = self.inner.index.lock().await;
        let pinned = self.pinned();

        // Orphan pass
        let tracked: HashSet<PathBuf> = index.assets.values().map(|a| a.path.clone()).collect();
        let mut entries = tokio::fs::read_dir(&self.inner.settings.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if tracked.contains(&path) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let fingerprint = Fingerprint::from_stem(&stem);
            if let Some(fp) = &fingerprint {
                if index.in_flight.contains_key(fp) {
                    continue;
                }
            }

            let born = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(now);
            let age = now.duration_since(born).unwrap_or_default();

            if age >= ttl {
                debug!("Deleting orphan {} (age {:?})", path.display(), age);
                remove_quietly(&path).await;
                report.orphans_deleted += 1;
                if let Some(fp) = fingerprint {
                    self.emit_evicted(fp, EvictionReason::Orphaned);
                }
                continue;
            }

            let adoptable = path.extension().and_then(|e| e.to_str())
                == Some(self.inner.settings.extension.as_str());
            if let (Some(fp), true) = (fingerprint, adoptable) {
                debug!("Adopting orphan {}", path.display());
                index.assets.insert(
                    fp.clone(),
                    Arc::new(Asset {
                        fingerprint: fp,
                        path,
                        title: stem,
                        duration: None,
                        created_at: born,
                    }),
                );
                report.orphans_adopted += 1;
            }
        }

        // TTL pass
        let expired: Vec<Fingerprint> = index
            .assets
            .values()
            .filter(|a| a.age_at(now) >= ttl)
            .filter(|a| !pinned.contains(&a.fingerprint))
            .filter(|a| !index.in_flight.contains_key(&a.fingerprint))
            .map(|a| a.fingerprint.clone())
            .collect();

        for fp in expired {
            if let Some(asset) = index.assets.remove(&fp) {
                debug!("Deleting expired {} (\"{}\")", fp, asset.title);
                remove_quietly(&asset.path).await;
                report.expired += 1;
                self.emit_evicted(fp, EvictionReason::Expired);
            }
        }

        Ok(report)
    }

    /// Sweep now and then every `sweep_interval` until cancelled
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        let period = self.inner.settings.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.sweep().await {
                            Ok(report) if !report.is_empty() => info!(
                                "Cache sweep: {} expired, {} orphans deleted, {} orphans adopted",
                                report.expired, report.orphans_deleted, report.orphans_adopted
                            ),
                            Ok(_) => debug!("Cache sweep: nothing to do"),
                            Err(e) => warn!("Cache sweep failed: {}", e),
                        }
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Asset>> {
        self.inner.index.lock().await.assets.get(fingerprint).cloned()
    }

    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.index.lock().await.assets.contains_key(fingerprint)
    }

    pub async fn len(&self) -> usize {
        self.inner.index.lock().await.assets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inner.index.lock().await.in_flight.len()
    }

    /// All tracked assets, oldest first
    pub async fn snapshot(&self) -> Vec<Arc<Asset>> {
        let index = self.inner.index.lock().await;
        let mut assets: Vec<Arc<Asset>> = index.assets.values().cloned().collect();
        assets.sort_by_key(|a| a.created_at);
        assets
    }

    fn emit_evicted(&self, fingerprint: Fingerprint, reason: EvictionReason) {
        self.inner.events.emit_lossy(JukeboxEvent::AssetEvicted {
            fingerprint,
            reason,
            timestamp: Utc::now(),
        });
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> CacheSettings {
        CacheSettings {
            directory: dir.to_path_buf(),
            extension: "mp3".to_string(),
            max_files: 3,
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_pins_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()), EventBus::new(8)).unwrap();
        let fp = Fingerprint::of("https://example.com/a");

        let first = store.pin(&fp);
        let second = store.pin(&fp);
        assert!(store.is_pinned(&fp));

        drop(first);
        assert!(store.is_pinned(&fp), "one pin still held");

        drop(second);
        assert!(!store.is_pinned(&fp));
    }

    #[test]
    fn test_path_for_uses_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()), EventBus::new(8)).unwrap();
        let fp = Fingerprint::of("https://example.com/a");

        assert_eq!(store.path_for(&fp), dir.path().join(format!("{}.mp3", fp)));
    }

    #[tokio::test]
    async fn test_sweep_ignores_foreign_young_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(settings(dir.path()), EventBus::new(8)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let report = store.sweep().await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert!(dir.path().join("notes.txt").exists());
        assert!(store.is_empty().await);
    }
}
