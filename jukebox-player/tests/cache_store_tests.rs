//! Cache store integration tests
//!
//! Covers single-flight resolution, count eviction, TTL and orphan sweeps,
//! and pin exclusion.

mod helpers;

use helpers::{url, wait_until, FakeFetcher};
use jukebox_common::events::{EventBus, EvictionReason, JukeboxEvent};
use jukebox_player::cache::{CacheSettings, CacheStore};
use jukebox_player::error::ResolutionError;
use jukebox_player::fetch::{Fetcher, SourceLocator};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn store(dir: &Path, max_files: usize) -> (CacheStore, EventBus) {
    let events = EventBus::new(64);
    let store = CacheStore::new(
        CacheSettings {
            directory: dir.to_path_buf(),
            extension: "mp3".to_string(),
            max_files,
            ttl: Duration::from_secs(4 * 3600),
            sweep_interval: Duration::from_secs(30 * 60),
        },
        events.clone(),
    )
    .unwrap();
    (store, events)
}

fn locator(n: usize) -> SourceLocator {
    SourceLocator::parse(&url(n)).unwrap()
}

/// **Given:** An empty cache and a slow fetcher
/// **When:** Ten callers resolve the same locator concurrently
/// **Then:** The fetcher runs once and every caller gets the same asset
#[tokio::test]
async fn test_concurrent_resolves_share_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::with_delay(Duration::from_millis(100));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let fetcher: Arc<dyn Fetcher> = fetcher.clone();
        tasks.push(tokio::spawn(async move { store.resolve(&locator(1), fetcher).await }));
    }

    let mut assets = Vec::new();
    for task in tasks {
        assets.push(task.await.unwrap().unwrap());
    }

    assert_eq!(fetcher.calls(), 1);
    assert!(assets.iter().all(|a| Arc::ptr_eq(a, &assets[0])));
    assert_eq!(store.len().await, 1);
    assert_eq!(store.in_flight_count().await, 0);
}

/// **Given:** A cached asset
/// **When:** It is resolved again
/// **Then:** The cache answers without fetching
#[tokio::test]
async fn test_hit_does_not_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::new();

    let first = store.resolve(&locator(1), fetcher.clone()).await.unwrap();
    let second = store.resolve(&locator(1), fetcher.clone()).await.unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.title, "track1");
    assert!(first.path.exists());
}

/// **Given:** A cached asset whose file was deleted behind the store's back
/// **When:** It is resolved again
/// **Then:** It is fetched again rather than returning a dangling path
#[tokio::test]
async fn test_vanished_file_is_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::new();

    let asset = store.resolve(&locator(1), fetcher.clone()).await.unwrap();
    std::fs::remove_file(&asset.path).unwrap();

    let again = store.resolve(&locator(1), fetcher.clone()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert!(again.path.exists());
}

/// **Given:** MaxFiles=2
/// **When:** A, B and C are resolved in order
/// **Then:** A is evicted and its file deleted; B and C remain
#[tokio::test]
async fn test_count_eviction_removes_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let (store, events) = store(dir.path(), 2);
    let mut rx = events.subscribe();
    let fetcher = FakeFetcher::new();

    let a = store.resolve(&locator(1), fetcher.clone()).await.unwrap();
    let b = store.resolve(&locator(2), fetcher.clone()).await.unwrap();
    let c = store.resolve(&locator(3), fetcher.clone()).await.unwrap();

    assert_eq!(store.len().await, 2);
    assert!(!store.contains(&a.fingerprint).await);
    assert!(!a.path.exists());
    assert!(store.contains(&b.fingerprint).await);
    assert!(store.contains(&c.fingerprint).await);

    let mut evicted = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let JukeboxEvent::AssetEvicted {
            fingerprint, reason, ..
        } = event
        {
            evicted.push((fingerprint, reason));
        }
    }
    assert_eq!(evicted, vec![(a.fingerprint.clone(), EvictionReason::OverCapacity)]);
}

/// **Given:** MaxFiles=1 with the only asset pinned for playback
/// **When:** Another asset is resolved
/// **Then:** The pinned asset survives; the count exceeds the cap until it is released
#[tokio::test]
async fn test_pinned_asset_survives_count_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 1);
    let fetcher = FakeFetcher::new();

    let (playing, pin) = store.acquire(&locator(1), fetcher.clone()).await.unwrap();
    let next = store.resolve(&locator(2), fetcher.clone()).await.unwrap();

    assert!(store.contains(&playing.fingerprint).await);
    assert!(playing.path.exists());
    assert!(store.contains(&next.fingerprint).await);
    assert_eq!(store.len().await, 2);

    drop(pin);
    assert!(!store.is_pinned(&playing.fingerprint));

    let third = store.resolve(&locator(3), fetcher.clone()).await.unwrap();
    assert_eq!(store.len().await, 1);
    assert!(store.contains(&third.fingerprint).await);
    assert!(!playing.path.exists());
}

/// **Given:** A failing fetcher
/// **When:** Two callers resolve the same locator, then the fetcher recovers
/// **Then:** Both see the same error, nothing is cached, and a retry fetches anew
#[tokio::test]
async fn test_failed_fetch_is_shared_then_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::with_delay(Duration::from_millis(50));
    fetcher.set_failing(true);

    let (loc_a, loc_b) = (locator(1), locator(1));
    let (first, second) = tokio::join!(
        store.resolve(&loc_a, fetcher.clone()),
        store.resolve(&loc_b, fetcher.clone())
    );
    let first = first.unwrap_err();
    assert_eq!(first, second.unwrap_err());
    assert!(matches!(first, ResolutionError::FetchFailed(_)));
    assert_eq!(fetcher.calls(), 1);
    assert!(store.is_empty().await);
    assert_eq!(store.in_flight_count().await, 0);

    fetcher.set_failing(false);
    store.resolve(&locator(1), fetcher.clone()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

/// **Given:** A fetcher that panics on its first call
/// **When:** A locator is resolved, then resolved again
/// **Then:** The first call fails, no fetch stays in flight, and the retry reaches the fetcher
#[tokio::test]
async fn test_panicked_fetch_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::new();
    fetcher.panic_next();

    let err = store.resolve(&locator(1), fetcher.clone()).await.unwrap_err();
    assert!(matches!(err, ResolutionError::FetchFailed(_)));
    assert_eq!(store.in_flight_count().await, 0);

    let asset = store.resolve(&locator(1), fetcher.clone()).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert!(asset.path.exists());
    assert_eq!(store.in_flight_count().await, 0);
}

/// **Given:** MaxFiles=2 and a slow fetch that has already written its file
/// **When:** A sweep runs far past the TTL and other assets overfill the cache meanwhile
/// **Then:** The in-flight file is neither deleted, adopted nor evicted
#[tokio::test]
async fn test_in_flight_fetch_is_never_swept_or_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let (store, events) = store(dir.path(), 2);
    let mut rx = events.subscribe();
    let slow = FakeFetcher::with_delay(Duration::from_millis(500));
    slow.set_write_first(true);
    let fast = FakeFetcher::new();

    let in_flight = locator(1).fingerprint().clone();
    let in_flight_path = store.path_for(&in_flight);
    let pending = {
        let store = store.clone();
        let slow: Arc<dyn Fetcher> = slow.clone();
        tokio::spawn(async move { store.resolve(&locator(1), slow).await })
    };
    assert!(wait_until(Duration::from_secs(2), || in_flight_path.exists()).await);
    assert_eq!(store.in_flight_count().await, 1);

    let far_future = SystemTime::now() + Duration::from_secs(2 * 4 * 3600);
    let report = store.sweep_at(far_future).await.unwrap();
    assert_eq!(report.orphans_deleted, 0);
    assert_eq!(report.orphans_adopted, 0);
    assert!(in_flight_path.exists());
    assert!(!store.contains(&in_flight).await);

    for n in 2..=4 {
        store.resolve(&locator(n), fast.clone()).await.unwrap();
    }
    assert_eq!(store.len().await, 2);
    assert!(in_flight_path.exists());
    assert_eq!(store.in_flight_count().await, 1);

    let asset = pending.await.unwrap().unwrap();
    assert_eq!(asset.path, in_flight_path);
    assert!(asset.path.exists());
    assert!(store.contains(&in_flight).await);
    assert_eq!(store.len().await, 2);

    let mut evicted = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let JukeboxEvent::AssetEvicted { fingerprint, .. } = event {
            evicted.push(fingerprint);
        }
    }
    assert_eq!(evicted.len(), 2);
    assert!(!evicted.contains(&in_flight));
}

/// **Given:** A fetcher that reports success without writing a file
/// **When:** A locator is resolved
/// **Then:** Resolution fails with NoFile and nothing is cached
#[tokio::test]
async fn test_success_without_file_is_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::new();
    fetcher.set_skip_file(true);

    let err = store.resolve(&locator(1), fetcher.clone()).await.unwrap_err();
    assert!(matches!(err, ResolutionError::NoFile(_)));
    assert!(store.is_empty().await);
}

/// **Given:** Two cached assets, one of them pinned
/// **When:** A sweep runs past their TTL
/// **Then:** Only the unpinned asset expires
#[tokio::test]
async fn test_ttl_sweep_skips_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::new();

    let (kept, _pin) = store.acquire(&locator(1), fetcher.clone()).await.unwrap();
    let stale = store.resolve(&locator(2), fetcher.clone()).await.unwrap();

    let later = SystemTime::now() + Duration::from_secs(5 * 3600);
    let report = store.sweep_at(later).await.unwrap();

    assert_eq!(report.expired, 1);
    assert!(store.contains(&kept.fingerprint).await);
    assert!(!store.contains(&stale.fingerprint).await);
    assert!(!stale.path.exists());
}

/// **Given:** A young cached asset
/// **When:** A sweep runs now
/// **Then:** Nothing changes
#[tokio::test]
async fn test_ttl_sweep_keeps_young_assets() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _events) = store(dir.path(), 5);
    let fetcher = FakeFetcher::new();
    store.resolve(&locator(1), fetcher.clone()).await.unwrap();

    let report = store.sweep().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(store.len().await, 1);
}

/// **Given:** Untracked media files left by a previous run
/// **When:** A sweep runs
/// **Then:** Young ones are adopted as assets and old ones are deleted
#[tokio::test]
async fn test_orphans_adopted_or_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let fp = locator(7).fingerprint().clone();
    let orphan = dir.path().join(fp.file_name("mp3"));
    std::fs::write(&orphan, b"left over").unwrap();

    let (store, _events) = store(dir.path(), 5);
    let report = store.sweep().await.unwrap();
    assert_eq!(report.orphans_adopted, 1);
    assert!(store.contains(&fp).await);

    // Adopted assets now expire like any other
    let later = SystemTime::now() + Duration::from_secs(5 * 3600);
    let report = store.sweep_at(later).await.unwrap();
    assert_eq!(report.expired, 1);
    assert!(!orphan.exists());

    // An old untracked file is removed directly
    let other = dir.path().join(locator(8).fingerprint().clone().file_name("mp3"));
    std::fs::write(&other, b"older").unwrap();
    let report = store.sweep_at(later).await.unwrap();
    assert_eq!(report.orphans_deleted, 1);
    assert!(!other.exists());
}

/// **Given:** An adopted orphan
/// **When:** Its locator is resolved
/// **Then:** The existing file is used without fetching
#[tokio::test]
async fn test_adopted_orphan_is_a_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let fp = locator(3).fingerprint().clone();
    std::fs::write(dir.path().join(fp.file_name("mp3")), b"left over").unwrap();

    let (store, _events) = store(dir.path(), 5);
    store.sweep().await.unwrap();

    let fetcher = FakeFetcher::new();
    let asset = store.resolve(&locator(3), fetcher.clone()).await.unwrap();
    assert_eq!(asset.fingerprint, fp);
    assert_eq!(fetcher.calls(), 0);
}
