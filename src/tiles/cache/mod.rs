//! Multi-tier tile cache: memory LRU, optional disk tier, then the tile source.
//!
//! At most one fetch per (tile, source) runs at a time. Concurrent requesters
//! attach to the same shared future and all observe its result. Successful
//! fetches are written through to both tiers; failures are never cached.
//!
//! Each source has an epoch that is bumped whenever its entries are
//! invalidated (reload, removal, clear-all). A fetch that started under an
//! older epoch still resolves for its requesters but does not write to the
//! cache.

pub mod disk;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::core::config::TileCacheConfig;
use crate::core::geo::TileAddress;
use crate::prelude::HashMap;
use crate::tiles::source::{FetchError, SourceId, TileImage, TileSource};

pub use disk::DiskTier;
pub use memory::MemoryTier;

/// Cache identity of a tile: which source, which address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub source_id: SourceId,
    pub tile: TileAddress,
}

impl CacheKey {
    pub fn new(source_id: SourceId, tile: TileAddress) -> Self {
        Self { source_id, tile }
    }

    /// Stable string used by the persistent tier: `"{source_id}/{z}/{x}/{y}"`
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.source_id, self.tile.zoom, self.tile.x, self.tile.y
        )
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<TileImage, FetchError>>>;

struct InFlight {
    token: u64,
    future: SharedFetch,
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub coalesced: u64,
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
}

struct CacheInner {
    memory: Mutex<MemoryTier>,
    disk: Mutex<Option<DiskTier>>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    epochs: Mutex<HashMap<SourceId, u64>>,
    next_token: AtomicU64,
    counters: Counters,
}

/// Poisoned locks are recovered: every critical section leaves the tiers
/// consistent, so the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CacheInner {
    fn epoch(&self, source_id: &SourceId) -> u64 {
        lock(&self.epochs).get(source_id).copied().unwrap_or(0)
    }

    fn bump_epoch(&self, source_id: &SourceId) {
        *lock(&self.epochs).entry(source_id.clone()).or_insert(0) += 1;
    }

    fn lookup(&self, key: &CacheKey) -> Option<TileImage> {
        if let Some(image) = lock(&self.memory).get(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("memory hit {}", key.storage_key());
            return Some(image);
        }

        let from_disk = {
            let mut disk = lock(&self.disk);
            match disk.as_mut().map(|tier| tier.get(key)) {
                Some(Ok(image)) => image,
                Some(Err(e)) => {
                    log::warn!("disk tile cache disabled, continuing memory-only: {}", e);
                    *disk = None;
                    None
                }
                None => None,
            }
        };

        match from_disk {
            Some(image) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("disk hit {}, promoting", key.storage_key());
                lock(&self.memory).insert(key.clone(), image.clone());
                Some(image)
            }
            None => None,
        }
    }

    fn store(&self, key: &CacheKey, image: &TileImage) {
        lock(&self.memory).insert(key.clone(), image.clone());
        let mut disk = lock(&self.disk);
        if let Some(tier) = disk.as_mut() {
            if let Err(e) = tier.put(key, image) {
                log::warn!("disk tile cache disabled, continuing memory-only: {}", e);
                *disk = None;
            }
        }
    }

    fn finish(&self, key: &CacheKey, token: u64) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(key).map(|entry| entry.token) == Some(token) {
            in_flight.remove(key);
        }
    }
}

/// Shared handle to the per-map tile cache
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache").field("stats", &self.stats()).finish()
    }
}

impl TileCache {
    /// Create a cache from configuration. A persistent tier that cannot be
    /// opened is logged and skipped.
    pub fn new(config: &TileCacheConfig) -> Self {
        let disk = config.disk.as_ref().and_then(|disk_config| {
            match DiskTier::open(disk_config) {
                Ok(tier) => Some(tier),
                Err(e) => {
                    log::warn!("tile cache running memory-only: {}", e);
                    None
                }
            }
        });
        Self::with_tiers(MemoryTier::new(config.memory_capacity), disk)
    }

    /// Memory-only cache holding up to `capacity` tiles
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_tiers(MemoryTier::new(capacity), None)
    }

    fn with_tiers(memory: MemoryTier, disk: Option<DiskTier>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                memory: Mutex::new(memory),
                disk: Mutex::new(disk),
                in_flight: Mutex::new(HashMap::default()),
                epochs: Mutex::new(HashMap::default()),
                next_token: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Whether a persistent tier is attached and healthy
    pub fn is_persistent(&self) -> bool {
        lock(&self.inner.disk).is_some()
    }

    /// Current invalidation epoch of a source. The source is registered so a
    /// later [`remove_all_cached_images`](Self::remove_all_cached_images)
    /// advances its epoch too.
    pub fn epoch(&self, source_id: &SourceId) -> u64 {
        *lock(&self.inner.epochs).entry(source_id.clone()).or_insert(0)
    }

    /// Memory then disk lookup, without touching the source
    pub fn get(&self, key: &CacheKey) -> Option<TileImage> {
        self.inner.lookup(key)
    }

    /// Memory tier only; never touches the disk
    pub fn get_from_memory(&self, key: &CacheKey) -> Option<TileImage> {
        let image = lock(&self.inner.memory).get(key)?;
        self.inner.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
        Some(image)
    }

    /// Whether the memory tier holds `key`; does not touch recency
    pub fn contains_in_memory(&self, key: &CacheKey) -> bool {
        lock(&self.inner.memory).contains(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.contains_in_memory(key)
            || lock(&self.inner.disk)
                .as_ref()
                .map(|tier| tier.contains(key))
                .unwrap_or(false)
    }

    /// Write a tile to both tiers
    pub fn insert(&self, key: CacheKey, image: TileImage) {
        self.inner.store(&key, &image);
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        lock(&self.inner.in_flight).contains_key(key)
    }

    /// Resolve a tile through memory, disk and finally the source.
    ///
    /// Concurrent calls for the same key share one fetch.
    pub async fn get_or_fetch(
        &self,
        source: Arc<dyn TileSource>,
        tile: TileAddress,
    ) -> Result<TileImage, FetchError> {
        let key = CacheKey::new(source.unique_tile_source_id(), tile);
        if let Some(image) = self.inner.lookup(&key) {
            return Ok(image);
        }

        let future = {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(existing) = in_flight.get(&key) {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                log::debug!("attaching to in-flight fetch {}", key.storage_key());
                existing.future.clone()
            } else {
                // A fetch may have completed between the lookup above and taking the lock
                if let Some(image) = lock(&self.inner.memory).get(&key) {
                    return Ok(image);
                }
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);

                let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
                let future = self.fetch_future(source, key.clone(), token);
                in_flight.insert(key, InFlight { token, future: future.clone() });
                future
            }
        };

        future.await
    }

    fn fetch_future(&self, source: Arc<dyn TileSource>, key: CacheKey, token: u64) -> SharedFetch {
        let inner = self.inner.clone();
        let epoch = inner.epoch(&key.source_id);
        async move {
            log::debug!("fetching {}", key.storage_key());
            let result = source.fetch(key.tile).await;
            match &result {
                Ok(image) => {
                    if inner.epoch(&key.source_id) == epoch {
                        inner.store(&key, image);
                    } else {
                        log::debug!("source invalidated during fetch, not caching {}", key.storage_key());
                    }
                }
                Err(e) => log::debug!("fetch {} failed: {}", key.storage_key(), e),
            }
            inner.finish(&key, token);
            result
        }
        .boxed()
        .shared()
    }

    /// Forget one source's tiles in both tiers and detach its in-flight
    /// fetches; the next request for any of its tiles goes to the source.
    pub fn invalidate_source(&self, source_id: &SourceId) {
        self.inner.bump_epoch(source_id);
        lock(&self.inner.in_flight).retain(|key, _| &key.source_id != source_id);
        let removed = lock(&self.inner.memory).remove_source(source_id);

        let mut disk = lock(&self.inner.disk);
        if let Some(tier) = disk.as_mut() {
            if let Err(e) = tier.remove_source(source_id) {
                log::warn!("disk tile cache disabled, continuing memory-only: {}", e);
                *disk = None;
            }
        }
        log::info!("invalidated cache for source {} ({} tiles in memory)", source_id, removed);
    }

    /// Drop in-flight bookkeeping for a source without touching stored tiles
    pub fn detach_in_flight(&self, source_id: &SourceId) {
        self.inner.bump_epoch(source_id);
        lock(&self.inner.in_flight).retain(|key, _| &key.source_id != source_id);
    }

    /// Clear both tiers for every source
    pub fn remove_all_cached_images(&self) {
        {
            let in_flight = lock(&self.inner.in_flight);
            let mut epochs = lock(&self.inner.epochs);
            for key in in_flight.keys() {
                epochs.entry(key.source_id.clone()).or_insert(0);
            }
            for epoch in epochs.values_mut() {
                *epoch += 1;
            }
        }
        lock(&self.inner.in_flight).clear();
        lock(&self.inner.memory).clear();

        let mut disk = lock(&self.inner.disk);
        if let Some(tier) = disk.as_mut() {
            if let Err(e) = tier.clear() {
                log::warn!("disk tile cache disabled, continuing memory-only: {}", e);
                *disk = None;
            }
        }
        log::info!("cleared all cached tiles");
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let (memory_entries, memory_bytes) = {
            let memory = lock(&self.inner.memory);
            (memory.len(), memory.bytes())
        };
        let (disk_entries, disk_bytes) = lock(&self.inner.disk)
            .as_ref()
            .map(|tier| (tier.len(), tier.total_bytes()))
            .unwrap_or((0, 0));
        CacheStats {
            memory_hits: counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: counters.disk_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            memory_entries,
            memory_bytes,
            disk_entries,
            disk_bytes,
            in_flight: lock(&self.inner.in_flight).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        id: SourceId,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(id: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                fetches: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl TileSource for CountingSource {
        fn unique_tile_source_id(&self) -> SourceId {
            self.id.clone()
        }

        fn min_zoom(&self) -> u8 {
            0
        }

        fn max_zoom(&self) -> u8 {
            18
        }

        async fn fetch(&self, _tile: TileAddress) -> Result<TileImage, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                Err(FetchError::Network("offline".to_string()))
            } else {
                TileImage::solid(8, [9, 9, 9, 255])
            }
        }
    }

    #[test]
    fn test_storage_key_format() {
        let key = CacheKey::new("osm".into(), TileAddress::new(3, 4, 5));
        assert_eq!(key.storage_key(), "osm/5/3/4");
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = TileCache::in_memory(16);
        let source = CountingSource::new("osm", false);
        let tile = TileAddress::new(1, 1, 2);

        cache.get_or_fetch(source.clone(), tile).await.unwrap();
        cache.get_or_fetch(source.clone(), tile).await.unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = TileCache::in_memory(16);
        let source = CountingSource::new("osm", true);
        let tile = TileAddress::new(0, 0, 1);

        assert!(cache.get_or_fetch(source.clone(), tile).await.is_err());
        assert!(cache.get_or_fetch(source.clone(), tile).await.is_err());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert!(!cache.contains(&CacheKey::new("osm".into(), tile)));
    }

    #[tokio::test]
    async fn test_invalidate_source_forces_refetch() {
        let cache = TileCache::in_memory(16);
        let source = CountingSource::new("osm", false);
        let tile = TileAddress::new(0, 0, 0);

        cache.get_or_fetch(source.clone(), tile).await.unwrap();
        let before = cache.epoch(&source.id);
        cache.invalidate_source(&source.id);
        assert_eq!(cache.epoch(&source.id), before + 1);

        cache.get_or_fetch(source.clone(), tile).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
