use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::Semaphore;

use crate::core::config::TileLoaderConfig;
use crate::core::geo::TileAddress;
use crate::prelude::HashSet;
use crate::runtime::{spawn_on, SharedSpawner};
use crate::tiles::cache::{CacheKey, TileCache};
use crate::tiles::fallback::{self, FetchPlan};
use crate::tiles::source::{FetchError, SourceId, TileImage, TileSource};

/// How a tile request was resolved
#[derive(Debug, Clone)]
pub enum TileOutcome {
    /// `fallback_from` names the ancestor the image was cropped from
    Ready {
        image: TileImage,
        fallback_from: Option<TileAddress>,
    },
    Failed(FetchError),
}

/// Result of a tile loading operation
#[derive(Debug, Clone)]
pub struct TileResult {
    pub tile: TileAddress,
    pub source_id: SourceId,
    /// Cache epoch of the source when the request was issued
    pub epoch: u64,
    pub outcome: TileOutcome,
}

/// Runs tile fetches on the async runtime and hands results back to the
/// coordinating context over a channel
pub struct TileLoader {
    cache: TileCache,
    spawner: SharedSpawner,
    config: TileLoaderConfig,
    semaphore: Arc<Semaphore>,
    result_tx: Sender<TileResult>,
    result_rx: Receiver<TileResult>,
    /// Requests issued but not yet drained, to prevent duplicates
    pending: Arc<Mutex<HashSet<CacheKey>>>,
}

impl TileLoader {
    pub fn new(cache: TileCache, spawner: SharedSpawner, config: TileLoaderConfig) -> Self {
        let (result_tx, result_rx) = unbounded();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            cache,
            spawner,
            config,
            semaphore,
            result_tx,
            result_rx,
            pending: Arc::new(Mutex::new(HashSet::default())),
        }
    }

    pub fn config(&self) -> &TileLoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Queue a tile. Returns `false` when the same request is already pending.
    pub fn request(&self, source: Arc<dyn TileSource>, tile: TileAddress) -> bool {
        let source_id = source.unique_tile_source_id();
        let key = CacheKey::new(source_id.clone(), tile);
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.insert(key) {
                log::debug!("skipping duplicate tile request {}/{}", source_id, tile);
                return false;
            }
        }

        let epoch = self.cache.epoch(&source_id);
        let cache = self.cache.clone();
        let semaphore = self.semaphore.clone();
        let result_tx = self.result_tx.clone();
        let depth = self.config.missing_tiles_depth;

        spawn_on(self.spawner.as_ref(), async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => resolve(&cache, source, tile, depth).await,
                Err(_) => TileOutcome::Failed(FetchError::Cancelled),
            };
            let _ = result_tx.send(TileResult {
                tile,
                source_id,
                epoch,
                outcome,
            });
        });
        true
    }

    /// Resolve one tile in the caller's task, bypassing the result channel
    pub async fn load(&self, source: Arc<dyn TileSource>, tile: TileAddress) -> TileOutcome {
        resolve(&self.cache, source, tile, self.config.missing_tiles_depth).await
    }

    /// Try to receive completed tile results (non-blocking)
    pub fn try_recv_results(&self) -> Vec<TileResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            results.push(result);
        }
        if !results.is_empty() {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            for result in &results {
                pending.remove(&CacheKey::new(result.source_id.clone(), result.tile));
            }
        }
        results
    }

    /// Forget pending requests for a source so they can be issued again
    pub fn forget_source(&self, source_id: &SourceId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|key| &key.source_id != source_id);
    }

    pub fn forget_all(&self) {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_pending(&self, source_id: &SourceId, tile: TileAddress) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&CacheKey::new(source_id.clone(), tile))
    }
}

/// Resolve one tile through the cache, climbing to ancestors on failure.
///
/// A cropped ancestor is never cached under the requested tile's key, so the
/// tile itself is tried again on the next refresh.
async fn resolve(
    cache: &TileCache,
    source: Arc<dyn TileSource>,
    tile: TileAddress,
    depth: u8,
) -> TileOutcome {
    let (min, max) = source.zoom_range();
    let (direct, ancestors) = match fallback::plan(tile, min, max, depth) {
        FetchPlan::Direct { ancestors } => (true, ancestors),
        FetchPlan::AncestorsOnly { ancestors } => (false, ancestors),
        FetchPlan::Unavailable => {
            return TileOutcome::Failed(FetchError::ZoomOutOfRange {
                zoom: tile.zoom,
                min,
                max,
            })
        }
    };

    let mut error = FetchError::ZoomOutOfRange {
        zoom: tile.zoom,
        min,
        max,
    };
    if direct {
        match cache.get_or_fetch(source.clone(), tile).await {
            Ok(image) => {
                return TileOutcome::Ready {
                    image,
                    fallback_from: None,
                }
            }
            Err(e) => error = e,
        }
    }

    let side = source.tile_side_length();
    for ancestor in ancestors {
        let ancestor_image = match cache.get_or_fetch(source.clone(), ancestor).await {
            Ok(image) => image,
            Err(e) => {
                error = e;
                continue;
            }
        };
        match fallback::crop_from_ancestor(&ancestor_image, ancestor, tile, side) {
            Ok(image) => {
                log::warn!(
                    "tile {} of {} unavailable ({}), using ancestor {}",
                    tile,
                    source.unique_tile_source_id(),
                    error,
                    ancestor
                );
                return TileOutcome::Ready {
                    image,
                    fallback_from: Some(ancestor),
                };
            }
            Err(e) => {
                log::warn!("could not crop ancestor {} for {}: {}", ancestor, tile, e);
                error = e;
            }
        }
    }

    log::warn!(
        "tile {} of {} failed: {}",
        tile,
        source.unique_tile_source_id(),
        error
    );
    TileOutcome::Failed(error)
}
