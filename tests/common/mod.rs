#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use slippymap::{FetchError, Map, MapConfig, SourceId, TileAddress, TileImage, TileSource};

/// Source that counts fetches, can fail above a zoom and can be slow
/// for one zoom level
pub struct CountingSource {
    id: SourceId,
    min_zoom: u8,
    max_zoom: u8,
    /// Tiles above this zoom answer `NotFound`
    available_zoom: u8,
    slow_zoom: Option<(u8, Duration)>,
    /// Fail this many fetches before succeeding
    failures_left: AtomicUsize,
    fetches: AtomicUsize,
}

impl CountingSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.into(),
            min_zoom: 0,
            max_zoom: 18,
            available_zoom: 18,
            slow_zoom: None,
            failures_left: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Advertised range, taken as given
    pub fn with_zoom_range(mut self, min: u8, max: u8) -> Self {
        self.min_zoom = min;
        self.max_zoom = max;
        self.available_zoom = self.available_zoom.max(max);
        self
    }

    pub fn available_up_to(mut self, zoom: u8) -> Self {
        self.available_zoom = zoom;
        self
    }

    pub fn slow_at(mut self, zoom: u8, delay: Duration) -> Self {
        self.slow_zoom = Some((zoom, delay));
        self
    }

    pub fn failing_first(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileSource for CountingSource {
    fn unique_tile_source_id(&self) -> SourceId {
        self.id.clone()
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn tile_side_length(&self) -> u32 {
        16
    }

    async fn fetch(&self, tile: TileAddress) -> Result<TileImage, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.slow_zoom {
            Some((zoom, delay)) if zoom == tile.zoom => tokio::time::sleep(delay).await,
            _ => tokio::task::yield_now().await,
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Network("connection reset".into()));
        }
        if tile.zoom > self.available_zoom {
            return Err(FetchError::NotFound);
        }
        TileImage::solid(16, [tile.zoom.wrapping_mul(10), tile.x as u8, tile.y as u8, 255])
    }
}

pub fn test_config() -> MapConfig {
    MapConfig {
        loader: slippymap::TileLoaderConfig::for_testing(),
        ..MapConfig::default()
    }
}

/// Drain tile results until `done` holds or about a second passes
pub async fn pump_until(map: &mut Map, mut done: impl FnMut(&Map) -> bool) -> bool {
    for _ in 0..200 {
        map.process_tile_results();
        if done(map) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Number of ready tiles across all layers
pub fn ready_tiles(map: &Map) -> usize {
    map.composited_tiles().iter().map(|layer| layer.tiles.len()).sum()
}

pub fn arc(source: CountingSource) -> Arc<CountingSource> {
    Arc::new(source)
}
