//! Map builder for fluent configuration
//!
//! Collects a profile or explicit configuration, the projection, tile sources
//! and the initial view, then builds a [`Map`] in one fallible step.

use std::sync::Arc;

use crate::{
    core::{
        config::{BoundingMask, DecelerationMode, MapConfig, MapProfile},
        geo::{LatLng, PixelSize},
        map::Map,
        projection::{LatitudePolicy, Projection},
    },
    runtime::{SharedSpawner, TokioSpawner},
    tiles::source::TileSource,
    Result,
};

/// Builder for creating and configuring Map instances
pub struct MapBuilder {
    config: MapConfig,
    projection: Projection,
    /// Runs tile fetches; the current tokio runtime when unset
    spawner: Option<SharedSpawner>,
    sources: Vec<Arc<dyn TileSource>>,
    view_size: PixelSize,
    center: LatLng,
    zoom: f64,
    min_zoom: Option<f64>,
    max_zoom: Option<f64>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self {
            config: MapConfig::default(),
            projection: Projection::spherical_mercator(),
            spawner: None,
            sources: Vec::new(),
            view_size: PixelSize::new(256.0, 256.0),
            center: LatLng::default(),
            zoom: 0.0,
            min_zoom: None,
            max_zoom: None,
        }
    }

    /// Start from a preset; later calls adjust it
    pub fn with_profile(mut self, profile: MapProfile) -> Self {
        self.config = profile.resolve();
        self
    }

    pub fn with_config(mut self, config: MapConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist tiles under `path`
    pub fn with_disk_cache(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config = self.config.with_disk_cache(path);
        self
    }

    pub fn with_latitude_policy(mut self, policy: LatitudePolicy) -> Self {
        self.projection = self.projection.with_latitude_policy(policy);
        self
    }

    pub fn with_spawner(mut self, spawner: SharedSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Add a tile source on top of those already added
    pub fn with_tile_source(mut self, source: Arc<dyn TileSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_view_size(mut self, width: f64, height: f64) -> Self {
        self.view_size = PixelSize::new(width, height);
        self
    }

    /// Set the initial center and zoom level
    pub fn with_center_and_zoom(mut self, center: LatLng, zoom: f64) -> Self {
        self.center = center;
        self.zoom = zoom;
        self
    }

    /// Set zoom limits
    pub fn with_zoom_limits(mut self, min_zoom: Option<f64>, max_zoom: Option<f64>) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_bounding_mask(mut self, mask: BoundingMask) -> Self {
        self.config.view.bounding_mask = mask;
        self
    }

    pub fn with_deceleration(mut self, mode: DecelerationMode) -> Self {
        self.config.view.deceleration_mode = mode;
        self
    }

    pub fn with_clustering(mut self, enabled: bool) -> Self {
        self.config.view.enable_clustering = enabled;
        self
    }

    pub fn with_debug_tiles(mut self, enabled: bool) -> Self {
        self.config.debug_tiles = enabled;
        self
    }

    /// Build the map. Sources are added before the initial view is applied
    /// so the zoom is clamped to their combined range.
    pub fn build(self) -> Result<Map> {
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(TokioSpawner::current()?),
        };
        let mut map = Map::new(self.config, self.projection, spawner, self.view_size)?;
        for source in self.sources {
            map.add_tile_source(source)?;
        }
        if let Some(min) = self.min_zoom {
            map.set_min_zoom(min)?;
        }
        if let Some(max) = self.max_zoom {
            map.set_max_zoom(max)?;
        }
        map.set_center_coordinate_and_zoom(self.center, self.zoom, false)?;
        Ok(map)
    }
}

impl Default for MapBuilder {
    fn default() -> Self {
        Self::new()
    }
}
