//! Configuration for the tile cache, the tile loader and view behaviour
//!
//! Configuration can be assembled from presets (`MapProfile`), built field by
//! field, or loaded from JSON. Every preset resolves to a complete
//! [`MapConfig`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::animation::EasingType;
use crate::{MapError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MapProfile {
    #[default]
    Balanced,
    LowMemory,
    HighCapacity,
    Custom(MapConfig),
}

impl MapProfile {
    pub fn resolve(&self) -> MapConfig {
        match self {
            Self::Balanced => MapConfig {
                cache: TileCacheConfig {
                    memory_capacity: 512,
                    disk: None,
                },
                loader: TileLoaderConfig::default(),
                view: ViewConfig::default(),
                debug_tiles: false,
            },
            Self::LowMemory => MapConfig {
                cache: TileCacheConfig {
                    memory_capacity: 128,
                    disk: None,
                },
                loader: TileLoaderConfig::low_resource(),
                view: ViewConfig {
                    deceleration_mode: DecelerationMode::Fast,
                    animation_duration_ms: 200,
                    easing: EasingType::Linear,
                    ..ViewConfig::default()
                },
                debug_tiles: false,
            },
            Self::HighCapacity => MapConfig {
                cache: TileCacheConfig {
                    memory_capacity: 2048,
                    disk: None,
                },
                loader: TileLoaderConfig::high_performance(),
                view: ViewConfig {
                    easing: EasingType::Smooth,
                    animation_duration_ms: 400,
                    ..ViewConfig::default()
                },
                debug_tiles: false,
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

/// Everything a [`Map`](crate::core::map::Map) needs besides its tile sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub cache: TileCacheConfig,
    pub loader: TileLoaderConfig,
    pub view: ViewConfig,
    /// Tag ready tiles with their address so an overlay can label them
    pub debug_tiles: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapProfile::default().resolve()
    }
}

impl MapConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Attach a persistent tier rooted at `path` with default limits
    pub fn with_disk_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache.disk = Some(DiskCacheConfig::new(path));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.memory_capacity == 0 {
            return Err(MapError::Config(
                "cache.memory_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(disk) = &self.cache.disk {
            if disk.max_entries == 0 || disk.max_bytes == 0 {
                return Err(MapError::Config(
                    "disk cache limits must be greater than zero".to_string(),
                ));
            }
        }
        if self.loader.max_concurrent == 0 {
            return Err(MapError::Config(
                "loader.max_concurrent must be greater than zero".to_string(),
            ));
        }
        if !(self.view.screen_scale.is_finite() && self.view.screen_scale > 0.0) {
            return Err(MapError::Config(format!(
                "view.screen_scale must be positive, got {}",
                self.view.screen_scale
            )));
        }
        if !(self.view.cluster_area_size.is_finite() && self.view.cluster_area_size > 0.0) {
            return Err(MapError::Config(format!(
                "view.cluster_area_size must be positive, got {}",
                self.view.cluster_area_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
    /// Maximum number of decoded tiles held in memory
    pub memory_capacity: usize,
    /// Persistent tier; `None` keeps the cache memory-only
    pub disk: Option<DiskCacheConfig>,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 512,
            disk: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    #[default]
    LeastRecentlyUsed,
    OldestInserted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    pub path: PathBuf,
    #[serde(default = "DiskCacheConfig::default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "DiskCacheConfig::default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl DiskCacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: Self::default_max_bytes(),
            max_entries: Self::default_max_entries(),
            eviction: EvictionPolicy::default(),
        }
    }

    fn default_max_bytes() -> u64 {
        256 * 1024 * 1024
    }

    fn default_max_entries() -> usize {
        20_000
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLoaderConfig {
    /// Upper bound on fetches running at once
    pub max_concurrent: usize,
    /// How many ancestor levels the missing-tile fallback may climb
    pub missing_tiles_depth: u8,
    /// Tiles beyond the visible set (in tile units) whose results are still kept
    pub keep_buffer: u32,
}

impl Default for TileLoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            missing_tiles_depth: 2,
            keep_buffer: 1,
        }
    }
}

impl TileLoaderConfig {
    pub fn low_resource() -> Self {
        Self {
            max_concurrent: 2,
            missing_tiles_depth: 1,
            keep_buffer: 0,
        }
    }

    pub fn high_performance() -> Self {
        Self {
            max_concurrent: 16,
            missing_tiles_depth: 3,
            keep_buffer: 2,
        }
    }

    pub fn for_testing() -> Self {
        Self {
            max_concurrent: 4,
            missing_tiles_depth: 2,
            keep_buffer: 0,
        }
    }
}

/// How far the view may zoom out relative to the world's extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundingMask {
    #[default]
    NoMinBound,
    MinHeightBound,
    MinWidthBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecelerationMode {
    #[default]
    Normal,
    Fast,
    Off,
}

impl DecelerationMode {
    /// Fraction of velocity retained per second, `None` when deceleration is disabled
    pub fn friction(&self) -> Option<f64> {
        match self {
            DecelerationMode::Normal => Some(0.05),
            DecelerationMode::Fast => Some(0.005),
            DecelerationMode::Off => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub bounding_mask: BoundingMask,
    pub deceleration_mode: DecelerationMode,
    pub adjust_tiles_for_retina: bool,
    /// Device pixels per view pixel
    pub screen_scale: f64,
    pub zoom_pivots_around_center: bool,
    pub animation_duration_ms: u64,
    pub easing: EasingType,
    pub enable_clustering: bool,
    /// Side of the square cluster cell, in pixels
    pub cluster_area_size: f64,
    pub cluster_at_gravity_center: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            bounding_mask: BoundingMask::NoMinBound,
            deceleration_mode: DecelerationMode::Normal,
            adjust_tiles_for_retina: false,
            screen_scale: 1.0,
            zoom_pivots_around_center: false,
            animation_duration_ms: 300,
            easing: EasingType::EaseOut,
            enable_clustering: false,
            cluster_area_size: 150.0,
            cluster_at_gravity_center: true,
        }
    }
}
