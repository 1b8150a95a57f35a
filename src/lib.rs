//! # slippymap
//!
//! The engine behind a tiled, pannable and zoomable map view.
//!
//! It covers spherical Mercator projection, fractal tile addressing, a
//! memory and disk tile cache with in-flight request deduplication, a stack
//! of tile sources with ancestor fallback for missing tiles, and a viewport
//! with zoom limits, bounding masks, gestures, inertia and animated
//! transitions. Rendering is left to the host: it draws what
//! [`Map::composited_tiles`] returns and listens for [`MapEvent`]s.

pub mod animation;
pub mod annotation;
pub mod core;
pub mod prelude;
pub mod runtime;
pub mod spatial;
pub mod tiles;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    bounds::ProjectedRect,
    builder::MapBuilder,
    config::{
        BoundingMask, DecelerationMode, DiskCacheConfig, EvictionPolicy, MapConfig, MapProfile,
        TileCacheConfig, TileLoaderConfig, ViewConfig,
    },
    controller::InteractionState,
    events::{EventKind, MapEvent},
    geo::{
        LatLng, LatLngBounds, PixelPoint, PixelRect, PixelSize, ProjectedPoint, ProjectedSize,
        TileAddress,
    },
    map::{CompositedLayer, CompositedTile, Map, MapSnapshot},
    projection::{LatitudePolicy, Projection},
    viewport::{Viewport, ViewportHandle},
};

pub use annotation::{Annotation, AnnotationCluster, AnnotationId, UserLocation, UserTrackingMode};

pub use animation::{EasingType, ViewAnimation};

pub use runtime::{AsyncSpawner, SharedSpawner, TokioSpawner};

pub use tiles::{
    CacheKey, CacheStats, FetchError, FractalTileProjection, HttpTileSource, SolidColorTileSource,
    SourceId, TileCache, TileImage, TileSource,
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Zoom {zoom} outside [{min}, {max}]")]
    ZoomOutOfRange { zoom: f64, min: f64, max: f64 },

    #[error("Tile {tile} of '{source_id}' failed: {reason}")]
    TileFetchFailed {
        tile: TileAddress,
        source_id: String,
        reason: String,
    },

    #[error("Cache IO error: {0}")]
    CacheIo(String),

    #[error("Tile source error: {0}")]
    TileSource(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
