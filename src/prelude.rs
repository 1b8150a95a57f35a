//! Prelude module for common slippymap types and traits
//!
//! Re-exports the most commonly used types for importing with
//! `use slippymap::prelude::*;`

pub use crate::core::{
    bounds::ProjectedRect,
    builder::MapBuilder,
    config::{BoundingMask, DecelerationMode, MapConfig, MapProfile, ViewConfig},
    controller::InteractionState,
    events::{EventKind, MapEvent},
    geo::{LatLng, LatLngBounds, PixelPoint, PixelRect, PixelSize, ProjectedPoint, ProjectedSize, TileAddress},
    map::{CompositedLayer, CompositedTile, Map, MapSnapshot},
    projection::{LatitudePolicy, Projection},
    viewport::Viewport,
};

pub use crate::annotation::{Annotation, AnnotationId, UserLocation, UserTrackingMode};

pub use crate::animation::EasingType;

pub use crate::runtime::{AsyncHandle, AsyncSpawner, SharedSpawner, TokioSpawner};

pub use crate::tiles::{
    cache::TileCache,
    source::{FetchError, HttpTileSource, SolidColorTileSource, TileImage, TileSource},
};

pub use crate::{MapError, Result};

pub use std::{sync::Arc, time::Duration};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
