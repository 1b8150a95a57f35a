pub mod bounds;
pub mod builder;
pub mod config;
pub mod constants;
pub mod controller;
pub mod events;
pub mod geo;
pub mod map;
pub mod projection;
pub mod viewport;

// Re-exports for convenience
pub use bounds::ProjectedRect;
pub use builder::MapBuilder;
pub use config::{MapConfig, MapProfile};
pub use controller::InteractionState;
pub use events::{EventKind, MapEvent};
pub use geo::{LatLng, LatLngBounds, PixelPoint, PixelSize, ProjectedPoint, ProjectedSize, TileAddress};
pub use map::{CompositedLayer, CompositedTile, Map, MapSnapshot};
pub use projection::{LatitudePolicy, Projection};
pub use viewport::{Viewport, ViewportHandle};
