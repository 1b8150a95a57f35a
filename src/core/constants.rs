//! Core constants derived from spherical Mercator and common web-map conventions.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Equatorial radius used by the spherical Mercator projection (EPSG:3857).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude at which spherical Mercator becomes a square world.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Half of the projected world extent, in meters.
pub const HALF_WORLD_METERS: f64 = std::f64::consts::PI * EARTH_RADIUS;

/// Tile zoom levels must stay below this bound.
pub const MAX_TILE_ZOOM: u8 = 32;

/// Programmatic +/- zoom step for native zoom stepping.
pub const DEFAULT_ZOOM_DELTA: f64 = 1.0;

/// Screen density used when computing cartographic scale denominators.
pub const DEFAULT_SCREEN_DPI: f64 = 96.0;

/// Meters per inch, for scale denominators.
pub const METERS_PER_INCH: f64 = 0.0254;

/// Velocity (pixels/second) under which deceleration stops.
pub const DECELERATION_STOP_VELOCITY: f64 = 5.0;

/// Radius in pixels used when hit-testing annotations.
pub const ANNOTATION_HIT_RADIUS: f64 = 22.0;
