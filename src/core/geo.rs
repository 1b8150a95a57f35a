use serde::{Deserialize, Serialize};

use crate::core::constants::{MAX_LATITUDE, MAX_TILE_ZOOM};
use crate::{MapError, Result};

/// Represents a geographical coordinate with latitude and longitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates that the coordinates are within valid ranges
    pub fn is_valid(&self) -> bool {
        self.lat >= -90.0 && self.lat <= 90.0 && self.lng >= -180.0 && self.lng <= 180.0
    }

    /// Wraps longitude to [-180, 180) range
    pub fn wrap_lng(lng: f64) -> f64 {
        let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
        // keep the eastern antimeridian as +180 when the input was exactly there
        if wrapped == -180.0 && lng > 0.0 {
            180.0
        } else {
            wrapped
        }
    }

    /// Clamps latitude to the Mercator domain
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
    }

    /// Returns this coordinate with a wrapped longitude and Mercator-clamped latitude
    pub fn normalized(&self) -> LatLng {
        LatLng::new(Self::clamp_lat(self.lat), Self::wrap_lng(self.lng))
    }
}

impl Default for LatLng {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A point in projected coordinates (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
}

impl ProjectedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &ProjectedPoint) -> ProjectedPoint {
        ProjectedPoint::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(&self, other: &ProjectedPoint) -> ProjectedPoint {
        ProjectedPoint::new(self.x - other.x, self.y - other.y)
    }

    pub fn multiply(&self, scalar: f64) -> ProjectedPoint {
        ProjectedPoint::new(self.x * scalar, self.y * scalar)
    }

    pub fn distance_to(&self, other: &ProjectedPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Default for ProjectedPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A size in projected coordinates (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectedSize {
    pub width: f64,
    pub height: f64,
}

impl ProjectedSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A point in view space, in pixels, origin at the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A size in view space, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: f64,
    pub height: f64,
}

impl PixelSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A rectangle in view space, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub origin: PixelPoint,
    pub size: PixelSize,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: PixelPoint::new(x, y),
            size: PixelSize::new(width, height),
        }
    }
}

/// Represents a bounding box of geographical coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// The whole Mercator world
    pub fn world() -> Self {
        Self::from_coords(-MAX_LATITUDE, -180.0, MAX_LATITUDE, 180.0)
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.south_west.lat
            && point.lat <= self.north_east.lat
            && point.lng >= self.south_west.lng
            && point.lng <= self.north_east.lng
    }
}

/// Address of a tile in the power-of-two pyramid (XYZ scheme, y = 0 at the north edge)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileAddress {
    /// Creates a tile address without validation
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Creates a tile address, rejecting coordinates outside the pyramid
    pub fn checked(x: u32, y: u32, zoom: u8) -> Result<Self> {
        let tile = Self::new(x, y, zoom);
        if tile.is_valid() {
            Ok(tile)
        } else {
            Err(MapError::InvalidCoordinate(format!(
                "tile {}/{}/{} is outside the pyramid",
                zoom, x, y
            )))
        }
    }

    /// Number of tiles along one axis at `zoom`
    pub fn tiles_per_axis(zoom: u8) -> u64 {
        1u64 << zoom
    }

    /// Checks if the tile is valid for its zoom level
    pub fn is_valid(&self) -> bool {
        if self.zoom >= MAX_TILE_ZOOM {
            return false;
        }
        let max_coord = Self::tiles_per_axis(self.zoom);
        u64::from(self.x) < max_coord && u64::from(self.y) < max_coord
    }

    /// Gets the parent tile at a lower zoom level
    pub fn parent(&self) -> Option<TileAddress> {
        self.ancestor(1)
    }

    /// Gets the ancestor `levels` zoom levels up
    pub fn ancestor(&self, levels: u8) -> Option<TileAddress> {
        if levels > self.zoom {
            None
        } else {
            Some(TileAddress::new(
                self.x >> levels,
                self.y >> levels,
                self.zoom - levels,
            ))
        }
    }

    /// Position of this tile inside `ancestor`, as (column, row, cells per axis).
    /// Returns `None` when `ancestor` does not contain this tile.
    pub fn offset_in(&self, ancestor: &TileAddress) -> Option<(u32, u32, u32)> {
        if ancestor.zoom > self.zoom {
            return None;
        }
        let levels = self.zoom - ancestor.zoom;
        if self.ancestor(levels)? != *ancestor {
            return None;
        }
        let cells = 1u32 << levels;
        Some((self.x - (ancestor.x << levels), self.y - (ancestor.y << levels), cells))
    }
}

impl std::fmt::Display for TileAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lat_lng_creation() {
        let coord = LatLng::new(40.7128, -74.0060);
        assert_eq!(coord.lat, 40.7128);
        assert_eq!(coord.lng, -74.0060);
        assert!(coord.is_valid());
    }

    #[test]
    fn test_wrap_lng() {
        assert_eq!(LatLng::wrap_lng(190.0), -170.0);
        assert_eq!(LatLng::wrap_lng(-190.0), 170.0);
        assert_eq!(LatLng::wrap_lng(540.0), 180.0);
        assert_eq!(LatLng::wrap_lng(45.0), 45.0);
    }

    #[test]
    fn test_tile_validity() {
        assert!(TileAddress::new(0, 0, 0).is_valid());
        assert!(!TileAddress::new(1, 0, 0).is_valid());
        assert!(TileAddress::new(3, 3, 2).is_valid());
        assert!(!TileAddress::new(0, 0, 32).is_valid());
        assert!(TileAddress::checked(4, 0, 2).is_err());
    }

    #[test]
    fn test_tile_ancestry() {
        let tile = TileAddress::new(5, 6, 3);
        assert_eq!(tile.parent(), Some(TileAddress::new(2, 3, 2)));
        assert_eq!(tile.ancestor(3), Some(TileAddress::new(0, 0, 0)));
        assert_eq!(tile.ancestor(4), None);

        let ancestor = tile.ancestor(2).unwrap();
        assert_eq!(tile.offset_in(&ancestor), Some((1, 2, 4)));
        assert_eq!(tile.offset_in(&TileAddress::new(0, 1, 1)), None);
    }
}
