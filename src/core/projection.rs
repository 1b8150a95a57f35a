//! Spherical Mercator projection between geographic and projected coordinates.
//!
//! Projected units are meters on the EPSG:3857 plane. The world is a square
//! centred on (0, 0) with half-extent `π·R`. Longitudes wrap modulo 360°;
//! latitudes beyond the Mercator limit are clamped or rejected depending on
//! the configured [`LatitudePolicy`].

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::core::bounds::ProjectedRect;
use crate::core::constants::{EARTH_RADIUS, HALF_WORLD_METERS, MAX_LATITUDE};
use crate::core::geo::{LatLng, LatLngBounds, ProjectedPoint, ProjectedSize};
use crate::{MapError, Result};

/// What to do with a latitude inside [-90, 90] but outside the Mercator domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LatitudePolicy {
    /// Clamp to ±85.0511°
    #[default]
    Clamp,
    /// Fail with `MapError::InvalidCoordinate`
    Reject,
}

/// Spherical Mercator projection with explicit world bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    planet_bounds: ProjectedRect,
    latitude_policy: LatitudePolicy,
}

impl Projection {
    /// The Google / OSM spherical Mercator (EPSG:3857)
    pub fn spherical_mercator() -> Self {
        Self {
            planet_bounds: ProjectedRect::new(
                ProjectedPoint::new(-HALF_WORLD_METERS, -HALF_WORLD_METERS),
                ProjectedSize::new(2.0 * HALF_WORLD_METERS, 2.0 * HALF_WORLD_METERS),
            ),
            latitude_policy: LatitudePolicy::Clamp,
        }
    }

    pub fn with_latitude_policy(mut self, policy: LatitudePolicy) -> Self {
        self.latitude_policy = policy;
        self
    }

    pub fn latitude_policy(&self) -> LatitudePolicy {
        self.latitude_policy
    }

    /// Projected extent of the whole world
    pub fn planet_bounds(&self) -> ProjectedRect {
        self.planet_bounds
    }

    /// Checks a coordinate against the domain and returns the one that will be projected
    pub fn validate(&self, coordinate: LatLng) -> Result<LatLng> {
        if !coordinate.lat.is_finite() || !coordinate.lng.is_finite() {
            return Err(MapError::InvalidCoordinate(format!(
                "non-finite coordinate ({}, {})",
                coordinate.lat, coordinate.lng
            )));
        }
        if coordinate.lat.abs() > 90.0 {
            return Err(MapError::InvalidCoordinate(format!(
                "latitude {} outside [-90, 90]",
                coordinate.lat
            )));
        }
        if coordinate.lat.abs() > MAX_LATITUDE && self.latitude_policy == LatitudePolicy::Reject {
            return Err(MapError::InvalidCoordinate(format!(
                "latitude {} outside the Mercator domain (±{:.4})",
                coordinate.lat, MAX_LATITUDE
            )));
        }
        Ok(coordinate.normalized())
    }

    /// Projects a geographic coordinate to meters
    pub fn geo_to_projected(&self, coordinate: LatLng) -> Result<ProjectedPoint> {
        let c = self.validate(coordinate)?;
        let x = c.lng.to_radians() * EARTH_RADIUS;
        let y = (PI / 4.0 + c.lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
        Ok(ProjectedPoint::new(x, y))
    }

    /// Unprojects meters to a geographic coordinate; x wraps, y is clamped to the world
    pub fn projected_to_geo(&self, point: ProjectedPoint) -> LatLng {
        let point = self.wrap_point(point);
        let y = point
            .y
            .clamp(self.planet_bounds.min_y(), self.planet_bounds.max_y());
        let lng = (point.x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        LatLng::new(lat, LatLng::wrap_lng(lng))
    }

    /// Wraps the x component into the world's horizontal extent
    pub fn wrap_point(&self, point: ProjectedPoint) -> ProjectedPoint {
        let bounds = &self.planet_bounds;
        if point.x >= bounds.min_x() && point.x <= bounds.max_x() {
            return point;
        }
        let width = bounds.width();
        let x = (point.x - bounds.min_x()).rem_euclid(width) + bounds.min_x();
        ProjectedPoint::new(x, point.y)
    }

    /// Geographic bounding box (south-west, north-east) of a projected rectangle
    pub fn bounding_box(&self, rect: &ProjectedRect) -> LatLngBounds {
        let sw = self.projected_to_geo(ProjectedPoint::new(
            rect.min_x().max(self.planet_bounds.min_x()),
            rect.min_y(),
        ));
        let ne = self.projected_to_geo(ProjectedPoint::new(
            rect.max_x().min(self.planet_bounds.max_x()),
            rect.max_y(),
        ));
        LatLngBounds::new(sw, ne)
    }

    /// Projected rectangle covering a geographic bounding box
    pub fn projected_rect(&self, bounds: &LatLngBounds) -> Result<ProjectedRect> {
        let sw = self.geo_to_projected(bounds.south_west)?;
        let ne = self.geo_to_projected(bounds.north_east)?;
        Ok(ProjectedRect::from_corners(sw, ne))
    }

    /// Whether `point` lies inside the world
    pub fn contains(&self, point: &ProjectedPoint) -> bool {
        self.planet_bounds.contains(point)
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::spherical_mercator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_projects_to_zero() {
        let projection = Projection::spherical_mercator();
        let point = projection.geo_to_projected(LatLng::new(0.0, 0.0)).unwrap();
        assert!(point.x.abs() < 1e-9);
        assert!(point.y.abs() < 1e-9);
    }

    #[test]
    fn test_round_trip_within_tolerance() {
        let projection = Projection::spherical_mercator();
        for lat in [-85.0, -60.5, -12.25, 0.0, 33.3, 51.5074, 85.0] {
            for lng in [-179.9, -74.006, 0.0, 13.4, 139.65, 179.9] {
                let coordinate = LatLng::new(lat, lng);
                let back = projection
                    .projected_to_geo(projection.geo_to_projected(coordinate).unwrap());
                assert!((back.lat - lat).abs() < 1e-6, "lat {} -> {}", lat, back.lat);
                assert!((back.lng - lng).abs() < 1e-6, "lng {} -> {}", lng, back.lng);
            }
        }
    }

    #[test]
    fn test_world_corner() {
        let projection = Projection::spherical_mercator();
        let corner = projection
            .geo_to_projected(LatLng::new(MAX_LATITUDE, 180.0))
            .unwrap();
        assert!((corner.x - HALF_WORLD_METERS).abs() < 1e-3);
        assert!((corner.y - HALF_WORLD_METERS).abs() < 1e-3);
    }

    #[test]
    fn test_longitude_wraps() {
        let projection = Projection::spherical_mercator();
        let a = projection.geo_to_projected(LatLng::new(10.0, 190.0)).unwrap();
        let b = projection.geo_to_projected(LatLng::new(10.0, -170.0)).unwrap();
        assert!((a.x - b.x).abs() < 1e-6);
    }

    #[test]
    fn test_latitude_policy() {
        let clamp = Projection::spherical_mercator();
        let polar = clamp.geo_to_projected(LatLng::new(89.0, 0.0)).unwrap();
        assert!((polar.y - HALF_WORLD_METERS).abs() < 1e-3);

        let reject = Projection::spherical_mercator().with_latitude_policy(LatitudePolicy::Reject);
        assert!(matches!(
            reject.geo_to_projected(LatLng::new(89.0, 0.0)),
            Err(MapError::InvalidCoordinate(_))
        ));

        // Beyond the poles is always invalid
        assert!(clamp.geo_to_projected(LatLng::new(91.0, 0.0)).is_err());
        assert!(clamp.geo_to_projected(LatLng::new(f64::NAN, 0.0)).is_err());
    }

    #[test]
    fn test_bounding_box_round_trip() {
        let projection = Projection::spherical_mercator();
        let bounds = LatLngBounds::from_coords(40.0, -75.0, 41.0, -73.0);
        let rect = projection.projected_rect(&bounds).unwrap();
        let back = projection.bounding_box(&rect);
        assert!((back.south_west.lat - 40.0).abs() < 1e-6);
        assert!((back.south_west.lng + 75.0).abs() < 1e-6);
        assert!((back.north_east.lat - 41.0).abs() < 1e-6);
        assert!((back.north_east.lng + 73.0).abs() < 1e-6);
    }
}
