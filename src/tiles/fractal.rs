//! Mapping between projected coordinates and the power-of-two tile pyramid.

use crate::core::bounds::ProjectedRect;
use crate::core::constants::MAX_TILE_ZOOM;
use crate::core::geo::{ProjectedPoint, TileAddress};
use crate::core::projection::Projection;
use crate::{MapError, Result};

/// Tile addressing for one zoom range over a projection's world bounds
#[derive(Debug, Clone, PartialEq)]
pub struct FractalTileProjection {
    planet_bounds: ProjectedRect,
    tile_side_length: u32,
    min_zoom: u8,
    max_zoom: u8,
}

impl FractalTileProjection {
    pub fn new(projection: &Projection, tile_side_length: u32, min_zoom: u8, max_zoom: u8) -> Self {
        let max_zoom = max_zoom.min(MAX_TILE_ZOOM - 1);
        Self {
            planet_bounds: projection.planet_bounds(),
            tile_side_length: tile_side_length.max(1),
            min_zoom: min_zoom.min(max_zoom),
            max_zoom,
        }
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn tile_side_length(&self) -> u32 {
        self.tile_side_length
    }

    pub fn planet_bounds(&self) -> ProjectedRect {
        self.planet_bounds
    }

    /// Rounds a continuous zoom to the integer level used for tile selection,
    /// clamped to this projection's range
    pub fn normalize_zoom(&self, zoom: f64) -> u8 {
        if !zoom.is_finite() {
            return self.min_zoom;
        }
        zoom.round()
            .clamp(f64::from(self.min_zoom), f64::from(self.max_zoom)) as u8
    }

    /// Like [`normalize_zoom`](Self::normalize_zoom) but rejects levels outside the range
    pub fn checked_zoom(&self, zoom: f64) -> Result<u8> {
        let rounded = zoom.round();
        if !zoom.is_finite()
            || rounded < f64::from(self.min_zoom)
            || rounded > f64::from(self.max_zoom)
        {
            return Err(MapError::ZoomOutOfRange {
                zoom,
                min: f64::from(self.min_zoom),
                max: f64::from(self.max_zoom),
            });
        }
        Ok(rounded as u8)
    }

    /// Meters covered by one pixel at a continuous zoom
    pub fn meters_per_pixel(&self, zoom: f64) -> f64 {
        self.planet_bounds.width() / (f64::from(self.tile_side_length) * 2_f64.powf(zoom))
    }

    /// Continuous zoom at which one pixel covers `meters_per_pixel`
    pub fn zoom_for_meters_per_pixel(&self, meters_per_pixel: f64) -> f64 {
        (self.planet_bounds.width() / (f64::from(self.tile_side_length) * meters_per_pixel)).log2()
    }

    /// Projected side length of one tile at `zoom`
    pub fn tile_span(&self, zoom: u8) -> f64 {
        self.planet_bounds.width() / TileAddress::tiles_per_axis(zoom) as f64
    }

    /// Continuous grid position of `point`: (column, row) with row 0 at the north edge
    fn grid_position(&self, point: &ProjectedPoint, zoom: u8) -> (f64, f64) {
        let span = self.tile_span(zoom);
        let column = (point.x - self.planet_bounds.min_x()) / span;
        let row = (self.planet_bounds.max_y() - point.y) / span;
        (column, row)
    }

    fn clamp_index(value: f64, zoom: u8) -> u32 {
        let last = (TileAddress::tiles_per_axis(zoom) - 1) as f64;
        value.clamp(0.0, last) as u32
    }

    /// Tile containing `point`. A point exactly on a tile boundary belongs to the
    /// higher-indexed tile; points outside the world clamp to the edge tiles.
    pub fn tile_for_point(&self, point: ProjectedPoint, zoom: u8) -> TileAddress {
        let (column, row) = self.grid_position(&point, zoom);
        TileAddress::new(
            Self::clamp_index(column.floor(), zoom),
            Self::clamp_index(row.floor(), zoom),
            zoom,
        )
    }

    /// Projected extent of a tile
    pub fn tile_bounds(&self, tile: TileAddress) -> ProjectedRect {
        let span = self.tile_span(tile.zoom);
        let min_x = self.planet_bounds.min_x() + f64::from(tile.x) * span;
        let max_y = self.planet_bounds.max_y() - f64::from(tile.y) * span;
        ProjectedRect::from_coords(min_x, max_y - span, min_x + span, max_y)
    }

    /// Minimal set of tiles at `zoom` whose bounds cover `rect`, ordered row-major
    /// from the north-west corner. Parts of `rect` outside the world are ignored.
    pub fn tiles_in_rect(&self, rect: &ProjectedRect, zoom: u8) -> Vec<TileAddress> {
        if !rect.is_valid() {
            return Vec::new();
        }
        let Some(visible) = rect.intersection(&self.planet_bounds) else {
            return Vec::new();
        };

        let (west, north) = self.grid_position(
            &ProjectedPoint::new(visible.min_x(), visible.max_y()),
            zoom,
        );
        let (east, south) = self.grid_position(
            &ProjectedPoint::new(visible.max_x(), visible.min_y()),
            zoom,
        );

        let min_x = Self::clamp_index(west.floor(), zoom);
        let min_y = Self::clamp_index(north.floor(), zoom);
        // A far edge lying exactly on a boundary does not pull in the next tile
        let max_x = Self::clamp_index((east.ceil() - 1.0).max(west.floor()), zoom);
        let max_y = Self::clamp_index((south.ceil() - 1.0).max(north.floor()), zoom);

        let width = (max_x - min_x + 1) as usize;
        let height = (max_y - min_y + 1) as usize;
        let mut tiles = Vec::with_capacity(width * height);
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                tiles.push(TileAddress::new(x, y, zoom));
            }
        }
        tiles
    }
}
