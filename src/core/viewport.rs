use std::sync::{Arc, RwLock};

use crate::core::bounds::ProjectedRect;
use crate::core::config::BoundingMask;
use crate::core::constants::{MAX_TILE_ZOOM, TILE_SIZE};
use crate::core::geo::{LatLng, LatLngBounds, PixelPoint, PixelRect, PixelSize, ProjectedPoint, ProjectedSize};
use crate::core::projection::Projection;
use crate::tiles::fractal::FractalTileProjection;
use crate::{MapError, Result};

/// The current view of the map: centre, zoom, and view dimensions.
///
/// Pixel coordinates have their origin at the top-left corner of the view
/// with y growing downward; projected y grows northward. Every mutation
/// validates its input first and leaves the viewport untouched on error.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    projection: Projection,
    center: ProjectedPoint,
    zoom: f64,
    view_size: PixelSize,
    tile_side_length: u32,
    /// Intersection of the visible sources' native ranges
    source_zoom_range: (u8, u8),
    user_min_zoom: Option<f64>,
    user_max_zoom: Option<f64>,
    bounding_mask: BoundingMask,
    /// Region the centre must stay inside
    constraints: Option<ProjectedRect>,
    screen_scale: f64,
    adjust_tiles_for_retina: bool,
}

impl Viewport {
    pub fn new(projection: Projection, view_size: PixelSize) -> Self {
        Self {
            center: projection.planet_bounds().center(),
            projection,
            zoom: 0.0,
            view_size: sanitize_size(view_size),
            tile_side_length: TILE_SIZE,
            source_zoom_range: (0, 18),
            user_min_zoom: None,
            user_max_zoom: None,
            bounding_mask: BoundingMask::NoMinBound,
            constraints: None,
            screen_scale: 1.0,
            adjust_tiles_for_retina: false,
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn center(&self) -> ProjectedPoint {
        self.center
    }

    pub fn center_coordinate(&self) -> LatLng {
        self.projection.projected_to_geo(self.center)
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn view_size(&self) -> PixelSize {
        self.view_size
    }

    pub fn tile_side_length(&self) -> u32 {
        self.tile_side_length
    }

    pub fn bounding_mask(&self) -> BoundingMask {
        self.bounding_mask
    }

    pub fn constraints(&self) -> Option<ProjectedRect> {
        self.constraints
    }

    pub fn screen_scale(&self) -> f64 {
        self.screen_scale
    }

    pub fn adjusts_tiles_for_retina(&self) -> bool {
        self.adjust_tiles_for_retina
    }

    pub fn source_zoom_range(&self) -> (u8, u8) {
        self.source_zoom_range
    }

    /// Addressing over the current tile side and source zoom range
    pub fn tiling(&self) -> FractalTileProjection {
        let (min, max) = self.source_zoom_range;
        FractalTileProjection::new(&self.projection, self.tile_side_length, min, max)
    }

    // ---- zoom limits ----

    /// Smallest zoom at which the world still fills the view on the masked axis
    fn mask_min_zoom(&self) -> Option<f64> {
        let side = f64::from(self.tile_side_length);
        match self.bounding_mask {
            BoundingMask::NoMinBound => None,
            BoundingMask::MinWidthBound => Some((self.view_size.width / side).log2()),
            BoundingMask::MinHeightBound => Some((self.view_size.height / side).log2()),
        }
    }

    pub fn max_zoom(&self) -> f64 {
        let source_max = f64::from(self.source_zoom_range.1);
        self.user_max_zoom
            .map_or(source_max, |user| user.min(source_max))
    }

    /// Effective minimum zoom; never above [`max_zoom`](Self::max_zoom)
    pub fn min_zoom(&self) -> f64 {
        let mut min = f64::from(self.source_zoom_range.0);
        if let Some(user) = self.user_min_zoom {
            min = min.max(user);
        }
        if let Some(mask) = self.mask_min_zoom() {
            min = min.max(mask);
        }
        min.min(self.max_zoom())
    }

    /// Limit zooming out. The value is clamped to the sources' native range.
    pub fn set_min_zoom(&mut self, zoom: f64) -> Result<()> {
        check_zoom(zoom)?;
        let (min, max) = self.source_zoom_range;
        self.user_min_zoom = Some(zoom.clamp(f64::from(min), f64::from(max)));
        self.reclamp();
        Ok(())
    }

    /// Limit zooming in. The value is clamped to the sources' native range.
    pub fn set_max_zoom(&mut self, zoom: f64) -> Result<()> {
        check_zoom(zoom)?;
        let (min, max) = self.source_zoom_range;
        self.user_max_zoom = Some(zoom.clamp(f64::from(min), f64::from(max)));
        self.reclamp();
        Ok(())
    }

    /// Called when the tile source stack changes
    pub fn set_source_zoom_range(&mut self, min: u8, max: u8, tile_side_length: u32) {
        let max = max.max(min).min(MAX_TILE_ZOOM - 1);
        let min = min.min(max);
        self.source_zoom_range = (min, max);
        self.tile_side_length = tile_side_length.max(1);
        if let Some(user) = self.user_min_zoom.as_mut() {
            *user = user.clamp(f64::from(min), f64::from(max));
        }
        if let Some(user) = self.user_max_zoom.as_mut() {
            *user = user.clamp(f64::from(min), f64::from(max));
        }
        self.reclamp();
    }

    pub fn set_bounding_mask(&mut self, mask: BoundingMask) {
        self.bounding_mask = mask;
        self.reclamp();
    }

    pub fn set_screen_scale(&mut self, scale: f64, adjust_tiles_for_retina: bool) -> Result<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(MapError::Config(format!("screen scale must be positive, got {}", scale)));
        }
        self.screen_scale = scale;
        self.adjust_tiles_for_retina = adjust_tiles_for_retina;
        Ok(())
    }

    pub fn set_view_size(&mut self, size: PixelSize) -> Result<()> {
        if !(size.width.is_finite() && size.height.is_finite()) || size.width <= 0.0 || size.height <= 0.0 {
            return Err(MapError::InvalidCoordinate(format!(
                "view size {}x{} must be positive",
                size.width, size.height
            )));
        }
        self.view_size = size;
        self.reclamp();
        Ok(())
    }

    /// Keep the view centre inside `rect`, or lift the constraint with `None`
    pub fn set_constraints(&mut self, rect: Option<ProjectedRect>) -> Result<()> {
        if let Some(rect) = rect {
            if !rect.is_valid() {
                return Err(MapError::InvalidCoordinate(format!("invalid constraint rect {:?}", rect)));
            }
        }
        self.constraints = rect;
        self.reclamp();
        Ok(())
    }

    fn reclamp(&mut self) {
        self.zoom = self.zoom.clamp(self.min_zoom(), self.max_zoom());
        self.center = self.clamp_center(self.center, self.zoom);
    }

    // ---- scale ----

    pub fn meters_per_pixel(&self) -> f64 {
        self.meters_per_pixel_at(self.zoom)
    }

    pub fn meters_per_pixel_at(&self, zoom: f64) -> f64 {
        self.projection.planet_bounds().width() / (f64::from(self.tile_side_length) * 2_f64.powf(zoom))
    }

    /// Meters per device pixel
    pub fn scaled_meters_per_pixel(&self) -> f64 {
        self.meters_per_pixel() / self.screen_scale
    }

    /// Zoom used for tile selection on high-density screens
    pub fn adjusted_zoom_for_retina_display(&self) -> f64 {
        if self.adjust_tiles_for_retina && self.screen_scale > 1.0 {
            self.zoom + self.screen_scale.log2()
        } else {
            self.zoom
        }
    }

    /// Integer tile zoom for a source, inside `[min, max]` and below
    /// `MAX_TILE_ZOOM`
    pub fn tile_zoom_for(&self, source_is_retina: bool, min: u8, max: u8) -> u8 {
        let max = max.min(MAX_TILE_ZOOM - 1);
        let min = min.min(max);
        let zoom = if source_is_retina {
            self.zoom
        } else {
            self.adjusted_zoom_for_retina_display()
        };
        zoom.round().clamp(f64::from(min), f64::from(max)) as u8
    }

    // ---- geometry ----

    pub fn projected_size(&self) -> ProjectedSize {
        self.view_size_to_projected_size(self.view_size)
    }

    pub fn projected_bounds(&self) -> ProjectedRect {
        ProjectedRect::from_center_and_size(self.center, self.projected_size())
    }

    pub fn lat_lng_bounding_box(&self) -> LatLngBounds {
        self.projection.bounding_box(&self.projected_bounds())
    }

    /// Geographic extent of a rectangle in view pixels
    pub fn lat_lng_bounding_box_for(&self, rect: PixelRect) -> LatLngBounds {
        let a = self.pixel_to_projected(rect.origin);
        let b = self.pixel_to_projected(PixelPoint::new(
            rect.origin.x + rect.size.width,
            rect.origin.y + rect.size.height,
        ));
        self.projection.bounding_box(&ProjectedRect::from_corners(a, b))
    }

    /// Where the centre may sit at `zoom` under the bounding mask and constraints
    fn clamp_center(&self, center: ProjectedPoint, zoom: f64) -> ProjectedPoint {
        let planet = self.projection.planet_bounds();
        let mpp = self.meters_per_pixel_at(zoom);
        let half_w = self.view_size.width * mpp / 2.0;
        let half_h = self.view_size.height * mpp / 2.0;

        let mut center = match self.bounding_mask {
            BoundingMask::NoMinBound => {
                let wrapped = self.projection.wrap_point(center);
                ProjectedPoint::new(wrapped.x, wrapped.y.clamp(planet.min_y(), planet.max_y()))
            }
            BoundingMask::MinWidthBound | BoundingMask::MinHeightBound => ProjectedPoint::new(
                clamp_axis(center.x, half_w, planet.min_x(), planet.max_x()),
                clamp_axis(center.y, half_h, planet.min_y(), planet.max_y()),
            ),
        };

        if let Some(constraints) = self.constraints {
            center = constraints.clamp(&center);
        }
        center
    }

    // ---- mutations ----

    pub fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        check_zoom(zoom)?;
        self.zoom = zoom.clamp(self.min_zoom(), self.max_zoom());
        self.center = self.clamp_center(self.center, self.zoom);
        Ok(())
    }

    pub fn set_center(&mut self, center: ProjectedPoint) -> Result<()> {
        if !center.is_finite() {
            return Err(MapError::InvalidCoordinate(format!("non-finite centre {:?}", center)));
        }
        self.center = self.clamp_center(center, self.zoom);
        Ok(())
    }

    pub fn set_center_coordinate(&mut self, coordinate: LatLng) -> Result<()> {
        let center = self.projection.geo_to_projected(coordinate)?;
        self.set_center(center)
    }

    /// Set centre and zoom together, validating both before applying either
    pub fn set_center_and_zoom(&mut self, center: ProjectedPoint, zoom: f64) -> Result<()> {
        check_zoom(zoom)?;
        if !center.is_finite() {
            return Err(MapError::InvalidCoordinate(format!("non-finite centre {:?}", center)));
        }
        self.zoom = zoom.clamp(self.min_zoom(), self.max_zoom());
        self.center = self.clamp_center(center, self.zoom);
        Ok(())
    }

    /// Centre and zoom that make `rect` fill the view
    pub fn fit(&self, rect: &ProjectedRect) -> Result<(ProjectedPoint, f64)> {
        if !rect.is_valid() || rect.width() <= 0.0 || rect.height() <= 0.0 {
            return Err(MapError::InvalidCoordinate(format!("degenerate bounds {:?}", rect)));
        }
        let mpp = (rect.width() / self.view_size.width).max(rect.height() / self.view_size.height);
        let zoom = (self.projection.planet_bounds().width() / (f64::from(self.tile_side_length) * mpp)).log2();
        Ok((rect.center(), zoom))
    }

    pub fn set_projected_bounds(&mut self, rect: &ProjectedRect) -> Result<()> {
        let (center, zoom) = self.fit(rect)?;
        self.set_center_and_zoom(center, zoom)
    }

    /// Centre and zoom after scaling by `factor` around a pixel that stays put
    pub fn zoom_target(&self, factor: f64, pivot: PixelPoint) -> Result<(ProjectedPoint, f64)> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(MapError::ZoomOutOfRange {
                zoom: factor,
                min: self.min_zoom(),
                max: self.max_zoom(),
            });
        }
        let zoom = (self.zoom + factor.log2()).clamp(self.min_zoom(), self.max_zoom());
        let anchor = self.pixel_to_projected(pivot);
        let mpp = self.meters_per_pixel_at(zoom);
        let center = ProjectedPoint::new(
            anchor.x - (pivot.x - self.view_size.width / 2.0) * mpp,
            anchor.y + (pivot.y - self.view_size.height / 2.0) * mpp,
        );
        Ok((self.clamp_center(center, zoom), zoom))
    }

    pub fn zoom_by_factor(&mut self, factor: f64, pivot: PixelPoint) -> Result<()> {
        let (center, zoom) = self.zoom_target(factor, pivot)?;
        self.zoom = zoom;
        self.center = center;
        Ok(())
    }

    /// Drag the content by `delta` pixels. Returns `true` when clamping kept
    /// the view from moving the full distance.
    pub fn move_by(&mut self, delta: PixelPoint) -> Result<bool> {
        if !(delta.x.is_finite() && delta.y.is_finite()) {
            return Err(MapError::InvalidCoordinate(format!("non-finite delta {:?}", delta)));
        }
        let mpp = self.meters_per_pixel();
        let wanted = ProjectedPoint::new(self.center.x - delta.x * mpp, self.center.y + delta.y * mpp);
        let clamped = self.clamp_center(wanted, self.zoom);
        // Wrapping around the antimeridian is free movement
        let planet_width = self.projection.planet_bounds().width();
        let residual = (clamped.x - wanted.x).abs() % planet_width;
        let blocked_x = residual > 1e-6 && planet_width - residual > 1e-6;
        let blocked = blocked_x || (clamped.y - wanted.y).abs() > 1e-6;
        self.center = clamped;
        Ok(blocked)
    }

    // ---- conversions ----

    pub fn projected_to_pixel(&self, point: ProjectedPoint) -> PixelPoint {
        let bounds = self.projected_bounds();
        let mpp = self.meters_per_pixel();
        PixelPoint::new((point.x - bounds.min_x()) / mpp, (bounds.max_y() - point.y) / mpp)
    }

    pub fn pixel_to_projected(&self, pixel: PixelPoint) -> ProjectedPoint {
        let bounds = self.projected_bounds();
        let mpp = self.meters_per_pixel();
        ProjectedPoint::new(bounds.min_x() + pixel.x * mpp, bounds.max_y() - pixel.y * mpp)
    }

    pub fn coordinate_to_pixel(&self, coordinate: LatLng) -> Result<PixelPoint> {
        Ok(self.projected_to_pixel(self.projection.geo_to_projected(coordinate)?))
    }

    pub fn pixel_to_coordinate(&self, pixel: PixelPoint) -> LatLng {
        self.projection.projected_to_geo(self.pixel_to_projected(pixel))
    }

    pub fn view_size_to_projected_size(&self, size: PixelSize) -> ProjectedSize {
        let mpp = self.meters_per_pixel();
        ProjectedSize::new(size.width * mpp, size.height * mpp)
    }

    pub fn projected_size_to_view_size(&self, size: ProjectedSize) -> PixelSize {
        let mpp = self.meters_per_pixel();
        PixelSize::new(size.width / mpp, size.height / mpp)
    }
}

/// Centre coordinate on one axis so that `[c - half, c + half]` stays in
/// `[min, max]`; a view wider than the world is centred on it
fn clamp_axis(value: f64, half: f64, min: f64, max: f64) -> f64 {
    if 2.0 * half >= max - min {
        (min + max) / 2.0
    } else {
        value.clamp(min + half, max - half)
    }
}

fn check_zoom(zoom: f64) -> Result<()> {
    if zoom.is_finite() {
        Ok(())
    } else {
        Err(MapError::ZoomOutOfRange {
            zoom,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        })
    }
}

fn sanitize_size(size: PixelSize) -> PixelSize {
    let fix = |v: f64| if v.is_finite() && v > 0.0 { v } else { 1.0 };
    PixelSize::new(fix(size.width), fix(size.height))
}

/// Viewport published for readers on other threads.
///
/// The coordinating context replaces the whole value after each change, so a
/// reader never sees a centre from one update paired with a zoom from another.
#[derive(Debug, Clone)]
pub struct ViewportHandle(Arc<RwLock<Viewport>>);

impl ViewportHandle {
    pub fn new(viewport: Viewport) -> Self {
        Self(Arc::new(RwLock::new(viewport)))
    }

    pub fn snapshot(&self) -> Viewport {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn publish(&self, viewport: &Viewport) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = viewport.clone();
    }
}
