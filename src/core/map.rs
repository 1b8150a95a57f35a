//! The per-view map core.
//!
//! `Map` owns the viewport, the tile source stack, the tile cache and loader,
//! the annotation index and the event bus. The presentation layer drives it
//! from a single coordinating context: it forwards gestures and programmatic
//! view changes, calls [`Map::tick`] once per frame while an interaction is
//! running, drains finished fetches with [`Map::process_tile_results`], and
//! draws whatever [`Map::composited_tiles`] returns.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::animation::ViewAnimation;
use crate::annotation::{Annotation, AnnotationCluster, AnnotationId, UserLocation, UserTrackingMode};
use crate::core::bounds::ProjectedRect;
use crate::core::config::{BoundingMask, DecelerationMode, MapConfig};
use crate::core::constants::{
    ANNOTATION_HIT_RADIUS, DEFAULT_SCREEN_DPI, DEFAULT_ZOOM_DELTA, MAX_TILE_ZOOM, METERS_PER_INCH,
};
use crate::core::controller::{ControllerStep, InteractionController, InteractionState, Transition};
use crate::core::events::{EventBus, EventKind, MapEvent};
use crate::core::geo::{
    LatLng, LatLngBounds, PixelPoint, PixelRect, PixelSize, ProjectedPoint, ProjectedSize, TileAddress,
};
use crate::core::projection::Projection;
use crate::core::viewport::{Viewport, ViewportHandle};
use crate::prelude::{HashMap, HashSet};
use crate::runtime::SharedSpawner;
use crate::spatial::quadtree::QuadTree;
use crate::tiles::cache::{CacheKey, CacheStats, TileCache};
use crate::tiles::container::TileSourcesContainer;
use crate::tiles::fractal::FractalTileProjection;
use crate::tiles::loader::{TileLoader, TileOutcome};
use crate::tiles::source::{FetchError, SourceId, TileImage, TileSource};
use crate::{MapError, Result};

/// Zoom levels closer than this to an integer count as native
const NATIVE_ZOOM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
struct ReadyTile {
    image: TileImage,
    fallback_from: Option<TileAddress>,
}

/// A ready tile positioned for drawing
#[derive(Debug, Clone)]
pub struct CompositedTile {
    pub tile: TileAddress,
    pub bounds: ProjectedRect,
    pub image: TileImage,
    pub fallback_from: Option<TileAddress>,
}

/// Ready tiles of one source, in the order they should be drawn
#[derive(Debug, Clone)]
pub struct CompositedLayer {
    pub source_id: SourceId,
    pub tiles: Vec<CompositedTile>,
}

/// Consistent copy of the view and everything ready to draw in it
#[derive(Debug, Clone)]
pub struct MapSnapshot {
    pub viewport: Viewport,
    /// Bottom layer first
    pub layers: Vec<CompositedLayer>,
}

pub struct Map {
    config: MapConfig,
    viewport: Viewport,
    handle: ViewportHandle,
    controller: InteractionController,
    sources: TileSourcesContainer,
    cache: TileCache,
    loader: TileLoader,
    events: EventBus,
    ready: HashMap<CacheKey, ReadyTile>,
    /// Covering set plus the keep buffer, refreshed on every view change
    retained: HashSet<CacheKey>,
    annotations: BTreeMap<AnnotationId, Annotation>,
    annotation_index: QuadTree<bool>,
    next_annotation_id: AnnotationId,
    visible_annotations: BTreeSet<AnnotationId>,
    shows_user_location: bool,
    user_location: Option<UserLocation>,
    tracking_mode: UserTrackingMode,
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("viewport", &self.viewport)
            .field("state", &self.controller.state())
            .field("sources", &self.sources)
            .field("ready_tiles", &self.ready.len())
            .field("annotations", &self.annotations.len())
            .finish()
    }
}

impl Map {
    /// Create a map with no tile sources. Fails on invalid configuration.
    pub fn new(
        config: MapConfig,
        projection: Projection,
        spawner: SharedSpawner,
        view_size: PixelSize,
    ) -> Result<Self> {
        config.validate()?;

        let mut viewport = Viewport::new(projection.clone(), view_size);
        viewport.set_view_size(view_size)?;
        viewport.set_screen_scale(config.view.screen_scale, config.view.adjust_tiles_for_retina)?;
        viewport.set_bounding_mask(config.view.bounding_mask);
        viewport.set_source_zoom_range(0, 0, crate::core::constants::TILE_SIZE);

        let cache = TileCache::new(&config.cache);
        if let Some(disk) = &config.cache.disk {
            log::info!(
                "tile cache at {} (persistent: {})",
                disk.path.display(),
                cache.is_persistent()
            );
        }
        let loader = TileLoader::new(cache.clone(), spawner, config.loader.clone());

        Ok(Self {
            handle: ViewportHandle::new(viewport.clone()),
            controller: InteractionController::new(config.view.deceleration_mode),
            annotation_index: QuadTree::new(projection.planet_bounds()),
            viewport,
            config,
            sources: TileSourcesContainer::new(),
            cache,
            loader,
            events: EventBus::new(),
            ready: HashMap::default(),
            retained: HashSet::default(),
            annotations: BTreeMap::new(),
            next_annotation_id: 1,
            visible_annotations: BTreeSet::new(),
            shows_user_location: false,
            user_location: None,
            tracking_mode: UserTrackingMode::None,
        })
    }

    // ---- accessors ----

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Handle other threads can read consistent viewport snapshots from
    pub fn viewport_handle(&self) -> ViewportHandle {
        self.handle.clone()
    }

    pub fn interaction_state(&self) -> InteractionState {
        self.controller.state()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn tile_sources(&self) -> &TileSourcesContainer {
        &self.sources
    }

    pub fn zoom(&self) -> f64 {
        self.viewport.zoom()
    }

    pub fn min_zoom(&self) -> f64 {
        self.viewport.min_zoom()
    }

    pub fn max_zoom(&self) -> f64 {
        self.viewport.max_zoom()
    }

    pub fn center_coordinate(&self) -> LatLng {
        self.viewport.center_coordinate()
    }

    pub fn center_projected_point(&self) -> ProjectedPoint {
        self.viewport.center()
    }

    pub fn projected_bounds(&self) -> ProjectedRect {
        self.viewport.projected_bounds()
    }

    pub fn view_size(&self) -> PixelSize {
        self.viewport.view_size()
    }

    pub fn set_view_size(&mut self, size: PixelSize) -> Result<()> {
        self.viewport.set_view_size(size)?;
        self.viewport_changed();
        Ok(())
    }

    pub fn set_bounding_mask(&mut self, mask: BoundingMask) {
        self.config.view.bounding_mask = mask;
        self.viewport.set_bounding_mask(mask);
        self.viewport_changed();
    }

    pub fn set_deceleration_mode(&mut self, mode: DecelerationMode) {
        self.config.view.deceleration_mode = mode;
        self.controller.set_deceleration_mode(mode);
    }

    pub fn set_debug_tiles(&mut self, enabled: bool) {
        self.config.debug_tiles = enabled;
    }

    pub fn set_clustering_enabled(&mut self, enabled: bool) {
        self.config.view.enable_clustering = enabled;
    }

    // ---- events ----

    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Receiver<MapEvent> {
        self.events.subscribe(kinds)
    }

    pub fn subscribe_all(&mut self) -> Receiver<MapEvent> {
        self.events.subscribe_all()
    }

    fn emit_transition(&mut self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            self.events.publish(MapEvent::InteractionStateChanged { from, to });
        }
    }

    // ---- view changes ----

    /// Move to `center`/`zoom`, either at once or through an animation that
    /// [`tick`](Self::tick) plays back
    fn go_to(&mut self, center: ProjectedPoint, zoom: f64, animated: bool) -> Result<()> {
        let mut target = self.viewport.clone();
        target.set_center_and_zoom(center, zoom)?;

        let duration = Duration::from_millis(self.config.view.animation_duration_ms);
        if animated && !duration.is_zero() {
            let animation = ViewAnimation::new(
                self.viewport.center(),
                target.center(),
                self.viewport.zoom(),
                target.zoom(),
                duration,
                self.config.view.easing,
            );
            let transition = self.controller.start_animation(animation);
            self.emit_transition(transition);
            return Ok(());
        }

        if matches!(
            self.controller.state(),
            InteractionState::Decelerating | InteractionState::AnimatingToTarget
        ) {
            let transition = self.controller.stop();
            self.emit_transition(transition);
        }
        self.viewport = target;
        self.viewport_changed();
        Ok(())
    }

    /// Show `rect` as large as fits in the view
    pub fn set_projected_bounds(&mut self, rect: ProjectedRect, animated: bool) -> Result<()> {
        let (center, zoom) = self.viewport.fit(&rect)?;
        self.go_to(center, zoom, animated)
    }

    pub fn set_center_coordinate(&mut self, coordinate: LatLng, animated: bool) -> Result<()> {
        let center = self.viewport.projection().geo_to_projected(coordinate)?;
        self.go_to(center, self.viewport.zoom(), animated)
    }

    pub fn set_center_projected_point(&mut self, point: ProjectedPoint, animated: bool) -> Result<()> {
        self.go_to(point, self.viewport.zoom(), animated)
    }

    pub fn set_zoom(&mut self, zoom: f64, animated: bool) -> Result<()> {
        self.go_to(self.viewport.center(), zoom, animated)
    }

    /// Move and zoom in one step so the centre is clamped at the final zoom
    pub fn set_center_coordinate_and_zoom(&mut self, coordinate: LatLng, zoom: f64, animated: bool) -> Result<()> {
        let center = self.viewport.projection().geo_to_projected(coordinate)?;
        self.go_to(center, zoom, animated)
    }

    /// Scale the view by `factor` around `pivot`, or around the view centre
    /// when `zoom_pivots_around_center` is set
    pub fn zoom_by_factor(&mut self, factor: f64, pivot: PixelPoint, animated: bool) -> Result<()> {
        let pivot = self.zoom_pivot(pivot);
        let (center, zoom) = self.viewport.zoom_target(factor, pivot)?;
        self.go_to(center, zoom, animated)
    }

    fn zoom_pivot(&self, pivot: PixelPoint) -> PixelPoint {
        if self.config.view.zoom_pivots_around_center {
            let size = self.viewport.view_size();
            PixelPoint::new(size.width / 2.0, size.height / 2.0)
        } else {
            pivot
        }
    }

    /// Drag the content by `delta` pixels
    pub fn move_by(&mut self, delta: PixelPoint) -> Result<()> {
        self.viewport.move_by(delta)?;
        self.viewport_changed();
        Ok(())
    }

    /// A drag gesture started. Stops inertia and animations and leaves
    /// user tracking.
    pub fn begin_pan(&mut self) {
        let transition = self.controller.begin_pan();
        self.emit_transition(transition);
        if self.tracking_mode.follows() {
            self.tracking_mode = UserTrackingMode::None;
            self.events.publish(MapEvent::UserTrackingModeChanged {
                mode: UserTrackingMode::None,
            });
        }
    }

    /// The drag ended with `velocity` in pixels per second
    pub fn end_pan(&mut self, velocity: PixelPoint) {
        let transition = self.controller.pan_released(velocity);
        self.emit_transition(transition);
    }

    pub fn begin_pinch(&mut self) {
        let transition = self.controller.begin_zoom();
        self.emit_transition(transition);
    }

    pub fn pinch_by(&mut self, factor: f64, pivot: PixelPoint) -> Result<()> {
        let pivot = self.zoom_pivot(pivot);
        self.viewport.zoom_by_factor(factor, pivot)?;
        self.viewport_changed();
        Ok(())
    }

    pub fn end_pinch(&mut self) {
        let transition = self.controller.end_zoom();
        self.emit_transition(transition);
    }

    /// Advance inertia or a running animation by `dt`. Returns `true` while
    /// more ticks are needed.
    pub fn tick(&mut self, dt: Duration) -> bool {
        let outcome = self.controller.tick(dt);
        let mut transition = outcome.transition;
        match outcome.step {
            ControllerStep::None => {}
            ControllerStep::Move(delta) => {
                let blocked = match self.viewport.move_by(delta) {
                    Ok(blocked) => blocked,
                    Err(e) => {
                        log::warn!("dropping inertia step: {}", e);
                        true
                    }
                };
                if blocked && transition.is_none() {
                    transition = self.controller.stop();
                }
                self.viewport_changed();
            }
            ControllerStep::Frame(frame) => {
                if let Err(e) = self.viewport.set_center_and_zoom(frame.center, frame.zoom) {
                    log::warn!("dropping animation frame: {}", e);
                    if transition.is_none() {
                        transition = self.controller.stop();
                    }
                }
                self.viewport_changed();
            }
        }
        self.emit_transition(transition);
        !self.controller.is_idle()
    }

    // ---- zoom limits and native steps ----

    pub fn set_min_zoom(&mut self, zoom: f64) -> Result<()> {
        self.viewport.set_min_zoom(zoom)?;
        self.viewport_changed();
        Ok(())
    }

    pub fn set_max_zoom(&mut self, zoom: f64) -> Result<()> {
        self.viewport.set_max_zoom(zoom)?;
        self.viewport_changed();
        Ok(())
    }

    /// Factor that brings the zoom up to the next integer level
    pub fn next_native_zoom_factor(&self) -> f64 {
        let zoom = self.viewport.zoom();
        let next = ((zoom + NATIVE_ZOOM_EPSILON).floor() + DEFAULT_ZOOM_DELTA).min(self.max_zoom());
        2_f64.powf(next - zoom)
    }

    /// Factor that brings the zoom down to the previous integer level
    pub fn previous_native_zoom_factor(&self) -> f64 {
        let zoom = self.viewport.zoom();
        let previous = ((zoom - NATIVE_ZOOM_EPSILON).ceil() - DEFAULT_ZOOM_DELTA).max(self.min_zoom());
        2_f64.powf(previous - zoom)
    }

    pub fn zoom_in_to_next_native_zoom_at(&mut self, pivot: PixelPoint, animated: bool) -> Result<()> {
        let factor = self.next_native_zoom_factor();
        self.zoom_by_factor(factor, pivot, animated)
    }

    pub fn zoom_out_to_next_native_zoom_at(&mut self, pivot: PixelPoint, animated: bool) -> Result<()> {
        let factor = self.previous_native_zoom_factor();
        self.zoom_by_factor(factor, pivot, animated)
    }

    /// Fit a geographic box into the view
    pub fn zoom_with_lat_lng_bounds(&mut self, south_west: LatLng, north_east: LatLng, animated: bool) -> Result<()> {
        let rect = self
            .viewport
            .projection()
            .projected_rect(&LatLngBounds::new(south_west, north_east))?;
        self.set_projected_bounds(rect, animated)
    }

    // ---- scale ----

    pub fn meters_per_pixel(&self) -> f64 {
        self.viewport.meters_per_pixel()
    }

    pub fn set_meters_per_pixel(&mut self, meters_per_pixel: f64, animated: bool) -> Result<()> {
        if !meters_per_pixel.is_finite() || meters_per_pixel <= 0.0 {
            return Err(MapError::InvalidCoordinate(format!(
                "meters per pixel must be positive, got {}",
                meters_per_pixel
            )));
        }
        let zoom = self.viewport.tiling().zoom_for_meters_per_pixel(meters_per_pixel);
        self.set_zoom(zoom, animated)
    }

    /// Meters per device pixel
    pub fn scaled_meters_per_pixel(&self) -> f64 {
        self.viewport.scaled_meters_per_pixel()
    }

    /// Cartographic scale, e.g. 25000 for 1:25000
    pub fn scale_denominator(&self) -> f64 {
        self.meters_per_pixel() * DEFAULT_SCREEN_DPI / METERS_PER_INCH
    }

    pub fn screen_scale(&self) -> f64 {
        self.viewport.screen_scale()
    }

    pub fn adjusted_zoom_for_retina_display(&self) -> f64 {
        self.viewport.adjusted_zoom_for_retina_display()
    }

    // ---- constraints and bounding boxes ----

    /// Keep the view centre inside a geographic region
    pub fn set_constraints(&mut self, south_west: LatLng, north_east: LatLng) -> Result<()> {
        let projection = self.viewport.projection();
        let sw = projection.geo_to_projected(south_west)?;
        let ne = projection.geo_to_projected(north_east)?;
        self.set_projected_constraints(sw, ne)
    }

    pub fn set_projected_constraints(&mut self, south_west: ProjectedPoint, north_east: ProjectedPoint) -> Result<()> {
        self.viewport
            .set_constraints(Some(ProjectedRect::from_corners(south_west, north_east)))?;
        self.viewport_changed();
        Ok(())
    }

    pub fn clear_constraints(&mut self) -> Result<()> {
        self.viewport.set_constraints(None)?;
        self.viewport_changed();
        Ok(())
    }

    pub fn lat_lng_bounding_box(&self) -> LatLngBounds {
        self.viewport.lat_lng_bounding_box()
    }

    pub fn lat_lng_bounding_box_for(&self, rect: PixelRect) -> LatLngBounds {
        self.viewport.lat_lng_bounding_box_for(rect)
    }

    fn full_tiling(&self) -> FractalTileProjection {
        FractalTileProjection::new(
            self.viewport.projection(),
            self.viewport.tile_side_length(),
            0,
            MAX_TILE_ZOOM - 1,
        )
    }

    pub fn lat_lng_bounding_box_for_tile(&self, tile: TileAddress) -> Result<LatLngBounds> {
        let tile = TileAddress::checked(tile.x, tile.y, tile.zoom)?;
        let bounds = self.full_tiling().tile_bounds(tile);
        Ok(self.viewport.projection().bounding_box(&bounds))
    }

    /// Tile containing `coordinate` at `zoom`
    pub fn tile_with_coordinate(&self, coordinate: LatLng, zoom: u8) -> Result<TileAddress> {
        if zoom >= MAX_TILE_ZOOM {
            return Err(MapError::ZoomOutOfRange {
                zoom: f64::from(zoom),
                min: 0.0,
                max: f64::from(MAX_TILE_ZOOM - 1),
            });
        }
        let point = self.viewport.projection().geo_to_projected(coordinate)?;
        Ok(self.full_tiling().tile_for_point(point, zoom))
    }

    /// Whether any visible source has content at `point`
    pub fn tile_source_bounds_contain_projected_point(&self, point: ProjectedPoint) -> bool {
        let coordinate = self.viewport.projection().projected_to_geo(point);
        self.sources
            .visible_sources()
            .any(|source| source.bounds().contains(&coordinate))
    }

    // ---- conversions ----

    pub fn projected_point_to_pixel(&self, point: ProjectedPoint) -> PixelPoint {
        self.viewport.projected_to_pixel(point)
    }

    pub fn pixel_to_projected_point(&self, pixel: PixelPoint) -> ProjectedPoint {
        self.viewport.pixel_to_projected(pixel)
    }

    pub fn coordinate_to_pixel(&self, coordinate: LatLng) -> Result<PixelPoint> {
        self.viewport.coordinate_to_pixel(coordinate)
    }

    pub fn pixel_to_coordinate(&self, pixel: PixelPoint) -> LatLng {
        self.viewport.pixel_to_coordinate(pixel)
    }

    pub fn coordinate_to_projected_point(&self, coordinate: LatLng) -> Result<ProjectedPoint> {
        self.viewport.projection().geo_to_projected(coordinate)
    }

    pub fn projected_point_to_coordinate(&self, point: ProjectedPoint) -> LatLng {
        self.viewport.projection().projected_to_geo(point)
    }

    pub fn view_size_to_projected_size(&self, size: PixelSize) -> ProjectedSize {
        self.viewport.view_size_to_projected_size(size)
    }

    pub fn projected_size_to_view_size(&self, size: ProjectedSize) -> PixelSize {
        self.viewport.projected_size_to_view_size(size)
    }

    /// Wrap longitude and apply the latitude policy
    pub fn normalize_coordinate(&self, coordinate: LatLng) -> Result<LatLng> {
        self.viewport.projection().validate(coordinate)
    }

    // ---- tile sources ----

    pub fn add_tile_source(&mut self, source: Arc<dyn TileSource>) -> Result<()> {
        let index = self.sources.len();
        self.insert_tile_source(source, index)
    }

    pub fn insert_tile_source(&mut self, source: Arc<dyn TileSource>, index: usize) -> Result<()> {
        let id = source.unique_tile_source_id();
        self.sources.insert_at(source, index)?;
        log::info!("added tile source {} at {}", id, index);
        self.sources_changed();
        Ok(())
    }

    /// Remove a source and cancel its fetches. With `purge_cache` its cached
    /// tiles are deleted from both tiers as well.
    pub fn remove_tile_source(&mut self, id: &str, purge_cache: bool) -> Result<Arc<dyn TileSource>> {
        let source = self.sources.remove(id)?;
        self.forget_source(&source, purge_cache);
        self.sources_changed();
        Ok(source)
    }

    pub fn remove_tile_source_at(&mut self, index: usize, purge_cache: bool) -> Result<Arc<dyn TileSource>> {
        let source = self.sources.remove_at(index)?;
        self.forget_source(&source, purge_cache);
        self.sources_changed();
        Ok(source)
    }

    fn forget_source(&mut self, source: &Arc<dyn TileSource>, purge_cache: bool) {
        let id = source.unique_tile_source_id();
        source.cancel_all_requests();
        if purge_cache {
            self.cache.invalidate_source(&id);
        } else {
            self.cache.detach_in_flight(&id);
        }
        self.loader.forget_source(&id);
        self.ready.retain(|key, _| key.source_id != id);
        log::info!("removed tile source {}", id);
    }

    pub fn move_tile_source(&mut self, from: usize, to: usize) -> Result<()> {
        self.sources.move_source(from, to)?;
        self.sources_changed();
        Ok(())
    }

    /// Exclude a source from compositing. Fetches already running finish and
    /// land in the cache.
    pub fn set_tile_source_hidden(&mut self, id: &str, hidden: bool) -> Result<()> {
        self.sources.set_hidden(id, hidden)?;
        self.sources_changed();
        Ok(())
    }

    /// Drop one source's cached tiles and fetch them again
    pub fn reload_tile_source(&mut self, id: &str) -> Result<()> {
        let source_id: SourceId = self
            .sources
            .get(id)
            .map(|source| source.unique_tile_source_id())
            .ok_or_else(|| MapError::TileSource(format!("unknown tile source '{}'", id)))?;
        self.cache.invalidate_source(&source_id);
        self.loader.forget_source(&source_id);
        self.ready.retain(|key, _| key.source_id != source_id);
        log::info!("reloading tile source {}", source_id);
        self.refresh_tiles();
        Ok(())
    }

    /// Clear the memory and disk tiers for every source
    pub fn remove_all_cached_images(&mut self) {
        self.cache.remove_all_cached_images();
        self.loader.forget_all();
        self.ready.clear();
        self.refresh_tiles();
    }

    fn sources_changed(&mut self) {
        let (min, max) = self.sources.zoom_range();
        self.viewport
            .set_source_zoom_range(min, max, self.sources.tile_side_length());
        self.viewport_changed();
    }

    // ---- tiles ----

    /// Tile zoom and addressing used for `source` at the current view
    fn tiling_for(&self, source: &dyn TileSource) -> (u8, FractalTileProjection) {
        let (min, max) = source.zoom_range();
        let zoom = self.viewport.tile_zoom_for(source.is_retina(), min, max);
        let tiling = FractalTileProjection::new(self.viewport.projection(), source.tile_side_length(), min, max);
        (zoom, tiling)
    }

    /// Publish the new viewport and bring tiles and annotations up to date
    fn viewport_changed(&mut self) {
        self.handle.publish(&self.viewport);
        self.events.publish(MapEvent::BoundsChanged {
            bounds: self.viewport.projected_bounds(),
            zoom: self.viewport.zoom(),
        });
        self.refresh_tiles();
        self.update_annotation_visibility();
    }

    /// Request the covering set of every visible source and drop ready tiles
    /// that fell out of the retained set
    fn refresh_tiles(&mut self) {
        let bounds = self.viewport.projected_bounds();
        let keep_buffer = f64::from(self.config.loader.keep_buffer);
        let sources: Vec<Arc<dyn TileSource>> = self.sources.visible_sources().cloned().collect();

        let mut retained = HashSet::default();
        for source in sources {
            let source_id = source.unique_tile_source_id();
            let (zoom, tiling) = self.tiling_for(source.as_ref());

            for tile in tiling.tiles_in_rect(&bounds, zoom) {
                let key = CacheKey::new(source_id.clone(), tile);
                retained.insert(key.clone());
                self.request_tile(&source, key);
            }
            if keep_buffer > 0.0 {
                let buffered = bounds.expanded(tiling.tile_span(zoom) * keep_buffer);
                for tile in tiling.tiles_in_rect(&buffered, zoom) {
                    retained.insert(CacheKey::new(source_id.clone(), tile));
                }
            }
        }

        self.ready.retain(|key, _| retained.contains(key));
        self.retained = retained;
    }

    fn request_tile(&mut self, source: &Arc<dyn TileSource>, key: CacheKey) {
        match self.ready.get(&key) {
            Some(ready) if ready.fallback_from.is_none() => return,
            // A fallback stands in until the tile itself arrives
            Some(_) => {}
            // Disk lookups happen on the loader task
            None => {
                if let Some(image) = self.cache.get_from_memory(&key) {
                    self.tile_ready(key, image, None);
                    return;
                }
            }
        }
        self.loader.request(source.clone(), key.tile);
    }

    fn tile_ready(&mut self, key: CacheKey, image: TileImage, fallback_from: Option<TileAddress>) {
        let debug_label = self.config.debug_tiles.then(|| key.tile.to_string());
        self.events.publish(MapEvent::TileReady {
            tile: key.tile,
            source_id: key.source_id.clone(),
            image: image.clone(),
            fallback_from,
            debug_label,
        });
        self.ready.insert(key, ReadyTile { image, fallback_from });
    }

    /// Apply finished fetches. Results from before an invalidation or for
    /// tiles no longer in view are dropped; they are already cached.
    /// Returns the number of tiles that became ready.
    pub fn process_tile_results(&mut self) -> usize {
        let mut applied = 0;
        for result in self.loader.try_recv_results() {
            let key = CacheKey::new(result.source_id.clone(), result.tile);
            if result.epoch != self.cache.epoch(&result.source_id) {
                log::debug!("dropping stale result {}", key.storage_key());
                continue;
            }
            if !self.retained.contains(&key) {
                log::debug!("dropping result outside the view {}", key.storage_key());
                continue;
            }
            match result.outcome {
                TileOutcome::Ready { image, fallback_from } => {
                    let direct_present = self
                        .ready
                        .get(&key)
                        .map_or(false, |ready| ready.fallback_from.is_none());
                    if fallback_from.is_some() && direct_present {
                        continue;
                    }
                    self.tile_ready(key, image, fallback_from);
                    applied += 1;
                }
                TileOutcome::Failed(error) => {
                    self.events.publish(MapEvent::TileFailed {
                        tile: result.tile,
                        source_id: result.source_id,
                        error,
                    });
                }
            }
        }
        applied
    }

    /// Resolve one tile of a source right away, including the ancestor
    /// fallback. Returns the image and the ancestor it was cropped from.
    pub async fn load_tile(&self, source_id: &str, tile: TileAddress) -> Result<(TileImage, Option<TileAddress>)> {
        let source = self
            .sources
            .get(source_id)
            .cloned()
            .ok_or_else(|| MapError::TileSource(format!("unknown tile source '{}'", source_id)))?;
        match self.loader.load(source, tile).await {
            TileOutcome::Ready { image, fallback_from } => Ok((image, fallback_from)),
            TileOutcome::Failed(FetchError::ZoomOutOfRange { zoom, min, max }) => Err(MapError::ZoomOutOfRange {
                zoom: f64::from(zoom),
                min: f64::from(min),
                max: f64::from(max),
            }),
            TileOutcome::Failed(error) => Err(MapError::TileFetchFailed {
                tile,
                source_id: source_id.to_string(),
                reason: error.to_string(),
            }),
        }
    }

    /// Ready tiles of the current covering set, per visible source, bottom first
    pub fn composited_tiles(&self) -> Vec<CompositedLayer> {
        let bounds = self.viewport.projected_bounds();
        self.sources
            .visible_sources()
            .map(|source| {
                let source_id = source.unique_tile_source_id();
                let (zoom, tiling) = self.tiling_for(source.as_ref());
                let tiles = tiling
                    .tiles_in_rect(&bounds, zoom)
                    .into_iter()
                    .filter_map(|tile| {
                        let ready = self.ready.get(&CacheKey::new(source_id.clone(), tile))?;
                        Some(CompositedTile {
                            tile,
                            bounds: tiling.tile_bounds(tile),
                            image: ready.image.clone(),
                            fallback_from: ready.fallback_from,
                        })
                    })
                    .collect();
                CompositedLayer { source_id, tiles }
            })
            .collect()
    }

    pub fn snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            viewport: self.viewport.clone(),
            layers: self.composited_tiles(),
        }
    }

    // ---- annotations ----

    fn insert_annotation(&mut self, mut annotation: Annotation, projected: ProjectedPoint) -> AnnotationId {
        let id = self.next_annotation_id;
        self.next_annotation_id += 1;
        annotation.id = id;
        annotation.projected = projected;
        self.annotation_index
            .insert(id, projected, annotation.clustering_enabled);
        self.annotations.insert(id, annotation);
        id
    }

    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<AnnotationId> {
        let projected = self.viewport.projection().geo_to_projected(annotation.coordinate)?;
        let id = self.insert_annotation(annotation, projected);
        self.update_annotation_visibility();
        Ok(id)
    }

    /// Add several annotations; nothing is added if any coordinate is invalid
    pub fn add_annotations(&mut self, annotations: Vec<Annotation>) -> Result<Vec<AnnotationId>> {
        let projection = self.viewport.projection();
        let projected = annotations
            .iter()
            .map(|annotation| projection.geo_to_projected(annotation.coordinate))
            .collect::<Result<Vec<_>>>()?;
        let ids = annotations
            .into_iter()
            .zip(projected)
            .map(|(annotation, point)| self.insert_annotation(annotation, point))
            .collect();
        self.update_annotation_visibility();
        Ok(ids)
    }

    pub fn remove_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        self.annotation_index.remove(id);
        self.visible_annotations.remove(&id);
        self.annotations.remove(&id)
    }

    pub fn remove_annotations(&mut self, ids: &[AnnotationId]) -> Vec<Annotation> {
        ids.iter().filter_map(|id| self.remove_annotation(*id)).collect()
    }

    pub fn remove_all_annotations(&mut self) {
        self.annotation_index.clear();
        self.visible_annotations.clear();
        self.annotations.clear();
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    /// Annotations inside the current projected bounds
    pub fn visible_annotations(&self) -> Vec<&Annotation> {
        self.visible_annotations
            .iter()
            .filter_map(|id| self.annotations.get(id))
            .collect()
    }

    /// Position of an annotation in view pixels
    pub fn map_position_for_annotation(&self, id: AnnotationId) -> Option<PixelPoint> {
        self.annotations
            .get(&id)
            .map(|annotation| self.viewport.projected_to_pixel(annotation.projected))
    }

    /// Visible annotations grouped for display. Without clustering every
    /// annotation is its own group.
    pub fn clusters(&self) -> Vec<AnnotationCluster> {
        let bounds = self.viewport.projected_bounds();
        let view = &self.config.view;
        if !view.enable_clustering {
            return self
                .visible_annotations()
                .into_iter()
                .map(|annotation| AnnotationCluster {
                    position: annotation.projected,
                    members: vec![annotation.id],
                })
                .collect();
        }
        let cell_size = view.cluster_area_size * self.viewport.meters_per_pixel();
        self.annotation_index
            .clusters(&bounds, cell_size, view.cluster_at_gravity_center, |enabled| *enabled)
            .into_iter()
            .map(|cluster| AnnotationCluster {
                position: cluster.center,
                members: cluster.ids,
            })
            .collect()
    }

    fn update_annotation_visibility(&mut self) {
        let bounds = self.viewport.projected_bounds();
        let now: BTreeSet<AnnotationId> = self
            .annotation_index
            .query(&bounds)
            .into_iter()
            .map(|item| item.id)
            .collect();
        let hidden: Vec<AnnotationId> = self.visible_annotations.difference(&now).copied().collect();
        let shown: Vec<AnnotationId> = now.difference(&self.visible_annotations).copied().collect();
        self.visible_annotations = now;

        if !hidden.is_empty() {
            self.events.publish(MapEvent::AnnotationsHidden { ids: hidden });
        }
        if !shown.is_empty() {
            self.events.publish(MapEvent::AnnotationsShown { ids: shown });
        }
    }

    // ---- taps ----

    /// Hit-test annotations at `position`. Reports the nearest one within
    /// reach, or a plain map tap.
    pub fn single_tap_at(&mut self, position: PixelPoint) -> Option<AnnotationId> {
        let mut nearest: Option<(AnnotationId, f64)> = None;
        for annotation in self.visible_annotations() {
            let distance = self
                .viewport
                .projected_to_pixel(annotation.projected)
                .distance_to(&position);
            if distance <= ANNOTATION_HIT_RADIUS && nearest.map_or(true, |(_, best)| distance < best) {
                nearest = Some((annotation.id, distance));
            }
        }

        match nearest {
            Some((id, _)) => {
                self.events.publish(MapEvent::AnnotationTapped { id, position });
                Some(id)
            }
            None => {
                let coordinate = self.viewport.pixel_to_coordinate(position);
                self.events.publish(MapEvent::MapTapped { position, coordinate });
                None
            }
        }
    }

    /// Zoom in to the next native level
    pub fn double_tap_at(&mut self, position: PixelPoint, animated: bool) -> Result<()> {
        self.zoom_in_to_next_native_zoom_at(position, animated)
    }

    // ---- user location ----

    pub fn shows_user_location(&self) -> bool {
        self.shows_user_location
    }

    pub fn set_shows_user_location(&mut self, shows: bool) {
        self.shows_user_location = shows;
        if !shows && self.tracking_mode.follows() {
            self.tracking_mode = UserTrackingMode::None;
            self.events.publish(MapEvent::UserTrackingModeChanged {
                mode: UserTrackingMode::None,
            });
        }
    }

    pub fn user_location(&self) -> Option<&UserLocation> {
        self.user_location.as_ref()
    }

    pub fn user_tracking_mode(&self) -> UserTrackingMode {
        self.tracking_mode
    }

    /// Record a fix from the location service; follow modes recentre on it
    pub fn update_user_location(&mut self, mut location: UserLocation) -> Result<()> {
        location.coordinate = self.viewport.projection().validate(location.coordinate)?;
        let coordinate = location.coordinate;
        self.user_location = Some(location.clone());
        self.events.publish(MapEvent::UserLocationUpdated { location });
        if self.tracking_mode.follows() {
            self.set_center_coordinate(coordinate, false)?;
        }
        Ok(())
    }

    /// Whether the accuracy circle of the last fix intersects the view
    pub fn is_user_location_visible(&self) -> bool {
        let Some(location) = self.user_location.as_ref().filter(|_| self.shows_user_location) else {
            return false;
        };
        let Ok(point) = self.viewport.projection().geo_to_projected(location.coordinate) else {
            return false;
        };
        // Mercator stretches distances by 1 / cos(latitude)
        let radius = location.horizontal_accuracy / location.coordinate.lat.to_radians().cos().max(1e-9);
        self.viewport.projected_bounds().expanded(radius).contains(&point)
    }

    pub fn set_user_tracking_mode(&mut self, mode: UserTrackingMode, animated: bool) -> Result<()> {
        if mode != self.tracking_mode {
            self.tracking_mode = mode;
            self.events.publish(MapEvent::UserTrackingModeChanged { mode });
        }
        if mode.follows() {
            self.shows_user_location = true;
            if let Some(coordinate) = self.user_location.as_ref().map(|l| l.coordinate) {
                self.set_center_coordinate(coordinate, animated)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ViewConfig;
    use crate::runtime::TokioSpawner;
    use crate::tiles::source::SolidColorTileSource;

    fn test_map(config: MapConfig, width: f64, height: f64) -> Map {
        let spawner: SharedSpawner = Arc::new(TokioSpawner::current().unwrap());
        Map::new(
            config,
            Projection::spherical_mercator(),
            spawner,
            PixelSize::new(width, height),
        )
        .unwrap()
    }

    fn solid(id: &str) -> Arc<dyn TileSource> {
        Arc::new(SolidColorTileSource::new(id, [10, 20, 30, 255]).with_zoom_range(0, 18))
    }

    #[tokio::test]
    async fn test_zoom_range_follows_sources() {
        let mut map = test_map(MapConfig::default(), 512.0, 512.0);
        assert_eq!(map.max_zoom(), 0.0);

        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(30.0, false).unwrap();
        assert_eq!(map.zoom(), 18.0);
        map.set_zoom(-4.0, false).unwrap();
        assert_eq!(map.zoom(), 0.0);
    }

    #[tokio::test]
    async fn test_native_zoom_steps() {
        let mut map = test_map(MapConfig::default(), 512.0, 512.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(3.4, false).unwrap();
        assert!((map.next_native_zoom_factor() - 2_f64.powf(0.6)).abs() < 1e-9);

        map.zoom_in_to_next_native_zoom_at(PixelPoint::new(256.0, 256.0), false)
            .unwrap();
        assert!((map.zoom() - 4.0).abs() < 1e-9);
        map.zoom_out_to_next_native_zoom_at(PixelPoint::new(256.0, 256.0), false)
            .unwrap();
        assert!((map.zoom() - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_animated_zoom_runs_through_tick() {
        let mut map = test_map(MapConfig::default(), 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        let events = map.subscribe(&[EventKind::InteractionStateChanged]);

        map.set_zoom(5.0, true).unwrap();
        assert_eq!(map.zoom(), 0.0);
        assert_eq!(map.interaction_state(), InteractionState::AnimatingToTarget);

        let mut ticks = 0;
        while map.tick(Duration::from_millis(50)) {
            ticks += 1;
            assert!(ticks < 100);
        }
        assert!((map.zoom() - 5.0).abs() < 1e-9);
        let states: Vec<InteractionState> = events
            .try_iter()
            .filter_map(|event| match event {
                MapEvent::InteractionStateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            [InteractionState::AnimatingToTarget, InteractionState::Idle]
        );
    }

    #[tokio::test]
    async fn test_inertia_stops_at_constraint_edge() {
        let mut map = test_map(MapConfig::default(), 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(8.0, false).unwrap();
        map.set_constraints(LatLng::new(45.0, 5.0), LatLng::new(47.0, 10.0))
            .unwrap();
        map.set_center_coordinate(LatLng::new(46.0, 10.0), false).unwrap();

        // Content dragged left moves the centre east, past the edge
        map.begin_pan();
        map.end_pan(PixelPoint::new(-800.0, 0.0));
        assert_eq!(map.interaction_state(), InteractionState::Decelerating);

        assert!(!map.tick(Duration::from_millis(16)));
        assert_eq!(map.interaction_state(), InteractionState::Idle);
        assert!((map.center_coordinate().lng - 10.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_invalid_calls_do_not_mutate() {
        let mut map = test_map(MapConfig::default(), 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(4.0, false).unwrap();
        let before = map.viewport().clone();

        assert!(map.set_center_coordinate(LatLng::new(95.0, 0.0), false).is_err());
        assert!(map.set_zoom(f64::NAN, false).is_err());
        assert!(map.zoom_by_factor(-1.0, PixelPoint::default(), false).is_err());
        assert_eq!(map.viewport(), &before);
    }

    #[tokio::test]
    async fn test_annotation_visibility_events() {
        let mut map = test_map(MapConfig::default(), 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(6.0, false).unwrap();
        let events = map.subscribe(&[EventKind::AnnotationsHidden, EventKind::AnnotationsShown]);

        let near = map.add_annotation(Annotation::new(LatLng::new(0.5, 0.5))).unwrap();
        let far = map.add_annotation(Annotation::new(LatLng::new(40.0, 100.0))).unwrap();
        let ids: Vec<AnnotationId> = map.visible_annotations().iter().map(|a| a.id).collect();
        assert_eq!(ids, [near]);

        map.set_center_coordinate(LatLng::new(40.0, 100.0), false).unwrap();
        let ids: Vec<AnnotationId> = map.visible_annotations().iter().map(|a| a.id).collect();
        assert_eq!(ids, [far]);

        let received: Vec<MapEvent> = events.try_iter().collect();
        assert!(matches!(&received[0], MapEvent::AnnotationsShown { ids } if ids == &[near]));
        assert!(received
            .iter()
            .any(|e| matches!(e, MapEvent::AnnotationsHidden { ids } if ids == &[near])));
    }

    #[tokio::test]
    async fn test_single_tap_hits_annotation() {
        let mut map = test_map(MapConfig::default(), 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(8.0, false).unwrap();
        let id = map
            .add_annotation(Annotation::new(LatLng::new(0.0, 0.0)).with_title("origin"))
            .unwrap();
        let position = map.map_position_for_annotation(id).unwrap();

        let tapped = map.single_tap_at(PixelPoint::new(position.x + 5.0, position.y));
        assert_eq!(tapped, Some(id));
        assert_eq!(map.single_tap_at(PixelPoint::new(0.0, 0.0)), None);
    }

    #[tokio::test]
    async fn test_clusters_merge_nearby_annotations() {
        let config = MapConfig {
            view: ViewConfig {
                enable_clustering: true,
                cluster_area_size: 256.0,
                ..ViewConfig::default()
            },
            ..MapConfig::default()
        };
        let mut map = test_map(config, 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(2.0, false).unwrap();
        map.add_annotations(vec![
            Annotation::new(LatLng::new(10.0, 10.0)),
            Annotation::new(LatLng::new(10.5, 10.5)),
            Annotation::new(LatLng::new(11.0, 11.0)).with_clustering(false),
        ])
        .unwrap();

        let clusters = map.clusters();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().any(|c| c.len() == 2));

        map.set_clustering_enabled(false);
        assert_eq!(map.clusters().len(), 3);
    }

    #[tokio::test]
    async fn test_follow_mode_recentres() {
        let mut map = test_map(MapConfig::default(), 256.0, 256.0);
        map.add_tile_source(solid("base")).unwrap();
        map.set_zoom(10.0, false).unwrap();
        map.set_user_tracking_mode(UserTrackingMode::Follow, false).unwrap();
        map.update_user_location(UserLocation::new(LatLng::new(48.85, 2.35), 30.0))
            .unwrap();

        let center = map.center_coordinate();
        assert!((center.lat - 48.85).abs() < 1e-6);
        assert!(map.is_user_location_visible());

        // Dragging leaves follow mode
        map.begin_pan();
        assert_eq!(map.user_tracking_mode(), UserTrackingMode::None);
    }

    #[tokio::test]
    async fn test_tile_with_coordinate() {
        let map = test_map(MapConfig::default(), 256.0, 256.0);
        let tile = map.tile_with_coordinate(LatLng::new(0.0, 0.0), 1).unwrap();
        assert_eq!(tile, TileAddress::new(1, 1, 1));
        assert!(map.tile_with_coordinate(LatLng::new(0.0, 0.0), 40).is_err());

        let bounds = map.lat_lng_bounding_box_for_tile(TileAddress::new(0, 0, 1)).unwrap();
        assert!((bounds.north_east.lng - 0.0).abs() < 1e-9);
        assert!((bounds.south_west.lat - 0.0).abs() < 1e-9);
    }
}
