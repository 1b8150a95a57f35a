mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{arc, test_config, CountingSource};
use slippymap::constants::MAX_TILE_ZOOM;
use slippymap::{
    BoundingMask, DecelerationMode, EventKind, InteractionState, LatLng, Map, MapBuilder, MapError,
    MapEvent, PixelPoint, PixelRect, SolidColorTileSource, TileSource,
};

fn base() -> Arc<dyn TileSource> {
    Arc::new(SolidColorTileSource::new("base", [200, 200, 200, 255]).with_zoom_range(0, 18))
}

fn build(width: f64, height: f64) -> Map {
    MapBuilder::new()
        .with_config(test_config())
        .with_tile_source(base())
        .with_view_size(width, height)
        .build()
        .unwrap()
}

#[tokio::test]
async fn min_width_bound_fills_the_view_with_the_world() {
    let mut map = MapBuilder::new()
        .with_tile_source(base())
        .with_view_size(1024.0, 512.0)
        .with_bounding_mask(BoundingMask::MinWidthBound)
        .build()
        .unwrap();

    map.set_zoom(0.0, false).unwrap();
    assert!((map.zoom() - 2.0).abs() < 1e-9);

    let world = slippymap::Projection::spherical_mercator().planet_bounds();
    let bounds = map.projected_bounds();
    assert!((bounds.width() - world.width()).abs() < 1e-3);
    assert!(bounds.min_x() >= world.min_x() - 1e-3 && bounds.max_x() <= world.max_x() + 1e-3);
}

#[tokio::test]
async fn min_height_bound_fills_the_view_with_the_world() {
    let mut map = MapBuilder::new()
        .with_tile_source(base())
        .with_view_size(512.0, 1024.0)
        .with_bounding_mask(BoundingMask::MinHeightBound)
        .build()
        .unwrap();

    map.set_zoom(0.0, false).unwrap();
    assert!((map.zoom() - 2.0).abs() < 1e-9);

    let world = slippymap::Projection::spherical_mercator().planet_bounds();
    let bounds = map.projected_bounds();
    assert!((bounds.height() - world.height()).abs() < 1e-3);
    assert!(bounds.min_y() >= world.min_y() - 1e-3 && bounds.max_y() <= world.max_y() + 1e-3);
}

#[tokio::test]
async fn sources_with_unusable_zoom_ranges_are_refused() {
    let mut map = build(256.0, 256.0);
    let inverted = arc(CountingSource::new("inverted").with_zoom_range(10, 5));
    assert!(matches!(
        map.add_tile_source(inverted),
        Err(MapError::TileSource(_))
    ));
    assert_eq!(map.tile_sources().len(), 1);

    map.set_zoom(7.0, false).unwrap();
    assert_eq!(map.zoom(), 7.0);
}

#[tokio::test]
async fn deep_source_ranges_stop_at_the_last_tile_zoom() {
    for max in [40, 70] {
        let mut map = MapBuilder::new()
            .with_config(test_config())
            .with_tile_source(arc(CountingSource::new("deep").with_zoom_range(0, max)))
            .with_view_size(32.0, 32.0)
            .build()
            .unwrap();

        map.set_zoom(f64::from(max) - 2.0, false).unwrap();
        assert_eq!(map.max_zoom(), f64::from(MAX_TILE_ZOOM - 1));
        assert_eq!(map.zoom(), f64::from(MAX_TILE_ZOOM - 1));
        map.process_tile_results();
    }
}

#[tokio::test]
async fn zoom_is_clamped_to_source_and_user_limits() {
    let mut map = build(512.0, 512.0);
    map.set_zoom(25.0, false).unwrap();
    assert_eq!(map.zoom(), 18.0);

    map.set_max_zoom(12.0).unwrap();
    assert_eq!(map.zoom(), 12.0);
    map.set_min_zoom(4.0).unwrap();
    map.set_zoom(1.0, false).unwrap();
    assert_eq!(map.zoom(), 4.0);

    assert!(map.set_zoom(f64::INFINITY, false).is_err());
    assert_eq!(map.zoom(), 4.0);
}

#[tokio::test]
async fn zoom_keeps_the_pivot_fixed() {
    let mut map = build(512.0, 512.0);
    map.set_center_coordinate_and_zoom(LatLng::new(40.0, -3.7), 6.0, false)
        .unwrap();
    let pivot = PixelPoint::new(100.0, 380.0);
    let under_pivot = map.pixel_to_coordinate(pivot);

    map.zoom_by_factor(2.0, pivot, false).unwrap();
    assert!((map.zoom() - 7.0).abs() < 1e-9);
    let after = map.pixel_to_coordinate(pivot);
    assert!((after.lat - under_pivot.lat).abs() < 1e-6);
    assert!((after.lng - under_pivot.lng).abs() < 1e-6);
}

#[tokio::test]
async fn pixel_and_geographic_conversions_agree() {
    let mut map = build(800.0, 600.0);
    map.set_center_coordinate_and_zoom(LatLng::new(48.85, 2.35), 11.5, false)
        .unwrap();

    let point = LatLng::new(48.86, 2.30);
    let pixel = map.coordinate_to_pixel(point).unwrap();
    let back = map.pixel_to_coordinate(pixel);
    assert!((back.lat - point.lat).abs() < 1e-9);
    assert!((back.lng - point.lng).abs() < 1e-9);

    let whole = map.lat_lng_bounding_box_for(PixelRect::new(0.0, 0.0, 800.0, 600.0));
    let visible = map.lat_lng_bounding_box();
    assert!((whole.south_west.lat - visible.south_west.lat).abs() < 1e-9);
    assert!((whole.north_east.lng - visible.north_east.lng).abs() < 1e-9);
    assert!(whole.contains(&point));
}

#[tokio::test]
async fn fling_decelerates_then_settles() {
    let mut map = build(512.0, 512.0);
    map.set_zoom(5.0, false).unwrap();
    let states = map.subscribe(&[EventKind::InteractionStateChanged]);
    let start = map.center_projected_point();

    map.begin_pan();
    map.move_by(PixelPoint::new(-40.0, 0.0)).unwrap();
    map.end_pan(PixelPoint::new(-600.0, 0.0));
    assert_eq!(map.interaction_state(), InteractionState::Decelerating);

    let mut ticks = 0;
    while map.tick(Duration::from_millis(16)) {
        ticks += 1;
        assert!(ticks < 1000);
    }
    assert!(map.center_projected_point().x > start.x);

    let seen: Vec<InteractionState> = states
        .try_iter()
        .filter_map(|event| match event {
            MapEvent::InteractionStateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        seen,
        [
            InteractionState::Panning,
            InteractionState::Decelerating,
            InteractionState::Idle
        ]
    );
}

#[tokio::test]
async fn deceleration_off_stops_on_release() {
    let mut map = MapBuilder::new()
        .with_tile_source(base())
        .with_deceleration(DecelerationMode::Off)
        .build()
        .unwrap();
    map.begin_pan();
    map.end_pan(PixelPoint::new(900.0, 900.0));
    assert_eq!(map.interaction_state(), InteractionState::Idle);
    assert!(!map.tick(Duration::from_millis(16)));
}

#[tokio::test]
async fn view_changes_publish_bounds() {
    let mut map = build(256.0, 256.0);
    let bounds = map.subscribe(&[EventKind::BoundsChanged]);

    map.set_zoom(3.0, false).unwrap();
    map.move_by(PixelPoint::new(10.0, 0.0)).unwrap();

    let zooms: Vec<f64> = bounds
        .try_iter()
        .filter_map(|event| match event {
            MapEvent::BoundsChanged { zoom, .. } => Some(zoom),
            _ => None,
        })
        .collect();
    assert_eq!(zooms, [3.0, 3.0]);

    // Snapshots taken from another thread see the same view
    let handle = map.viewport_handle();
    let snapshot = std::thread::spawn(move || handle.snapshot()).join().unwrap();
    assert_eq!(&snapshot, map.viewport());
}

#[tokio::test]
async fn hidden_and_removed_sources_stop_compositing() {
    let mut map = build(32.0, 32.0);
    let overlay = arc(CountingSource::new("overlay"));
    map.add_tile_source(overlay).unwrap();
    assert_eq!(map.composited_tiles().len(), 2);

    map.set_tile_source_hidden("overlay", true).unwrap();
    assert_eq!(map.composited_tiles().len(), 1);
    map.set_tile_source_hidden("overlay", false).unwrap();

    map.move_tile_source(1, 0).unwrap();
    assert_eq!(&*map.composited_tiles()[0].source_id, "overlay");

    map.remove_tile_source("overlay", true).unwrap();
    assert_eq!(map.tile_sources().len(), 1);
    assert!(map.remove_tile_source("overlay", false).is_err());
}

#[tokio::test]
async fn constraints_keep_the_centre_inside() {
    let mut map = build(256.0, 256.0);
    map.set_zoom(8.0, false).unwrap();
    map.set_constraints(LatLng::new(45.0, 5.0), LatLng::new(47.0, 10.0))
        .unwrap();

    map.set_center_coordinate(LatLng::new(52.0, 13.0), false).unwrap();
    let centre = map.center_coordinate();
    assert!((centre.lat - 47.0).abs() < 1e-6);
    assert!((centre.lng - 10.0).abs() < 1e-6);

    map.clear_constraints().unwrap();
    map.set_center_coordinate(LatLng::new(52.0, 13.0), false).unwrap();
    assert!((map.center_coordinate().lat - 52.0).abs() < 1e-6);
}

#[tokio::test]
async fn scale_denominator_matches_meters_per_pixel() {
    let mut map = build(256.0, 256.0);
    map.set_meters_per_pixel(10.0, false).unwrap();
    assert!((map.meters_per_pixel() - 10.0).abs() < 1e-6);
    assert!((map.scale_denominator() - 10.0 * 96.0 / 0.0254).abs() < 1e-3);
    assert!(map.set_meters_per_pixel(0.0, false).is_err());
}
