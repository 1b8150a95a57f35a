mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{arc, pump_until, ready_tiles, test_config, CountingSource};
use slippymap::{
    CacheKey, DiskCacheConfig, EventKind, Map, MapConfig, MapError, MapEvent, PixelSize,
    Projection, SharedSpawner, TileAddress, TokioSpawner,
};

fn map_with(config: MapConfig) -> Map {
    let spawner: SharedSpawner = Arc::new(TokioSpawner::current().unwrap());
    // 32px view over 16px tiles: four tiles at any zoom >= 1
    Map::new(config, Projection::spherical_mercator(), spawner, PixelSize::new(32.0, 32.0)).unwrap()
}

#[tokio::test]
async fn visible_tiles_are_fetched_and_announced() {
    let mut map = map_with(test_config());
    let events = map.subscribe(&[EventKind::TileReady]);
    let source = arc(CountingSource::new("base"));
    map.add_tile_source(source.clone()).unwrap();
    map.set_zoom(2.0, false).unwrap();

    assert!(pump_until(&mut map, |m| ready_tiles(m) == 4).await);
    let layers = map.composited_tiles();
    assert_eq!(layers.len(), 1);
    assert!(layers[0].tiles.iter().all(|t| t.tile.zoom == 2 && t.fallback_from.is_none()));

    let announced: Vec<TileAddress> = events
        .try_iter()
        .filter_map(|event| match event {
            MapEvent::TileReady { tile, .. } => Some(tile),
            _ => None,
        })
        .collect();
    assert_eq!(announced.len(), 4);
    // One tile at zoom 0 before the zoom change, four at zoom 2
    assert_eq!(source.fetches(), 5);
}

#[tokio::test]
async fn results_for_tiles_scrolled_away_are_ignored_but_cached() {
    let mut map = map_with(test_config());
    let source = arc(CountingSource::new("slow").slow_at(2, Duration::from_millis(80)));
    map.add_tile_source(source.clone()).unwrap();
    map.set_zoom(2.0, false).unwrap();
    map.set_zoom(4.0, false).unwrap();

    assert!(pump_until(&mut map, |m| ready_tiles(m) == 4).await);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(map.process_tile_results(), 0);

    let layers = map.composited_tiles();
    assert!(layers[0].tiles.iter().all(|t| t.tile.zoom == 4));
    assert!(map
        .cache()
        .contains(&CacheKey::new("slow".into(), TileAddress::new(1, 1, 2))));
}

#[tokio::test]
async fn clearing_the_cache_refetches_the_view() {
    let mut map = map_with(test_config());
    let source = arc(CountingSource::new("base"));
    map.add_tile_source(source.clone()).unwrap();
    map.set_zoom(2.0, false).unwrap();
    assert!(pump_until(&mut map, |m| ready_tiles(m) == 4).await);
    let before = source.fetches();

    map.remove_all_cached_images();
    assert_eq!(ready_tiles(&map), 0);
    assert!(pump_until(&mut map, |m| ready_tiles(m) == 4).await);
    assert_eq!(source.fetches(), before + 4);
}

#[tokio::test]
async fn reloading_a_source_keeps_the_others() {
    let mut map = map_with(test_config());
    let roads = arc(CountingSource::new("roads"));
    let labels = arc(CountingSource::new("labels"));
    map.add_tile_source(roads.clone()).unwrap();
    map.add_tile_source(labels.clone()).unwrap();
    map.set_zoom(2.0, false).unwrap();
    assert!(pump_until(&mut map, |m| ready_tiles(m) == 8).await);
    let (roads_before, labels_before) = (roads.fetches(), labels.fetches());

    map.reload_tile_source("roads").unwrap();
    assert!(pump_until(&mut map, |m| ready_tiles(m) == 8).await);
    assert_eq!(roads.fetches(), roads_before + 4);
    assert_eq!(labels.fetches(), labels_before);
    assert!(map.reload_tile_source("missing").is_err());
}

#[tokio::test]
async fn missing_tiles_are_cropped_from_ancestors() {
    let mut map = map_with(test_config());
    let source = arc(CountingSource::new("shallow").available_up_to(2));
    map.add_tile_source(source).unwrap();
    map.set_zoom(3.0, false).unwrap();

    assert!(pump_until(&mut map, |m| ready_tiles(m) == 4).await);
    for tile in &map.composited_tiles()[0].tiles {
        assert_eq!(tile.fallback_from, tile.tile.parent());
        assert_eq!(tile.image.width(), 16);
        // Only the ancestor is cached; the tile itself is retried later
        assert!(!map
            .cache()
            .contains(&CacheKey::new("shallow".into(), tile.tile)));
    }
}

#[tokio::test]
async fn exhausted_fallback_reports_failures() {
    let mut map = map_with(test_config());
    let failures = map.subscribe(&[EventKind::TileFailed]);
    map.add_tile_source(arc(CountingSource::new("empty").available_up_to(0)))
        .unwrap();
    map.set_zoom(3.0, false).unwrap();

    let mut failed = 0;
    for _ in 0..200 {
        map.process_tile_results();
        failed += failures.try_iter().count();
        if failed >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(failed, 4);
    assert_eq!(ready_tiles(&map), 0);
}

#[tokio::test]
async fn load_tile_above_source_range_uses_ancestors() {
    let mut map = map_with(test_config());
    map.add_tile_source(arc(CountingSource::new("deep").available_up_to(17)))
        .unwrap();
    map.add_tile_source(arc(CountingSource::new("sparse").available_up_to(16)))
        .unwrap();

    // Zoom 19 is past the range of [0, 18]; zoom 18 is missing, zoom 17 exists
    let (image, ancestor) = map.load_tile("deep", TileAddress::new(5, 5, 19)).await.unwrap();
    assert_eq!(ancestor, Some(TileAddress::new(1, 1, 17)));
    assert_eq!(image.width(), 16);

    // A failing zoom-18 tile climbs to 17 and then 16
    let (_, ancestor) = map.load_tile("sparse", TileAddress::new(4, 4, 18)).await.unwrap();
    assert_eq!(ancestor, Some(TileAddress::new(1, 1, 16)));

    // Two levels are not enough from zoom 19
    let error = map
        .load_tile("sparse", TileAddress::new(5, 5, 19))
        .await
        .unwrap_err();
    assert!(matches!(error, MapError::TileFetchFailed { .. }));

    let error = map.load_tile("nope", TileAddress::new(0, 0, 0)).await.unwrap_err();
    assert!(matches!(error, MapError::TileSource(_)));
}

#[tokio::test]
async fn disk_hits_are_resolved_by_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.cache.disk = Some(DiskCacheConfig::new(dir.path()));
    let world = CacheKey::new("base".into(), TileAddress::new(0, 0, 0));

    {
        let mut map = map_with(config.clone());
        map.add_tile_source(arc(CountingSource::new("base"))).unwrap();
        map.set_zoom(2.0, false).unwrap();
        assert!(pump_until(&mut map, |m| ready_tiles(m) == 4 && m.cache().contains(&world)).await);
    }

    let source = arc(CountingSource::new("base"));
    let mut map = map_with(config);
    map.add_tile_source(source.clone()).unwrap();
    map.set_zoom(2.0, false).unwrap();

    // Changing the view only consults memory
    assert_eq!(map.cache_stats().disk_hits, 0);
    assert_eq!(ready_tiles(&map), 0);

    assert!(pump_until(&mut map, |m| ready_tiles(m) == 4).await);
    assert_eq!(source.fetches(), 0);
    assert!(map.cache_stats().disk_hits >= 4);
}
