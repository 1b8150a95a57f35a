//! Drives a map without a window: loads tiles, flings the view and prints
//! what a renderer would draw.
//!
//! Run with `RUST_LOG=debug cargo run --example headless` to see the cache at work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use slippymap::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cache_dir = std::env::temp_dir().join("slippymap-demo");
    let mut map = MapBuilder::new()
        .with_profile(MapProfile::Balanced)
        .with_disk_cache(&cache_dir)
        .with_tile_source(Arc::new(
            SolidColorTileSource::new("land", [221, 214, 196, 255]).with_zoom_range(0, 16),
        ))
        .with_tile_source(Arc::new(
            SolidColorTileSource::new("overlay", [40, 90, 160, 96]).with_zoom_range(2, 12),
        ))
        .with_view_size(800.0, 600.0)
        .with_center_and_zoom(LatLng::new(52.52, 13.40), 10.0)
        .with_debug_tiles(true)
        .build()
        .context("building map")?;

    let events = map.subscribe(&[EventKind::TileReady, EventKind::InteractionStateChanged]);

    settle(&mut map).await;
    report(&map);

    map.begin_pan();
    map.move_by(PixelPoint::new(-120.0, 40.0))?;
    map.end_pan(PixelPoint::new(-900.0, 300.0));
    while map.tick(Duration::from_millis(16)) {
        map.process_tile_results();
    }
    settle(&mut map).await;
    report(&map);

    map.zoom_in_to_next_native_zoom_at(PixelPoint::new(400.0, 300.0), true)?;
    while map.tick(Duration::from_millis(16)) {}
    settle(&mut map).await;
    report(&map);

    for event in events.try_iter() {
        match event {
            MapEvent::TileReady { source_id, debug_label, .. } => {
                log::debug!("ready {} {}", source_id, debug_label.unwrap_or_default())
            }
            MapEvent::InteractionStateChanged { from, to } => log::info!("{:?} -> {:?}", from, to),
            _ => {}
        }
    }

    let stats = map.cache_stats();
    println!(
        "cache: {} memory hits, {} disk hits, {} fetches, {} coalesced",
        stats.memory_hits, stats.disk_hits, stats.fetches, stats.coalesced
    );
    Ok(())
}

async fn settle(map: &mut Map) {
    for _ in 0..50 {
        map.process_tile_results();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn report(map: &Map) {
    let center = map.center_coordinate();
    println!(
        "centre ({:.4}, {:.4}) zoom {:.2}, 1:{:.0}",
        center.lat,
        center.lng,
        map.zoom(),
        map.scale_denominator()
    );
    for layer in map.composited_tiles() {
        let fallbacks = layer.tiles.iter().filter(|t| t.fallback_from.is_some()).count();
        println!(
            "  {}: {} tiles ({} from ancestors)",
            layer.source_id,
            layer.tiles.len(),
            fallbacks
        );
    }
}
