//! Missing-tile fallback: cover a tile with the matching region of an ancestor.

use image::imageops::FilterType;

use crate::core::geo::TileAddress;
use crate::tiles::source::{FetchError, TileImage};

/// How a requested tile relates to its source's zoom range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Fetch the tile itself, then climb at most `ancestors` if it fails
    Direct { ancestors: Vec<TileAddress> },
    /// The source cannot serve this zoom; go straight to these ancestors
    AncestorsOnly { ancestors: Vec<TileAddress> },
    /// Nothing within the fallback depth can cover the tile
    Unavailable,
}

/// Decide how to resolve `tile` for a source with zoom range
/// `[min_zoom, max_zoom]` and a fallback depth of `depth` levels.
///
/// Ancestors are listed nearest first and never leave the source's range.
pub fn plan(tile: TileAddress, min_zoom: u8, max_zoom: u8, depth: u8) -> FetchPlan {
    if tile.zoom < min_zoom {
        return FetchPlan::Unavailable;
    }

    let ancestors: Vec<TileAddress> = (1..=depth)
        .filter_map(|levels| tile.ancestor(levels))
        .filter(|ancestor| ancestor.zoom >= min_zoom && ancestor.zoom <= max_zoom)
        .collect();

    if tile.zoom <= max_zoom {
        FetchPlan::Direct { ancestors }
    } else if ancestors.is_empty() {
        FetchPlan::Unavailable
    } else {
        FetchPlan::AncestorsOnly { ancestors }
    }
}

/// Crop the region of `ancestor_image` covering `tile` and scale it to
/// `side` x `side` pixels
pub fn crop_from_ancestor(
    ancestor_image: &TileImage,
    ancestor: TileAddress,
    tile: TileAddress,
    side: u32,
) -> Result<TileImage, FetchError> {
    let (column, row, cells) = tile.offset_in(&ancestor).ok_or_else(|| {
        FetchError::Decode(format!("{} is not an ancestor of {}", ancestor, tile))
    })?;

    let decoded = ancestor_image.decode()?;
    let cell_width = (decoded.width() as f64 / cells as f64).max(1.0);
    let cell_height = (decoded.height() as f64 / cells as f64).max(1.0);

    let x = ((column as f64 * cell_width).floor() as u32).min(decoded.width().saturating_sub(1));
    let y = ((row as f64 * cell_height).floor() as u32).min(decoded.height().saturating_sub(1));
    let width = (cell_width.round() as u32).clamp(1, decoded.width() - x);
    let height = (cell_height.round() as u32).clamp(1, decoded.height() - y);

    let region = decoded.crop_imm(x, y, width, height);
    let scaled = region.resize_exact(side, side, FilterType::Triangle);
    TileImage::from_image(&scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[test]
    fn test_plan_within_range() {
        let tile = TileAddress::new(40, 40, 18);
        let plan = plan(tile, 0, 18, 2);
        assert_eq!(
            plan,
            FetchPlan::Direct {
                ancestors: vec![TileAddress::new(20, 20, 17), TileAddress::new(10, 10, 16)]
            }
        );
    }

    #[test]
    fn test_plan_above_max_zoom() {
        let tile = TileAddress::new(5, 5, 19);
        assert_eq!(
            plan(tile, 0, 18, 2),
            FetchPlan::AncestorsOnly {
                ancestors: vec![TileAddress::new(2, 2, 18), TileAddress::new(1, 1, 17)]
            }
        );
        assert_eq!(plan(tile, 0, 18, 0), FetchPlan::Unavailable);
        // Too far above the range for the depth to reach
        assert_eq!(plan(TileAddress::new(0, 0, 22), 0, 18, 2), FetchPlan::Unavailable);
    }

    #[test]
    fn test_plan_stops_at_min_zoom() {
        assert_eq!(plan(TileAddress::new(0, 0, 2), 3, 10, 2), FetchPlan::Unavailable);
        assert_eq!(
            plan(TileAddress::new(8, 8, 4), 3, 10, 3),
            FetchPlan::Direct {
                ancestors: vec![TileAddress::new(4, 4, 3)]
            }
        );
    }

    #[test]
    fn test_crop_picks_the_right_quadrant() {
        // 2x2 quadrants: red, green / blue, white
        let mut canvas = RgbaImage::new(16, 16);
        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            *pixel = match (x < 8, y < 8) {
                (true, true) => Rgba([255, 0, 0, 255]),
                (false, true) => Rgba([0, 255, 0, 255]),
                (true, false) => Rgba([0, 0, 255, 255]),
                (false, false) => Rgba([255, 255, 255, 255]),
            };
        }
        let parent = TileAddress::new(3, 7, 4);
        let parent_image = TileImage::from_image(&DynamicImage::ImageRgba8(canvas)).unwrap();

        // Bottom-left child of the parent is the blue quadrant
        let child = TileAddress::new(6, 15, 5);
        let cropped = crop_from_ancestor(&parent_image, parent, child, 32).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (32, 32));
        let pixel = cropped.decode().unwrap().to_rgba8().get_pixel(16, 16).0;
        assert_eq!(pixel, [0, 0, 255, 255]);
    }

    #[test]
    fn test_crop_rejects_unrelated_tile() {
        let image = TileImage::solid(8, [0, 0, 0, 255]).unwrap();
        let result = crop_from_ancestor(
            &image,
            TileAddress::new(0, 0, 1),
            TileAddress::new(3, 3, 2),
            8,
        );
        assert!(result.is_err());
    }
}
