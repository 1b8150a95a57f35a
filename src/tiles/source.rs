use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use once_cell::sync::Lazy;

use crate::core::constants::{MAX_TILE_ZOOM, TILE_SIZE};
use crate::core::geo::{LatLngBounds, TileAddress};

/// Stable identifier of a tile source, used in cache keys
pub type SourceId = Arc<str>;

/// Failure of a single tile fetch.
///
/// `Clone` so one in-flight result can be handed to every attached requester.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("tile not found")]
    NotFound,
    #[error("request cancelled")]
    Cancelled,
    #[error("zoom {zoom} outside source range [{min}, {max}]")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },
}

/// Encoded tile image (PNG/JPEG bytes) with its pixel dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    bytes: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl TileImage {
    /// Wraps encoded bytes after checking they carry a readable image header
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FetchError> {
        let reader = image::io::Reader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        if reader.format().is_none() {
            return Err(FetchError::Decode("unrecognised image format".to_string()));
        }
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Self {
            bytes: Arc::new(bytes),
            width,
            height,
        })
    }

    /// Encodes a decoded image as PNG
    pub fn from_image(image: &DynamicImage) -> Result<Self, FetchError> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageOutputFormat::Png)
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Self {
            bytes: Arc::new(buffer.into_inner()),
            width: image.width(),
            height: image.height(),
        })
    }

    /// Single-colour square tile
    pub fn solid(side: u32, color: [u8; 4]) -> Result<Self, FetchError> {
        let image = RgbaImage::from_pixel(side, side, Rgba(color));
        Self::from_image(&DynamicImage::ImageRgba8(image))
    }

    pub fn decode(&self) -> Result<DynamicImage, FetchError> {
        image::load_from_memory(&self.bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// A provider of raster tiles for one map layer
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Stable identifier; tiles are cached under it across sessions
    fn unique_tile_source_id(&self) -> SourceId;

    fn min_zoom(&self) -> u8;

    fn max_zoom(&self) -> u8;

    /// Native tile side in pixels
    fn tile_side_length(&self) -> u32 {
        TILE_SIZE
    }

    /// Tiles are rendered at twice their nominal density
    fn is_retina(&self) -> bool {
        false
    }

    /// Geographic area the source has content for
    fn bounds(&self) -> LatLngBounds {
        LatLngBounds::world()
    }

    /// `[min_zoom, max_zoom]` capped to addressable tile zooms
    fn zoom_range(&self) -> (u8, u8) {
        let max = self.max_zoom().min(MAX_TILE_ZOOM - 1);
        (self.min_zoom().min(max), max)
    }

    fn supports_zoom(&self, zoom: u8) -> bool {
        let (min, max) = self.zoom_range();
        zoom >= min && zoom <= max
    }

    /// Fetch one tile. Resolution order across sources is unspecified.
    async fn fetch(&self, tile: TileAddress) -> Result<TileImage, FetchError>;

    /// Abandon outstanding fetches; they resolve to `FetchError::Cancelled`
    fn cancel_all_requests(&self) {}
}

/// Shared async HTTP client for tile fetching
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("slippymap/", env!("CARGO_PKG_VERSION")))
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build reqwest async client")
});

/// Tile source backed by an XYZ URL template such as
/// `https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png`
#[derive(Debug)]
pub struct HttpTileSource {
    id: SourceId,
    url_template: String,
    subdomains: Vec<String>,
    min_zoom: u8,
    max_zoom: u8,
    tile_side_length: u32,
    retina: bool,
    generation: AtomicU64,
}

impl HttpTileSource {
    pub fn new(id: impl Into<SourceId>, url_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url_template: url_template.into(),
            subdomains: Vec::new(),
            min_zoom: 0,
            max_zoom: 18,
            tile_side_length: TILE_SIZE,
            retina: false,
            generation: AtomicU64::new(0),
        }
    }

    pub fn openstreetmap() -> Self {
        Self::new("openstreetmap", "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png")
            .with_subdomains(["a", "b", "c"])
    }

    pub fn with_subdomains<I, S>(mut self, subdomains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom.min(max_zoom);
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_tile_side_length(mut self, side: u32) -> Self {
        self.tile_side_length = side.max(1);
        self
    }

    pub fn with_retina(mut self, retina: bool) -> Self {
        self.retina = retina;
        self
    }

    /// Expand the template for one tile
    pub fn url(&self, tile: TileAddress) -> String {
        let mut url = self
            .url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string());
        if !self.subdomains.is_empty() {
            let idx = ((tile.x as u64 + tile.y as u64) % self.subdomains.len() as u64) as usize;
            url = url.replace("{s}", &self.subdomains[idx]);
        }
        url
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    fn unique_tile_source_id(&self) -> SourceId {
        self.id.clone()
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn tile_side_length(&self) -> u32 {
        self.tile_side_length
    }

    fn is_retina(&self) -> bool {
        self.retina
    }

    async fn fetch(&self, tile: TileAddress) -> Result<TileImage, FetchError> {
        if !self.supports_zoom(tile.zoom) {
            return Err(FetchError::ZoomOutOfRange {
                zoom: tile.zoom,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        let generation = self.generation.load(Ordering::Acquire);
        let url = self.url(tile);
        log::debug!("fetching tile {} from {}", tile, url);

        let response = HTTP_CLIENT
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !response.status().is_success() {
            return Err(FetchError::Network(format!(
                "HTTP {} for tile {}",
                response.status(),
                tile
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if self.generation.load(Ordering::Acquire) != generation {
            return Err(FetchError::Cancelled);
        }
        TileImage::from_bytes(bytes.to_vec())
    }

    fn cancel_all_requests(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Offline source that draws a flat colour per tile, handy for demos and
/// for checking layer composition without a network
#[derive(Debug, Clone)]
pub struct SolidColorTileSource {
    id: SourceId,
    min_zoom: u8,
    max_zoom: u8,
    tile_side_length: u32,
    color: [u8; 4],
}

impl SolidColorTileSource {
    pub fn new(id: impl Into<SourceId>, color: [u8; 4]) -> Self {
        Self {
            id: id.into(),
            min_zoom: 0,
            max_zoom: 18,
            tile_side_length: TILE_SIZE,
            color,
        }
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom.min(max_zoom);
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_tile_side_length(mut self, side: u32) -> Self {
        self.tile_side_length = side.max(1);
        self
    }
}

#[async_trait]
impl TileSource for SolidColorTileSource {
    fn unique_tile_source_id(&self) -> SourceId {
        self.id.clone()
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn tile_side_length(&self) -> u32 {
        self.tile_side_length
    }

    async fn fetch(&self, tile: TileAddress) -> Result<TileImage, FetchError> {
        if !self.supports_zoom(tile.zoom) {
            return Err(FetchError::ZoomOutOfRange {
                zoom: tile.zoom,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        TileImage::solid(self.tile_side_length, self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_template_expansion() {
        let source = HttpTileSource::openstreetmap();
        let url = source.url(TileAddress::new(3, 5, 4));
        assert_eq!(url, "https://c.tile.openstreetmap.org/4/3/5.png");

        let plain = HttpTileSource::new("plain", "http://localhost/{z}/{x}/{y}.png");
        assert_eq!(plain.url(TileAddress::new(1, 2, 3)), "http://localhost/3/1/2.png");
    }

    #[test]
    fn test_tile_image_validation() {
        let tile = TileImage::solid(16, [255, 0, 0, 255]).unwrap();
        assert_eq!((tile.width(), tile.height()), (16, 16));
        let copy = TileImage::from_bytes(tile.bytes().to_vec()).unwrap();
        assert_eq!(copy, tile);

        assert!(matches!(
            TileImage::from_bytes(b"definitely not an image".to_vec()),
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_fetch_is_rejected() {
        let source = HttpTileSource::new("osm", "http://localhost/{z}/{x}/{y}.png")
            .with_zoom_range(0, 5);
        let err = source.fetch(TileAddress::new(0, 0, 9)).await.unwrap_err();
        assert_eq!(err, FetchError::ZoomOutOfRange { zoom: 9, min: 0, max: 5 });
    }

    #[tokio::test]
    async fn test_solid_source_produces_tiles() {
        let source = SolidColorTileSource::new("solid", [0, 0, 255, 255]).with_tile_side_length(32);
        let tile = source.fetch(TileAddress::new(1, 1, 1)).await.unwrap();
        assert_eq!(tile.width(), 32);
        let pixel = tile.decode().unwrap().to_rgba8().get_pixel(4, 4).0;
        assert_eq!(pixel, [0, 0, 255, 255]);
    }
}
