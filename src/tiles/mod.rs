pub mod cache;
pub mod container;
pub mod fallback;
pub mod fractal;
pub mod loader;
pub mod source;

// Re-exports for convenience
pub use cache::{CacheKey, CacheStats, TileCache};
pub use container::TileSourcesContainer;
pub use fractal::FractalTileProjection;
pub use loader::{TileLoader, TileOutcome, TileResult};
pub use source::{FetchError, HttpTileSource, SolidColorTileSource, SourceId, TileImage, TileSource};
