//! Raster backends and the shared decoded-block cache.

pub mod cache;
pub mod geotiff;
pub mod memory;

pub use cache::{BlockCache, BlockKey};
pub use geotiff::GeoTiffSource;
pub use memory::MemorySource;
