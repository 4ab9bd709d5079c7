//! # hydroshed core
//!
//! Raster access and spatial reference plumbing for the hydroshed watershed
//! delineation engine.
//!
//! This crate provides:
//! - [`Crs`]: coordinate reference system parsing and point transformation
//! - [`GeoTransform`]: affine georeferencing for north-up grids
//! - [`RasterSource`] / [`RasterHandle`]: the narrow capability interface
//!   any raster backend implements
//! - [`WindowedReader`]: per-request windowed cell access with multiplicative
//!   window growth and bounded I/O retry
//! - Backends: tiled GeoTIFF files and in-memory rasters

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::{transform_point, Crs, PointTransform};
pub use error::{Error, Result};
pub use raster::{GeoTransform, RasterHandle, RasterSource, WindowOptions, WindowedReader};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, RasterHandle, RasterSource, WindowedReader};
}
