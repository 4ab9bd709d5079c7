//! Raster access: georeferencing, the source capability interface, and the
//! per-request windowed accessor.

pub mod geotransform;
pub mod source;
pub mod window;

pub use geotransform::GeoTransform;
pub use source::{RasterHandle, RasterSource};
pub use window::{WindowOptions, WindowedReader};
