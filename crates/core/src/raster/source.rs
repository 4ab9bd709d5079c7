//! The raster-access capability interface.
//!
//! The engine never reads whole rasters; it opens a [`RasterHandle`] and pulls
//! rectangular windows through [`RasterSource::read_window`]. Any backend that
//! can serve random window reads of a georeferenced single-band grid can sit
//! behind this trait: the tiled GeoTIFF reader in [`crate::io::geotiff`], the
//! in-memory fake in [`crate::io::memory`], or an external remote reader.

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::GeoTransform;
use ndarray::Array2;
use std::sync::Arc;

/// An opened, read-only, georeferenced single-band grid.
///
/// Immutable after open and shared across concurrent requests; all mutable
/// per-request state lives in the window accessor layered on top.
#[derive(Debug, Clone)]
pub struct RasterHandle {
    /// Process-unique id, used to key shared block caches.
    pub id: u64,
    /// Path or URL the handle was opened from.
    pub path: String,
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    /// Nodata sentinel. NaN when the source declares none.
    pub nodata: f64,
    /// Native tiling of the source; window fetches are amortized best when
    /// aligned to these.
    pub block_rows: usize,
    pub block_cols: usize,
}

impl RasterHandle {
    /// Whether a map coordinate falls inside the raster footprint.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (min_x, min_y, max_x, max_y) = self.transform.bounds(self.rows, self.cols);
        x >= min_x && x <= max_x && y >= min_y && y <= max_y
    }

    /// The cell containing a map coordinate, or `OffRaster`.
    pub fn cell_at(&self, x: f64, y: f64) -> Result<(usize, usize)> {
        let (row, col) = self.transform.index_of(x, y);
        let row = row.floor();
        let col = col.floor();

        if row < 0.0 || col < 0.0 || row >= self.rows as f64 || col >= self.cols as f64 {
            return Err(Error::OffRaster { x, y });
        }

        Ok((row as usize, col as usize))
    }

    /// Whether a (possibly negative) cell address is inside the grid.
    pub fn in_bounds(&self, row: isize, col: isize) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols
    }

    /// Whether a value equals this raster's nodata sentinel.
    pub fn is_nodata(&self, value: f64) -> bool {
        if value.is_nan() {
            return true;
        }
        if self.nodata.is_nan() {
            return false;
        }
        value == self.nodata
    }

    /// Check grid agreement with another handle: same shape, transform and
    /// CRS. Rasters of one resolution tier must agree cell-for-cell.
    pub fn matches(&self, other: &RasterHandle) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::RasterMismatch(format!(
                "{} is {}x{} but {} is {}x{}",
                self.path, self.rows, self.cols, other.path, other.rows, other.cols
            )));
        }

        let close = |a: f64, b: f64| (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0);
        let (st, ot) = (&self.transform, &other.transform);
        if !close(st.origin_x, ot.origin_x)
            || !close(st.origin_y, ot.origin_y)
            || !close(st.cell_width, ot.cell_width)
            || !close(st.cell_height, ot.cell_height)
        {
            return Err(Error::RasterMismatch(format!(
                "{} and {} have different geotransforms",
                self.path, other.path
            )));
        }

        if !self.crs.is_equivalent(&other.crs) {
            return Err(Error::RasterMismatch(format!(
                "{} ({}) and {} ({}) have different reference systems",
                self.path, self.crs, other.path, other.crs
            )));
        }

        Ok(())
    }
}

/// Capability interface for random window reads of large rasters.
///
/// Implementations must be shareable across concurrent requests; handles are
/// read-only for the service's operating lifetime.
pub trait RasterSource: Send + Sync {
    /// Open a raster by path or URL.
    fn open(&self, path: &str) -> Result<Arc<RasterHandle>>;

    /// Read a decoded window. The requested region must lie fully inside the
    /// raster; the window accessor clamps before calling.
    fn read_window(
        &self,
        handle: &RasterHandle,
        row_off: usize,
        col_off: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Array2<f64>>;
}
