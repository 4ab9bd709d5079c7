//! In-memory raster backend.
//!
//! Serves windows straight from an `Array2` held in memory. This is the
//! substitution point the engine's tests use in place of real GeoTIFFs, and
//! it doubles as a backend for rasters small enough to pin.

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterHandle, RasterSource};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct MemoryRaster {
    handle: Arc<RasterHandle>,
    data: Array2<f64>,
}

/// A [`RasterSource`] over rasters registered in memory.
#[derive(Default)]
pub struct MemorySource {
    rasters: Mutex<HashMap<String, Arc<MemoryRaster>>>,
    next_id: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raster under a path-like name.
    pub fn insert(
        &self,
        path: &str,
        data: Array2<f64>,
        transform: GeoTransform,
        crs: Crs,
        nodata: f64,
    ) {
        let (rows, cols) = data.dim();
        let handle = Arc::new(RasterHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            path: path.to_string(),
            rows,
            cols,
            transform,
            crs,
            nodata,
            block_rows: rows.min(256),
            block_cols: cols.min(256),
        });

        self.rasters
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(MemoryRaster { handle, data }));
    }
}

impl RasterSource for MemorySource {
    fn open(&self, path: &str) -> Result<Arc<RasterHandle>> {
        self.rasters
            .lock()
            .unwrap()
            .get(path)
            .map(|r| Arc::clone(&r.handle))
            .ok_or_else(|| Error::Io(format!("no in-memory raster registered at {path}")))
    }

    fn read_window(
        &self,
        handle: &RasterHandle,
        row_off: usize,
        col_off: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Array2<f64>> {
        let raster = self
            .rasters
            .lock()
            .unwrap()
            .get(&handle.path)
            .cloned()
            .ok_or_else(|| Error::Io(format!("no in-memory raster registered at {}", handle.path)))?;

        if row_off + rows > handle.rows || col_off + cols > handle.cols {
            return Err(Error::Io(format!(
                "window ({row_off}, {col_off}) + ({rows}, {cols}) exceeds raster {}",
                handle.path
            )));
        }

        Ok(raster
            .data
            .slice(s![row_off..row_off + rows, col_off..col_off + cols])
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_read() {
        let source = MemorySource::new();
        let data = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        source.insert(
            "test",
            data,
            GeoTransform::default(),
            Crs::wgs84(),
            f64::NAN,
        );

        let handle = source.open("test").unwrap();
        assert_eq!((handle.rows, handle.cols), (4, 4));

        let window = source.read_window(&handle, 1, 1, 2, 2).unwrap();
        assert_eq!(window[(0, 0)], 5.0);
        assert_eq!(window[(1, 1)], 10.0);
    }

    #[test]
    fn missing_path_is_io_error() {
        let source = MemorySource::new();
        assert!(matches!(source.open("nope"), Err(Error::Io(_))));
    }
}
