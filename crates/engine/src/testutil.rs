//! Shared helpers for engine tests: synthetic in-memory rasters.

use crate::flowdir::{DirectionGrid, D8_OFFSETS};
use hydroshed_core::io::MemorySource;
use hydroshed_core::{Crs, GeoTransform, RasterSource, WindowedReader};
use ndarray::Array2;
use std::sync::Arc;

/// A reader over an in-memory raster with a unit-cell transform whose origin
/// puts row 0 at the top (y = rows) — cell (r, c) center is (c+0.5, rows-r-0.5).
pub fn reader_over(name: &str, data: Array2<f64>) -> WindowedReader {
    let rows = data.nrows();
    reader_with_transform(name, data, GeoTransform::new(0.0, rows as f64, 1.0, 1.0))
}

pub fn reader_with_transform(
    name: &str,
    data: Array2<f64>,
    transform: GeoTransform,
) -> WindowedReader {
    let source = Arc::new(MemorySource::new());
    source.insert(name, data, transform, Crs::from_epsg(32613), -9999.0);
    let handle = source.open(name).unwrap();
    WindowedReader::new(source, handle)
}

pub fn grid_from_codes(name: &str, codes: &Array2<f64>) -> DirectionGrid {
    DirectionGrid::new(reader_over(name, codes.clone()))
}

pub fn grid_with_transform(
    name: &str,
    codes: &Array2<f64>,
    transform: GeoTransform,
) -> DirectionGrid {
    DirectionGrid::new(reader_with_transform(name, codes.clone(), transform))
}

/// Direction codes where every cell steps toward `outlet`; the outlet itself
/// is a sink (code 0).
pub fn converging_codes(rows: usize, cols: usize, outlet: (usize, usize)) -> Array2<f64> {
    let code_for = |dr: isize, dc: isize| -> f64 {
        let idx = D8_OFFSETS
            .iter()
            .position(|&offset| offset == (dr, dc))
            .expect("unit offset");
        (idx + 1) as f64
    };

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let dr = (outlet.0 as isize - r as isize).signum();
        let dc = (outlet.1 as isize - c as isize).signum();
        if dr == 0 && dc == 0 {
            0.0
        } else {
            code_for(dr, dc)
        }
    })
}

pub fn converging_grid(rows: usize, cols: usize, outlet: (usize, usize)) -> DirectionGrid {
    grid_from_codes("converging", &converging_codes(rows, cols, outlet))
}
