//! Affine georeferencing for north-up raster grids

use serde::{Deserialize, Serialize};

/// Affine transform between grid indices and map coordinates.
///
/// Hydrological rasters are north-up with zero rotation, so the transform is
/// fully described by the upper-left origin and positive cell sizes:
/// ```text
/// x = origin_x + col * cell_width
/// y = origin_y - row * cell_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Cell size in X direction (positive)
    pub cell_width: f64,
    /// Cell size in Y direction (positive; rows advance southwards)
    pub cell_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            cell_width: cell_width.abs(),
            cell_height: cell_height.abs(),
        }
    }

    /// Build from GeoTIFF ModelPixelScale + ModelTiepoint values.
    ///
    /// `tiepoint` is `[i, j, k, x, y, z]`: raster location (i, j) pinned to
    /// map location (x, y).
    pub fn from_geotiff_tags(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return None;
        }
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        Some(Self::new(origin_x, origin_y, scale[0], scale[1]))
    }

    /// Fractional (row, col) of a map coordinate. Floor to get the cell index;
    /// negative values fall outside the grid.
    pub fn index_of(&self, x: f64, y: f64) -> (f64, f64) {
        let row = (self.origin_y - y) / self.cell_height;
        let col = (x - self.origin_x) / self.cell_width;
        (row, col)
    }

    /// Map coordinate of a cell center.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.origin_x + (col as f64 + 0.5) * self.cell_width;
        let y = self.origin_y - (row as f64 + 0.5) * self.cell_height;
        (x, y)
    }

    /// Map coordinate of a cell's upper-left corner.
    ///
    /// `row`/`col` may equal the raster dimensions to address the lower-right
    /// boundary corner, which polygon ring vertices need.
    pub fn cell_corner(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.origin_x + col as f64 * self.cell_width;
        let y = self.origin_y - row as f64 * self.cell_height;
        (x, y)
    }

    /// Area of a single cell in squared map units.
    pub fn cell_area(&self) -> f64 {
        self.cell_width * self.cell_height
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of a grid with the given
    /// dimensions.
    pub fn bounds(&self, rows: usize, cols: usize) -> (f64, f64, f64, f64) {
        (
            self.origin_x,
            self.origin_y - rows as f64 * self.cell_height,
            self.origin_x + cols as f64 * self.cell_width,
            self.origin_y,
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }
}
