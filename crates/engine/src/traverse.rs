//! Upstream watershed traversal.
//!
//! A reverse breadth-first search over the flow-direction relation: a cell
//! joins the mask when its own direction code points into a cell already in
//! the mask. The frontier is an explicit queue — masks can reach millions of
//! cells and recursion depth would track mask diameter.

use crate::flowdir::{code_into_center, DirectionGrid};
use hydroshed_core::{Error, RasterHandle, Result};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// The set of cells draining to one outlet.
///
/// Append-only while the traversal runs; immutable once it completes. The
/// bounding box is tracked so the window accessor can be grown ahead of the
/// frontier.
#[derive(Debug)]
pub struct WatershedMask {
    cells: HashSet<(u32, u32)>,
    outlet: (usize, usize),
    min_row: usize,
    min_col: usize,
    max_row: usize,
    max_col: usize,
}

impl WatershedMask {
    fn new(outlet: (usize, usize)) -> Self {
        let mut cells = HashSet::new();
        cells.insert((outlet.0 as u32, outlet.1 as u32));
        Self {
            cells,
            outlet,
            min_row: outlet.0,
            min_col: outlet.1,
            max_row: outlet.0,
            max_col: outlet.1,
        }
    }

    fn insert(&mut self, row: usize, col: usize) {
        self.cells.insert((row as u32, col as u32));
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.cells.contains(&(row as u32, col as u32))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn outlet(&self) -> (usize, usize) {
        self.outlet
    }

    /// Inclusive bounding box `(min_row, min_col, max_row, max_col)`.
    pub fn bbox(&self) -> (usize, usize, usize, usize) {
        (self.min_row, self.min_col, self.max_row, self.max_col)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells.iter().map(|&(r, c)| (r as usize, c as usize))
    }

    #[cfg(test)]
    pub(crate) fn empty(outlet: (usize, usize)) -> Self {
        let mut mask = Self::new(outlet);
        mask.cells.clear();
        mask
    }
}

/// Delineate the watershed above an outlet cell.
///
/// Caps the mask at `max_cells` and fails with `WatershedTooLarge` beyond
/// it, bounding worst-case latency against corrupt direction data.
pub fn delineate(
    outlet: (usize, usize),
    direction: &mut DirectionGrid,
    max_cells: usize,
) -> Result<WatershedMask> {
    let mut mask = WatershedMask::new(outlet);
    let mut frontier: VecDeque<(usize, usize)> = VecDeque::new();
    frontier.push_back(outlet);

    // Process the frontier level by level so the accessor window can be
    // grown once per level to the mask's bounding box plus one neighbor
    // ring, instead of lazily inside the neighbor probes.
    while !frontier.is_empty() {
        let (min_row, min_col, max_row, max_col) = mask.bbox();
        direction.reader_mut().ensure_covers(
            min_row as isize - 1,
            min_col as isize - 1,
            max_row as isize + 1,
            max_col as isize + 1,
        )?;

        let mut next: VecDeque<(usize, usize)> = VecDeque::new();

        while let Some((row, col)) = frontier.pop_front() {
            for dr in -1isize..=1 {
                for dc in -1isize..=1 {
                    if dr == 0 && dc == 0 {
                        continue;
                    }

                    let n_row = row as isize + dr;
                    let n_col = col as isize + dc;
                    if !direction.reader().handle().in_bounds(n_row, n_col) {
                        continue;
                    }

                    let (n_row_u, n_col_u) = (n_row as usize, n_col as usize);
                    if mask.contains(n_row_u, n_col_u) {
                        continue;
                    }

                    // The neighbor contributes if its flow enters (row, col);
                    // it sits at (dr, dc) from the cell.
                    match direction.code_at(n_row, n_col)? {
                        Some(code) if code == code_into_center(dr, dc) => {
                            if mask.len() >= max_cells {
                                return Err(Error::WatershedTooLarge { max_cells });
                            }
                            mask.insert(n_row_u, n_col_u);
                            next.push_back((n_row_u, n_col_u));
                        }
                        _ => {}
                    }
                }
            }
        }

        frontier = next;
    }

    debug!(
        cells = mask.len(),
        bbox = ?mask.bbox(),
        "watershed traversal complete"
    );

    Ok(mask)
}

/// Watershed area in m²: cell count × cell area at the mask's centroid row.
pub fn mask_area(mask: &WatershedMask, handle: &RasterHandle) -> f64 {
    let (min_row, _, max_row, _) = mask.bbox();
    mask.len() as f64 * cell_area_at(handle, (min_row + max_row) / 2)
}

/// Cell area in m² at a given row.
///
/// Projected rasters are assumed to be in meters. For geographic rasters the
/// cell size is in degrees and the area is scaled with the meters-per-degree
/// factors at that row's latitude (spherical approximation, adequate for
/// catchment reporting).
pub fn cell_area_at(handle: &RasterHandle, row: usize) -> f64 {
    const METERS_PER_DEGREE_LAT: f64 = 111_132.95;
    const METERS_PER_DEGREE_LON: f64 = 111_319.49;

    if handle.crs.is_geographic() {
        let (_, lat) = handle.transform.cell_center(row, handle.cols / 2);
        let width_m = handle.transform.cell_width * METERS_PER_DEGREE_LON * lat.to_radians().cos();
        let height_m = handle.transform.cell_height * METERS_PER_DEGREE_LAT;
        width_m * height_m
    } else {
        handle.transform.cell_area()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowdir::downslope_offset;
    use crate::testutil::{converging_grid, grid_from_codes};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn five_by_five_converges_to_full_mask() {
        // Every cell drains toward the center outlet (2, 2).
        let mut direction = converging_grid(5, 5, (2, 2));
        let mask = delineate((2, 2), &mut direction, 1_000_000).unwrap();

        assert_eq!(mask.len(), 25);
        assert_eq!(mask.bbox(), (0, 0, 4, 4));

        let area = mask_area(&mask, direction.reader().handle());
        assert_relative_eq!(area, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn every_mask_cell_drains_to_the_outlet() {
        let mut direction = converging_grid(9, 7, (6, 3));
        let mask = delineate((6, 3), &mut direction, 1_000_000).unwrap();

        for (row, col) in mask.iter() {
            let (mut r, mut c) = (row as isize, col as isize);
            let mut steps = 0;
            while (r as usize, c as usize) != mask.outlet() {
                let code = direction
                    .code_at(r, c)
                    .unwrap()
                    .expect("mask cell must have outflow");
                let (dr, dc) = downslope_offset(code).unwrap();
                r += dr;
                c += dc;
                steps += 1;
                assert!(
                    mask.contains(r as usize, c as usize),
                    "downslope path of ({row}, {col}) left the mask at ({r}, {c})"
                );
                assert!(steps <= mask.len(), "path exceeded mask size");
            }
        }
    }

    #[test]
    fn cells_draining_elsewhere_are_excluded() {
        // Left half flows west off the grid, right half flows east into
        // the outlet column.
        let mut codes = Array2::zeros((3, 6));
        for row in 0..3 {
            for col in 0..3 {
                codes[(row, col)] = 4.0; // W
            }
            for col in 3..6 {
                codes[(row, col)] = 8.0; // E
            }
        }
        let mut direction = grid_from_codes("split", &codes);

        let mask = delineate((1, 5), &mut direction, 1_000_000).unwrap();
        // Row 1 of the east half only: (1,3), (1,4), (1,5)
        assert_eq!(mask.len(), 3);
        assert!(mask.contains(1, 3));
        assert!(!mask.contains(1, 2));
        assert!(!mask.contains(0, 4));
    }

    #[test]
    fn cell_cap_fails_as_too_large() {
        let mut direction = converging_grid(11, 11, (5, 5));
        let err = delineate((5, 5), &mut direction, 50).unwrap_err();
        assert!(matches!(err, Error::WatershedTooLarge { max_cells: 50 }));
    }

    #[test]
    fn mask_area_scales_with_cell_size() {
        use crate::testutil::grid_with_transform;
        use hydroshed_core::GeoTransform;

        let codes = crate::testutil::converging_codes(5, 5, (2, 2));
        let mut direction =
            grid_with_transform("coarse", &codes, GeoTransform::new(0.0, 125.0, 25.0, 25.0));
        let mask = delineate((2, 2), &mut direction, 1_000_000).unwrap();

        let area = mask_area(&mask, direction.reader().handle());
        assert_relative_eq!(area, 25.0 * 625.0, epsilon = 1e-6);
    }
}
