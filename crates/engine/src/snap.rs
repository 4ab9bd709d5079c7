//! Downslope stream snapping.
//!
//! Walks from an arbitrary point cell by cell along the flow-direction
//! relation until a stream cell is reached. Strict downslope movement cannot
//! revisit a cell on sane data; the step bound also covers the pathological
//! case of a cycle in corrupt direction data without explicit cycle
//! detection.

use crate::flowdir::{downslope_offset, DirectionGrid, StreamClassifier};
use hydroshed_core::{Error, Result, WindowedReader};
use tracing::debug;

/// Outcome of a successful snap.
#[derive(Debug, Clone, Copy)]
pub struct SnapResult {
    pub row: usize,
    pub col: usize,
    /// Center coordinates of the stream cell, in the raster's CRS.
    pub x: f64,
    pub y: f64,
    /// Flow accumulation at the outlet, when an accumulation raster is
    /// available. Feeds resolution-tier selection.
    pub accumulation: Option<f64>,
}

/// Walk downslope from `(x, y)` (raster CRS) to the nearest stream cell.
///
/// Fails with `OffRaster` when the starting point lies outside the raster
/// footprint, and with `StreamNotFound` when the walk hits a sink, steps off
/// the raster, or exceeds `max_steps` before reaching a stream.
pub fn snap(
    x: f64,
    y: f64,
    direction: &mut DirectionGrid,
    streams: &mut StreamClassifier,
    accumulation: Option<&mut WindowedReader>,
    max_steps: usize,
) -> Result<SnapResult> {
    let handle = direction.reader().handle().clone();
    let (start_row, start_col) = handle.cell_at(x, y)?;

    let not_found = || Error::StreamNotFound { x, y, max_steps };

    let mut row = start_row as isize;
    let mut col = start_col as isize;

    for step in 0..=max_steps {
        if streams.is_stream(row, col)? {
            debug!(row, col, steps = step, "snapped to stream");
            let (row, col) = (row as usize, col as usize);
            let (sx, sy) = handle.transform.cell_center(row, col);

            let accumulation = match accumulation {
                Some(reader) => {
                    let value = reader.read(row as isize, col as isize)?;
                    if reader.handle().is_nodata(value) {
                        None
                    } else {
                        Some(value)
                    }
                }
                None => None,
            };

            return Ok(SnapResult {
                row,
                col,
                x: sx,
                y: sy,
                accumulation,
            });
        }

        // Sinks and nodata have no downslope continuation.
        let code = direction.code_at(row, col)?.ok_or_else(not_found)?;
        let (dr, dc) = downslope_offset(code).ok_or_else(not_found)?;
        row += dr;
        col += dc;

        if !handle.in_bounds(row, col) {
            return Err(not_found());
        }
    }

    Err(not_found())
}
