//! Flow-direction decoding and stream classification.
//!
//! Direction codes follow the GRASS r.watershed encoding carried by the
//! direction rasters:
//! ```text
//!   3  2  1
//!   4  .  8
//!   5  6  7
//! ```
//! `1` = NE, counting counterclockwise to `8` = E. Zero, negative values and
//! nodata all mean "no defined outflow" (sink, flat or masked cell).

use hydroshed_core::{Result, WindowedReader};

/// D8 neighbor offsets indexed by direction code (1=NE, 2=N, ..., 8=E).
pub const D8_OFFSETS: [(isize, isize); 8] = [
    (-1, 1),  // 1: NE
    (-1, 0),  // 2: N
    (-1, -1), // 3: NW
    (0, -1),  // 4: W
    (1, -1),  // 5: SW
    (1, 0),   // 6: S
    (1, 1),   // 7: SE
    (0, 1),   // 8: E
];

/// Direction code a neighbor at offset (dr, dc) must carry to drain into the
/// center cell, indexed by `[dr + 1][dc + 1]`. Zero marks the center itself.
const DRAINS_INTO_CENTER: [[i32; 3]; 3] = [
    [7, 6, 5], //
    [8, 0, 4], //
    [1, 2, 3],
];

/// Offset for a direction code, or `None` for "no outflow".
pub fn downslope_offset(code: i32) -> Option<(isize, isize)> {
    if (1..=8).contains(&code) {
        Some(D8_OFFSETS[(code - 1) as usize])
    } else {
        None
    }
}

/// The code a cell at offset `(dr, dc)` from a center must have for its flow
/// to enter the center. Offsets must be in `-1..=1`.
pub fn code_into_center(dr: isize, dc: isize) -> i32 {
    DRAINS_INTO_CENTER[(dr + 1) as usize][(dc + 1) as usize]
}

/// Windowed view of a flow-direction raster with decoded cell access.
pub struct DirectionGrid {
    reader: WindowedReader,
}

impl DirectionGrid {
    pub fn new(reader: WindowedReader) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &WindowedReader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut WindowedReader {
        &mut self.reader
    }

    /// Direction code at a cell; `None` for nodata, sinks and out-of-bounds
    /// addresses.
    pub fn code_at(&mut self, row: isize, col: isize) -> Result<Option<i32>> {
        let value = self.reader.read(row, col)?;
        if self.reader.handle().is_nodata(value) {
            return Ok(None);
        }
        let code = value as i32;
        Ok(if (1..=8).contains(&code) {
            Some(code)
        } else {
            None
        })
    }
}

/// Stream/non-stream classification for snapping.
///
/// A dedicated stream raster is authoritative when present; otherwise stream
/// cells are those whose flow accumulation meets the active tier's threshold.
pub enum StreamClassifier {
    Streams(WindowedReader),
    Accumulation { reader: WindowedReader, threshold: f64 },
}

impl StreamClassifier {
    pub fn is_stream(&mut self, row: isize, col: isize) -> Result<bool> {
        match self {
            StreamClassifier::Streams(reader) => {
                let value = reader.read(row, col)?;
                Ok(!reader.handle().is_nodata(value) && value != 0.0)
            }
            StreamClassifier::Accumulation { reader, threshold } => {
                let value = reader.read(row, col)?;
                Ok(!reader.handle().is_nodata(value) && value >= *threshold)
            }
        }
    }
}
