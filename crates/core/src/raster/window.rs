//! Per-request windowed raster access.
//!
//! A [`WindowedReader`] holds one decoded rectangular window of a raster and
//! serves cell lookups from it. A lookup outside the current window unions
//! the window with a margin around the missing cell and re-fetches the
//! enlarged region as a single read, growing multiplicatively (×2 per axis)
//! so a traversal that drifts steadily outward causes O(log(extent))
//! re-fetches rather than one per step.
//!
//! Exactly one in-flight request owns a reader; sharing across requests
//! happens below this layer, in the source's block cache.

use crate::error::{Error, Result};
use crate::raster::source::{RasterHandle, RasterSource};
use ndarray::Array2;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tuning for window growth and transient-failure retry.
#[derive(Debug, Clone)]
pub struct WindowOptions {
    /// Edge length of the first fetched window, in cells.
    pub initial_size: usize,
    /// Cells of slack added around an out-of-window cell before fetching.
    pub margin: usize,
    /// Total attempts for one fetch before surfacing the I/O error.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub base_backoff: Duration,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            initial_size: 256,
            margin: 16,
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// A cached, decoded rectangular block of one raster.
struct Window {
    row_off: usize,
    col_off: usize,
    data: Array2<f64>,
}

impl Window {
    fn covers(&self, row: usize, col: usize) -> bool {
        row >= self.row_off
            && col >= self.col_off
            && row < self.row_off + self.data.nrows()
            && col < self.col_off + self.data.ncols()
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row - self.row_off, col - self.col_off)]
    }
}

/// Cell-value lookup by (row, col) without materializing the raster.
pub struct WindowedReader {
    source: Arc<dyn RasterSource>,
    handle: Arc<RasterHandle>,
    window: Option<Window>,
    opts: WindowOptions,
    fetches: usize,
}

impl WindowedReader {
    pub fn new(source: Arc<dyn RasterSource>, handle: Arc<RasterHandle>) -> Self {
        Self::with_options(source, handle, WindowOptions::default())
    }

    pub fn with_options(
        source: Arc<dyn RasterSource>,
        handle: Arc<RasterHandle>,
        opts: WindowOptions,
    ) -> Self {
        Self {
            source,
            handle,
            window: None,
            opts,
            fetches: 0,
        }
    }

    pub fn handle(&self) -> &Arc<RasterHandle> {
        &self.handle
    }

    /// Number of window fetches performed so far in this request.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Read the value at a cell address.
    ///
    /// Addresses outside the raster's bounds yield the nodata sentinel
    /// instead of an error, so neighbor probes at the raster edge need no
    /// special casing.
    pub fn read(&mut self, row: isize, col: isize) -> Result<f64> {
        if !self.handle.in_bounds(row, col) {
            return Ok(self.handle.nodata);
        }

        let (row, col) = (row as usize, col as usize);

        if let Some(window) = &self.window {
            if window.covers(row, col) {
                return Ok(window.get(row, col));
            }
        }

        let m = self.opts.margin as isize;
        self.ensure_covers(
            row as isize - m,
            col as isize - m,
            row as isize + m,
            col as isize + m,
        )?;

        // ensure_covers grew the window over (row, col); read cannot miss now
        Ok(self
            .window
            .as_ref()
            .map(|w| w.get(row, col))
            .unwrap_or(self.handle.nodata))
    }

    /// Grow the window so the inclusive cell range is fully covered.
    ///
    /// Traversals call this with their mask's bounding box (plus one cell)
    /// before each frontier expansion, replacing many lazy per-cell growths
    /// with one fetch. Bounds are clamped to the raster extent.
    pub fn ensure_covers(
        &mut self,
        min_row: isize,
        min_col: isize,
        max_row: isize,
        max_col: isize,
    ) -> Result<()> {
        let clamp_row = |v: isize| v.clamp(0, self.handle.rows as isize - 1) as usize;
        let clamp_col = |v: isize| v.clamp(0, self.handle.cols as isize - 1) as usize;

        let min_row = clamp_row(min_row);
        let max_row = clamp_row(max_row);
        let min_col = clamp_col(min_col);
        let max_col = clamp_col(max_col);

        if let Some(window) = &self.window {
            if window.covers(min_row, min_col) && window.covers(max_row, max_col) {
                return Ok(());
            }
        }

        // Union of the current window and the requested range.
        let (mut lo_r, mut lo_c, mut hi_r, mut hi_c) = match &self.window {
            Some(w) => (
                w.row_off.min(min_row),
                w.col_off.min(min_col),
                (w.row_off + w.data.nrows() - 1).max(max_row),
                (w.col_off + w.data.ncols() - 1).max(max_col),
            ),
            None => (min_row, min_col, max_row, max_col),
        };

        // Multiplicative growth: never fetch less than twice the previous
        // window on an axis, nor less than the configured initial size.
        let (prev_rows, prev_cols) = self
            .window
            .as_ref()
            .map(|w| (w.data.nrows(), w.data.ncols()))
            .unwrap_or((0, 0));

        let want_rows = (hi_r - lo_r + 1)
            .max(prev_rows * 2)
            .max(self.opts.initial_size)
            .min(self.handle.rows);
        let want_cols = (hi_c - lo_c + 1)
            .max(prev_cols * 2)
            .max(self.opts.initial_size)
            .min(self.handle.cols);

        // Pad symmetrically out to the target size, sliding at raster edges.
        let pad_rows = want_rows - (hi_r - lo_r + 1);
        let pad_cols = want_cols - (hi_c - lo_c + 1);
        lo_r = lo_r.saturating_sub(pad_rows / 2);
        lo_c = lo_c.saturating_sub(pad_cols / 2);
        hi_r = (lo_r + want_rows - 1).min(self.handle.rows - 1);
        hi_c = (lo_c + want_cols - 1).min(self.handle.cols - 1);
        lo_r = hi_r + 1 - want_rows.min(hi_r + 1);
        lo_c = hi_c + 1 - want_cols.min(hi_c + 1);

        let rows = hi_r - lo_r + 1;
        let cols = hi_c - lo_c + 1;

        debug!(
            raster = %self.handle.path,
            row_off = lo_r,
            col_off = lo_c,
            rows,
            cols,
            fetch = self.fetches + 1,
            "growing raster window"
        );

        let data = self.fetch_with_retry(lo_r, lo_c, rows, cols)?;
        self.fetches += 1;
        self.window = Some(Window {
            row_off: lo_r,
            col_off: lo_c,
            data,
        });

        Ok(())
    }

    /// One window read with bounded exponential-backoff retry.
    ///
    /// Transient storage faults are expected for remotely hosted rasters;
    /// anything other than an I/O failure is surfaced immediately since a
    /// retry cannot change it.
    fn fetch_with_retry(
        &self,
        row_off: usize,
        col_off: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Array2<f64>> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..self.opts.max_attempts {
            if attempt > 0 {
                let backoff = self.opts.base_backoff * 2u32.pow(attempt - 1);
                std::thread::sleep(backoff);
            }

            match self
                .source
                .read_window(&self.handle, row_off, col_off, rows, cols)
            {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() => {
                    debug!(raster = %self.handle.path, attempt, error = %e, "window read failed, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Io("window read failed".to_string())))
    }
}
