//! End-to-end delineation across resolution tiers.
//!
//! The delineator owns the raster source and the tier configuration. A
//! request runs snap → tier selection → (re-snap on the chosen tier) →
//! upstream traversal → polygonization. Tier selection happens on the finest
//! tier, where the snap is most precise: the flow accumulation at the
//! snapped outlet, scaled by cell area, estimates the drainage area before
//! any traversal runs, so large basins are delineated on a coarser grid with
//! far fewer cells.

use crate::flowdir::{DirectionGrid, StreamClassifier};
use crate::polygonize::polygonize;
use crate::snap::{snap, SnapResult};
use crate::tier::{Tier, TierSet};
use crate::traverse::{self, cell_area_at, mask_area};
use geo::MultiPolygon;
use hydroshed_core::{
    transform_point, Crs, Error, RasterHandle, RasterSource, Result, WindowOptions, WindowedReader,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Request-independent knobs for a delineator.
#[derive(Debug, Clone)]
pub struct DelineateOptions {
    /// CRS of the returned polygon and outlet coordinates.
    pub output_crs: Crs,
    /// Douglas-Peucker tolerance in output CRS units; 0 disables.
    pub simplify_tolerance: f64,
    /// Snap walk bound. Defaults to rows + cols of the active raster, the
    /// longest monotone path a grid admits.
    pub max_snap_steps: Option<usize>,
    /// Traversal cap before `WatershedTooLarge`.
    pub max_cells: usize,
    pub window: WindowOptions,
}

impl Default for DelineateOptions {
    fn default() -> Self {
        Self {
            output_crs: Crs::wgs84(),
            simplify_tolerance: 0.0,
            max_snap_steps: None,
            max_cells: 50_000_000,
            window: WindowOptions::default(),
        }
    }
}

/// A delineated watershed.
#[derive(Debug, Clone)]
pub struct DelineationResult {
    /// Snapped outlet, in the output CRS.
    pub outlet_x: f64,
    pub outlet_y: f64,
    /// Watershed area in m².
    pub area_m2: f64,
    pub polygon: MultiPolygon<f64>,
    /// Name and index of the tier the watershed was delineated on.
    pub tier: String,
    pub tier_index: usize,
    /// Nominal resolution of that tier, in meters.
    pub resolution: f64,
    /// Cells in the watershed mask.
    pub cell_count: usize,
}

struct TierRasters {
    direction: Arc<RasterHandle>,
    accumulation: Option<Arc<RasterHandle>>,
    streams: Option<Arc<RasterHandle>>,
}

/// Watershed delineation service over a tiered raster pyramid.
pub struct Delineator {
    source: Arc<dyn RasterSource>,
    tiers: TierSet,
    rasters: Vec<TierRasters>,
    opts: DelineateOptions,
}

impl fmt::Debug for Delineator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delineator")
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

impl Delineator {
    /// Open and validate every tier's rasters.
    ///
    /// All rasters within a tier must share a grid; a tier must carry a
    /// stream raster or an accumulation raster to classify stream cells.
    pub fn new(
        source: Arc<dyn RasterSource>,
        tiers: TierSet,
        opts: DelineateOptions,
    ) -> Result<Self> {
        let mut rasters = Vec::with_capacity(tiers.len());

        for tier in tiers.iter() {
            let direction = source.open(&tier.direction)?;

            let accumulation = match &tier.accumulation {
                Some(path) => {
                    let handle = source.open(path)?;
                    direction.matches(&handle)?;
                    Some(handle)
                }
                None => None,
            };

            let streams = match &tier.streams {
                Some(path) => {
                    let handle = source.open(path)?;
                    direction.matches(&handle)?;
                    Some(handle)
                }
                None => None,
            };

            if streams.is_none() && accumulation.is_none() {
                return Err(Error::Config(format!(
                    "tier '{}' has neither a stream nor an accumulation raster",
                    tier.name
                )));
            }

            info!(
                tier = %tier.name,
                rows = direction.rows,
                cols = direction.cols,
                crs = %direction.crs,
                "tier opened"
            );
            rasters.push(TierRasters {
                direction,
                accumulation,
                streams,
            });
        }

        Ok(Self {
            source,
            tiers,
            rasters,
            opts,
        })
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// Delineate the watershed draining through `(x, y)` given in `input_crs`.
    pub fn delineate(&self, x: f64, y: f64, input_crs: &Crs) -> Result<DelineationResult> {
        let started = Instant::now();

        // Snap on the finest tier first; its accumulation sizes the basin.
        let finest = &self.rasters[0];
        let (fx, fy) = transform_point(input_crs, &finest.direction.crs, x, y)?;
        let snapped = self.snap_on_tier(0, fx, fy)?;

        let tier_index = self.select_tier(finest, &snapped);
        let tier = self.tiers.get(tier_index);

        // Re-snap on the chosen tier; the finest-tier outlet cell does not
        // line up with a coarser grid's stream network.
        let snapped = if tier_index == 0 {
            snapped
        } else {
            let chosen = &self.rasters[tier_index];
            let (tx, ty) =
                transform_point(&finest.direction.crs, &chosen.direction.crs, snapped.x, snapped.y)?;
            self.snap_on_tier(tier_index, tx, ty)?
        };
        debug!(
            tier = %tier.name,
            row = snapped.row,
            col = snapped.col,
            "outlet snapped"
        );

        let chosen = &self.rasters[tier_index];
        let mut direction = DirectionGrid::new(self.reader(&chosen.direction));
        let mask = traverse::delineate(
            (snapped.row, snapped.col),
            &mut direction,
            self.opts.max_cells,
        )?;

        let area_m2 = mask_area(&mask, &chosen.direction);
        let polygon = polygonize(
            &mask,
            &chosen.direction,
            &self.opts.output_crs,
            self.opts.simplify_tolerance,
        )?;
        let (outlet_x, outlet_y) = transform_point(
            &chosen.direction.crs,
            &self.opts.output_crs,
            snapped.x,
            snapped.y,
        )?;

        info!(
            tier = %tier.name,
            cells = mask.len(),
            area_m2,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "watershed delineated"
        );

        Ok(DelineationResult {
            outlet_x,
            outlet_y,
            area_m2,
            polygon,
            tier: tier.name.clone(),
            tier_index,
            resolution: tier.resolution,
            cell_count: mask.len(),
        })
    }

    fn reader(&self, handle: &Arc<RasterHandle>) -> WindowedReader {
        WindowedReader::with_options(
            Arc::clone(&self.source),
            Arc::clone(handle),
            self.opts.window.clone(),
        )
    }

    fn snap_on_tier(&self, index: usize, x: f64, y: f64) -> Result<SnapResult> {
        let rasters = &self.rasters[index];
        let tier = self.tiers.get(index);

        let mut direction = DirectionGrid::new(self.reader(&rasters.direction));
        let mut streams = self.classifier(tier, rasters);
        let mut accumulation = rasters
            .accumulation
            .as_ref()
            .map(|handle| self.reader(handle));

        let max_steps = self
            .opts
            .max_snap_steps
            .unwrap_or(rasters.direction.rows + rasters.direction.cols);

        snap(
            x,
            y,
            &mut direction,
            &mut streams,
            accumulation.as_mut(),
            max_steps,
        )
    }

    fn classifier(&self, tier: &Tier, rasters: &TierRasters) -> StreamClassifier {
        match (&rasters.streams, &rasters.accumulation) {
            (Some(handle), _) => StreamClassifier::Streams(self.reader(handle)),
            (None, Some(handle)) => StreamClassifier::Accumulation {
                reader: self.reader(handle),
                threshold: tier.stream_threshold,
            },
            // Ruled out at construction.
            (None, None) => unreachable!("tier validated to carry streams or accumulation"),
        }
    }

    fn select_tier(&self, finest: &TierRasters, snapped: &SnapResult) -> usize {
        if self.tiers.len() == 1 {
            return 0;
        }
        // Accumulation is guaranteed on the finest tier by TierSet; a nodata
        // reading at the outlet falls back to the finest tier.
        match snapped.accumulation {
            Some(acc) => {
                let drainage_area = acc.abs() * cell_area_at(&finest.direction, snapped.row);
                let index = self.tiers.select(drainage_area);
                debug!(
                    drainage_area,
                    tier = %self.tiers.get(index).name,
                    "tier selected"
                );
                index
            }
            None => 0,
        }
    }
}
