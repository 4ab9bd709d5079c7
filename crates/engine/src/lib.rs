//! Watershed delineation engine.
//!
//! Given flow-direction rasters derived from a DEM, the engine snaps a
//! query point downslope onto the stream network, traverses the upstream
//! flow graph to collect the contributing cells, and polygonizes the result.
//! A [`Delineator`](orchestrator::Delineator) runs the whole pipeline over a
//! multi-resolution tier pyramid, choosing the coarsest grid that still
//! resolves the basin.

pub mod flowdir;
pub mod orchestrator;
pub mod polygonize;
pub mod snap;
pub mod tier;
pub mod traverse;

#[cfg(test)]
pub(crate) mod testutil;

pub use orchestrator::{DelineateOptions, DelineationResult, Delineator};
pub use polygonize::polygonize;
pub use snap::{snap, SnapResult};
pub use tier::{Tier, TierSet};
pub use traverse::{delineate, mask_area, WatershedMask};
