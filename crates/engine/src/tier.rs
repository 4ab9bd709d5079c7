//! Resolution tiers.
//!
//! A tier bundles the rasters derived from one DEM resolution: flow
//! direction, flow accumulation, and optionally a rasterized stream network.
//! Tiers are ordered finest first; each carries a promotion threshold, the
//! drainage area (m²) above which delineation moves to the next coarser
//! tier, where the watershed spans fewer cells.

use hydroshed_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One resolution level of the raster pyramid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    /// Human-readable label ("30m", "500m") used in logs and results.
    pub name: String,
    /// Flow-direction raster path.
    pub direction: String,
    /// Flow-accumulation raster path. Required on the finest tier when more
    /// than one tier is configured; optional elsewhere.
    #[serde(default)]
    pub accumulation: Option<String>,
    /// Rasterized stream network. When absent, stream cells are derived by
    /// thresholding accumulation with `stream_threshold`.
    #[serde(default)]
    pub streams: Option<String>,
    /// Nominal cell size in meters, for reporting.
    pub resolution: f64,
    /// Drainage area (m²) at which delineation promotes past this tier.
    /// `None` on the coarsest tier, which handles everything above the
    /// previous threshold.
    #[serde(default)]
    pub promotion_threshold: Option<f64>,
    /// Minimum accumulation (cell count) for a cell to count as stream when
    /// no stream raster is configured.
    #[serde(default = "default_stream_threshold")]
    pub stream_threshold: f64,
}

fn default_stream_threshold() -> f64 {
    1000.0
}

/// An ordered set of tiers, finest resolution first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierSet {
    tiers: Vec<Tier>,
}

impl TierSet {
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::Config("at least one tier is required".into()));
        }
        if tiers.len() > 1 && tiers[0].accumulation.is_none() {
            return Err(Error::Config(
                "the finest tier needs an accumulation raster to select tiers".into(),
            ));
        }

        let mut last_threshold = 0.0f64;
        let mut last_resolution = 0.0f64;
        for (i, tier) in tiers.iter().enumerate() {
            if tier.resolution <= last_resolution {
                return Err(Error::Config(format!(
                    "tier '{}' resolution {} does not increase over the previous tier",
                    tier.name, tier.resolution
                )));
            }
            last_resolution = tier.resolution;

            match tier.promotion_threshold {
                Some(t) if t <= last_threshold => {
                    return Err(Error::Config(format!(
                        "tier '{}' promotion threshold {} does not increase",
                        tier.name, t
                    )));
                }
                Some(t) => last_threshold = t,
                None if i + 1 < tiers.len() => {
                    return Err(Error::Config(format!(
                        "tier '{}' needs a promotion threshold; only the coarsest tier may omit it",
                        tier.name
                    )));
                }
                None => {}
            }
        }

        Ok(Self { tiers })
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn get(&self, index: usize) -> &Tier {
        &self.tiers[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    pub fn finest(&self) -> &Tier {
        &self.tiers[0]
    }

    /// Pick the tier for a drainage area estimate (m²).
    ///
    /// The first tier whose threshold strictly exceeds the estimate wins; an
    /// estimate sitting exactly on a threshold promotes to the coarser tier.
    pub fn select(&self, drainage_area: f64) -> usize {
        self.tiers
            .iter()
            .position(|t| {
                t.promotion_threshold
                    .map(|limit| drainage_area < limit)
                    .unwrap_or(true)
            })
            .unwrap_or(self.tiers.len() - 1)
    }
}
