//! End-to-end delineation over an in-memory two-tier pyramid.
//!
//! Both tiers cover the same 160 m x 160 m footprint in UTM 13N: a 16x16
//! grid of 10 m cells and an 8x8 grid of 20 m cells. Every cell drains
//! toward the grid center, which is the only stream cell (its accumulation
//! is the only value above the stream threshold), so a snap from anywhere
//! lands on the center and the watershed is the full grid.

use approx::assert_relative_eq;
use hydroshed_core::io::MemorySource;
use hydroshed_core::{Crs, Error, GeoTransform};
use hydroshed_engine::{DelineateOptions, Delineator, Tier, TierSet};
use ndarray::Array2;
use std::sync::Arc;

const ORIGIN_X: f64 = 500_000.0;
const ORIGIN_Y: f64 = 4_000_000.0;
const NODATA: f64 = -9999.0;

fn code_for(dr: isize, dc: isize) -> f64 {
    match (dr, dc) {
        (-1, 1) => 1.0,
        (-1, 0) => 2.0,
        (-1, -1) => 3.0,
        (0, -1) => 4.0,
        (1, -1) => 5.0,
        (1, 0) => 6.0,
        (1, 1) => 7.0,
        (0, 1) => 8.0,
        _ => panic!("not a unit offset"),
    }
}

/// Direction codes converging on `outlet`; the outlet itself is a sink.
fn converging(cells: usize, outlet: (usize, usize)) -> Array2<f64> {
    Array2::from_shape_fn((cells, cells), |(r, c)| {
        let dr = (outlet.0 as isize - r as isize).signum();
        let dc = (outlet.1 as isize - c as isize).signum();
        if dr == 0 && dc == 0 {
            0.0
        } else {
            code_for(dr, dc)
        }
    })
}

/// Accumulation of 1 everywhere except `outlet_value` at the outlet.
fn accumulation(cells: usize, outlet: (usize, usize), outlet_value: f64) -> Array2<f64> {
    let mut acc = Array2::from_elem((cells, cells), 1.0);
    acc[outlet] = outlet_value;
    acc
}

fn insert_tier(source: &MemorySource, name: &str, cells: usize, cell_size: f64) {
    let transform = GeoTransform::new(ORIGIN_X, ORIGIN_Y, cell_size, cell_size);
    let outlet = (cells / 2, cells / 2);
    source.insert(
        &format!("{name}_dir.tif"),
        converging(cells, outlet),
        transform,
        Crs::from_epsg(32613),
        NODATA,
    );
    source.insert(
        &format!("{name}_acc.tif"),
        accumulation(cells, outlet, 300.0),
        transform,
        Crs::from_epsg(32613),
        NODATA,
    );
}

fn pyramid() -> Arc<MemorySource> {
    let source = MemorySource::new();
    insert_tier(&source, "fine", 16, 10.0);
    insert_tier(&source, "coarse", 8, 20.0);
    Arc::new(source)
}

fn tier(name: &str, resolution: f64, threshold: Option<f64>) -> Tier {
    Tier {
        name: name.into(),
        direction: format!("{name}_dir.tif"),
        accumulation: Some(format!("{name}_acc.tif")),
        streams: None,
        resolution,
        promotion_threshold: threshold,
        stream_threshold: 200.0,
    }
}

fn utm_options() -> DelineateOptions {
    DelineateOptions {
        output_crs: Crs::from_epsg(32613),
        ..DelineateOptions::default()
    }
}

fn two_tier_delineator(fine_threshold: f64) -> Delineator {
    let tiers = TierSet::new(vec![
        tier("fine", 10.0, Some(fine_threshold)),
        tier("coarse", 20.0, None),
    ])
    .unwrap();
    Delineator::new(pyramid(), tiers, utm_options()).unwrap()
}

// The fine outlet's drainage estimate is accumulation 300 x 100 m² = 3.0e4 m².

#[test]
fn single_tier_delineates_the_full_basin() {
    let tiers = TierSet::new(vec![tier("fine", 10.0, None)]).unwrap();
    let delineator = Delineator::new(pyramid(), tiers, utm_options()).unwrap();

    // Cell (2, 2) center; the walk runs diagonally to the outlet at (8, 8).
    let result = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap();

    assert_eq!(result.tier_index, 0);
    assert_eq!(result.cell_count, 256);
    assert_relative_eq!(result.area_m2, 25_600.0, epsilon = 1e-6);
    assert_relative_eq!(result.outlet_x, ORIGIN_X + 85.0, epsilon = 1e-6);
    assert_relative_eq!(result.outlet_y, ORIGIN_Y - 85.0, epsilon = 1e-6);
    assert_eq!(result.polygon.0.len(), 1);
}

#[test]
fn small_basin_stays_on_the_fine_tier() {
    let delineator = two_tier_delineator(5.0e4);
    let result = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap();

    assert_eq!(result.tier, "fine");
    assert_relative_eq!(result.resolution, 10.0);
    assert_eq!(result.cell_count, 256);
}

#[test]
fn large_basin_promotes_to_the_coarse_tier() {
    let delineator = two_tier_delineator(1.0e4);
    let result = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap();

    assert_eq!(result.tier, "coarse");
    assert_eq!(result.tier_index, 1);
    assert_relative_eq!(result.resolution, 20.0);
    assert_eq!(result.cell_count, 64);
    assert_relative_eq!(result.area_m2, 25_600.0, epsilon = 1e-6);
    // Re-snapped onto the coarse grid's outlet cell center
    assert_relative_eq!(result.outlet_x, ORIGIN_X + 90.0, epsilon = 1e-6);
    assert_relative_eq!(result.outlet_y, ORIGIN_Y - 90.0, epsilon = 1e-6);
}

#[test]
fn drainage_on_the_promotion_threshold_promotes() {
    // The estimate is exactly 3.0e4; equality moves to the coarser tier.
    let delineator = two_tier_delineator(3.0e4);
    let result = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap();
    assert_eq!(result.tier, "coarse");
}

#[test]
fn wgs84_output_lands_near_the_raster() {
    let tiers = TierSet::new(vec![tier("fine", 10.0, None)]).unwrap();
    let delineator =
        Delineator::new(pyramid(), tiers, DelineateOptions::default()).unwrap();

    let result = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap();

    // UTM 13N easting 500 km sits on the -105° meridian; northing 4,000 km
    // is mid-thirties latitude.
    assert!((-106.0..-104.0).contains(&result.outlet_x));
    assert!((35.0..37.0).contains(&result.outlet_y));
    for coord in result.polygon.0[0].exterior().coords() {
        assert!((-106.0..-104.0).contains(&coord.x));
        assert!((35.0..37.0).contains(&coord.y));
    }
}

#[test]
fn input_point_is_transformed_from_its_own_crs() {
    let tiers = TierSet::new(vec![tier("fine", 10.0, None)]).unwrap();
    let delineator = Delineator::new(pyramid(), tiers, utm_options()).unwrap();

    let utm = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap();

    // The same point expressed in WGS84 must reach the same outlet. Taking
    // the point from the engine's own inverse transform keeps the test
    // independent of hand-computed geodesy.
    let (lon, lat) = hydroshed_core::transform_point(
        &Crs::from_epsg(32613),
        &Crs::wgs84(),
        ORIGIN_X + 25.0,
        ORIGIN_Y - 25.0,
    )
    .unwrap();
    let wgs = delineator.delineate(lon, lat, &Crs::wgs84()).unwrap();

    assert_relative_eq!(wgs.outlet_x, utm.outlet_x, epsilon = 1e-6);
    assert_relative_eq!(wgs.outlet_y, utm.outlet_y, epsilon = 1e-6);
    assert_eq!(wgs.cell_count, utm.cell_count);
}

#[test]
fn point_outside_the_raster_is_off_raster() {
    let tiers = TierSet::new(vec![tier("fine", 10.0, None)]).unwrap();
    let delineator = Delineator::new(pyramid(), tiers, utm_options()).unwrap();

    let err = delineator
        .delineate(0.0, 0.0, &Crs::from_epsg(32613))
        .unwrap_err();
    assert!(matches!(err, Error::OffRaster { .. }));
}

#[test]
fn basin_without_a_stream_is_stream_not_found() {
    // Raise the stream threshold past every accumulation value; the walk
    // reaches the sink at the center without ever classifying a stream.
    let source = pyramid();
    let mut no_stream = tier("fine", 10.0, None);
    no_stream.stream_threshold = 1.0e6;
    let tiers = TierSet::new(vec![no_stream]).unwrap();
    let delineator = Delineator::new(source, tiers, utm_options()).unwrap();

    let err = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap_err();
    assert!(matches!(err, Error::StreamNotFound { .. }));
}

#[test]
fn cell_cap_fails_as_watershed_too_large() {
    let tiers = TierSet::new(vec![tier("fine", 10.0, None)]).unwrap();
    let opts = DelineateOptions {
        max_cells: 100,
        ..utm_options()
    };
    let delineator = Delineator::new(pyramid(), tiers, opts).unwrap();

    let err = delineator
        .delineate(ORIGIN_X + 25.0, ORIGIN_Y - 25.0, &Crs::from_epsg(32613))
        .unwrap_err();
    assert!(matches!(err, Error::WatershedTooLarge { max_cells: 100 }));
}

#[test]
fn tier_without_streams_or_accumulation_is_rejected() {
    let mut bare = tier("fine", 10.0, None);
    bare.accumulation = None;
    let tiers = TierSet::new(vec![bare]).unwrap();

    let err = Delineator::new(pyramid(), tiers, utm_options()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn missing_raster_fails_at_construction() {
    let tiers = TierSet::new(vec![tier("absent", 10.0, None)]).unwrap();
    let err = Delineator::new(pyramid(), tiers, utm_options()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn mismatched_grids_within_a_tier_are_rejected() {
    let source = pyramid();
    // Pair the fine direction raster with the coarse accumulation raster.
    let mismatched = Tier {
        accumulation: Some("coarse_acc.tif".into()),
        ..tier("fine", 10.0, None)
    };
    let tiers = TierSet::new(vec![mismatched]).unwrap();

    let err = Delineator::new(source, tiers, utm_options()).unwrap_err();
    assert!(matches!(err, Error::RasterMismatch(_)));
}
