//! Mask polygonization.
//!
//! Traces the boundary of a watershed mask in grid space, stitches the
//! directed boundary edges into rings (one exterior per connected region,
//! plus interior rings around excluded holes), converts ring vertices to the
//! raster's CRS through the affine transform, and reprojects them to the
//! output CRS. The result is always a MultiPolygon, even for a simply
//! connected mask.

use crate::traverse::WatershedMask;
use geo::{MultiPolygon, Polygon, Simplify};
use geo_types::{Coord, LineString};
use hydroshed_core::crs::PointTransform;
use hydroshed_core::{Crs, Error, RasterHandle, Result};
use std::collections::HashMap;

/// Grid corner in (col, row) order.
type Corner = (i64, i64);

/// Convert a watershed mask to a MultiPolygon in `output_crs`.
///
/// `simplify_tolerance` > 0 applies Douglas-Peucker simplification (in
/// output CRS units) after reprojection; 0 keeps every boundary vertex.
pub fn polygonize(
    mask: &WatershedMask,
    handle: &RasterHandle,
    output_crs: &Crs,
    simplify_tolerance: f64,
) -> Result<MultiPolygon<f64>> {
    if mask.is_empty() {
        return Err(Error::EmptyMask);
    }

    let rings = trace_rings(mask);

    let transform = if output_crs.is_equivalent(&handle.crs) {
        None
    } else {
        Some(PointTransform::new(&handle.crs, output_crs)?)
    };

    // Shoelace-positive rings in (col, row) space are exteriors. The affine
    // map flips the vertical axis, so rings are emitted reversed to keep
    // exteriors counterclockwise in map coordinates.
    let mut exteriors: Vec<(Ring, LineString<f64>)> = Vec::new();
    let mut holes: Vec<(Ring, LineString<f64>)> = Vec::new();

    for ring in rings {
        let line = project_ring(&ring, handle, transform.as_ref())?;
        if ring.signed_area > 0 {
            exteriors.push((ring, line));
        } else {
            holes.push((ring, line));
        }
    }

    let mut polygons: Vec<Polygon<f64>> = Vec::with_capacity(exteriors.len());
    let mut hole_sets: Vec<Vec<LineString<f64>>> = vec![Vec::new(); exteriors.len()];

    for (hole, line) in holes {
        // A traversal mask is connected, so most results have exactly one
        // exterior; bbox containment settles the general case.
        let owner = exteriors
            .iter()
            .position(|(ext, _)| ext.contains_bbox(&hole))
            .unwrap_or(0);
        hole_sets[owner].push(line);
    }

    for ((_, exterior), interior) in exteriors.into_iter().zip(hole_sets) {
        polygons.push(Polygon::new(exterior, interior));
    }

    let multi = MultiPolygon::new(polygons);

    Ok(if simplify_tolerance > 0.0 {
        multi.simplify(&simplify_tolerance)
    } else {
        multi
    })
}

struct Ring {
    corners: Vec<Corner>,
    signed_area: i64,
    min: Corner,
    max: Corner,
}

impl Ring {
    fn new(corners: Vec<Corner>) -> Self {
        // Twice the shoelace area; the sign is all that matters.
        let mut area2 = 0i64;
        let mut min = (i64::MAX, i64::MAX);
        let mut max = (i64::MIN, i64::MIN);
        for i in 0..corners.len() {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % corners.len()];
            area2 += x0 * y1 - x1 * y0;
            min = (min.0.min(x0), min.1.min(y0));
            max = (max.0.max(x0), max.1.max(y0));
        }
        Self {
            corners,
            signed_area: area2,
            min,
            max,
        }
    }

    fn contains_bbox(&self, other: &Ring) -> bool {
        self.min.0 <= other.min.0
            && self.min.1 <= other.min.1
            && self.max.0 >= other.max.0
            && self.max.1 >= other.max.1
    }
}

/// Collect the mask's directed boundary edges and stitch them into closed
/// rings.
///
/// Each mask cell contributes one directed edge per side not shared with
/// another mask cell, wound clockwise around the cell in (col, row) space.
/// At corners where two diagonal cells touch, the most clockwise
/// continuation is taken, which keeps 8-connected diagonals in one ring.
fn trace_rings(mask: &WatershedMask) -> Vec<Ring> {
    // start corner -> outgoing ends (at most two per corner)
    let mut edges: HashMap<Corner, Vec<Corner>> = HashMap::new();
    let mut push = |from: Corner, to: Corner| edges.entry(from).or_default().push(to);

    for (row, col) in mask.iter() {
        let (r, c) = (row as i64, col as i64);
        if !mask_has(mask, row as isize - 1, col as isize) {
            push((c, r), (c + 1, r)); // top
        }
        if !mask_has(mask, row as isize, col as isize + 1) {
            push((c + 1, r), (c + 1, r + 1)); // right
        }
        if !mask_has(mask, row as isize + 1, col as isize) {
            push((c + 1, r + 1), (c, r + 1)); // bottom
        }
        if !mask_has(mask, row as isize, col as isize - 1) {
            push((c, r + 1), (c, r)); // left
        }
    }

    let mut rings = Vec::new();

    // Rings start at their smallest corner so output is deterministic.
    loop {
        let Some(start) = edges
            .iter()
            .filter(|(_, ends)| !ends.is_empty())
            .map(|(&corner, _)| corner)
            .min()
        else {
            break;
        };
        let mut ring = vec![start];
        let mut current = take_edge(&mut edges, start, None);
        let mut heading = direction(start, current);

        while current != start {
            ring.push(current);
            let next = take_edge(&mut edges, current, Some(heading));
            heading = direction(current, next);
            current = next;
        }

        edges.retain(|_, ends| !ends.is_empty());
        rings.push(Ring::new(ring));
    }

    rings
}

fn mask_has(mask: &WatershedMask, row: isize, col: isize) -> bool {
    row >= 0 && col >= 0 && mask.contains(row as usize, col as usize)
}

fn direction(from: Corner, to: Corner) -> (i64, i64) {
    (to.0 - from.0, to.1 - from.1)
}

/// Remove and return the next edge out of `from`.
///
/// With two candidates (a saddle corner between diagonal cells) the one
/// turning clockwise relative to `heading` is taken.
fn take_edge(
    edges: &mut HashMap<Corner, Vec<Corner>>,
    from: Corner,
    heading: Option<(i64, i64)>,
) -> Corner {
    let ends = edges.get_mut(&from).expect("boundary edges must close");

    let idx = if ends.len() == 1 {
        0
    } else {
        let (hx, hy) = heading.unwrap_or((0, 0));
        let cross = |to: &Corner| {
            let (dx, dy) = (to.0 - from.0, to.1 - from.1);
            hx * dy - hy * dx
        };
        // min cross = clockwise turn in (col, row) space with row downward
        if cross(&ends[0]) <= cross(&ends[1]) {
            0
        } else {
            1
        }
    };

    ends.swap_remove(idx)
}

fn project_ring(
    ring: &Ring,
    handle: &RasterHandle,
    transform: Option<&PointTransform>,
) -> Result<LineString<f64>> {
    let mut coords = Vec::with_capacity(ring.corners.len() + 1);

    // Reversed so exteriors come out counterclockwise in map coordinates.
    for &(col, row) in ring.corners.iter().rev() {
        let (x, y) = handle.transform.cell_corner(row as usize, col as usize);
        let (x, y) = match transform {
            Some(t) => t.apply(x, y)?,
            None => (x, y),
        };
        coords.push(Coord { x, y });
    }
    let first = coords[0];
    coords.push(first);

    Ok(LineString::from(coords))
}
