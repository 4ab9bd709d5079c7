//! Coordinate Reference System handling
//!
//! A [`Crs`] is parsed from an EPSG code, a PROJ string, or a WKT blob
//! carrying an EPSG authority. Point transformation between two systems is
//! done in pure Rust via `proj4rs`, with PROJ definitions for EPSG codes
//! resolved through the `crs-definitions` database.

use crate::error::{Error, Result};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    /// EPSG code if known
    epsg: Option<u32>,
    /// PROJ string if supplied directly
    proj: Option<String>,
}

impl Crs {
    /// Create a CRS from an EPSG code.
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            proj: None,
        }
    }

    /// WGS84 geographic CRS (EPSG:4326), the default output system.
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Parse a CRS descriptor: `"EPSG:32613"`, a bare code `"4326"`,
    /// a PROJ string (`"+proj=utm +zone=13 ..."`), or WKT containing an
    /// EPSG authority entry.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let desc = descriptor.trim();

        if desc.is_empty() {
            return Err(Error::InvalidCrs("empty descriptor".to_string()));
        }

        if let Some(code) = desc
            .strip_prefix("EPSG:")
            .or_else(|| desc.strip_prefix("epsg:"))
        {
            let code = code
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::InvalidCrs(desc.to_string()))?;
            return Ok(Self::from_epsg(code));
        }

        if desc.chars().all(|c| c.is_ascii_digit()) {
            let code = desc
                .parse::<u32>()
                .map_err(|_| Error::InvalidCrs(desc.to_string()))?;
            return Ok(Self::from_epsg(code));
        }

        if desc.starts_with('+') {
            // Validate eagerly so a garbage PROJ string fails at parse time,
            // not when the first point is transformed.
            Proj::from_proj_string(desc).map_err(|e| {
                Error::InvalidCrs(format!("unparseable PROJ string: {e:?}"))
            })?;
            return Ok(Self {
                epsg: None,
                proj: Some(desc.to_string()),
            });
        }

        if desc.contains('[') {
            if let Some(code) = epsg_from_wkt(desc) {
                return Ok(Self::from_epsg(code));
            }
            return Err(Error::InvalidCrs(
                "WKT without a recognizable EPSG authority".to_string(),
            ));
        }

        Err(Error::InvalidCrs(desc.to_string()))
    }

    /// EPSG code, if this CRS was given as one.
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Whether two CRS describe the same system (best-effort).
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.proj, &other.proj) {
            return a == b;
        }
        false
    }

    /// Resolve the PROJ definition string for this CRS.
    ///
    /// An EPSG code absent from the `crs-definitions` database has no usable
    /// projection, which surfaces as [`Error::TransformUndefined`] when a
    /// transform is requested.
    pub fn proj_def(&self) -> Result<String> {
        if let Some(proj) = &self.proj {
            return Ok(proj.clone());
        }
        let code = self
            .epsg
            .ok_or_else(|| Error::InvalidCrs("descriptor carries no definition".to_string()))?;
        u16::try_from(code)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4.to_string())
            .ok_or_else(|| Error::TransformUndefined {
                from: self.identifier(),
                to: String::new(),
                reason: format!("EPSG:{code} is not in the crs-definitions database"),
            })
    }

    /// Whether this is a geographic (lon/lat) system.
    pub fn is_geographic(&self) -> bool {
        self.proj_def()
            .map(|def| def.contains("+proj=longlat"))
            .unwrap_or(self.epsg == Some(4326))
    }

    /// Short identifier for log and error messages.
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{code}");
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        "unknown".to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Extract the outermost EPSG authority code from a WKT string.
///
/// Looks for the last `AUTHORITY["EPSG","<code>"]` (WKT1) or
/// `ID["EPSG",<code>]` (WKT2) entry, which by convention identifies the
/// whole CRS rather than one of its components.
fn epsg_from_wkt(wkt: &str) -> Option<u32> {
    let upper = wkt.to_ascii_uppercase();
    for marker in ["AUTHORITY[\"EPSG\"", "ID[\"EPSG\""] {
        if let Some(pos) = upper.rfind(marker) {
            let rest = &upper[pos + marker.len()..];
            let digits: String = rest
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(code) = digits.parse() {
                return Some(code);
            }
        }
    }
    None
}

/// A prepared transformation between two reference systems.
///
/// Pure over its inputs and cheap to apply repeatedly, so polygon rings can
/// be reprojected vertex by vertex without re-resolving definitions.
pub struct PointTransform {
    source: Proj,
    target: Proj,
    source_geographic: bool,
    target_geographic: bool,
    source_id: String,
    target_id: String,
}

impl PointTransform {
    /// Build a transform from `source` to `target`.
    pub fn new(source: &Crs, target: &Crs) -> Result<Self> {
        let undefined = |reason: String| Error::TransformUndefined {
            from: source.identifier(),
            to: target.identifier(),
            reason,
        };

        let source_def = source.proj_def().map_err(|e| match e {
            Error::TransformUndefined { reason, .. } => undefined(reason),
            other => other,
        })?;
        let target_def = target.proj_def().map_err(|e| match e {
            Error::TransformUndefined { reason, .. } => undefined(reason),
            other => other,
        })?;

        let source_proj = Proj::from_proj_string(&source_def)
            .map_err(|e| undefined(format!("source projection rejected: {e:?}")))?;
        let target_proj = Proj::from_proj_string(&target_def)
            .map_err(|e| undefined(format!("target projection rejected: {e:?}")))?;

        Ok(Self {
            source: source_proj,
            target: target_proj,
            source_geographic: source_def.contains("+proj=longlat"),
            target_geographic: target_def.contains("+proj=longlat"),
            source_id: source.identifier(),
            target_id: target.identifier(),
        })
    }

    /// Reproject a single point.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        // proj4rs works in radians for geographic systems
        let (x_in, y_in) = if self.source_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        let mut point = (x_in, y_in, 0.0);
        transform(&self.source, &self.target, &mut point).map_err(|e| {
            Error::TransformUndefined {
                from: self.source_id.clone(),
                to: self.target_id.clone(),
                reason: format!("{e:?}"),
            }
        })?;

        if self.target_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

/// Reproject a single point between two reference systems.
///
/// Convenience wrapper over [`PointTransform`] for one-shot use.
pub fn transform_point(source: &Crs, target: &Crs, x: f64, y: f64) -> Result<(f64, f64)> {
    if source.is_equivalent(target) {
        return Ok((x, y));
    }
    PointTransform::new(source, target)?.apply(x, y)
}
