//! Coordinate reference systems and projection into the working CRS.
//!
//! Distances are plain Euclidean metres, so every reference set and every
//! query location must be in a projected CRS before resolution. Inputs
//! usually arrive as WGS84 longitude/latitude and are transformed with a
//! PROJ-backed [`ProjTransform`].

pub mod transform;

use std::fmt;
use std::str::FromStr;

use geo::Point;

use crate::models::types::{ProximityError, Result};

pub use transform::ProjTransform;

/// EPSG-coded coordinate reference systems known to this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Crs {
    /// EPSG:4326, longitude/latitude in degrees
    Wgs84,
    /// EPSG:2157, Irish Transverse Mercator (metres)
    IrishTransverseMercator,
    /// EPSG:29902, TM65 Irish Grid (metres)
    IrishGrid,
    /// EPSG:326zz (north) / 327zz (south)
    Utm { zone: u8, north: bool },
    /// Any other EPSG code; transformed by PROJ but never used for distances
    Other(u32),
}

impl Crs {
    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 => Self::Wgs84,
            2157 => Self::IrishTransverseMercator,
            29902 => Self::IrishGrid,
            32601..=32660 => Self::Utm {
                zone: (code - 32600) as u8,
                north: true,
            },
            32701..=32760 => Self::Utm {
                zone: (code - 32700) as u8,
                north: false,
            },
            other => Self::Other(other),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::IrishTransverseMercator => 2157,
            Self::IrishGrid => 29902,
            Self::Utm { zone, north: true } => 32600 + *zone as u32,
            Self::Utm { zone, north: false } => 32700 + *zone as u32,
            Self::Other(code) => *code,
        }
    }

    /// True for the metre-based systems Euclidean distance is valid in.
    pub fn is_projected(&self) -> bool {
        matches!(self, Self::IrishTransverseMercator | Self::IrishGrid | Self::Utm { .. })
    }

    /// Fails unless `self` can serve as the working CRS for distances.
    pub fn ensure_projected(&self) -> Result<()> {
        if self.is_projected() {
            Ok(())
        } else {
            Err(ProximityError::Projection(format!(
                "{self} is not a projected CRS; distances would not be in metres"
            )))
        }
    }

    /// GeoJSON `crs` member naming this system (the OGC URN form).
    pub fn urn(&self) -> String {
        match self {
            Self::Wgs84 => "urn:ogc:def:crs:OGC:1.3:CRS84".to_string(),
            other => format!("urn:ogc:def:crs:EPSG::{}", other.epsg()),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = ProximityError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = trimmed
            .get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("epsg:"))
            .map(|_| &trimmed[5..])
            .unwrap_or(trimmed);

        code.parse::<u32>()
            .map(Self::from_epsg)
            .map_err(|_| ProximityError::Projection(format!("Unrecognised CRS: {s}")))
    }
}

/// Transforms points from one CRS into another.
pub trait Projector: Send + Sync {
    fn source(&self) -> Crs;
    fn target(&self) -> Crs;
    fn project(&self, point: Point) -> Result<Point>;
}

/// Pass-through for data already in the working CRS.
#[derive(Clone, Copy, Debug)]
pub struct Identity(pub Crs);

impl Projector for Identity {
    fn source(&self) -> Crs {
        self.0
    }

    fn target(&self) -> Crs {
        self.0
    }

    fn project(&self, point: Point) -> Result<Point> {
        Ok(point)
    }
}

/// Builds a projector from `source` to `target`: identity when they are
/// equal, otherwise whatever operation PROJ knows between the two codes.
pub fn projector(source: Crs, target: Crs) -> Result<Box<dyn Projector>> {
    if source == target {
        return Ok(Box::new(Identity(source)));
    }

    Ok(Box::new(ProjTransform::new(source, target)?))
}
