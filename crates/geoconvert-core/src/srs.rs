//! Spatial reference identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A coordinate reference system as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialRef {
    /// `EPSG:<code>`
    Epsg(u32),
    /// Any other definition (WKT, PROJ string, OGC URN), passed to the engine verbatim.
    Definition(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum SpatialRefError {
    #[error("spatial reference is empty")]
    Empty,
    #[error("invalid EPSG code: {0}")]
    InvalidEpsg(String),
}

impl SpatialRef {
    /// WGS 84 geographic coordinates.
    pub const WGS84: SpatialRef = SpatialRef::Epsg(4326);

    pub fn parse(input: &str) -> Result<Self, SpatialRefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SpatialRefError::Empty);
        }
        if let Some((scheme, code)) = trimmed.split_once(':') {
            if scheme.eq_ignore_ascii_case("epsg") {
                return match code.trim().parse::<u32>() {
                    Ok(0) | Err(_) => Err(SpatialRefError::InvalidEpsg(code.to_string())),
                    Ok(n) => Ok(SpatialRef::Epsg(n)),
                };
            }
        }
        Ok(SpatialRef::Definition(trimmed.to_string()))
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            SpatialRef::Epsg(code) => Some(*code),
            SpatialRef::Definition(_) => None,
        }
    }

    /// The argument form GDAL utilities accept for `-s_srs` / `-t_srs`.
    pub fn to_gdal_arg(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialRef::Epsg(code) => write!(f, "EPSG:{code}"),
            SpatialRef::Definition(def) => f.write_str(def),
        }
    }
}

impl FromStr for SpatialRef {
    type Err = SpatialRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpatialRef::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epsg_codes() {
        assert_eq!(SpatialRef::parse("EPSG:4326"), Ok(SpatialRef::Epsg(4326)));
        assert_eq!(SpatialRef::parse("epsg:3857"), Ok(SpatialRef::Epsg(3857)));
        assert_eq!(SpatialRef::parse(" EPSG: 32748 "), Ok(SpatialRef::Epsg(32748)));
    }

    #[test]
    fn rejects_malformed_epsg() {
        assert!(matches!(SpatialRef::parse("EPSG:abc"), Err(SpatialRefError::InvalidEpsg(_))));
        assert!(matches!(SpatialRef::parse("EPSG:0"), Err(SpatialRefError::InvalidEpsg(_))));
        assert_eq!(SpatialRef::parse("   "), Err(SpatialRefError::Empty));
    }

    #[test]
    fn other_definitions_pass_through() {
        let proj = "+proj=utm +zone=48 +south +datum=WGS84";
        assert_eq!(
            SpatialRef::parse(proj),
            Ok(SpatialRef::Definition(proj.to_string()))
        );
        let urn = "urn:ogc:def:crs:OGC:1.3:CRS84";
        assert_eq!(SpatialRef::parse(urn).unwrap().to_gdal_arg(), urn);
    }

    #[test]
    fn display_roundtrips_epsg() {
        assert_eq!(SpatialRef::WGS84.to_string(), "EPSG:4326");
        assert_eq!("EPSG:4326".parse::<SpatialRef>().unwrap().epsg(), Some(4326));
    }
}
