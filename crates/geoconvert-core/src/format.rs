//! Format tags: a data kind plus a GDAL driver short name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a dataset is a raster grid or a vector feature collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Raster,
    Vector,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Raster => "raster",
            DataKind::Vector => "vector",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the format of an artifact by data kind and driver name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatTag {
    pub kind: DataKind,
    /// GDAL driver short name, e.g. `GTiff` or `ESRI Shapefile`.
    pub driver: String,
}

struct KnownFormat {
    driver: &'static str,
    kind: DataKind,
    aliases: &'static [&'static str],
    extension: &'static str,
    content_type: &'static str,
    multi_file: bool,
}

const KNOWN_FORMATS: &[KnownFormat] = &[
    KnownFormat {
        driver: "GTiff",
        kind: DataKind::Raster,
        aliases: &["gtiff", "geotiff", "tif", "tiff"],
        extension: "tif",
        content_type: "image/tiff",
        multi_file: false,
    },
    KnownFormat {
        driver: "COG",
        kind: DataKind::Raster,
        aliases: &["cog"],
        extension: "tif",
        content_type: "image/tiff; application=geotiff; profile=cloud-optimized",
        multi_file: false,
    },
    KnownFormat {
        driver: "PNG",
        kind: DataKind::Raster,
        aliases: &["png"],
        extension: "png",
        content_type: "image/png",
        multi_file: false,
    },
    KnownFormat {
        driver: "JPEG",
        kind: DataKind::Raster,
        aliases: &["jpeg", "jpg"],
        extension: "jpg",
        content_type: "image/jpeg",
        multi_file: false,
    },
    KnownFormat {
        driver: "AAIGrid",
        kind: DataKind::Raster,
        aliases: &["aaigrid", "asc"],
        extension: "asc",
        content_type: "text/plain",
        multi_file: false,
    },
    KnownFormat {
        driver: "netCDF",
        kind: DataKind::Raster,
        aliases: &["netcdf", "nc"],
        extension: "nc",
        content_type: "application/x-netcdf",
        multi_file: false,
    },
    KnownFormat {
        driver: "GeoJSON",
        kind: DataKind::Vector,
        aliases: &["geojson", "json"],
        extension: "geojson",
        content_type: "application/geo+json",
        multi_file: false,
    },
    KnownFormat {
        driver: "ESRI Shapefile",
        kind: DataKind::Vector,
        aliases: &["esri shapefile", "shapefile", "shp"],
        extension: "shp",
        content_type: "application/zip",
        multi_file: true,
    },
    KnownFormat {
        driver: "GPKG",
        kind: DataKind::Vector,
        aliases: &["gpkg", "geopackage"],
        extension: "gpkg",
        content_type: "application/geopackage+sqlite3",
        multi_file: false,
    },
    KnownFormat {
        driver: "FlatGeobuf",
        kind: DataKind::Vector,
        aliases: &["flatgeobuf", "fgb"],
        extension: "fgb",
        content_type: "application/flatgeobuf",
        multi_file: false,
    },
    KnownFormat {
        driver: "KML",
        kind: DataKind::Vector,
        aliases: &["kml"],
        extension: "kml",
        content_type: "application/vnd.google-earth.kml+xml",
        multi_file: false,
    },
    KnownFormat {
        driver: "GML",
        kind: DataKind::Vector,
        aliases: &["gml"],
        extension: "gml",
        content_type: "application/gml+xml",
        multi_file: false,
    },
    KnownFormat {
        driver: "CSV",
        kind: DataKind::Vector,
        aliases: &["csv"],
        extension: "csv",
        content_type: "text/csv",
        multi_file: false,
    },
    KnownFormat {
        driver: "GPX",
        kind: DataKind::Vector,
        aliases: &["gpx"],
        extension: "gpx",
        content_type: "application/gpx+xml",
        multi_file: false,
    },
];

impl FormatTag {
    pub fn new(kind: DataKind, driver: impl Into<String>) -> Self {
        FormatTag {
            kind,
            driver: driver.into(),
        }
    }

    pub fn raster(driver: impl Into<String>) -> Self {
        Self::new(DataKind::Raster, driver)
    }

    pub fn vector(driver: impl Into<String>) -> Self {
        Self::new(DataKind::Vector, driver)
    }

    /// Look up a well-known format by driver name or alias (case-insensitive).
    ///
    /// An optional `raster:` / `vector:` prefix forces the data kind, which
    /// matters for drivers such as `GPKG` that hold both.
    pub fn from_alias(input: &str) -> Option<Self> {
        let (forced_kind, name) = split_kind_prefix(input.trim());
        let needle = name.to_ascii_lowercase();
        let known = KNOWN_FORMATS
            .iter()
            .find(|f| f.driver.eq_ignore_ascii_case(&needle) || f.aliases.contains(&needle.as_str()))?;
        Some(FormatTag::new(forced_kind.unwrap_or(known.kind), known.driver))
    }

    /// Infer a format from a file name's extension.
    ///
    /// A `.zip` archive is taken to be a zipped shapefile bundle, as is a
    /// `.shp.zip` file.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let stem = lower.strip_suffix(".zip");
        if let Some(stem) = stem {
            if stem.ends_with(".shp") || !stem.contains('.') {
                return Some(FormatTag::vector("ESRI Shapefile"));
            }
            return Self::from_file_name(stem);
        }
        let (_, ext) = lower.rsplit_once('.')?;
        KNOWN_FORMATS
            .iter()
            .find(|f| f.extension == ext || f.aliases.contains(&ext))
            .map(|f| FormatTag::new(f.kind, f.driver))
    }

    fn known(&self) -> Option<&'static KnownFormat> {
        KNOWN_FORMATS
            .iter()
            .find(|f| f.driver.eq_ignore_ascii_case(&self.driver))
    }

    /// File extension used for outputs in this format (without the dot).
    pub fn extension(&self) -> &'static str {
        self.known().map(|f| f.extension).unwrap_or("bin")
    }

    /// MIME type for responses carrying this format.
    pub fn content_type(&self) -> &'static str {
        self.known()
            .map(|f| f.content_type)
            .unwrap_or("application/octet-stream")
    }

    /// True when the driver writes several sibling files for one dataset.
    ///
    /// Such outputs are delivered as a ZIP bundle.
    pub fn is_multi_file(&self) -> bool {
        self.known().map(|f| f.multi_file).unwrap_or(false)
    }

    pub fn is_raster(&self) -> bool {
        self.kind == DataKind::Raster
    }

    pub fn is_vector(&self) -> bool {
        self.kind == DataKind::Vector
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.driver)
    }
}

/// Split an optional `raster:` / `vector:` prefix from a format string.
pub fn split_kind_prefix(input: &str) -> (Option<DataKind>, &str) {
    if let Some((prefix, rest)) = input.split_once(':') {
        if prefix.eq_ignore_ascii_case("raster") {
            return (Some(DataKind::Raster), rest.trim());
        }
        if prefix.eq_ignore_ascii_case("vector") {
            return (Some(DataKind::Vector), rest.trim());
        }
    }
    (None, input)
}
