//! Driver catalog: which formats the engine can read and write.
//!
//! Built once at startup (from `gdalinfo --formats` / `ogrinfo --formats`
//! or the built-in list) and shared read-only afterwards.

use std::collections::BTreeMap;

use geoconvert_core::format::split_kind_prefix;
use geoconvert_core::{DataKind, FormatTag};
use serde::Serialize;

/// One format driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    pub name: String,
    pub raster: bool,
    pub vector: bool,
    pub readable: bool,
    pub writable: bool,
    pub description: String,
}

impl DriverInfo {
    pub fn supports(&self, kind: DataKind) -> bool {
        match kind {
            DataKind::Raster => self.raster,
            DataKind::Vector => self.vector,
        }
    }

    fn merge(&mut self, other: DriverInfo) {
        self.raster |= other.raster;
        self.vector |= other.vector;
        self.readable |= other.readable;
        self.writable |= other.writable;
        if self.description.is_empty() {
            self.description = other.description;
        }
    }

    /// Parse one line of `--formats` output, e.g.
    /// `  GPKG -raster,vector- (rw+vs): GeoPackage`.
    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let kinds_start = line.find(" -")?;
        let name = line[..kinds_start].trim();
        let rest = &line[kinds_start + 2..];
        let kinds_end = rest.find("- (")?;
        let kinds = &rest[..kinds_end];
        let rest = &rest[kinds_end + 3..];
        let flags_end = rest.find(')')?;
        let flags = &rest[..flags_end];
        let description = rest[flags_end + 1..]
            .trim_start_matches(':')
            .trim()
            .to_string();

        if name.is_empty() {
            return None;
        }

        let kinds: Vec<&str> = kinds.split(',').map(str::trim).collect();
        Some(DriverInfo {
            name: name.to_string(),
            raster: kinds.contains(&"raster"),
            vector: kinds.contains(&"vector"),
            readable: flags.contains('r'),
            writable: flags.contains('w'),
            description,
        })
    }
}

/// Immutable set of drivers, keyed case-insensitively by name.
#[derive(Debug, Clone, Default)]
pub struct DriverCatalog {
    drivers: BTreeMap<String, DriverInfo>,
}

impl DriverCatalog {
    /// Build a catalog, merging duplicate entries for the same driver.
    pub fn new(drivers: impl IntoIterator<Item = DriverInfo>) -> Self {
        let mut map: BTreeMap<String, DriverInfo> = BTreeMap::new();
        for d in drivers {
            let key = d.name.to_ascii_lowercase();
            match map.get_mut(&key) {
                Some(existing) => existing.merge(d),
                None => {
                    map.insert(key, d);
                }
            }
        }
        Self { drivers: map }
    }

    /// Parse the output of `gdalinfo --formats` or `ogrinfo --formats`.
    ///
    /// Header and unrecognised lines are skipped.
    pub fn parse_formats(output: &str) -> Vec<DriverInfo> {
        output.lines().filter_map(DriverInfo::parse_line).collect()
    }

    /// A conservative driver list present in any standard GDAL build.
    pub fn builtin() -> Self {
        let d = |name: &str, raster: bool, vector: bool, writable: bool, description: &str| DriverInfo {
            name: name.to_string(),
            raster,
            vector,
            readable: true,
            writable,
            description: description.to_string(),
        };
        // COG is write-only; COG files are read back through GTiff.
        let cog = DriverInfo {
            readable: false,
            ..d("COG", true, false, true, "Cloud optimized GeoTIFF generator")
        };
        Self::new([
            d("GTiff", true, false, true, "GeoTIFF"),
            cog,
            d("PNG", true, false, true, "Portable Network Graphics"),
            d("JPEG", true, false, true, "JPEG JFIF"),
            d("AAIGrid", true, false, true, "Arc/Info ASCII Grid"),
            d("VRT", true, false, true, "Virtual Raster"),
            d("GeoJSON", false, true, true, "GeoJSON"),
            d("ESRI Shapefile", false, true, true, "ESRI Shapefile"),
            d("GPKG", true, true, true, "GeoPackage"),
            d("FlatGeobuf", false, true, true, "FlatGeobuf"),
            d("KML", false, true, true, "Keyhole Markup Language (KML)"),
            d("GML", false, true, true, "Geography Markup Language (GML)"),
            d("CSV", false, true, true, "Comma Separated Value (.csv)"),
            d("GPX", false, true, true, "GPX"),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&DriverInfo> {
        self.drivers.get(&name.to_ascii_lowercase())
    }

    pub fn drivers(&self) -> impl Iterator<Item = &DriverInfo> {
        self.drivers.values()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn can_read(&self, format: &FormatTag) -> bool {
        self.get(&format.driver)
            .is_some_and(|d| d.readable && d.supports(format.kind))
    }

    pub fn can_write(&self, format: &FormatTag) -> bool {
        self.get(&format.driver)
            .is_some_and(|d| d.writable && d.supports(format.kind))
    }

    /// Resolve a user-supplied format string to a tag.
    ///
    /// Well-known aliases are tried first, then exact driver names from
    /// the catalog. Returns `None` when neither matches; capability checks
    /// are left to the caller.
    pub fn resolve(&self, input: &str) -> Option<FormatTag> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if let Some(tag) = FormatTag::from_alias(input) {
            return Some(tag);
        }
        let (forced_kind, name) = split_kind_prefix(input);
        let driver = self.get(name)?;
        let kind = match forced_kind {
            Some(kind) => kind,
            None if driver.vector => DataKind::Vector,
            None => DataKind::Raster,
        };
        Some(FormatTag::new(kind, driver.name.clone()))
    }
}
