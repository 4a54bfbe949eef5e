pub mod convert;
pub mod formats;
pub mod inspect;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::ValueEnum;
use geoconvert_core::format::split_kind_prefix;
use geoconvert_core::{ConvertError, FormatTag};
use geoconvert_engine::{
    ConversionEngine, ConversionService, DriverCatalog, GdalCliEngine, ServiceOptions,
};
use geoconvert_staging::StagingArea;
use tracing::{debug, warn};

/// How `formats` and `inspect` print their results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// An engine and the driver catalog it reported.
pub struct Toolkit {
    pub engine: Arc<dyn ConversionEngine>,
    pub catalog: Arc<DriverCatalog>,
}

impl Toolkit {
    /// GDAL tools from `bin` (or PATH), discovered once.
    pub fn gdal(bin: Option<PathBuf>) -> Self {
        let engine = GdalCliEngine::new(bin);
        let catalog = match engine.drivers() {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "driver discovery failed; using built-in catalog");
                DriverCatalog::builtin()
            }
        };
        debug!(drivers = catalog.len(), "driver catalog ready");
        Self {
            engine: Arc::new(engine),
            catalog: Arc::new(catalog),
        }
    }

    /// A single-worker service staging under a private temporary directory.
    ///
    /// The directory lives as long as the returned guard.
    pub fn service(
        &self,
        options: ServiceOptions,
    ) -> anyhow::Result<(ConversionService, tempfile::TempDir)> {
        let root = tempfile::Builder::new()
            .prefix("geoconvert-")
            .tempdir()
            .context("cannot create staging directory")?;
        let staging = StagingArea::open(root.path().join("staging"), None)?;
        let options = ServiceOptions {
            max_concurrent: 1,
            ..options
        };
        let service =
            ConversionService::new(self.engine.clone(), self.catalog.clone(), staging, options);
        Ok((service, root))
    }
}

/// Resolve the source format from `--from` or the file extension.
///
/// Drivers holding both data kinds (GPKG) follow `target` unless the
/// user forced a kind with a `raster:`/`vector:` prefix.
pub fn resolve_source(
    catalog: &DriverCatalog,
    from: Option<&str>,
    path: &Path,
    target: Option<&FormatTag>,
) -> anyhow::Result<FormatTag> {
    let (mut format, forced) = match from {
        Some(raw) => {
            let format = catalog
                .resolve(raw)
                .ok_or_else(|| anyhow!("unknown source format '{raw}'"))?;
            (format, split_kind_prefix(raw).0.is_some())
        }
        None => {
            let name = file_name(path)?;
            let format = FormatTag::from_file_name(name)
                .ok_or_else(|| anyhow!("cannot infer the format of '{name}'; pass --from"))?;
            (format, false)
        }
    };

    if let Some(target) = target {
        let dual = catalog
            .get(&format.driver)
            .is_some_and(|d| d.supports(target.kind));
        if !forced && format.kind != target.kind && dual {
            format.kind = target.kind;
        }
    }
    Ok(format)
}

pub fn file_name(path: &Path) -> anyhow::Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("'{}' has no usable file name", path.display()))
}

/// Print the engine's raw diagnostics, then hand the error on.
pub fn report(err: ConvertError) -> anyhow::Error {
    if let Some(detail) = err.detail() {
        eprintln!("{detail}");
    }
    anyhow::Error::new(err)
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start async runtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoconvert_core::DataKind;

    #[test]
    fn source_inferred_from_extension() {
        let catalog = DriverCatalog::builtin();
        let format = resolve_source(&catalog, None, Path::new("/data/roads.geojson"), None).unwrap();
        assert_eq!(format, FormatTag::vector("GeoJSON"));
    }

    #[test]
    fn unknown_extension_needs_from() {
        let catalog = DriverCatalog::builtin();
        let err = resolve_source(&catalog, None, Path::new("notes.txt"), None).unwrap_err();
        assert!(err.to_string().contains("--from"));

        let format = resolve_source(&catalog, Some("geojson"), Path::new("notes.txt"), None).unwrap();
        assert_eq!(format.driver, "GeoJSON");
    }

    #[test]
    fn unknown_from_is_rejected() {
        let catalog = DriverCatalog::builtin();
        assert!(resolve_source(&catalog, Some("nope"), Path::new("a.tif"), None).is_err());
    }

    #[test]
    fn dual_kind_source_follows_target() {
        let catalog = DriverCatalog::builtin();
        let target = FormatTag::raster("GTiff");
        let format =
            resolve_source(&catalog, Some("GPKG"), Path::new("tiles.gpkg"), Some(&target)).unwrap();
        assert_eq!(format.kind, DataKind::Raster);

        let forced =
            resolve_source(&catalog, Some("vector:GPKG"), Path::new("tiles.gpkg"), Some(&target))
                .unwrap();
        assert_eq!(forced.kind, DataKind::Vector);
    }
}
