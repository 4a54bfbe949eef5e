use std::fmt::Write as _;
use std::path::PathBuf;

use clap::ValueEnum;
use geoconvert_core::DataKind;
use geoconvert_engine::{DriverCatalog, DriverInfo};

use super::{OutputFormat, Toolkit};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Raster,
    Vector,
}

impl From<KindArg> for DataKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Raster => DataKind::Raster,
            KindArg::Vector => DataKind::Vector,
        }
    }
}

pub fn formats(gdal_bin: Option<PathBuf>, kind: Option<KindArg>, format: OutputFormat) -> anyhow::Result<()> {
    let toolkit = Toolkit::gdal(gdal_bin);
    let drivers = select(&toolkit.catalog, kind.map(DataKind::from));

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&drivers)?);
        }
        OutputFormat::Text => {
            print!("{}", render(&drivers));
        }
    }

    Ok(())
}

pub fn select(catalog: &DriverCatalog, kind: Option<DataKind>) -> Vec<&DriverInfo> {
    catalog
        .drivers()
        .filter(|d| kind.is_none_or(|k| d.supports(k)))
        .collect()
}

/// One driver per line: name, data kinds, read/write access, description.
pub fn render(drivers: &[&DriverInfo]) -> String {
    let width = drivers
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0)
        .max("DRIVER".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<13}  {:<6}  DESCRIPTION", "DRIVER", "KINDS", "ACCESS");
    for d in drivers {
        let kinds = match (d.raster, d.vector) {
            (true, true) => "raster,vector",
            (true, false) => "raster",
            (false, true) => "vector",
            (false, false) => "-",
        };
        let access = format!(
            "{}{}",
            if d.readable { 'r' } else { '-' },
            if d.writable { 'w' } else { '-' }
        );
        let _ = writeln!(out, "{:<width$}  {kinds:<13}  {access:<6}  {}", d.name, d.description);
    }
    out
}
