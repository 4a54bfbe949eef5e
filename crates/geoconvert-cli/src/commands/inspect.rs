use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use geoconvert_core::{DatasetInfo, GeospatialArtifact};
use geoconvert_engine::ServiceOptions;

use super::{OutputFormat, Toolkit, file_name, report, resolve_source, runtime};

pub fn inspect(
    gdal_bin: Option<PathBuf>,
    input: &Path,
    from: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let toolkit = Toolkit::gdal(gdal_bin);
    let info = run(&toolkit, input, from)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Text => {
            print!("{}", render(&info));
        }
    }

    Ok(())
}

pub fn run(toolkit: &Toolkit, input: &Path, from: Option<&str>) -> anyhow::Result<DatasetInfo> {
    let format = resolve_source(&toolkit.catalog, from, input, None)?;
    let bytes =
        std::fs::read(input).with_context(|| format!("cannot read {}", input.display()))?;
    let artifact = GeospatialArtifact::new(bytes, format).with_file_name(file_name(input)?);

    let (service, _staging) = toolkit.service(ServiceOptions::default())?;
    runtime()?.block_on(service.inspect(artifact)).map_err(report)
}

pub fn render(info: &DatasetInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Driver: {} ({})", info.driver, info.kind);
    if let Some((width, height)) = info.size {
        let _ = writeln!(out, "Size: {width} x {height}");
    }
    if !info.bands.is_empty() {
        let _ = writeln!(out, "Bands:");
        for band in &info.bands {
            let palette = if band.has_color_table { ", color table" } else { "" };
            let _ = writeln!(out, "  {}: {}{palette}", band.index, band.data_type);
        }
    }
    if !info.layers.is_empty() {
        let _ = writeln!(out, "Layers:");
        for layer in &info.layers {
            let geometry = layer.geometry_type.as_deref().unwrap_or("unknown geometry");
            match layer.feature_count {
                Some(n) => {
                    let _ = writeln!(out, "  {}: {geometry}, {n} features", layer.name);
                }
                None => {
                    let _ = writeln!(out, "  {}: {geometry}", layer.name);
                }
            }
        }
    }
    // Multi-line WKT is summarised by its first line.
    let srs = info
        .srs_wkt
        .as_deref()
        .filter(|_| info.has_spatial_ref())
        .and_then(|wkt| wkt.lines().next())
        .unwrap_or("none");
    let _ = writeln!(out, "Spatial reference: {}", srs.trim());
    out
}
