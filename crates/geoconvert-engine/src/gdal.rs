//! GDAL command-line engine.
//!
//! Drives the standard GDAL utilities as child processes:
//!
//! | Job | Tool |
//! |---|---|
//! | vector → vector | `ogr2ogr` |
//! | raster → raster | `gdal_translate` |
//! | raster → raster, reprojected | `gdalwarp` (+ `gdal_translate` for drivers without direct create support) |
//! | describe raster / vector | `gdalinfo -json` / `ogrinfo -json` |
//! | driver discovery | `gdalinfo --formats`, `ogrinfo --formats` |
//!
//! Tools are looked up in the configured bin directory, falling back to
//! `$PATH`. Failures are classified from the tool's stderr into an
//! [`EngineFault`]; the raw stderr travels along as the error detail.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use geoconvert_core::{
    BandInfo, ConvertError, DataKind, DatasetInfo, EngineFault, LayerInfo,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::catalog::DriverCatalog;
use crate::engine::{ConversionEngine, ConversionJob, EngineResult, StagedInput};

/// Longest stderr excerpt kept as an error detail.
const MAX_DETAIL_BYTES: usize = 4096;

const SHAPEFILE_DRIVER: &str = "ESRI Shapefile";

/// One planned tool run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub tool: &'static str,
    pub args: Vec<OsString>,
}

impl Invocation {
    fn new(tool: &'static str) -> Self {
        Self {
            tool,
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn pair(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    fn pair_opt(self, flag: &str, value: Option<impl Into<OsString>>) -> Self {
        match value {
            Some(v) => self.pair(flag, v),
            None => self,
        }
    }

    /// Arguments as lossy strings, for logs and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Engine backed by GDAL's command-line utilities.
#[derive(Debug, Clone, Default)]
pub struct GdalCliEngine {
    bin_dir: Option<PathBuf>,
}

impl GdalCliEngine {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn tool_path(&self, tool: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    fn run(&self, invocation: &Invocation) -> EngineResult<Output> {
        let mut cmd = Command::new(self.tool_path(invocation.tool));
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running: {:?}", cmd);

        let output = cmd.output().map_err(|e| spawn_failure(invocation.tool, &e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = tool_failure(invocation.tool, output.status.code(), &stderr);
            warn!(tool = invocation.tool, code = ?output.status.code(), error = %err, "engine tool failed");
            return Err(err);
        }
        Ok(output)
    }

    /// Version banner reported by `gdalinfo --version`.
    pub fn version(&self) -> EngineResult<String> {
        let output = self.run(&Invocation::new("gdalinfo").arg("--version"))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Discover every installed driver.
    ///
    /// Runs once at startup; the result is shared read-only afterwards.
    pub fn discover_catalog(&self) -> EngineResult<DriverCatalog> {
        let mut drivers = Vec::new();
        for tool in ["gdalinfo", "ogrinfo"] {
            let output = self.run(&Invocation::new(tool).arg("--formats"))?;
            drivers.extend(DriverCatalog::parse_formats(&String::from_utf8_lossy(
                &output.stdout,
            )));
        }
        if drivers.is_empty() {
            return Err(ConvertError::engine(
                EngineFault::Unavailable,
                "engine reported no drivers",
                None,
            ));
        }
        Ok(DriverCatalog::new(drivers))
    }

    /// Plan the tool runs for a job, in order.
    pub fn plan(job: &ConversionJob) -> Vec<Invocation> {
        match job.target.kind {
            DataKind::Vector => vec![plan_vector(job)],
            DataKind::Raster if job.reprojects() => plan_warp(job),
            DataKind::Raster => vec![plan_translate(job, dataset_name(&job.input), job.output.clone().into_os_string(), true)],
        }
    }
}

impl ConversionEngine for GdalCliEngine {
    fn name(&self) -> &str {
        "gdal-cli"
    }

    fn drivers(&self) -> EngineResult<DriverCatalog> {
        self.discover_catalog()
    }

    fn convert(&self, job: &ConversionJob) -> EngineResult<()> {
        for invocation in Self::plan(job) {
            self.run(&invocation)?;
        }
        Ok(())
    }

    fn inspect(&self, input: &StagedInput, kind: DataKind) -> EngineResult<DatasetInfo> {
        let invocation = match kind {
            DataKind::Raster => Invocation::new("gdalinfo").arg("-json").arg(dataset_name(input)),
            DataKind::Vector => Invocation::new("ogrinfo")
                .arg("-json")
                .arg("-ro")
                .arg("-so")
                .arg("-al")
                .arg(dataset_name(input)),
        };
        let output = self.run(&invocation)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        match kind {
            DataKind::Raster => parse_gdalinfo_json(&stdout),
            DataKind::Vector => parse_ogrinfo_json(&stdout),
        }
    }
}

/// Dataset name handed to GDAL; archives go through `/vsizip/`.
fn dataset_name(input: &StagedInput) -> OsString {
    if input.archive {
        let mut name = OsString::from("/vsizip/");
        name.push(input.path.as_os_str());
        name
    } else {
        input.path.clone().into_os_string()
    }
}

fn plan_vector(job: &ConversionJob) -> Invocation {
    let mut inv = Invocation::new("ogr2ogr")
        .pair("-f", job.target.driver.as_str())
        .arg(job.output.as_os_str())
        .arg(dataset_name(&job.input));

    inv = match (&job.source_srs, &job.target_srs) {
        (Some(s), Some(t)) => inv.pair("-s_srs", s.to_gdal_arg()).pair("-t_srs", t.to_gdal_arg()),
        (Some(s), None) => inv.pair("-a_srs", s.to_gdal_arg()),
        (None, Some(t)) => inv.pair("-t_srs", t.to_gdal_arg()),
        (None, None) => inv,
    };
    inv = inv.pair_opt("-nln", job.layer_name.as_deref());

    let sets_encoding = job
        .creation_options
        .iter()
        .any(|o| o.key.eq_ignore_ascii_case("ENCODING"));
    if job.target.driver.eq_ignore_ascii_case(SHAPEFILE_DRIVER) && !sets_encoding {
        inv = inv.pair("-lco", "ENCODING=UTF-8");
    }
    for option in &job.creation_options {
        inv = inv.pair("-lco", option.to_string());
    }
    inv
}

fn plan_translate(job: &ConversionJob, src: OsString, dst: OsString, assign_srs: bool) -> Invocation {
    let mut inv = Invocation::new("gdal_translate").pair("-of", job.target.driver.as_str());
    if assign_srs {
        inv = inv.pair_opt("-a_srs", job.source_srs.as_ref().map(|s| s.to_gdal_arg()));
    }
    for option in &job.creation_options {
        inv = inv.pair("-co", option.to_string());
    }
    inv.arg(src).arg(dst)
}

/// `gdalwarp` only writes drivers with direct create support, so anything
/// other than GeoTIFF is warped to an intermediate GeoTIFF first.
fn plan_warp(job: &ConversionJob) -> Vec<Invocation> {
    let direct = job.target.driver.eq_ignore_ascii_case("GTiff");
    let warped: PathBuf = if direct {
        job.output.clone()
    } else {
        intermediate_path(&job.output)
    };

    let resampling = job.resampling.unwrap_or(geoconvert_core::Resampling::Nearest);
    let mut warp = Invocation::new("gdalwarp")
        .pair("-of", "GTiff")
        .pair_opt("-s_srs", job.source_srs.as_ref().map(|s| s.to_gdal_arg()))
        .pair_opt("-t_srs", job.target_srs.as_ref().map(|s| s.to_gdal_arg()))
        .pair("-r", resampling.as_gdal());
    if direct {
        for option in &job.creation_options {
            warp = warp.pair("-co", option.to_string());
        }
    }
    let warp = warp
        .arg(dataset_name(&job.input))
        .arg(warped.as_os_str());

    if direct {
        vec![warp]
    } else {
        let translate = plan_translate(job, warped.into_os_string(), job.output.clone().into_os_string(), false);
        vec![warp, translate]
    }
}

/// Output names always start with the input stem, never a dot, so this
/// name cannot collide with the final output.
const WARP_INTERMEDIATE: &str = ".warp-intermediate.tif";

fn intermediate_path(output: &Path) -> PathBuf {
    output.with_file_name(WARP_INTERMEDIATE)
}

fn spawn_failure(tool: &str, err: &io::Error) -> ConvertError {
    let message = if err.kind() == io::ErrorKind::NotFound {
        format!("{tool} not found; is GDAL installed and on PATH?")
    } else {
        format!("failed to start {tool}: {err}")
    };
    ConvertError::engine(EngineFault::Unavailable, message, None)
}

/// Translate a non-zero tool exit into the error taxonomy.
fn tool_failure(tool: &str, code: Option<i32>, stderr: &str) -> ConvertError {
    let detail = truncate_detail(stderr.trim());
    if stderr.to_ascii_lowercase().contains("no space left on device") {
        return ConvertError::resource_exhausted(format!("{tool} ran out of staging storage"));
    }
    let fault = classify_failure(stderr);
    let message = format!("{tool} failed (exit code: {})", code.unwrap_or(-1));
    ConvertError::engine(fault, message, (!detail.is_empty()).then_some(detail))
}

/// Map GDAL error text onto an engine fault.
pub fn classify_failure(stderr: &str) -> EngineFault {
    let text = stderr.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["unable to find driver", "driver not found", "does not support creation", "no such driver"]) {
        EngineFault::UnsupportedDriver
    } else if has(&[
        "failed to process srs definition",
        "proj_create",
        "proj:",
        "osrsetfromuserinput",
        "unable to compute a transformation",
        "cannot compute bounding box",
        "no coordinate system",
        "coordinate transformation",
    ]) {
        EngineFault::UnresolvableSpatialRef
    } else if has(&[
        "not recognized as a supported file format",
        "not recognised as a supported file format",
        "unable to open datasource",
        "failed to open",
        "cannot open",
        "corrupt",
        "tiffreaddirectory",
        "unexpected end",
    ]) {
        EngineFault::CorruptInput
    } else if has(&["unable to create", "failed to create", "permission denied", "write error", "cannot write"]) {
        EngineFault::WriteFailed
    } else {
        EngineFault::Other
    }
}

fn truncate_detail(text: &str) -> String {
    if text.len() <= MAX_DETAIL_BYTES {
        return text.to_string();
    }
    let mut end = MAX_DETAIL_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

// ── JSON metadata ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoordinateSystemJson {
    #[serde(default)]
    wkt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GdalBandJson {
    band: u32,
    #[serde(rename = "type")]
    data_type: String,
    color_table: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GdalInfoJson {
    driver_short_name: Option<String>,
    #[serde(default)]
    size: Vec<u64>,
    #[serde(default)]
    bands: Vec<GdalBandJson>,
    coordinate_system: Option<CoordinateSystemJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OgrGeometryFieldJson {
    #[serde(rename = "type")]
    geometry_type: Option<String>,
    coordinate_system: Option<CoordinateSystemJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OgrLayerJson {
    name: String,
    feature_count: Option<u64>,
    #[serde(default)]
    geometry_fields: Vec<OgrGeometryFieldJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OgrInfoJson {
    driver_short_name: Option<String>,
    #[serde(default)]
    layers: Vec<OgrLayerJson>,
}

fn metadata_error(tool: &str, err: serde_json::Error) -> ConvertError {
    ConvertError::engine(
        EngineFault::Other,
        format!("could not parse {tool} output"),
        Some(err.to_string()),
    )
}

fn non_empty(wkt: String) -> Option<String> {
    (!wkt.trim().is_empty()).then_some(wkt)
}

/// Parse `gdalinfo -json` output.
pub fn parse_gdalinfo_json(json: &str) -> EngineResult<DatasetInfo> {
    let info: GdalInfoJson = serde_json::from_str(json).map_err(|e| metadata_error("gdalinfo", e))?;
    let size = match info.size.as_slice() {
        [w, h, ..] => Some((*w, *h)),
        _ => None,
    };
    Ok(DatasetInfo {
        driver: info.driver_short_name.unwrap_or_default(),
        kind: DataKind::Raster,
        size,
        bands: info
            .bands
            .into_iter()
            .map(|b| BandInfo {
                index: b.band,
                data_type: b.data_type,
                has_color_table: b.color_table.is_some_and(|v| !v.is_null()),
            })
            .collect(),
        layers: Vec::new(),
        srs_wkt: info.coordinate_system.and_then(|cs| non_empty(cs.wkt)),
    })
}

/// Parse `ogrinfo -json` output.
pub fn parse_ogrinfo_json(json: &str) -> EngineResult<DatasetInfo> {
    let info: OgrInfoJson = serde_json::from_str(json).map_err(|e| metadata_error("ogrinfo", e))?;
    let srs_wkt = info
        .layers
        .iter()
        .flat_map(|l| l.geometry_fields.iter())
        .filter_map(|g| g.coordinate_system.as_ref())
        .map(|cs| cs.wkt.clone())
        .find(|w| !w.trim().is_empty());
    Ok(DatasetInfo {
        driver: info.driver_short_name.unwrap_or_default(),
        kind: DataKind::Vector,
        size: None,
        bands: Vec::new(),
        layers: info
            .layers
            .into_iter()
            .map(|l| LayerInfo {
                geometry_type: l.geometry_fields.into_iter().find_map(|g| g.geometry_type),
                name: l.name,
                feature_count: l.feature_count,
            })
            .collect(),
        srs_wkt,
    })
}
