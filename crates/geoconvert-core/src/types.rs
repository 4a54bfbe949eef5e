//! Data model shared by the transport layer and the conversion engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConvertError;
use crate::format::{DataKind, FormatTag};
use crate::srs::SpatialRef;

/// Local-file header signature that opens every ZIP archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// An opaque geospatial payload plus the format it claims to be in.
#[derive(Debug, Clone)]
pub struct GeospatialArtifact {
    pub bytes: Bytes,
    pub format: FormatTag,
    pub srs: Option<SpatialRef>,
    pub file_name: Option<String>,
}

impl GeospatialArtifact {
    pub fn new(bytes: impl Into<Bytes>, format: FormatTag) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            srs: None,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_srs(mut self, srs: SpatialRef) -> Self {
        self.srs = Some(srs);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the payload is a ZIP bundle (e.g. a zipped shapefile).
    pub fn is_archive(&self) -> bool {
        self.bytes.starts_with(ZIP_MAGIC)
            || self
                .file_name
                .as_deref()
                .is_some_and(|n| n.to_ascii_lowercase().ends_with(".zip"))
    }

    /// Base name (without extension) used to name staged and output files.
    pub fn stem(&self) -> &str {
        let name = self.file_name.as_deref().unwrap_or("input");
        let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let stem = name.split('.').next().unwrap_or(name);
        if stem.is_empty() { "input" } else { stem }
    }
}

/// Resampling kernel used when a raster is reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Nearest,
    Bilinear,
    Cubic,
    Average,
    Mode,
}

impl Resampling {
    /// Name accepted by `gdalwarp -r`.
    pub fn as_gdal(&self) -> &'static str {
        match self {
            Resampling::Nearest => "near",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::Average => "average",
            Resampling::Mode => "mode",
        }
    }

    /// True for kernels that blend neighbouring values and so invent new ones.
    pub fn interpolates(&self) -> bool {
        matches!(self, Resampling::Bilinear | Resampling::Cubic | Resampling::Average)
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_gdal())
    }
}

impl FromStr for Resampling {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "near" | "nearest" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            "cubic" => Ok(Resampling::Cubic),
            "average" => Ok(Resampling::Average),
            "mode" => Ok(Resampling::Mode),
            other => Err(ConvertError::invalid_input(format!(
                "unknown resampling method: {other}"
            ))),
        }
    }
}

/// Whether raster cell values are class codes or measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    Categorical,
    Continuous,
}

impl FromStr for DataClass {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "categorical" | "thematic" => Ok(DataClass::Categorical),
            "continuous" => Ok(DataClass::Continuous),
            other => Err(ConvertError::invalid_input(format!("unknown data class: {other}"))),
        }
    }
}

/// A driver creation option, `KEY=VALUE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationOption {
    pub key: String,
    pub value: String,
}

impl CreationOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for CreationOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for CreationOption {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ConvertError::invalid_input(format!("creation option must be KEY=VALUE: {s}")))?;
        let key = key.trim();
        let valid_key = !key.is_empty()
            && !key.starts_with('-')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_key {
            return Err(ConvertError::invalid_input(format!(
                "invalid creation option key: {key:?}"
            )));
        }
        Ok(CreationOption::new(key.to_ascii_uppercase(), value.trim()))
    }
}

/// Optional transformation parameters for a conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionParams {
    pub target_srs: Option<SpatialRef>,
    /// Overrides whatever reference the source declares.
    pub source_srs: Option<SpatialRef>,
    pub resampling: Option<Resampling>,
    pub data_class: Option<DataClass>,
    /// Output layer name (vector targets).
    pub layer_name: Option<String>,
    pub creation_options: Vec<CreationOption>,
}

/// One input artifact, the format to convert it to, and how.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: GeospatialArtifact,
    pub target: FormatTag,
    pub params: ConversionParams,
}

impl ConversionRequest {
    pub fn new(input: GeospatialArtifact, target: FormatTag) -> Self {
        Self {
            input,
            target,
            params: ConversionParams::default(),
        }
    }

    pub fn with_params(mut self, params: ConversionParams) -> Self {
        self.params = params;
        self
    }

    /// Source reference the engine should assume: explicit override first,
    /// then the one attached to the artifact.
    pub fn effective_source_srs(&self) -> Option<&SpatialRef> {
        self.params.source_srs.as_ref().or(self.input.srs.as_ref())
    }
}

/// A successfully converted artifact, fully buffered.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub bytes: Bytes,
    pub format: FormatTag,
    pub file_name: String,
    pub content_type: String,
    /// True when a multi-file dataset was bundled into a ZIP archive.
    pub archived: bool,
    /// Hex SHA-256 digest of `bytes`.
    pub sha256: String,
}

/// Either a converted artifact or a classified failure.
pub type ConversionResult = Result<ConversionOutput, ConvertError>;

/// One raster band as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    pub index: u32,
    /// Engine type name, e.g. `Byte`, `Int16`, `Float32`.
    pub data_type: String,
    pub has_color_table: bool,
}

impl BandInfo {
    /// True for integer cell types, which usually hold class codes.
    pub fn is_integer(&self) -> bool {
        let t = self.data_type.to_ascii_lowercase();
        t == "byte" || t.starts_with("int") || t.starts_with("uint")
    }
}

/// One vector layer as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub geometry_type: Option<String>,
    pub feature_count: Option<u64>,
}

/// Descriptive metadata for a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub driver: String,
    pub kind: DataKind,
    /// Raster width and height in pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<(u64, u64)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bands: Vec<BandInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<LayerInfo>,
    /// Spatial reference as WKT, when the dataset declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srs_wkt: Option<String>,
}

impl DatasetInfo {
    pub fn has_spatial_ref(&self) -> bool {
        self.srs_wkt.as_deref().is_some_and(|w| !w.trim().is_empty())
    }
}
