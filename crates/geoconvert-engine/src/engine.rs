//! The engine capability trait.

use std::path::PathBuf;

use crate::catalog::DriverCatalog;
use geoconvert_core::{
    ConvertResult, CreationOption, DataKind, DatasetInfo, FormatTag, Resampling, SpatialRef,
};

/// Result type alias for engine operations.
pub type EngineResult<T> = ConvertResult<T>;

/// A file the engine should open.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedInput {
    pub path: PathBuf,
    /// The file is a ZIP bundle to be opened through the engine's archive support.
    pub archive: bool,
}

impl StagedInput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive: false,
        }
    }

    pub fn archive(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            archive: true,
        }
    }
}

/// Everything the engine needs to run one conversion against staged files.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    pub input: StagedInput,
    /// Where the engine must write its result. The parent directory exists.
    pub output: PathBuf,
    pub source: FormatTag,
    pub target: FormatTag,
    pub source_srs: Option<SpatialRef>,
    pub target_srs: Option<SpatialRef>,
    /// Set for raster jobs that reproject.
    pub resampling: Option<Resampling>,
    pub layer_name: Option<String>,
    pub creation_options: Vec<CreationOption>,
}

impl ConversionJob {
    pub fn reprojects(&self) -> bool {
        self.target_srs.is_some()
    }
}

/// A native geospatial engine.
///
/// Implementations block: the conversion service always calls them from
/// a blocking worker, never from the async request path.
pub trait ConversionEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Discover the installed drivers. Called once at startup.
    fn drivers(&self) -> EngineResult<DriverCatalog>;

    /// Convert `job.input` into `job.output`.
    fn convert(&self, job: &ConversionJob) -> EngineResult<()>;

    /// Open a dataset read-only and describe it.
    fn inspect(&self, input: &StagedInput, kind: DataKind) -> EngineResult<DatasetInfo>;
}
