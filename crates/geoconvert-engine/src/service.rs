//! Async facade over a blocking [`ConversionEngine`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use geoconvert_core::config::EngineConfig;
use geoconvert_core::srs::SpatialRefError;
use geoconvert_core::{
    ConversionOutput, ConversionRequest, ConversionResult, ConvertError, ConvertResult, DataKind,
    DatasetInfo, EngineFault, FormatTag, GeospatialArtifact, Resampling, SpatialRef,
};
use geoconvert_staging::{StagedRequest, StagingArea};
use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use crate::catalog::DriverCatalog;
use crate::engine::{ConversionEngine, ConversionJob, StagedInput};
use crate::resample;

/// Tuning knobs for [`ConversionService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub max_concurrent: usize,
    pub queue_timeout: Duration,
    pub validate_output: bool,
    pub default_target_srs: Option<SpatialRef>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_timeout: Duration::from_secs(30),
            validate_output: true,
            default_target_srs: None,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self, SpatialRefError> {
        let default_target_srs = config
            .default_target_srs
            .as_deref()
            .map(SpatialRef::parse)
            .transpose()?;
        Ok(Self {
            max_concurrent: config.resolved_max_concurrent(),
            queue_timeout: Duration::from_secs(config.queue_timeout_secs),
            validate_output: config.validate_output,
            default_target_srs,
        })
    }
}

/// Runs conversions on a bounded pool of blocking workers.
///
/// Cheap to clone; all clones share the engine, catalog, staging area
/// and worker permits.
#[derive(Clone)]
pub struct ConversionService {
    engine: Arc<dyn ConversionEngine>,
    catalog: Arc<DriverCatalog>,
    staging: StagingArea,
    permits: Arc<Semaphore>,
    options: ServiceOptions,
}

impl ConversionService {
    pub fn new(
        engine: Arc<dyn ConversionEngine>,
        catalog: Arc<DriverCatalog>,
        staging: StagingArea,
        options: ServiceOptions,
    ) -> Self {
        let workers = options.max_concurrent.max(1);
        Self {
            engine,
            catalog,
            staging,
            permits: Arc::new(Semaphore::new(workers)),
            options: ServiceOptions {
                max_concurrent: workers,
                ..options
            },
        }
    }

    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Workers not currently running a job.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Check a request against the catalog without touching the engine.
    ///
    /// Returns the target reference the job will use.
    pub fn validate(&self, request: &ConversionRequest) -> ConvertResult<Option<SpatialRef>> {
        self.validate_source(&request.input)?;

        let target = &request.target;
        if !self.catalog.can_write(target) {
            return Err(ConvertError::unsupported_target(format!(
                "target format '{}' is not writable by the engine",
                target.driver
            )));
        }
        if request.input.format.kind != target.kind {
            return Err(ConvertError::unsupported_target(format!(
                "cannot convert {} data to {} format '{}'",
                request.input.format.kind, target.kind, target.driver
            )));
        }

        let params = &request.params;
        if target.is_raster() && params.layer_name.is_some() {
            return Err(ConvertError::invalid_input(
                "layer_name applies only to vector targets",
            ));
        }
        resample::check_request(params.resampling, params.data_class)?;

        Ok(params
            .target_srs
            .clone()
            .or_else(|| self.options.default_target_srs.clone()))
    }

    fn validate_source(&self, input: &GeospatialArtifact) -> ConvertResult<()> {
        if input.is_empty() {
            return Err(ConvertError::invalid_input("uploaded file is empty"));
        }
        if !self.catalog.can_read(&input.format) {
            return Err(ConvertError::invalid_input(format!(
                "source format '{}' is not readable by the engine",
                input.format.driver
            )));
        }
        Ok(())
    }

    /// Convert one artifact.
    ///
    /// The staging directory and worker permit move into the blocking task,
    /// so dropping this future (client disconnect) leaves a running engine
    /// call untouched; both are released when the worker returns.
    pub async fn convert(&self, request: ConversionRequest) -> ConversionResult {
        let target_srs = self.validate(&request)?;
        let permit = self.acquire_worker().await?;

        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            this.run_conversion(request, target_srs)
        })
        .await
        .map_err(|e| worker_failure("conversion", e))?
    }

    /// Describe an artifact without converting it.
    pub async fn inspect(&self, artifact: GeospatialArtifact) -> ConvertResult<DatasetInfo> {
        self.validate_source(&artifact)?;
        let permit = self.acquire_worker().await?;

        let this = self.clone();
        tokio::task::spawn_blocking(move || -> ConvertResult<DatasetInfo> {
            let _permit = permit;
            let mut stage = this.staging.acquire()?;
            let input = stage_input(&mut stage, &artifact)?;
            this.engine.inspect(&input, artifact.format.kind)
        })
        .await
        .map_err(|e| worker_failure("inspection", e))?
    }

    async fn acquire_worker(&self) -> ConvertResult<OwnedSemaphorePermit> {
        let wait = self.options.queue_timeout;
        match tokio::time::timeout(wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(ConvertError::internal("conversion worker pool is closed")),
            Err(_elapsed) => Err(ConvertError::resource_exhausted(format!(
                "all {} conversion workers are busy; gave up after {}s",
                self.options.max_concurrent,
                wait.as_secs_f32()
            ))),
        }
    }

    fn run_conversion(
        &self,
        request: ConversionRequest,
        target_srs: Option<SpatialRef>,
    ) -> ConversionResult {
        let started = Instant::now();
        let mut stage = self.staging.acquire()?;
        let input = stage_input(&mut stage, &request.input)?;
        let source_srs = request.effective_source_srs().cloned();

        let resampling = match (&request.target.kind, &target_srs) {
            (DataKind::Raster, Some(_)) => Some(self.plan_reprojection(&input, &request, source_srs.is_some())?),
            _ => None,
        };

        let file_name = output_file_name(request.input.stem(), &request.target);
        let output = stage.subdir("out")?.join(&file_name);
        let job = ConversionJob {
            input,
            output,
            source: request.input.format.clone(),
            target: request.target.clone(),
            source_srs,
            target_srs,
            resampling,
            layer_name: request.params.layer_name.clone(),
            creation_options: request.params.creation_options.clone(),
        };

        debug!(request = %stage.id(), engine = self.engine.name(), ?job, "running conversion");
        self.engine.convert(&job)?;

        let bytes = self.collect_output(&mut stage, &job)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));

        info!(
            request = %stage.id(),
            source = %job.source,
            target = %job.target,
            bytes_in = request.input.len(),
            bytes_out = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "conversion finished"
        );

        Ok(ConversionOutput {
            bytes: bytes.into(),
            content_type: job.target.content_type().to_string(),
            archived: job.target.is_multi_file(),
            format: job.target,
            file_name,
            sha256,
        })
    }

    /// Resolve the resampling kernel, consulting the engine only when the
    /// request leaves something undecided.
    fn plan_reprojection(
        &self,
        input: &StagedInput,
        request: &ConversionRequest,
        has_source_srs: bool,
    ) -> ConvertResult<Resampling> {
        let params = &request.params;
        let needs_bands = params.resampling.is_none() && params.data_class.is_none();
        if !needs_bands && has_source_srs {
            return resample::choose_resampling(params.resampling, params.data_class, &[]);
        }

        let info = self.engine.inspect(input, DataKind::Raster)?;
        if !has_source_srs && !info.has_spatial_ref() {
            return Err(ConvertError::engine(
                EngineFault::UnresolvableSpatialRef,
                "input declares no spatial reference and none was supplied; set source_srs",
                None,
            ));
        }
        resample::choose_resampling(params.resampling, params.data_class, &info.bands)
    }

    /// Read the finished output, refusing anything missing or empty.
    ///
    /// Everything the engine wrote under the output directory, intermediates
    /// included, is charged to the staging quota before the output is read.
    fn collect_output(&self, stage: &mut StagedRequest, job: &ConversionJob) -> ConvertResult<Vec<u8>> {
        let len = match std::fs::metadata(&job.output) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(ConvertError::engine(
                    EngineFault::WriteFailed,
                    "engine reported success but wrote no output",
                    None,
                ));
            }
        };
        if len == 0 {
            return Err(ConvertError::engine(
                EngineFault::WriteFailed,
                "engine wrote an empty output",
                None,
            ));
        }

        let written = job.output.parent().map_or(len, |dir| written_bytes(dir).max(len));
        stage.reserve(written)?;

        if self.options.validate_output {
            let written = StagedInput {
                path: job.output.clone(),
                archive: job.target.is_multi_file(),
            };
            self.engine
                .inspect(&written, job.target.kind)
                .map_err(|e| match e {
                    ConvertError::Engine { message, detail, .. } => ConvertError::engine(
                        EngineFault::WriteFailed,
                        format!("output failed validation: {message}"),
                        detail,
                    ),
                    other => other,
                })?;
        }

        Ok(stage.read_output(&job.output)?)
    }
}

/// Total size of the regular files directly under `dir`.
fn written_bytes(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.metadata().ok())
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len())
                .sum()
        })
        .unwrap_or(0)
}

/// Write an artifact into the request directory.
fn stage_input(stage: &mut StagedRequest, artifact: &GeospatialArtifact) -> ConvertResult<StagedInput> {
    let archive = artifact.is_archive();
    let name = match artifact.file_name.as_deref() {
        Some(name) if !archive || name.to_ascii_lowercase().ends_with(".zip") => name.to_string(),
        _ if archive => format!("{}.zip", artifact.stem()),
        _ => format!("{}.{}", artifact.stem(), artifact.format.extension()),
    };
    let path = stage.write_input(&name, &artifact.bytes)?;
    Ok(StagedInput { path, archive })
}

/// Output name: the input stem plus the target's extension. Multi-file
/// targets are bundled, so they get a `.zip` suffix.
fn output_file_name(stem: &str, target: &FormatTag) -> String {
    if target.is_multi_file() {
        format!("{stem}.{}.zip", target.extension())
    } else {
        format!("{stem}.{}", target.extension())
    }
}

fn worker_failure(what: &str, err: tokio::task::JoinError) -> ConvertError {
    if err.is_panic() {
        error!("{what} worker panicked: {err}");
    } else {
        error!("{what} worker was cancelled: {err}");
    }
    ConvertError::internal(format!("{what} worker did not complete"))
}
