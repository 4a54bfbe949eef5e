//! Test doubles for the conversion core.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream crates' tests.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use geoconvert_core::{BandInfo, ConvertError, DataKind, DatasetInfo, EngineFault};

use crate::catalog::DriverCatalog;
use crate::engine::{ConversionEngine, ConversionJob, EngineResult, StagedInput};

/// Engine double that copies its input to its output.
///
/// Counts calls, records every job and whether its staged input existed
/// at call time, and can be told to fail, stall, panic, or emit nothing.
#[derive(Debug, Default)]
pub struct MockEngine {
    convert_calls: AtomicUsize,
    inspect_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    jobs: Mutex<Vec<ConversionJob>>,
    inputs_present: Mutex<Vec<bool>>,
    convert_failure: Option<(EngineFault, String)>,
    inspect_failure: Option<(EngineFault, String)>,
    bands: Vec<BandInfo>,
    srs_wkt: Option<String>,
    delay: Option<Duration>,
    empty_output: bool,
    panic_on_convert: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            srs_wkt: Some("GEOGCRS[\"WGS 84\"]".to_string()),
            ..Self::default()
        }
    }

    pub fn failing(mut self, fault: EngineFault, message: impl Into<String>) -> Self {
        self.convert_failure = Some((fault, message.into()));
        self
    }

    pub fn failing_inspect(mut self, fault: EngineFault, message: impl Into<String>) -> Self {
        self.inspect_failure = Some((fault, message.into()));
        self
    }

    /// Bands reported by `inspect`.
    pub fn with_bands(mut self, data_types: &[&str]) -> Self {
        self.bands = data_types
            .iter()
            .enumerate()
            .map(|(i, t)| BandInfo {
                index: i as u32 + 1,
                data_type: t.to_string(),
                has_color_table: false,
            })
            .collect();
        self
    }

    /// Report datasets without a spatial reference.
    pub fn without_srs(mut self) -> Self {
        self.srs_wkt = None;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    pub fn panicking(self) -> Self {
        self.panic_on_convert.store(true, Ordering::SeqCst);
        self
    }

    pub fn convert_calls(&self) -> usize {
        self.convert_calls.load(Ordering::SeqCst)
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    /// Most conversions observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<ConversionJob> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Staged input paths of every recorded job.
    pub fn staged_inputs(&self) -> Vec<PathBuf> {
        self.jobs().into_iter().map(|j| j.input.path).collect()
    }

    /// Whether each job's staged input existed when the engine ran.
    pub fn inputs_present(&self) -> Vec<bool> {
        self.inputs_present
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConversionEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn drivers(&self) -> EngineResult<DriverCatalog> {
        Ok(DriverCatalog::builtin())
    }

    fn convert(&self, job: &ConversionJob) -> EngineResult<()> {
        self.convert_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());
        self.inputs_present
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.input.path.is_file());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panic_on_convert.load(Ordering::SeqCst) {
            panic!("mock engine panic");
        }
        if let Some((fault, message)) = &self.convert_failure {
            return Err(ConvertError::engine(
                *fault,
                message.clone(),
                Some(format!("mock stderr: {message}")),
            ));
        }

        let written = if self.empty_output {
            std::fs::write(&job.output, b"")
        } else {
            std::fs::copy(&job.input.path, &job.output).map(|_| ())
        };
        written.map_err(|e| {
            ConvertError::engine(EngineFault::WriteFailed, "mock write failed", Some(e.to_string()))
        })
    }

    fn inspect(&self, input: &StagedInput, kind: DataKind) -> EngineResult<DatasetInfo> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((fault, message)) = &self.inspect_failure {
            return Err(ConvertError::engine(*fault, message.clone(), None));
        }
        if !input.path.is_file() {
            return Err(ConvertError::engine(
                EngineFault::CorruptInput,
                format!("cannot open {}", input.path.display()),
                None,
            ));
        }
        Ok(DatasetInfo {
            driver: "Mock".to_string(),
            kind,
            size: (kind == DataKind::Raster).then_some((1, 1)),
            bands: if kind == DataKind::Raster {
                self.bands.clone()
            } else {
                Vec::new()
            },
            layers: Vec::new(),
            srs_wkt: self.srs_wkt.clone(),
        })
    }
}
