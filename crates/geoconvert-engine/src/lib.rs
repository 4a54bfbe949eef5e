//! geoconvert-engine — the conversion core.
//!
//! Turns a [`ConversionRequest`](geoconvert_core::ConversionRequest) into a
//! fully buffered output artifact. The native work is done by a
//! [`ConversionEngine`]; the shipped implementation drives GDAL's
//! command-line utilities.
//!
//! # Architecture
//!
//! ```text
//! ConversionService (async, Clone)
//!   ├── validate()            ← catalog checks, no engine call
//!   ├── Semaphore             ← bounded worker pool
//!   └── spawn_blocking
//!         ├── StagingArea::acquire()  (dropped → directory removed)
//!         ├── ConversionEngine::inspect()  (raster resampling choice)
//!         ├── ConversionEngine::convert()
//!         └── read + validate output
//!
//! DriverCatalog (discovered once, Arc-shared, read-only)
//! ```

pub mod catalog;
pub mod engine;
pub mod gdal;
pub mod resample;
pub mod service;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use catalog::{DriverCatalog, DriverInfo};
pub use engine::{ConversionEngine, ConversionJob, EngineResult, StagedInput};
pub use gdal::GdalCliEngine;
pub use resample::choose_resampling;
pub use service::{ConversionService, ServiceOptions};
