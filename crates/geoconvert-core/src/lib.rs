//! geoconvert-core — shared types for the geoconvert service.
//!
//! Holds the data model that flows between the transport layer, the
//! staging area, and the conversion engine:
//!
//! - [`GeospatialArtifact`]: payload bytes plus a [`FormatTag`]
//! - [`ConversionRequest`]: one artifact, a target format, and [`ConversionParams`]
//! - [`ConversionOutput`] / [`ConvertError`]: the two halves of a [`ConversionResult`]
//! - [`ServiceConfig`]: the `geoconvert.toml` configuration file

pub mod config;
pub mod error;
pub mod format;
pub mod srs;
pub mod types;

pub use config::ServiceConfig;
pub use error::{ConvertError, ConvertResult, EngineFault, ErrorKind};
pub use format::{DataKind, FormatTag};
pub use srs::SpatialRef;
pub use types::*;
