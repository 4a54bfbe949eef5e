//! Error types for the staging area.

use std::io;
use std::path::PathBuf;

use geoconvert_core::ConvertError;
use thiserror::Error;

/// Result type alias for staging operations.
pub type StagingResult<T> = Result<T, StagingError>;

/// Errors that can occur while staging files.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read staged file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("staging quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("invalid staged file name: {0:?}")]
    InvalidName(String),

    #[error("path escapes the request directory: {0}")]
    OutsideRequest(PathBuf),
}

impl StagingError {
    /// True when the failure means staging storage is unavailable or full.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            StagingError::CreateDir { .. }
                | StagingError::Write { .. }
                | StagingError::QuotaExceeded { .. }
        )
    }
}

impl From<StagingError> for ConvertError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::InvalidName(_) => ConvertError::invalid_input(err.to_string()),
            e if e.is_exhaustion() => ConvertError::resource_exhausted(e.to_string()),
            e => ConvertError::internal(e.to_string()),
        }
    }
}
