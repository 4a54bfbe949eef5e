//! Conversion error taxonomy.
//!
//! Every failure a caller can observe maps onto one [`ErrorKind`]. The
//! transport layer picks an HTTP status from the kind; the variants of
//! [`ConvertError`] carry the human-readable message and, for engine
//! failures, the raw engine output as a separate detail field.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Caller-visible error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedTarget,
    EngineFailure,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::InvalidInput,
        ErrorKind::UnsupportedTarget,
        ErrorKind::EngineFailure,
        ErrorKind::ResourceExhausted,
        ErrorKind::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::UnsupportedTarget => "UnsupportedTarget",
            ErrorKind::EngineFailure => "EngineFailure",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::Internal => "Internal",
        }
    }

    /// True for kinds caused by the caller's request rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ErrorKind::InvalidInput | ErrorKind::UnsupportedTarget)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the native engine refused or failed a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFault {
    /// The input could not be opened or decoded.
    CorruptInput,
    /// A source or target spatial reference could not be resolved.
    UnresolvableSpatialRef,
    /// The engine lacks the driver it was asked to use.
    UnsupportedDriver,
    /// The engine could not produce the output file.
    WriteFailed,
    /// The engine binary could not be started.
    Unavailable,
    Other,
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EngineFault::CorruptInput => "corrupt input",
            EngineFault::UnresolvableSpatialRef => "unresolvable spatial reference",
            EngineFault::UnsupportedDriver => "unsupported driver",
            EngineFault::WriteFailed => "write failed",
            EngineFault::Unavailable => "engine unavailable",
            EngineFault::Other => "engine error",
        };
        f.write_str(label)
    }
}

/// Errors produced while validating, staging, or converting an artifact.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("{0}")]
    UnsupportedTarget(String),

    #[error("{fault}: {message}")]
    Engine {
        fault: EngineFault,
        message: String,
        detail: Option<String>,
    },

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    Internal(String),
}

impl ConvertError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        ConvertError::InvalidInput(msg.into())
    }

    pub fn unsupported_target(msg: impl Into<String>) -> Self {
        ConvertError::UnsupportedTarget(msg.into())
    }

    pub fn engine(fault: EngineFault, message: impl Into<String>, detail: Option<String>) -> Self {
        ConvertError::Engine {
            fault,
            message: message.into(),
            detail,
        }
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        ConvertError::ResourceExhausted(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ConvertError::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::InvalidInput(_) | ConvertError::PayloadTooLarge { .. } => {
                ErrorKind::InvalidInput
            }
            ConvertError::UnsupportedTarget(_) => ErrorKind::UnsupportedTarget,
            ConvertError::Engine { .. } => ErrorKind::EngineFailure,
            ConvertError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Raw engine output attached to an engine failure, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ConvertError::Engine { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn engine_fault(&self) -> Option<EngineFault> {
        match self {
            ConvertError::Engine { fault, .. } => Some(*fault),
            _ => None,
        }
    }
}
