//! Error-to-HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use geoconvert_core::{ConvertError, EngineFault, ErrorKind};
use serde::Serialize;
use tracing::error;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<EngineFault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Convert(ConvertError),
    Unauthorized,
}

impl From<ConvertError> for ApiError {
    fn from(err: ConvertError) -> Self {
        ApiError::Convert(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Convert(err) => status_for(err),
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// Label used in error bodies and metrics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ApiError::Convert(err) => err.kind().as_str(),
            ApiError::Unauthorized => "Unauthorized",
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Unauthorized => ErrorBody {
                kind: self.kind_str(),
                message: "missing or invalid API key".to_string(),
                fault: None,
                detail: None,
            },
            ApiError::Convert(err) if err.kind() == ErrorKind::Internal => ErrorBody {
                kind: self.kind_str(),
                message: "internal server error".to_string(),
                fault: None,
                detail: None,
            },
            ApiError::Convert(err) => ErrorBody {
                kind: self.kind_str(),
                message: err.to_string(),
                fault: err.engine_fault(),
                detail: err.detail().map(str::to_string),
            },
        }
    }
}

/// HTTP status for each error kind.
pub fn status_for(err: &ConvertError) -> StatusCode {
    if matches!(err, ConvertError::PayloadTooLarge { .. }) {
        return StatusCode::PAYLOAD_TOO_LARGE;
    }
    match err.kind() {
        ErrorKind::InvalidInput | ErrorKind::UnsupportedTarget => StatusCode::BAD_REQUEST,
        ErrorKind::EngineFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Convert(err) = &self {
            if err.kind() == ErrorKind::Internal {
                error!(error = %err, "internal error while handling request");
            }
        }
        let status = self.status();
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.body()),
        };
        (status, Json(body)).into_response()
    }
}
