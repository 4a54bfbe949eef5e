//! geoconvert-api — HTTP API for the conversion service.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/convert` | Multipart upload; returns the converted artifact |
//! | POST | `/api/v1/inspect` | Multipart upload; returns dataset metadata |
//! | GET | `/api/v1/formats` | List the engine's drivers |
//! | GET | `/healthz` | Liveness check |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! When an API key is configured, every `/api/v1/*` route requires a
//! matching `x-api-key` header.

pub mod auth;
pub mod error;
pub mod form;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use geoconvert_engine::ConversionService;
use geoconvert_metrics::MetricsCollector;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResponse};

/// Room for multipart boundaries and text fields on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: ConversionService,
    pub metrics: MetricsCollector,
    pub api_key: Option<Arc<str>>,
    pub max_upload_bytes: u64,
}

impl ApiState {
    pub fn new(service: ConversionService, max_upload_bytes: u64) -> Self {
        Self {
            service,
            metrics: MetricsCollector::new(),
            api_key: None,
            max_upload_bytes,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty()).map(Arc::from);
        self
    }
}

/// Build the complete router (API + health + metrics).
pub fn build_router(state: ApiState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/convert", post(handlers::convert))
        .route("/inspect", post(handlers::inspect))
        .route("/formats", get(handlers::list_formats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
