//! HTTP API handlers.
//!
//! Conversion handlers parse the upload, hand it to the
//! `ConversionService`, and map the outcome onto a response. Every
//! convert/inspect call is recorded in the metrics collector.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use geoconvert_core::{ConversionOutput, ConvertError, ConvertResult, DataKind, DatasetInfo};
use geoconvert_engine::DriverInfo;
use geoconvert_metrics::{Gauges, Sample};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ApiState;
use crate::error::{ApiError, ApiResponse};
use crate::form::UploadForm;

pub const CHECKSUM_HEADER: &str = "x-checksum-sha256";

// ── Conversion ─────────────────────────────────────────────────

/// POST /api/v1/convert
pub async fn convert(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let started = Instant::now();
    let mut bytes_in = 0;
    let result = run_convert(&state, multipart, &mut bytes_in).await;

    let (outcome, bytes_out) = match &result {
        Ok(out) => ("ok", out.bytes.len() as u64),
        Err(err) => (err.kind().as_str(), 0),
    };
    record(&state, "convert", outcome, started, bytes_in, bytes_out).await;

    match result {
        Ok(out) => artifact_response(out),
        Err(err) => {
            if !err.kind().is_client_error() {
                warn!(error = %err, "conversion failed");
            }
            ApiError::from(err).into_response()
        }
    }
}

async fn run_convert(
    state: &ApiState,
    multipart: Multipart,
    bytes_in: &mut u64,
) -> ConvertResult<ConversionOutput> {
    let form = UploadForm::read(multipart, state.max_upload_bytes).await?;
    *bytes_in = form.file.as_ref().map(|f| f.bytes.len() as u64).unwrap_or(0);
    let request = form.into_conversion_request(state.service.catalog())?;
    state.service.convert(request).await
}

fn artifact_response(out: ConversionOutput) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_safe_file_name(&out.file_name)
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), out.content_type),
            (header::CONTENT_DISPOSITION.as_str(), disposition),
            (CHECKSUM_HEADER, out.sha256),
        ],
        Body::from(out.bytes),
    )
        .into_response()
}

/// Keep file names safe inside a quoted header parameter.
fn header_safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Inspection ─────────────────────────────────────────────────

/// POST /api/v1/inspect
pub async fn inspect(State(state): State<ApiState>, multipart: Multipart) -> Response {
    let started = Instant::now();
    let mut bytes_in = 0;
    let result = run_inspect(&state, multipart, &mut bytes_in).await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.kind().as_str(),
    };
    record(&state, "inspect", outcome, started, bytes_in, 0).await;

    match result {
        Ok(info) => ApiResponse::ok(info).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn run_inspect(
    state: &ApiState,
    multipart: Multipart,
    bytes_in: &mut u64,
) -> ConvertResult<DatasetInfo> {
    let form = UploadForm::read(multipart, state.max_upload_bytes).await?;
    *bytes_in = form.file.as_ref().map(|f| f.bytes.len() as u64).unwrap_or(0);
    let (artifact, _params) = form.into_artifact(state.service.catalog(), None)?;
    state.service.inspect(artifact).await
}

async fn record(
    state: &ApiState,
    operation: &str,
    outcome: &str,
    started: Instant,
    bytes_in: u64,
    bytes_out: u64,
) {
    state
        .metrics
        .record(Sample {
            operation,
            outcome,
            latency: started.elapsed(),
            bytes_in,
            bytes_out,
        })
        .await;
}

// ── Discovery ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FormatsQuery {
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FormatsResponse<'a> {
    pub engine: &'a str,
    pub drivers: Vec<&'a DriverInfo>,
}

/// GET /api/v1/formats
pub async fn list_formats(
    State(state): State<ApiState>,
    Query(query): Query<FormatsQuery>,
) -> Response {
    let kind = match query.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("") => None,
        Some("raster") => Some(DataKind::Raster),
        Some("vector") => Some(DataKind::Vector),
        Some(other) => {
            return ApiError::from(ConvertError::invalid_input(format!(
                "unknown kind '{other}'; expected 'raster' or 'vector'"
            )))
            .into_response();
        }
    };

    let catalog = state.service.catalog();
    let drivers = catalog
        .drivers()
        .filter(|d| kind.is_none_or(|k| d.supports(k)))
        .collect();
    ApiResponse::ok(FormatsResponse {
        engine: state.service.engine_name(),
        drivers,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
pub struct Health<'a> {
    pub status: &'static str,
    pub engine: &'a str,
    pub drivers: usize,
    pub available_workers: usize,
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let service = &state.service;
    ApiResponse::ok(Health {
        status: "ok",
        engine: service.engine_name(),
        drivers: service.catalog().len(),
        available_workers: service.available_workers(),
    })
    .into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshots = state.metrics.snapshot().await;
    let service = &state.service;
    let gauges = Gauges {
        staged_requests: service.staging().live_requests(),
        staged_bytes: service.staging().used_bytes(),
        available_workers: service.available_workers(),
        max_workers: service.options().max_concurrent,
    };

    let body = geoconvert_metrics::render_prometheus(&snapshots, &gauges);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::Request;
    use geoconvert_engine::testing::MockEngine;
    use geoconvert_engine::{ConversionService, DriverCatalog, ServiceOptions};
    use geoconvert_staging::StagingArea;
    use tower::ServiceExt;

    use crate::build_router;

    const BOUNDARY: &str = "geoconvert-test-boundary";
    const GEOJSON: &str = r#"{"type":"FeatureCollection","features":[]}"#;

    struct Harness {
        _root: tempfile::TempDir,
        engine: Arc<MockEngine>,
        state: ApiState,
    }

    fn harness_with(engine: MockEngine, max_upload_bytes: u64) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(root.path().join("stage"), None).unwrap();
        let engine = Arc::new(engine);
        let service = ConversionService::new(
            engine.clone(),
            Arc::new(DriverCatalog::builtin()),
            staging,
            ServiceOptions::default(),
        );
        Harness {
            _root: root,
            engine,
            state: ApiState::new(service, max_upload_bytes),
        }
    }

    fn harness() -> Harness {
        harness_with(MockEngine::new(), 1024 * 1024)
    }

    enum Part<'a> {
        File(&'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn convert_returns_artifact_with_headers() {
        let h = harness();
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("roads.geojson", GEOJSON.as_bytes()),
                Part::Text("target_format", "gpkg"),
            ],
        );
        let resp = build_router(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let headers = resp.headers().clone();
        assert_eq!(headers["content-type"], "application/geopackage+sqlite3");
        assert_eq!(headers["content-disposition"], "attachment; filename=\"roads.gpkg\"");
        assert_eq!(headers[CHECKSUM_HEADER].len(), 64);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], GEOJSON.as_bytes());
        assert_eq!(h.state.metrics.count("convert", "ok").await, 1);
    }

    #[tokio::test]
    async fn missing_target_format_is_rejected_before_engine() {
        let h = harness();
        let req = upload("/api/v1/convert", &[Part::File("roads.geojson", GEOJSON.as_bytes())]);
        let resp = build_router(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "InvalidInput");
        assert_eq!(h.engine.convert_calls(), 0);
        assert_eq!(h.state.metrics.count("convert", "InvalidInput").await, 1);
    }

    #[tokio::test]
    async fn missing_file_is_invalid_input() {
        let h = harness();
        let req = upload("/api/v1/convert", &[Part::Text("target_format", "gpkg")]);
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["kind"], "InvalidInput");
    }

    #[tokio::test]
    async fn unknown_target_is_unsupported() {
        let h = harness();
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("roads.geojson", GEOJSON.as_bytes()),
                Part::Text("target_format", "unsupported-format-xyz"),
            ],
        );
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["kind"], "UnsupportedTarget");
        assert_eq!(h.engine.convert_calls(), 0);
    }

    #[tokio::test]
    async fn malformed_optional_field_is_invalid_input() {
        let h = harness();
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("roads.geojson", GEOJSON.as_bytes()),
                Part::Text("target_format", "gpkg"),
                Part::Text("source_srs", "EPSG:notanumber"),
            ],
        );
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"]["kind"], "InvalidInput");
    }

    #[tokio::test]
    async fn oversize_upload_is_413() {
        let h = harness_with(MockEngine::new(), 16);
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("roads.geojson", GEOJSON.as_bytes()),
                Part::Text("target_format", "gpkg"),
            ],
        );
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(resp).await["error"]["kind"], "InvalidInput");
        assert_eq!(h.engine.convert_calls(), 0);
    }

    #[tokio::test]
    async fn engine_failure_is_502_with_detail() {
        let h = harness_with(
            MockEngine::new().failing(geoconvert_core::EngineFault::CorruptInput, "bad header"),
            1024 * 1024,
        );
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("roads.geojson", GEOJSON.as_bytes()),
                Part::Text("target_format", "gpkg"),
            ],
        );
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert_eq!(body["error"]["kind"], "EngineFailure");
        assert_eq!(body["error"]["fault"], "corrupt_input");
        assert_eq!(body["error"]["detail"], "mock stderr: bad header");
    }

    #[tokio::test]
    async fn params_reach_the_engine() {
        let h = harness();
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("tapak.json", GEOJSON.as_bytes()),
                Part::Text("source_format", "geojson"),
                Part::Text("target_format", "shp"),
                Part::Text("target_srs", "EPSG:4326"),
                Part::Text("layer_name", "export_tapak"),
                Part::Text("creation_option", "encoding=LATIN1"),
            ],
        );
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "application/zip");

        let job = &h.engine.jobs()[0];
        assert_eq!(job.target.driver, "ESRI Shapefile");
        assert_eq!(job.target_srs, Some(geoconvert_core::SpatialRef::WGS84));
        assert_eq!(job.layer_name.as_deref(), Some("export_tapak"));
        assert_eq!(job.creation_options[0].to_string(), "ENCODING=LATIN1");
    }

    #[tokio::test]
    async fn dual_kind_source_follows_target() {
        let h = harness();
        let req = upload(
            "/api/v1/convert",
            &[
                Part::File("dem.gpkg", b"SQLite format 3\0"),
                Part::Text("target_format", "gtiff"),
            ],
        );
        let resp = build_router(h.state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.engine.jobs()[0].source.kind, DataKind::Raster);
    }

    #[tokio::test]
    async fn inspect_returns_dataset_info() {
        let h = harness();
        let req = upload("/api/v1/inspect", &[Part::File("roads.geojson", GEOJSON.as_bytes())]);
        let resp = build_router(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["kind"], "vector");
        assert_eq!(h.state.metrics.count("inspect", "ok").await, 1);
    }

    #[tokio::test]
    async fn api_key_guards_api_routes_only() {
        let h = harness();
        let state = h.state.clone().with_api_key(Some("s3cret".into()));
        let router = build_router(state);

        let req = Request::builder().uri("/api/v1/formats").body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"]["kind"], "Unauthorized");

        let req = Request::builder()
            .uri("/api/v1/formats")
            .header("x-api-key", "wrong")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/formats")
            .header("x-api-key", "s3cret")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn formats_can_be_filtered_by_kind() {
        let h = harness();
        let query = FormatsQuery {
            kind: Some("raster".into()),
        };
        let resp = list_formats(State(h.state.clone()), Query(query)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let drivers = body["data"]["drivers"].as_array().unwrap();
        assert!(!drivers.is_empty());
        assert!(drivers.iter().all(|d| d["raster"] == true));

        let resp = list_formats(State(h.state), Query(FormatsQuery { kind: Some("mesh".into()) })).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_reports_engine() {
        let h = harness();
        let resp = healthz(State(h.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["data"]["engine"], "mock");
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let h = harness();
        let resp = prometheus_metrics(State(h.state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[test]
    fn file_names_are_header_safe() {
        assert_eq!(header_safe_file_name("my \"roads\".gpkg"), "my__roads__.gpkg");
    }
}
