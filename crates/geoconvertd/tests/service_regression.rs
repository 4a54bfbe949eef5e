//! Service regression tests.
//!
//! Drives the assembled router the way the daemon wires it: staging area,
//! conversion service, API state. Engine behavior comes from `MockEngine`
//! except for the GDAL round trip, which runs only when `ogr2ogr` is on
//! PATH.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use geoconvert_api::{ApiState, build_router};
use geoconvert_core::EngineFault;
use geoconvert_engine::testing::MockEngine;
use geoconvert_engine::{
    ConversionEngine, ConversionService, DriverCatalog, GdalCliEngine, ServiceOptions,
};
use geoconvert_staging::StagingArea;
use tower::ServiceExt;

const BOUNDARY: &str = "geoconvertd-regression";
const ROADS: &str = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"name":"Main St"},"geometry":{"type":"LineString","coordinates":[[0.0,0.0],[1.0,1.0]]}}]}"#;

struct Stack {
    _root: tempfile::TempDir,
    service: ConversionService,
    state: ApiState,
}

impl Stack {
    fn staged_entries(&self) -> usize {
        std::fs::read_dir(self.service.staging().root())
            .unwrap()
            .count()
    }
}

fn stack(engine: Arc<dyn ConversionEngine>, catalog: DriverCatalog, options: ServiceOptions) -> Stack {
    let root = tempfile::tempdir().unwrap();
    let staging = StagingArea::open(root.path().join("staging"), None).unwrap();
    let service = ConversionService::new(engine, Arc::new(catalog), staging, options);
    let state = ApiState::new(service.clone(), 10 * 1024 * 1024);
    Stack {
        _root: root,
        service,
        state,
    }
}

fn mock_stack(engine: Arc<MockEngine>, options: ServiceOptions) -> Stack {
    stack(engine, DriverCatalog::builtin(), options)
}

fn convert_request(file_name: &str, bytes: &[u8], target: &str) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"target_format\"\r\n\r\n\
             {target}\r\n--{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );

    Request::builder()
        .method("POST")
        .uri("/api/v1/convert")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

#[tokio::test]
async fn regression_healthz_reports_engine() {
    let s = mock_stack(Arc::new(MockEngine::new()), ServiceOptions::default());
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();

    let resp = build_router(s.state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["engine"], "mock");
}

#[tokio::test]
async fn regression_convert_cleans_up_staging() {
    let engine = Arc::new(MockEngine::new());
    let s = mock_stack(engine.clone(), ServiceOptions::default());

    let resp = build_router(s.state.clone())
        .oneshot(convert_request("roads.geojson", ROADS.as_bytes(), "gpkg"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, ROADS.as_bytes());

    assert_eq!(engine.convert_calls(), 1);
    assert_eq!(engine.inputs_present(), vec![true]);
    assert!(engine.staged_inputs().iter().all(|p| !p.exists()));
    assert_eq!(s.service.staging().live_requests(), 0);
    assert_eq!(s.staged_entries(), 0);
}

#[tokio::test]
async fn regression_engine_failure_cleans_up_staging() {
    let engine = Arc::new(MockEngine::new().failing(EngineFault::CorruptInput, "not a dataset"));
    let s = mock_stack(engine.clone(), ServiceOptions::default());

    let resp = build_router(s.state.clone())
        .oneshot(convert_request("roads.geojson", b"garbage", "gpkg"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(resp).await;
    assert_eq!(body["error"]["kind"], "EngineFailure");
    assert_eq!(body["error"]["fault"], "corrupt_input");
    assert_eq!(s.staged_entries(), 0);
}

#[tokio::test]
async fn regression_engine_panic_is_internal_and_cleans_up() {
    let engine = Arc::new(MockEngine::new().panicking());
    let s = mock_stack(engine.clone(), ServiceOptions::default());

    let resp = build_router(s.state.clone())
        .oneshot(convert_request("roads.geojson", ROADS.as_bytes(), "gpkg"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(resp).await;
    assert_eq!(body["error"]["kind"], "Internal");
    assert_eq!(body["error"]["message"], "internal server error");
    assert!(body["error"].get("detail").is_none());
    assert_eq!(s.staged_entries(), 0);
}

#[tokio::test]
async fn regression_concurrent_requests_respect_worker_limit() {
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(50)));
    let options = ServiceOptions {
        max_concurrent: 2,
        ..ServiceOptions::default()
    };
    let s = mock_stack(engine.clone(), options);
    let router = build_router(s.state.clone());

    let mut handles = Vec::new();
    for i in 0..6 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("layer{i}.geojson");
            router
                .oneshot(convert_request(&name, ROADS.as_bytes(), "gpkg"))
                .await
                .unwrap()
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(engine.convert_calls(), 6);
    assert!(engine.peak_in_flight() <= 2);
    assert_eq!(s.service.available_workers(), 2);
    assert_eq!(s.staged_entries(), 0);

    // Every request ran in its own staging directory.
    let mut dirs: Vec<_> = engine
        .staged_inputs()
        .iter()
        .filter_map(|p| p.parent().map(|d| d.to_path_buf()))
        .collect();
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 6);
}

#[tokio::test]
async fn regression_queue_timeout_is_service_unavailable() {
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(500)));
    let options = ServiceOptions {
        max_concurrent: 1,
        queue_timeout: Duration::from_millis(50),
        ..ServiceOptions::default()
    };
    let s = mock_stack(engine.clone(), options);
    let router = build_router(s.state.clone());

    let first = {
        let router = router.clone();
        tokio::spawn(async move {
            router
                .oneshot(convert_request("a.geojson", ROADS.as_bytes(), "gpkg"))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = router
        .oneshot(convert_request("b.geojson", ROADS.as_bytes(), "gpkg"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(second).await;
    assert_eq!(body["error"]["kind"], "ResourceExhausted");

    assert_eq!(first.await.unwrap().status(), StatusCode::OK);
    assert_eq!(engine.convert_calls(), 1);
    assert_eq!(s.staged_entries(), 0);
}

#[tokio::test]
async fn regression_unsupported_target_stages_nothing() {
    let engine = Arc::new(MockEngine::new());
    let s = mock_stack(engine.clone(), ServiceOptions::default());

    let resp = build_router(s.state.clone())
        .oneshot(convert_request(
            "roads.geojson",
            ROADS.as_bytes(),
            "unsupported-format-xyz",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["kind"], "UnsupportedTarget");

    assert_eq!(engine.convert_calls(), 0);
    assert_eq!(s.staged_entries(), 0);
}

#[tokio::test]
async fn regression_staging_exhaustion_is_service_unavailable() {
    let root = tempfile::tempdir().unwrap();
    // Too small for the upload: behaves like a full disk.
    let staging = StagingArea::open(root.path().join("staging"), Some(8)).unwrap();
    let engine = Arc::new(MockEngine::new());
    let service = ConversionService::new(
        engine.clone(),
        Arc::new(DriverCatalog::builtin()),
        staging,
        ServiceOptions::default(),
    );
    let state = ApiState::new(service.clone(), 10 * 1024 * 1024);

    let resp = build_router(state)
        .oneshot(convert_request("roads.geojson", ROADS.as_bytes(), "gpkg"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["kind"], "ResourceExhausted");

    assert_eq!(engine.convert_calls(), 0);
    assert_eq!(service.staging().used_bytes(), 0);
    assert_eq!(
        std::fs::read_dir(service.staging().root()).unwrap().count(),
        0
    );
}

fn gdal_available() -> bool {
    std::process::Command::new("ogr2ogr")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn regression_gdal_geojson_gpkg_round_trip() {
    if !gdal_available() {
        eprintln!("ogr2ogr not found on PATH; skipping GDAL round trip");
        return;
    }

    let engine = Arc::new(GdalCliEngine::new(None));
    let catalog = engine.drivers().unwrap_or_else(|_| DriverCatalog::builtin());
    // Older ogrinfo builds lack -json, so skip re-inspection here.
    let options = ServiceOptions {
        validate_output: false,
        ..ServiceOptions::default()
    };
    let s = stack(engine, catalog, options);
    let router = build_router(s.state.clone());

    let resp = router
        .clone()
        .oneshot(convert_request("roads.geojson", ROADS.as_bytes(), "gpkg"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/geopackage+sqlite3");
    let gpkg = body_bytes(resp).await;
    assert!(gpkg.starts_with(b"SQLite format 3"));

    let resp = router
        .oneshot(convert_request("roads.gpkg", &gpkg, "geojson"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let geojson: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(geojson["type"], "FeatureCollection");
    assert_eq!(geojson["features"][0]["properties"]["name"], "Main St");

    assert_eq!(s.staged_entries(), 0);
}
