//! geoconvertd — the geoconvert daemon.
//!
//! Single binary that assembles the service:
//! - Staging area (per-request temporary directories)
//! - GDAL command-line engine + driver catalog (discovered once)
//! - Conversion service (bounded worker pool)
//! - REST API + metrics
//!
//! # Usage
//!
//! ```text
//! geoconvertd --config /etc/geoconvert.toml --port 8000 --api-key s3cret
//! ```

mod settings;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use geoconvert_api::ApiState;
use geoconvert_core::ServiceConfig;
use geoconvert_engine::{
    ConversionEngine, ConversionService, DriverCatalog, GdalCliEngine, ServiceOptions,
};
use geoconvert_staging::StagingArea;
use tracing::{error, info, warn};

use crate::settings::Cli;

const DEFAULT_LOG_FILTER: &str = "info,geoconvertd=debug,geoconvert=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = settings::load(&cli)?;
    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    run(config).await
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    info!("geoconvert daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // Staging area.
    let staging_dir = config.staging.resolved_dir();
    let staging = StagingArea::open(&staging_dir, config.staging.quota_bytes)
        .with_context(|| format!("cannot open staging area at {}", staging_dir.display()))?;
    if config.staging.sweep_on_start {
        let removed = staging.sweep_orphans().context("staging sweep failed")?;
        info!(removed, "staging area swept");
    }
    info!(root = %staging_dir.display(), quota = ?config.staging.quota_bytes, "staging area ready");

    // Engine and driver catalog.
    let engine = Arc::new(GdalCliEngine::new(config.engine.gdal_bin.clone()));
    let catalog = load_catalog(engine.clone(), config.engine.discover_drivers).await?;
    info!(drivers = catalog.len(), "driver catalog ready");

    // Conversion service.
    let options = ServiceOptions::from_config(&config.engine)
        .context("invalid engine.default_target_srs")?;
    info!(
        workers = options.max_concurrent,
        queue_timeout_secs = options.queue_timeout.as_secs(),
        validate_output = options.validate_output,
        "conversion service initialized"
    );
    let service = ConversionService::new(engine, Arc::new(catalog), staging, options);

    // ── Start API server ───────────────────────────────────────

    let api_key = config.server.effective_api_key().map(str::to_string);
    if api_key.is_none() {
        warn!("no API key configured; /api/v1 is open to every caller");
    }
    let state = ApiState::new(service, config.server.max_upload_bytes).with_api_key(api_key);
    let router = geoconvert_api::build_router(state);

    let ip: IpAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let addr = SocketAddr::from((ip, config.server.port));

    info!(%addr, max_upload_bytes = config.server.max_upload_bytes, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("geoconvert daemon stopped");
    Ok(())
}

/// Discover the installed drivers once, falling back to the built-in list.
async fn load_catalog(engine: Arc<GdalCliEngine>, discover: bool) -> anyhow::Result<DriverCatalog> {
    if !discover {
        info!("driver discovery disabled; using built-in catalog");
        return Ok(DriverCatalog::builtin());
    }

    let discovered = tokio::task::spawn_blocking(move || {
        match engine.version() {
            Ok(version) => info!(%version, "GDAL found"),
            Err(e) => warn!(error = %e, "could not read GDAL version"),
        }
        engine.drivers()
    })
    .await
    .context("driver discovery task failed")?;

    Ok(match discovered {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!(error = %e, "driver discovery failed; using built-in catalog");
            DriverCatalog::builtin()
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
