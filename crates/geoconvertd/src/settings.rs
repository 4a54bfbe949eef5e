//! Command-line flags and configuration layering.
//!
//! Precedence, lowest first: built-in defaults, `--config` file, then
//! flags and their `GEOCONVERT_*` environment variables.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use geoconvert_core::ServiceConfig;

#[derive(Debug, Parser)]
#[command(name = "geoconvertd", about = "Geospatial conversion over HTTP")]
pub struct Cli {
    /// Path to a geoconvert.toml configuration file.
    #[arg(long, env = "GEOCONVERT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "GEOCONVERT_BIND")]
    pub bind: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "GEOCONVERT_PORT")]
    pub port: Option<u16>,

    /// Root directory for per-request staging.
    #[arg(long, env = "GEOCONVERT_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Directory containing the GDAL command-line tools.
    #[arg(long, env = "GEOCONVERT_GDAL_BIN")]
    pub gdal_bin: Option<PathBuf>,

    /// Require this key in the `x-api-key` header on /api/v1 routes.
    #[arg(long, env = "GEOCONVERT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Largest accepted upload, in bytes.
    #[arg(long, env = "GEOCONVERT_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<u64>,

    /// Number of conversions allowed to run at once.
    #[arg(long, env = "GEOCONVERT_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "GEOCONVERT_LOG_JSON")]
    pub log_json: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Overlay flags onto a loaded configuration.
    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(key) = &self.api_key {
            config.server.api_key = Some(key.clone());
        }
        if let Some(limit) = self.max_upload_bytes {
            config.server.max_upload_bytes = limit;
        }
        if let Some(dir) = &self.staging_dir {
            config.staging.dir = Some(dir.clone());
        }
        if let Some(bin) = &self.gdal_bin {
            config.engine.gdal_bin = Some(bin.clone());
        }
        if let Some(n) = self.max_concurrent {
            config.engine.max_concurrent = Some(n);
        }
    }
}

/// Load the configuration file (if any) and apply flag overrides.
pub fn load(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    cli.apply(&mut config);
    Ok(config)
}
