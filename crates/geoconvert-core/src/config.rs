//! geoconvert.toml configuration parser.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Command-line flags and `GEOCONVERT_*` environment
//! variables are layered on top by the daemon.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default upload limit: 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub staging: StagingConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// When set, `/api/v1/*` requests must send it in `x-api-key`.
    pub api_key: Option<String>,
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            api_key: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// The configured key, treating an empty string as unset.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Root for per-request staging directories. Defaults to `$TMPDIR/geoconvert`.
    pub dir: Option<PathBuf>,
    /// Cap on bytes staged across all in-flight requests.
    pub quota_bytes: Option<u64>,
    /// Remove leftover request directories at startup.
    pub sweep_on_start: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            quota_bytes: None,
            sweep_on_start: true,
        }
    }
}

impl StagingConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("geoconvert"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `ogr2ogr`, `gdal_translate`, etc. Uses `$PATH` when unset.
    pub gdal_bin: Option<PathBuf>,
    /// Worker pool size. Defaults to the machine's available parallelism.
    pub max_concurrent: Option<usize>,
    /// Seconds a request may wait for a free worker.
    pub queue_timeout_secs: u64,
    /// Re-open every output with the engine before returning it.
    pub validate_output: bool,
    /// Reference applied when a request names no target reference.
    pub default_target_srs: Option<String>,
    /// Discover the installed drivers at startup instead of using the built-in list.
    pub discover_drivers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gdal_bin: None,
            max_concurrent: None,
            queue_timeout_secs: 30,
            validate_output: true,
            default_target_srs: None,
            discover_drivers: true,
        }
    }
}

impl EngineConfig {
    pub fn resolved_max_concurrent(&self) -> usize {
        self.max_concurrent
            .filter(|n| *n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
