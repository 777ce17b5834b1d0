//! Operator configuration, stored as TOML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::compression::{CompressionPreference, CompressionTable, DEFAULT_SUFFIXES};
use crate::error::{ArchiveError, Result};
use crate::resolver::DEFAULT_BATCH_SIZE;
use crate::scanner::ScanOptions;
use crate::transfer::TransferKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub scan: ScanOptions,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    /// Names per variant lookup query
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,
    /// Preference used by `resolve` and `fetch` unless overridden
    #[serde(default = "default_compress_order")]
    pub order: CompressionPreference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub kind: TransferKind,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub globus: GlobusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub username: Option<String>,
    /// Environment variable holding the WebDAV password
    #[serde(default = "default_http_password_env")]
    pub password_env: String,
    #[serde(default = "default_http_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobusConfig {
    #[serde(default = "default_globus_api_url")]
    pub api_url: String,
    /// Environment variable holding the transfer API bearer token
    #[serde(default = "default_globus_token_env")]
    pub token_env: String,
    /// Endpoint serving the archive roots
    #[serde(default)]
    pub archive_endpoint: String,
    /// Endpoint serving job directories
    #[serde(default)]
    pub local_endpoint: String,
    #[serde(default = "default_globus_label")]
    pub label: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Give up waiting for a task after this long
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit console logs as JSON lines
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            suffixes: default_suffixes(),
            order: default_compress_order(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            username: None,
            password_env: default_http_password_env(),
            concurrency: default_http_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for GlobusConfig {
    fn default() -> Self {
        Self {
            api_url: default_globus_api_url(),
            token_env: default_globus_token_env(),
            archive_endpoint: String::new(),
            local_endpoint: String::new(),
            label: default_globus_label(),
            poll_interval_secs: default_poll_interval_secs(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            rotation: default_rotation(),
        }
    }
}

impl ArchiveConfig {
    /// Read a configuration file; missing sections and fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArchiveError::config_error(format!("cannot read {}: {}", path.display(), e)))?;
        let config: ArchiveConfig = toml::from_str(&content)
            .map_err(|e| ArchiveError::config_error(format!("cannot parse {}: {}", path.display(), e)))?;

        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` when it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| ArchiveError::config_error(format!("cannot serialize configuration: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.batch_size == 0 {
            return Err(ArchiveError::config_error("catalog.batch_size must be at least 1"));
        }

        CompressionTable::new(self.compression.suffixes.iter())?;

        if self.scan.buffer_size == 0 {
            return Err(ArchiveError::config_error("scan.buffer_size must be at least 1"));
        }

        if self.transfer.http.concurrency == 0 {
            return Err(ArchiveError::config_error("transfer.http.concurrency must be at least 1"));
        }

        if self.transfer.kind == TransferKind::Globus {
            let globus = &self.transfer.globus;
            url::Url::parse(&globus.api_url)
                .map_err(|e| ArchiveError::config_error(format!("transfer.globus.api_url: {}", e)))?;
            if globus.archive_endpoint.is_empty() || globus.local_endpoint.is_empty() {
                return Err(ArchiveError::config_error(
                    "transfer.globus needs both archive_endpoint and local_endpoint",
                ));
            }
        }

        if !matches!(self.logging.rotation.as_str(), "daily" | "hourly" | "never") {
            return Err(ArchiveError::config_error(format!(
                "logging.rotation must be daily, hourly or never, got '{}'",
                self.logging.rotation
            )));
        }

        Ok(())
    }

    /// The suffix table described by `[compression]`
    pub fn compression_table(&self) -> Result<CompressionTable> {
        CompressionTable::new(self.compression.suffixes.iter())
    }
}

/// `<config dir>/archive-tools/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("archive-tools")
        .join("config.toml")
}

fn default_catalog_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("archive-tools")
        .join("catalog.db")
}

fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }

fn default_suffixes() -> Vec<String> {
    DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect()
}

fn default_compress_order() -> CompressionPreference { CompressionPreference::prefer_compressed() }

fn default_http_password_env() -> String { "ARCHIVE_HTTP_PASSWORD".to_string() }
fn default_http_concurrency() -> usize { 4 }
fn default_timeout_secs() -> u64 { 300 }

fn default_globus_api_url() -> String { "https://transfer.api.globus.org/v0.10".to_string() }
fn default_globus_token_env() -> String { "ARCHIVE_GLOBUS_TOKEN".to_string() }
fn default_globus_label() -> String { "archive-tools".to_string() }
fn default_poll_interval_secs() -> u64 { 10 }
fn default_task_timeout_secs() -> u64 { 3600 }

fn default_log_level() -> String { "info".to_string() }
fn default_rotation() -> String { "daily".to_string() }
