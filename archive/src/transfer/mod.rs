//! Transfer backends moving files between job directories and archives

pub mod globus;
pub mod http;
pub mod local;

pub use globus::GlobusTransfer;
pub use http::HttpTransfer;
pub use local::LocalTransfer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::TransferConfig;
use crate::error::Result;

/// Backend selected in `[transfer] kind`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    #[default]
    Local,
    Http,
    Globus,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Local => "local",
            TransferKind::Http => "http",
            TransferKind::Globus => "globus",
        };
        f.write_str(name)
    }
}

/// Which side of the transfer is the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Archive to job directory
    Fetch,
    /// Job directory to archive
    Ingest,
}

/// One file to move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Path or URL to read from
    pub source: String,
    /// Path or URL to write to
    pub destination: String,
    pub direction: TransferDirection,
    /// Size the copy must have, when known
    pub expected_size: Option<u64>,
}

impl TransferRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, direction: TransferDirection) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            direction,
            expected_size: None,
        }
    }

    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }
}

/// What happened to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub source: String,
    pub destination: String,
    /// Bytes written, when the backend reports it
    pub bytes: Option<u64>,
    /// Failure reason; `None` on success
    pub error: Option<String>,
}

impl TransferResult {
    pub fn success(request: &TransferRequest, bytes: Option<u64>) -> Self {
        Self {
            source: request.source.clone(),
            destination: request.destination.clone(),
            bytes,
            error: None,
        }
    }

    pub fn failure(request: &TransferRequest, error: impl fmt::Display) -> Self {
        Self {
            source: request.source.clone(),
            destination: request.destination.clone(),
            bytes: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A way of moving files
///
/// Returns one result per request, in request order. Per-file failures are
/// reported in the results; an `Err` means the whole call failed.
pub trait TransferBackend {
    fn name(&self) -> &'static str;

    fn blocking_transfer(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>>;
}

/// Build the backend named by the configuration
pub fn build_backend(config: &TransferConfig) -> Result<Box<dyn TransferBackend>> {
    Ok(match config.kind {
        TransferKind::Local => Box::new(LocalTransfer::new()),
        TransferKind::Http => Box::new(HttpTransfer::from_config(&config.http)?),
        TransferKind::Globus => Box::new(GlobusTransfer::from_config(&config.globus)?),
    })
}

/// Private runtime for backends that talk to the network
pub(crate) fn runtime(backend: &str) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| crate::error::ArchiveError::transfer_error(backend, format!("cannot start runtime: {}", e)))
}

/// Hidden sibling a copy is written to before it is renamed into place
pub(crate) fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.partial", name))
}
