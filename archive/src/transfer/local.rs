//! Filesystem copies between directories on the same host

use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{staging_path, TransferBackend, TransferRequest, TransferResult};
use crate::error::Result;

/// Copies with `std::fs`, keeping modification times
#[derive(Debug, Clone, Default)]
pub struct LocalTransfer;

impl LocalTransfer {
    pub fn new() -> Self {
        Self
    }

    fn copy_one(&self, request: &TransferRequest) -> io::Result<u64> {
        let source = Path::new(&request.source);
        let destination = Path::new(&request.destination);

        let metadata = fs::metadata(source)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", source.display()),
            ));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        // Nothing lands at the destination unless the copy is complete
        let staging = staging_path(destination);
        let written = Self::copy_checked(source, &staging, &metadata, request.expected_size)
            .and_then(|written| fs::rename(&staging, destination).map(|_| written));
        if written.is_err() {
            if let Err(e) = fs::remove_file(&staging) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Cannot remove partial copy {}: {}", staging.display(), e);
                }
            }
        }
        written
    }

    fn copy_checked(source: &Path, staging: &Path, metadata: &fs::Metadata, expected: Option<u64>) -> io::Result<u64> {
        let copied = fs::copy(source, staging)?;
        let mtime = FileTime::from_last_modification_time(metadata);
        filetime::set_file_mtime(staging, mtime)?;

        let expected = expected.unwrap_or(metadata.len());
        let written = fs::metadata(staging)?.len();
        if written != expected || copied != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("size mismatch after copy: expected {}, wrote {}", expected, written),
            ));
        }

        Ok(written)
    }
}

impl TransferBackend for LocalTransfer {
    fn name(&self) -> &'static str {
        "local"
    }

    fn blocking_transfer(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>> {
        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            match self.copy_one(request) {
                Ok(bytes) => {
                    debug!("Copied {} -> {} ({} bytes)", request.source, request.destination, bytes);
                    results.push(TransferResult::success(request, Some(bytes)));
                }
                Err(e) => {
                    warn!("Copy {} -> {} failed: {}", request.source, request.destination, e);
                    results.push(TransferResult::failure(request, e));
                }
            }
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        info!("Local transfer: {} of {} files copied", ok, requests.len());
        Ok(results)
    }
}
