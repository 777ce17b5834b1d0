//! Archive Bookkeeping Library
//!
//! Keeps a catalog of archived files honest against what is on disk:
//! - Disk scanning into per-name fingerprints with duplicate detection
//! - Catalog reads by subtree or by processing attempt
//! - Reconciliation of catalog records against a scan
//! - Resolution of logical names to stored variants by compression preference
//! - Fetch and ingest through local, WebDAV or Globus transfers

pub mod catalog;
pub mod compression;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod reconcile;
pub mod resolver;
pub mod scanner;
pub mod transfer;

// Re-export main types and functions
pub use catalog::{CatalogConnection, CatalogFiles, CatalogReader, CatalogWriter, FileQuery, SqliteCatalog};
pub use compression::{CompressionPreference, CompressionTable};
pub use config::ArchiveConfig;
pub use error::{ArchiveError, Result};
pub use fingerprint::{ArchiveLocation, DuplicateMap, FileFingerprint, FingerprintMap};
pub use orchestrator::{IngestOptions, TransferOrchestrator, TransferSummary};
pub use reconcile::{
    CompareOptions, OutcomeFilter, ReconciliationEngine, ReconciliationOutcome, ReconciliationReport,
};
pub use resolver::LocationResolver;
pub use scanner::{DiskScanner, HashAlgorithm, ScanOptions, ScanResult};
pub use transfer::{build_backend, TransferBackend, TransferKind};

use tracing::warn;

/// Compare what the catalog lists under `subpath` of an archive with what
/// is on disk below the archive root
pub fn reconcile_archive<C: CatalogConnection + ?Sized>(
    conn: &C,
    archive_name: &str,
    subpath: &str,
    scan_options: ScanOptions,
    compression: CompressionTable,
    compare: CompareOptions,
) -> Result<ReconciliationReport> {
    let reader = CatalogReader::new(conn);
    let location = reader
        .archive_location(archive_name)?
        .ok_or_else(|| ArchiveError::InvalidArchive(archive_name.to_string()))?;
    if location.is_remote() {
        warn!("Archive '{}' has a remote root and cannot be scanned", archive_name);
        return Err(ArchiveError::path_not_found(location.root));
    }

    if compare.check_hash && scan_options.hash_algorithm != HashAlgorithm::Md5 {
        warn!(
            "Catalog digests are MD5 but the scan uses {:?}; every hash will mismatch",
            scan_options.hash_algorithm
        );
    }

    let catalog = reader.get_files(archive_name, Some(subpath), None, None)?;
    let want_hash = compare.check_hash || scan_options.want_hash;
    let disk = DiskScanner::new(scan_options, compression).scan_with_hash(
        std::path::Path::new(&location.root),
        subpath,
        want_hash,
    )?;

    Ok(ReconciliationEngine::new(compare).compare(
        &catalog.fingerprints,
        &disk.fingerprints,
        &catalog.duplicates,
        &disk.duplicates,
    ))
}

// Test modules
#[cfg(test)]
mod reconcile_tests;
#[cfg(test)]
mod integration_tests;
