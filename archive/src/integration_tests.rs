//! Integration test harness with a temporary archive and catalog file

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::catalog::{CatalogConnection, CatalogReader, CatalogWriter, SqliteCatalog};
use crate::compression::{CompressionPreference, CompressionTable};
use crate::error::ArchiveError;
use crate::fingerprint::{ArchiveLocation, FileFingerprint};
use crate::orchestrator::TransferOrchestrator;
use crate::reconcile::{CompareOptions, ReconciliationOutcome};
use crate::resolver::LocationResolver;
use crate::scanner::{hash_file, HashAlgorithm, ScanOptions};
use crate::transfer::LocalTransfer;
use crate::reconcile_archive;

/// Archive root plus catalog database in one temporary directory
pub struct TempArchive {
    temp_dir: TempDir,
    catalog_path: PathBuf,
    location: ArchiveLocation,
}

impl TempArchive {
    pub fn new(name: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("archive");
        fs::create_dir_all(&root).unwrap();
        let catalog_path = temp_dir.path().join("catalog.db");

        let location = ArchiveLocation::new(name, root.to_string_lossy());
        let catalog = SqliteCatalog::create(&catalog_path).unwrap();
        CatalogWriter::new(&catalog).register_archive(&location).unwrap();
        catalog.commit().unwrap();

        Self {
            temp_dir,
            catalog_path,
            location,
        }
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.location.root)
    }

    pub fn scratch(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn catalog(&self) -> SqliteCatalog {
        SqliteCatalog::open(&self.catalog_path).unwrap()
    }

    /// Write a file below the root and optionally record it
    pub fn add_file(&self, relative_dir: &str, filename: &str, content: &[u8], catalogued: bool) -> FileFingerprint {
        let dir = self.root().join(relative_dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(filename);
        fs::write(&path, content).unwrap();

        let (logical, compression) = CompressionTable::default().split(filename);
        let fp = FileFingerprint::new(logical, compression, relative_dir)
            .with_size(content.len() as u64)
            .with_hash(hash_file(&path, HashAlgorithm::Md5, 4096).unwrap());

        if catalogued {
            let catalog = self.catalog();
            CatalogWriter::new(&catalog)
                .register_file(&self.location.name, &fp, Some("raw"), Some(1))
                .unwrap();
            catalog.commit().unwrap();
        }
        fp
    }
}

fn check_all() -> CompareOptions {
    CompareOptions {
        check_size: true,
        check_hash: true,
    }
}

#[test]
fn test_fresh_archive_is_clean() {
    let archive = TempArchive::new("home");
    archive.add_file("raw/n1", "a.fits", b"aaaa", true);
    archive.add_file("raw/n1", "b.fits.fz", b"bb", true);

    let report = reconcile_archive(
        &archive.catalog(),
        "home",
        "raw",
        ScanOptions::default(),
        CompressionTable::default(),
        check_all(),
    )
    .unwrap();

    assert!(report.is_clean());
    assert_eq!(report.summary().equal, 2);
}

#[test]
fn test_drift_is_reported() {
    let archive = TempArchive::new("home");
    archive.add_file("raw/n1", "a.fits", b"aaaa", true);
    archive.add_file("raw/n1", "gone.fits", b"g", true);
    archive.add_file("raw/n1", "stray.fits", b"s", false);
    fs::remove_file(archive.root().join("raw/n1/gone.fits")).unwrap();
    fs::write(archive.root().join("raw/n1/a.fits"), b"AAAA").unwrap();

    let report = reconcile_archive(
        &archive.catalog(),
        "home",
        "",
        ScanOptions::default(),
        CompressionTable::default(),
        check_all(),
    )
    .unwrap();

    assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::HashMismatch));
    assert_eq!(report.outcome("gone.fits"), Some(ReconciliationOutcome::DbOnly));
    assert_eq!(report.outcome("stray.fits"), Some(ReconciliationOutcome::DiskOnly));
    assert!(!report.is_clean());
}

#[test]
fn test_unknown_archive_and_missing_subtree() {
    let archive = TempArchive::new("home");

    let err = reconcile_archive(
        &archive.catalog(),
        "other",
        "",
        ScanOptions::default(),
        CompressionTable::default(),
        CompareOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidArchive(_)));

    let err = reconcile_archive(
        &archive.catalog(),
        "home",
        "raw/none",
        ScanOptions::default(),
        CompressionTable::default(),
        CompareOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::PathNotFound { .. }));
}

#[test]
fn test_missing_catalog_file_is_a_connection_error() {
    let archive = TempArchive::new("home");
    let err = SqliteCatalog::open(archive.scratch("absent.db")).unwrap_err();
    assert!(matches!(ArchiveError::from(err), ArchiveError::CatalogConnection(_)));
}

#[test]
fn test_resolve_fetch_ingest_round() {
    let archive = TempArchive::new("home");
    archive.add_file("raw/n1", "a.fits", b"plain-a", true);
    archive.add_file("raw/n1", "a.fits.fz", b"fz-a", true);
    archive.add_file("raw/n2", "c.fits", b"plain-c", true);

    let catalog = archive.catalog();
    let resolved = LocationResolver::new(&catalog)
        .resolve(["a.fits", "c.fits"], "home", &CompressionPreference::prefer_compressed())
        .unwrap();
    assert_eq!(resolved["a.fits"].compression.as_deref(), Some(".fz"));
    assert_eq!(resolved["c.fits"].compression, None);

    let job = archive.scratch("job");
    let backend = LocalTransfer::new();
    let orchestrator = TransferOrchestrator::new(&catalog, &backend);
    let fetched = orchestrator.fetch(&resolved, &archive.location, &job).unwrap();
    assert_eq!(fetched.transferred, 2);
    assert_eq!(fs::read(job.join("a.fits.fz")).unwrap(), b"fz-a");

    fs::create_dir_all(job.join("red/n1")).unwrap();
    fs::write(job.join("red/n1/a_red.fits"), b"reduced").unwrap();
    let product = FileFingerprint::new("a_red.fits", None, "red/n1").with_size(7);
    let ingested = orchestrator.ingest(&[product], &job, &archive.location).unwrap();
    assert_eq!(ingested.registered, 1);

    // Committed rows are visible to a fresh connection
    let reopened = archive.catalog();
    let listed = CatalogReader::new(&reopened)
        .get_files("home", Some("red"), None, None)
        .unwrap();
    assert_eq!(listed.fingerprints["a_red.fits"].size_bytes, Some(7));

    let report = reconcile_archive(
        &reopened,
        "home",
        "red",
        ScanOptions::default(),
        CompressionTable::default(),
        CompareOptions {
            check_size: true,
            check_hash: false,
        },
    )
    .unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_catalog_duplicates_surface_in_report() {
    let archive = TempArchive::new("home");
    archive.add_file("raw/n1", "a.fits", b"aaaa", true);
    archive.add_file("raw/n1", "a.fits.fz", b"aa", true);

    let report = reconcile_archive(
        &archive.catalog(),
        "home",
        "raw",
        ScanOptions::default(),
        CompressionTable::default(),
        CompareOptions {
            check_size: true,
            check_hash: false,
        },
    )
    .unwrap();

    assert_eq!(report.db_duplicates["a.fits"].len(), 2);
    assert_eq!(report.disk_duplicates["a.fits"].len(), 2);
    assert!(report.has_duplicates());
}
