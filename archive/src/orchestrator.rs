//! Fetching resolved files into job directories and ingesting job output
//! into archives

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogConnection, CatalogReader, CatalogWriter};
use crate::error::{ArchiveError, Result};
use crate::fingerprint::{ArchiveLocation, FileFingerprint, FingerprintMap};
use crate::transfer::{TransferBackend, TransferDirection, TransferRequest, TransferResult};

/// Counts and failures of one fetch or ingest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub transferred: usize,
    pub failed: Vec<TransferResult>,
    /// Files newly recorded in the catalog
    pub registered: usize,
    /// Files skipped because the archive already lists them
    pub already_registered: Vec<String>,
}

impl TransferSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Provenance recorded on artifacts created by an ingest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOptions {
    pub file_type: Option<String>,
    pub attempt_id: Option<i64>,
}

/// Drives a transfer backend and records ingested files in the catalog
pub struct TransferOrchestrator<'a, C: CatalogConnection + ?Sized> {
    conn: &'a C,
    backend: &'a dyn TransferBackend,
    options: IngestOptions,
}

impl<'a, C: CatalogConnection + ?Sized> TransferOrchestrator<'a, C> {
    pub fn new(conn: &'a C, backend: &'a dyn TransferBackend) -> Self {
        Self {
            conn,
            backend,
            options: IngestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    /// Copy archive files into `dest_dir`, flat, under their stored names
    pub fn fetch(&self, files: &FingerprintMap, archive: &ArchiveLocation, dest_dir: &Path) -> Result<TransferSummary> {
        let requests: Vec<TransferRequest> = files
            .values()
            .map(|fp| {
                TransferRequest::new(
                    archive.locate(fp),
                    dest_dir.join(fp.filename()).to_string_lossy(),
                    TransferDirection::Fetch,
                )
                .with_expected_size(fp.size_bytes)
            })
            .collect();

        let results = self.run(&requests)?;
        let mut summary = TransferSummary::default();
        for result in results {
            if result.is_success() {
                summary.transferred += 1;
            } else {
                summary.failed.push(result);
            }
        }

        info!(
            "Fetched {} of {} files from archive '{}' into {}",
            summary.transferred,
            requests.len(),
            archive.name,
            dest_dir.display()
        );
        Ok(summary)
    }

    /// Copy files from `source_root` into the archive at each fingerprint's
    /// path and register the copies
    ///
    /// Variants the archive already lists are neither copied nor registered.
    /// Registration happens in one transaction, committed once.
    pub fn ingest(&self, files: &[FileFingerprint], source_root: &Path, archive: &ArchiveLocation) -> Result<TransferSummary> {
        if CatalogReader::new(self.conn).archive_location(&archive.name)?.is_none() {
            return Err(ArchiveError::UnknownArchive(archive.name.clone()));
        }

        let writer = CatalogWriter::new(self.conn);
        let mut summary = TransferSummary::default();
        let mut pending: HashMap<String, &FileFingerprint> = HashMap::new();
        let mut requests = Vec::new();

        for fp in files {
            if writer.is_registered(&archive.name, fp)? {
                debug!("'{}' already in archive '{}', skipping", fp.filename(), archive.name);
                summary.already_registered.push(fp.filename());
                continue;
            }

            let request = TransferRequest::new(
                fp.local_path(source_root).to_string_lossy(),
                archive.locate(fp),
                TransferDirection::Ingest,
            )
            .with_expected_size(fp.size_bytes);
            pending.insert(request.source.clone(), fp);
            requests.push(request);
        }

        let results = self.run(&requests)?;

        let registration = self.register(&writer, &archive.name, &results, &pending, &mut summary);
        if let Err(e) = registration {
            warn!("Registration in archive '{}' failed, rolling back: {}", archive.name, e);
            self.conn.rollback()?;
            return Err(e);
        }
        self.conn.commit()?;

        info!(
            "Ingested {} files into archive '{}' ({} registered, {} already present, {} failed)",
            summary.transferred,
            archive.name,
            summary.registered,
            summary.already_registered.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    fn register(
        &self,
        writer: &CatalogWriter<'_, C>,
        archive_name: &str,
        results: &[TransferResult],
        pending: &HashMap<String, &FileFingerprint>,
        summary: &mut TransferSummary,
    ) -> Result<()> {
        for result in results {
            if !result.is_success() {
                summary.failed.push(result.clone());
                continue;
            }
            summary.transferred += 1;

            let Some(fp) = pending.get(&result.source) else {
                warn!("Backend reported unknown source {}", result.source);
                continue;
            };
            if writer.register_file(
                archive_name,
                fp,
                self.options.file_type.as_deref(),
                self.options.attempt_id,
            )? {
                summary.registered += 1;
            }
        }
        Ok(())
    }

    fn run(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Handing {} requests to the {} backend", requests.len(), self.backend.name());
        self.backend.blocking_transfer(requests)
    }
}
