//! Reconciliation of catalog records against a disk scan
//!
//! A pure comparison: both sides are already materialized, nothing here
//! touches the catalog or the filesystem.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fingerprint::{DuplicateMap, FileFingerprint, FingerprintMap};

/// Classification of one logical name after comparing catalog and disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// Present on both sides and matching within the requested checks
    Equal,
    /// Recorded in the catalog, not found on disk
    DbOnly,
    /// Found on disk, not recorded in the catalog
    DiskOnly,
    /// Present on both sides in different directories
    PathMismatch,
    /// Same directory, different size
    SizeMismatch,
    /// Same directory and size, different content digest
    HashMismatch,
}

impl ReconciliationOutcome {
    pub const ALL: [ReconciliationOutcome; 6] = [
        ReconciliationOutcome::Equal,
        ReconciliationOutcome::DbOnly,
        ReconciliationOutcome::DiskOnly,
        ReconciliationOutcome::PathMismatch,
        ReconciliationOutcome::SizeMismatch,
        ReconciliationOutcome::HashMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Equal => "equal",
            ReconciliationOutcome::DbOnly => "db_only",
            ReconciliationOutcome::DiskOnly => "disk_only",
            ReconciliationOutcome::PathMismatch => "path_mismatch",
            ReconciliationOutcome::SizeMismatch => "size_mismatch",
            ReconciliationOutcome::HashMismatch => "hash_mismatch",
        }
    }

    /// Anything but `Equal`
    pub fn is_difference(&self) -> bool {
        !matches!(self, ReconciliationOutcome::Equal)
    }
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which attributes are compared for names present on both sides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareOptions {
    pub check_size: bool,
    pub check_hash: bool,
}

/// Outcome for one logical name with the fingerprints it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledFile {
    pub logical_name: String,
    pub outcome: ReconciliationOutcome,
    pub db: Option<FileFingerprint>,
    pub disk: Option<FileFingerprint>,
}

/// Per-outcome counts of a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub equal: usize,
    pub db_only: usize,
    pub disk_only: usize,
    pub path_mismatch: usize,
    pub size_mismatch: usize,
    pub hash_mismatch: usize,
    /// Names with several catalog rows
    pub db_duplicates: usize,
    /// Names with several physical copies
    pub disk_duplicates: usize,
}

impl ReportSummary {
    pub fn count(&self, outcome: ReconciliationOutcome) -> usize {
        match outcome {
            ReconciliationOutcome::Equal => self.equal,
            ReconciliationOutcome::DbOnly => self.db_only,
            ReconciliationOutcome::DiskOnly => self.disk_only,
            ReconciliationOutcome::PathMismatch => self.path_mismatch,
            ReconciliationOutcome::SizeMismatch => self.size_mismatch,
            ReconciliationOutcome::HashMismatch => self.hash_mismatch,
        }
    }
}

/// Result of one reconciliation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// One entry per name in the union of both sides
    pub files: BTreeMap<String, ReconciledFile>,
    /// Catalog duplicates, passed through unchanged
    pub db_duplicates: DuplicateMap,
    /// Disk duplicates, passed through unchanged
    pub disk_duplicates: DuplicateMap,
    pub options: CompareOptions,
}

impl ReconciliationReport {
    pub fn outcome(&self, logical_name: &str) -> Option<ReconciliationOutcome> {
        self.files.get(logical_name).map(|file| file.outcome)
    }

    /// Names classified as `outcome`, sorted
    pub fn names_with(&self, outcome: ReconciliationOutcome) -> Vec<&str> {
        self.files
            .values()
            .filter(|file| file.outcome == outcome)
            .map(|file| file.logical_name.as_str())
            .collect()
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.files.len(),
            db_duplicates: self.db_duplicates.len(),
            disk_duplicates: self.disk_duplicates.len(),
            ..Default::default()
        };

        for file in self.files.values() {
            match file.outcome {
                ReconciliationOutcome::Equal => summary.equal += 1,
                ReconciliationOutcome::DbOnly => summary.db_only += 1,
                ReconciliationOutcome::DiskOnly => summary.disk_only += 1,
                ReconciliationOutcome::PathMismatch => summary.path_mismatch += 1,
                ReconciliationOutcome::SizeMismatch => summary.size_mismatch += 1,
                ReconciliationOutcome::HashMismatch => summary.hash_mismatch += 1,
            }
        }

        summary
    }

    /// No name differs between catalog and disk
    pub fn is_clean(&self) -> bool {
        self.files.values().all(|file| !file.outcome.is_difference())
    }

    /// Either side recorded a logical name more than once
    pub fn has_duplicates(&self) -> bool {
        !self.db_duplicates.is_empty() || !self.disk_duplicates.is_empty()
    }

    /// Entries selected by `filter`, sorted by name
    pub fn filter(&self, filter: &OutcomeFilter) -> Vec<&ReconciledFile> {
        self.files
            .values()
            .filter(|file| filter.matches(file.outcome))
            .collect()
    }
}

/// Selects which outcomes a presentation layer shows
#[derive(Debug, Clone)]
pub struct OutcomeFilter {
    pub include_equal: bool,
    pub include_db_only: bool,
    pub include_disk_only: bool,
    pub include_path_mismatch: bool,
    pub include_size_mismatch: bool,
    pub include_hash_mismatch: bool,
}

impl Default for OutcomeFilter {
    fn default() -> Self {
        Self::differences_only()
    }
}

impl OutcomeFilter {
    /// Every outcome
    pub fn all() -> Self {
        Self {
            include_equal: true,
            include_db_only: true,
            include_disk_only: true,
            include_path_mismatch: true,
            include_size_mismatch: true,
            include_hash_mismatch: true,
        }
    }

    /// Everything except `Equal`
    pub fn differences_only() -> Self {
        Self {
            include_equal: false,
            ..Self::all()
        }
    }

    /// Names present on both sides that disagree
    pub fn mismatches_only() -> Self {
        Self {
            include_equal: false,
            include_db_only: false,
            include_disk_only: false,
            ..Self::all()
        }
    }

    pub fn matches(&self, outcome: ReconciliationOutcome) -> bool {
        match outcome {
            ReconciliationOutcome::Equal => self.include_equal,
            ReconciliationOutcome::DbOnly => self.include_db_only,
            ReconciliationOutcome::DiskOnly => self.include_disk_only,
            ReconciliationOutcome::PathMismatch => self.include_path_mismatch,
            ReconciliationOutcome::SizeMismatch => self.include_size_mismatch,
            ReconciliationOutcome::HashMismatch => self.include_hash_mismatch,
        }
    }
}

/// Comparator between catalog fingerprints and disk fingerprints
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    options: CompareOptions,
}

impl ReconciliationEngine {
    pub fn new(options: CompareOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> CompareOptions {
        self.options
    }

    /// Classify every name seen on either side
    pub fn compare(
        &self,
        db_fingerprints: &FingerprintMap,
        disk_fingerprints: &FingerprintMap,
        db_duplicates: &DuplicateMap,
        disk_duplicates: &DuplicateMap,
    ) -> ReconciliationReport {
        let mut files = BTreeMap::new();

        for (name, db) in db_fingerprints {
            let disk = disk_fingerprints.get(name);
            let outcome = match disk {
                Some(disk) => self.classify(db, disk),
                None => ReconciliationOutcome::DbOnly,
            };
            files.insert(
                name.clone(),
                ReconciledFile {
                    logical_name: name.clone(),
                    outcome,
                    db: Some(db.clone()),
                    disk: disk.cloned(),
                },
            );
        }

        for (name, disk) in disk_fingerprints {
            if db_fingerprints.contains_key(name) {
                continue;
            }
            files.insert(
                name.clone(),
                ReconciledFile {
                    logical_name: name.clone(),
                    outcome: ReconciliationOutcome::DiskOnly,
                    db: None,
                    disk: Some(disk.clone()),
                },
            );
        }

        let report = ReconciliationReport {
            files,
            db_duplicates: db_duplicates.clone(),
            disk_duplicates: disk_duplicates.clone(),
            options: self.options,
        };

        debug!("Reconciliation summary: {:?}", report.summary());
        report
    }

    /// Outcome for a name present on both sides
    ///
    /// Path is decided first, then size, then hash; the first mismatch is
    /// the only one reported. A size or digest unknown on either side
    /// cannot be confirmed and counts as a mismatch when checked.
    pub fn classify(&self, db: &FileFingerprint, disk: &FileFingerprint) -> ReconciliationOutcome {
        if !db.same_path(disk) {
            return ReconciliationOutcome::PathMismatch;
        }

        if self.options.check_size {
            match (db.size_bytes, disk.size_bytes) {
                (Some(a), Some(b)) if a == b => {}
                _ => return ReconciliationOutcome::SizeMismatch,
            }
        }

        if self.options.check_hash {
            match (&db.content_hash, &disk.content_hash) {
                (Some(a), Some(b)) if a == b => {}
                _ => return ReconciliationOutcome::HashMismatch,
            }
        }

        ReconciliationOutcome::Equal
    }
}

/// Compare catalog and disk fingerprints in one call
pub fn compare(
    db_fingerprints: &FingerprintMap,
    disk_fingerprints: &FingerprintMap,
    db_duplicates: &DuplicateMap,
    disk_duplicates: &DuplicateMap,
    check_size: bool,
    check_hash: bool,
) -> ReconciliationReport {
    ReconciliationEngine::new(CompareOptions {
        check_size,
        check_hash,
    })
    .compare(db_fingerprints, disk_fingerprints, db_duplicates, disk_duplicates)
}
