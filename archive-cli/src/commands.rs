//! Subcommand implementations and their output

use anyhow::{bail, Context as _, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, warn};

use archive::config::ArchiveConfig;
use archive::catalog::CatalogConnection;
use archive::{
    build_backend, reconcile_archive, ArchiveLocation, CatalogWriter, CompareOptions, CompressionPreference,
    DiskScanner, FileFingerprint, FingerprintMap, HashAlgorithm, IngestOptions, LocationResolver, OutcomeFilter,
    ReconciliationReport, SqliteCatalog, TransferOrchestrator, TransferSummary,
};

use crate::Selection;

/// Settings shared by every subcommand
pub struct Context {
    pub config: ArchiveConfig,
    pub json: bool,
}

#[derive(Serialize)]
struct Resolution<'a> {
    archive: &'a str,
    resolved: &'a FingerprintMap,
    missing: &'a BTreeSet<String>,
}

impl Context {
    fn open_catalog(&self) -> Result<SqliteCatalog> {
        let path = &self.config.catalog.path;
        SqliteCatalog::open(path).with_context(|| format!("opening catalog {}", path.display()))
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn init(&self, archive: &str, root: &str) -> Result<ExitCode> {
        let path = &self.config.catalog.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }
        let catalog = SqliteCatalog::create(path).with_context(|| format!("creating catalog {}", path.display()))?;

        let location = ArchiveLocation::new(archive, root);
        CatalogWriter::new(&catalog).register_archive(&location)?;
        catalog.commit()?;

        info!("Archive '{}' registered at {} in {}", archive, root, path.display());
        if self.json {
            self.print_json(&location)?;
        } else {
            println!("{} -> {}", archive, root);
        }
        Ok(ExitCode::SUCCESS)
    }

    pub fn scan(&self, root: &Path, subpath: &str, hash: bool) -> Result<ExitCode> {
        let scanner = DiskScanner::new(self.config.scan.clone(), self.config.compression_table()?);
        let result = scanner
            .scan_with_hash(root, subpath, hash || self.config.scan.want_hash)
            .with_context(|| format!("scanning {}", root.display()))?;

        if self.json {
            self.print_json(&result)?;
        } else {
            for fp in result.fingerprints.values() {
                let size = fp.size_bytes.map(|s| s.to_string()).unwrap_or_default();
                let digest = fp.content_hash.as_deref().unwrap_or("");
                println!("{:<60} {:>12} {}", fp.relative_path(), size, digest);
            }
            for (name, copies) in &result.duplicates {
                let paths: Vec<String> = copies.iter().map(|fp| fp.relative_path()).collect();
                println!("duplicate {}: {}", name, paths.join(", "));
            }
            println!(
                "{} files, {} bytes, {} skipped, {} duplicated names",
                result.stats.files, result.stats.bytes, result.stats.skipped, result.stats.duplicate_names
            );
        }
        Ok(ExitCode::SUCCESS)
    }

    pub fn compare(
        &self,
        archive: &str,
        subpath: &str,
        check_size: bool,
        check_hash: bool,
        all: bool,
    ) -> Result<ExitCode> {
        let catalog = self.open_catalog()?;
        let report = reconcile_archive(
            &catalog,
            archive,
            subpath,
            self.config.scan.clone(),
            self.config.compression_table()?,
            CompareOptions { check_size, check_hash },
        )
        .with_context(|| format!("reconciling archive '{}'", archive))?;

        let filter = if all {
            OutcomeFilter::all()
        } else {
            OutcomeFilter::differences_only()
        };

        if self.json {
            self.print_json(&report)?;
        } else {
            print_report(&report, &filter);
        }

        Ok(if report.is_clean() && !report.has_duplicates() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        })
    }

    pub fn resolve(&self, selection: &Selection) -> Result<ExitCode> {
        let catalog = self.open_catalog()?;
        let names = selected_names(selection)?;
        let (location, resolved) = self.resolve_selection(&catalog, selection, &names)?;
        let missing = LocationResolver::<SqliteCatalog>::missing(names.iter().map(String::as_str), &resolved);

        if self.json {
            self.print_json(&Resolution {
                archive: &location.name,
                resolved: &resolved,
                missing: &missing,
            })?;
        } else {
            for fp in resolved.values() {
                println!("{}\t{}", fp.logical_name, location.locate(fp));
            }
            for name in &missing {
                println!("{}\tMISSING", name);
            }
        }

        Ok(if missing.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        })
    }

    pub fn fetch(&self, selection: &Selection, dest: &Path) -> Result<ExitCode> {
        let catalog = self.open_catalog()?;
        let names = selected_names(selection)?;
        let (location, resolved) = self.resolve_selection(&catalog, selection, &names)?;

        let missing = LocationResolver::<SqliteCatalog>::missing(names.iter().map(String::as_str), &resolved);
        for name in &missing {
            warn!("'{}' has no stored variant in archive '{}'", name, location.name);
        }

        let backend = build_backend(&self.config.transfer)?;
        let summary = TransferOrchestrator::new(&catalog, backend.as_ref())
            .fetch(&resolved, &location, dest)
            .with_context(|| format!("fetching into {}", dest.display()))?;

        self.print_summary(&summary)?;
        Ok(if summary.is_complete() && missing.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        })
    }

    pub fn ingest(
        &self,
        archive: &str,
        source: &Path,
        subpath: &str,
        file_type: Option<String>,
        attempt_id: Option<i64>,
    ) -> Result<ExitCode> {
        let catalog = self.open_catalog()?;
        let location = LocationResolver::new(&catalog)
            .archive(archive)
            .with_context(|| format!("looking up archive '{}'", archive))?;

        // The catalog records MD5 digests
        let mut scan_options = self.config.scan.clone();
        scan_options.hash_algorithm = HashAlgorithm::Md5;
        let scanner = DiskScanner::new(scan_options, self.config.compression_table()?);
        let scan = scanner
            .scan_with_hash(source, subpath, true)
            .with_context(|| format!("scanning {}", source.display()))?;
        if !scan.duplicates.is_empty() {
            let names: Vec<&String> = scan.duplicates.keys().collect();
            bail!("job directory holds several copies of {:?}; resolve them before ingesting", names);
        }

        let files: Vec<_> = scan.fingerprints.into_values().collect();
        let backend = build_backend(&self.config.transfer)?;
        let summary = TransferOrchestrator::new(&catalog, backend.as_ref())
            .with_options(IngestOptions { file_type, attempt_id })
            .ingest(&files, source, &location)
            .with_context(|| format!("ingesting into archive '{}'", archive))?;

        self.print_summary(&summary)?;
        Ok(if summary.is_complete() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        })
    }

    fn resolve_selection(
        &self,
        catalog: &SqliteCatalog,
        selection: &Selection,
        names: &BTreeSet<String>,
    ) -> Result<(ArchiveLocation, FingerprintMap)> {
        let order = match &selection.order {
            Some(text) => CompressionPreference::parse(text)?,
            None => self.config.compression.order.clone(),
        };

        let resolver = LocationResolver::new(catalog).with_batch_size(self.config.catalog.batch_size);
        let location = resolver.archive(&selection.archive)?;
        let resolved = resolver
            .resolve(names, &selection.archive, &order)
            .with_context(|| format!("resolving names in archive '{}'", selection.archive))?;
        Ok((location, resolved))
    }

    fn print_summary(&self, summary: &TransferSummary) -> Result<()> {
        if self.json {
            return self.print_json(summary);
        }

        println!(
            "{} transferred, {} registered, {} already registered, {} failed",
            summary.transferred,
            summary.registered,
            summary.already_registered.len(),
            summary.failed.len()
        );
        for failure in &summary.failed {
            println!(
                "FAILED {} -> {}: {}",
                failure.source,
                failure.destination,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }
}

/// Names from the command line and the names file, deduplicated
fn selected_names(selection: &Selection) -> Result<BTreeSet<String>> {
    let mut names: BTreeSet<String> = selection.names.iter().cloned().collect();

    if let Some(path) = &selection.names_file {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        names.extend(parse_names(&content));
    }

    if names.is_empty() {
        bail!("no file names given");
    }
    Ok(names)
}

fn parse_names(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

fn print_report(report: &ReconciliationReport, filter: &OutcomeFilter) {
    for file in report.filter(filter) {
        let location = file
            .db
            .as_ref()
            .or(file.disk.as_ref())
            .map(|fp| fp.relative_path())
            .unwrap_or_default();
        match (&file.db, &file.disk) {
            (Some(db), Some(disk)) if file.outcome.is_difference() => println!(
                "{:<14} {} (catalog {}, disk {})",
                file.outcome,
                file.logical_name,
                describe(db),
                describe(disk)
            ),
            _ => println!("{:<14} {}", file.outcome, location),
        }
    }

    for (name, copies) in &report.db_duplicates {
        println!("{:<14} {} ({} catalog rows)", "db_duplicate", name, copies.len());
    }
    for (name, copies) in &report.disk_duplicates {
        let paths: Vec<String> = copies.iter().map(|fp| fp.relative_path()).collect();
        println!("{:<14} {} ({})", "disk_duplicate", name, paths.join(", "));
    }

    let summary = report.summary();
    println!(
        "{} names: {} equal, {} db_only, {} disk_only, {} path_mismatch, {} size_mismatch, {} hash_mismatch",
        summary.total,
        summary.equal,
        summary.db_only,
        summary.disk_only,
        summary.path_mismatch,
        summary.size_mismatch,
        summary.hash_mismatch
    );
}

fn describe(fp: &FileFingerprint) -> String {
    let mut text = fp.relative_path();
    if let Some(size) = fp.size_bytes {
        text.push_str(&format!(" {}B", size));
    }
    if let Some(digest) = &fp.content_hash {
        text.push_str(&format!(" {}", digest));
    }
    text
}
