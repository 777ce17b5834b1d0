//! Location resolution: picks, per logical name, the stored variant an
//! operator's compression preference asks for

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::catalog::reader::{fingerprint_from_row, FILE_COLUMNS, FILE_SOURCE};
use crate::catalog::{CatalogConnection, CatalogReader, Value};
use crate::compression::CompressionPreference;
use crate::error::{ArchiveError, Result};
use crate::fingerprint::{ArchiveLocation, FileFingerprint, FingerprintMap};

/// Names looked up per catalog query
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Resolver bound to a caller-owned catalog connection
pub struct LocationResolver<'a, C: CatalogConnection + ?Sized> {
    conn: &'a C,
    batch_size: usize,
}

impl<'a, C: CatalogConnection + ?Sized> LocationResolver<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override how many names go into one query
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The archive a resolution runs against; errors when the catalog has
    /// no row or no root for it
    pub fn archive(&self, archive_name: &str) -> Result<ArchiveLocation> {
        match CatalogReader::new(self.conn).archive_location(archive_name)? {
            Some(location) if !location.root.is_empty() => Ok(location),
            _ => Err(ArchiveError::UnknownArchive(archive_name.to_string())),
        }
    }

    /// Resolve each logical name to its most preferred stored variant
    ///
    /// Names with no variant listed in `compress_order` are left out of the
    /// result; see [`LocationResolver::missing`].
    pub fn resolve<I, S>(
        &self,
        logical_names: I,
        archive_name: &str,
        compress_order: &CompressionPreference,
    ) -> Result<FingerprintMap>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.archive(archive_name)?;

        let requested: BTreeSet<String> = logical_names
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        let variants = self.stored_variants(&requested, archive_name)?;
        let mut resolved = FingerprintMap::new();

        for (name, candidates) in &variants {
            if let Some(choice) = pick_variant(name, candidates, compress_order) {
                resolved.insert(name.clone(), choice.clone());
            }
        }

        info!(
            "Resolved {} of {} files in archive '{}' (order {})",
            resolved.len(),
            requested.len(),
            archive_name,
            compress_order
        );

        Ok(resolved)
    }

    /// Requested names absent from a resolution result
    pub fn missing<'n, I>(requested: I, resolved: &FingerprintMap) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'n str>,
    {
        requested
            .into_iter()
            .filter(|name| !resolved.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    /// Every stored variant of the requested names, in catalog order
    fn stored_variants(
        &self,
        requested: &BTreeSet<String>,
        archive_name: &str,
    ) -> Result<BTreeMap<String, Vec<FileFingerprint>>> {
        let names: Vec<&String> = requested.iter().collect();
        let mut variants: BTreeMap<String, Vec<FileFingerprint>> = BTreeMap::new();

        for batch in names.chunks(self.batch_size) {
            let placeholders: Vec<String> = (0..batch.len()).map(|i| format!("?{}", i + 2)).collect();
            let sql = format!(
                "SELECT {} {} WHERE af.archive_name = ?1 AND af.filename IN ({}) ORDER BY af.id",
                FILE_COLUMNS,
                FILE_SOURCE,
                placeholders.join(", ")
            );

            let mut params = Vec::with_capacity(batch.len() + 1);
            params.push(Value::from(archive_name));
            params.extend(batch.iter().map(|name| Value::from(name.as_str())));

            let rows = self.conn.execute(&sql, &params)?;
            debug!("Variant lookup: {} names, {} rows", batch.len(), rows.len());

            for row in &rows {
                let fingerprint = fingerprint_from_row(row)?;
                variants
                    .entry(fingerprint.logical_name.clone())
                    .or_default()
                    .push(fingerprint);
            }
        }

        Ok(variants)
    }
}

/// First listed compression that has a stored variant wins
fn pick_variant<'v>(
    name: &str,
    candidates: &'v [FileFingerprint],
    compress_order: &CompressionPreference,
) -> Option<&'v FileFingerprint> {
    for wanted in compress_order.order() {
        let matching: Vec<&FileFingerprint> = candidates
            .iter()
            .filter(|fp| fp.compression.as_deref() == wanted.as_deref())
            .collect();

        if matching.len() > 1 {
            warn!(
                "'{}' has {} catalog rows for the same variant, using the last",
                name,
                matching.len()
            );
        }

        if let Some(choice) = matching.last() {
            return Some(choice);
        }
    }
    None
}
