//! Read side of the catalog: archive metadata and per-archive file listings

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CatalogConnection, CatalogError, Row, Value};
use crate::error::{ArchiveError, Result};
use crate::fingerprint::{
    collapse_occurrences, normalize_path, ArchiveLocation, DuplicateMap, FileFingerprint,
    FingerprintMap,
};

/// Columns selected for every archive file listing
pub(crate) const FILE_COLUMNS: &str = "af.filename AS filename, af.compression AS compression, \
     af.path AS path, a.filesize AS filesize, a.md5sum AS md5sum";

/// Archive rows joined with their artifact row, when one exists
pub(crate) const FILE_SOURCE: &str = "FROM archive_file af \
     LEFT JOIN artifact a ON a.filename = af.filename AND a.compression IS af.compression";

/// Primary filter of a catalog listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileQuery {
    /// Files whose directory is `subpath` or lies below it; empty for all
    Subpath(String),
    /// Files produced by one processing attempt, optionally of one type
    Attempt {
        attempt_id: i64,
        file_type: Option<String>,
    },
}

impl FileQuery {
    /// Build a query from loose filters
    ///
    /// Exactly one of `subpath` and `attempt_id` must be given, and
    /// `file_type` is only accepted together with `attempt_id`.
    pub fn from_filters(
        subpath: Option<&str>,
        attempt_id: Option<i64>,
        file_type: Option<&str>,
    ) -> Result<Self> {
        match (subpath, attempt_id, file_type) {
            (Some(subpath), None, None) => Ok(FileQuery::Subpath(subpath.to_string())),
            (None, Some(attempt_id), file_type) => Ok(FileQuery::Attempt {
                attempt_id,
                file_type: file_type.map(str::to_string),
            }),
            (None, None, _) => Err(ArchiveError::invalid_filter(
                "either a subpath or an attempt id is required",
            )),
            (Some(_), Some(_), _) => Err(ArchiveError::invalid_filter(
                "subpath and attempt id are mutually exclusive",
            )),
            (Some(_), None, Some(_)) => Err(ArchiveError::invalid_filter(
                "file type can only narrow an attempt id query",
            )),
        }
    }
}

/// Files recorded in the catalog for one archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFiles {
    /// Last row of every logical name, in catalog order
    pub fingerprints: FingerprintMap,
    /// Every row of names recorded more than once
    pub duplicates: DuplicateMap,
}

/// Catalog reader bound to a caller-owned connection
pub struct CatalogReader<'a, C: CatalogConnection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: CatalogConnection + ?Sized> CatalogReader<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Every archive known to the catalog
    pub fn archives(&self) -> Result<Vec<ArchiveLocation>> {
        let rows = self
            .conn
            .execute("SELECT name, root FROM archive ORDER BY name", &[])?;

        rows.iter()
            .map(|row| {
                Ok(ArchiveLocation::new(
                    row.require_text("name")?,
                    row.text("root").unwrap_or_default(),
                ))
            })
            .collect()
    }

    /// Look up one archive; `None` when the catalog has no such row
    pub fn archive_location(&self, name: &str) -> Result<Option<ArchiveLocation>> {
        let rows = self.conn.execute(
            "SELECT name, root FROM archive WHERE name = ?1",
            &[Value::from(name)],
        )?;

        Ok(rows.first().map(|row| {
            ArchiveLocation::new(name, row.text("root").unwrap_or_default())
        }))
    }

    /// List archive files using loose filters, see [`FileQuery::from_filters`]
    pub fn get_files(
        &self,
        archive_name: &str,
        subpath_filter: Option<&str>,
        attempt_id: Option<i64>,
        file_type: Option<&str>,
    ) -> Result<CatalogFiles> {
        let query = FileQuery::from_filters(subpath_filter, attempt_id, file_type)?;
        self.files(archive_name, &query)
    }

    /// List archive files matching `query`
    pub fn files(&self, archive_name: &str, query: &FileQuery) -> Result<CatalogFiles> {
        if self.archive_location(archive_name)?.is_none() {
            return Err(ArchiveError::InvalidArchive(archive_name.to_string()));
        }

        let rows = match query {
            FileQuery::Subpath(subpath) => {
                // Stored paths may carry "./" or trailing slashes, so the
                // subtree is matched after normalization rather than in SQL
                let subpath = normalize_path(subpath);
                let sql = format!(
                    "SELECT {} {} WHERE af.archive_name = ?1 ORDER BY af.id",
                    FILE_COLUMNS, FILE_SOURCE
                );
                let rows = self.conn.execute(&sql, &[Value::from(archive_name)])?;

                rows.into_iter()
                    .filter(|row| {
                        row.text("path")
                            .map(|path| within_subpath(&normalize_path(path), &subpath))
                            .unwrap_or(false)
                    })
                    .collect::<Vec<Row>>()
            }
            FileQuery::Attempt {
                attempt_id,
                file_type,
            } => {
                let mut sql = format!(
                    "SELECT {} {} WHERE af.archive_name = ?1 AND a.attempt_id = ?2",
                    FILE_COLUMNS, FILE_SOURCE
                );
                let mut params = vec![Value::from(archive_name), Value::Integer(*attempt_id)];
                if let Some(file_type) = file_type {
                    sql.push_str(" AND a.filetype = ?3");
                    params.push(Value::from(file_type.as_str()));
                }
                sql.push_str(" ORDER BY af.id");
                self.conn.execute(&sql, &params)?
            }
        };

        debug!("Catalog returned {} rows for archive '{}'", rows.len(), archive_name);

        let mut occurrences: BTreeMap<String, Vec<FileFingerprint>> = BTreeMap::new();
        for row in &rows {
            let fingerprint = fingerprint_from_row(row)?;
            occurrences
                .entry(fingerprint.logical_name.clone())
                .or_default()
                .push(fingerprint);
        }

        let (fingerprints, duplicates) = collapse_occurrences(occurrences);

        for (name, copies) in &duplicates {
            warn!(
                "Logical name '{}' has {} catalog rows in archive '{}', keeping the last",
                name,
                copies.len(),
                archive_name
            );
        }

        info!(
            "Catalog lists {} files ({} duplicated names) in archive '{}'",
            fingerprints.len(),
            duplicates.len(),
            archive_name
        );

        Ok(CatalogFiles {
            fingerprints,
            duplicates,
        })
    }
}

/// Convert a row selected with [`FILE_COLUMNS`] into a fingerprint
pub(crate) fn fingerprint_from_row(row: &Row) -> std::result::Result<FileFingerprint, CatalogError> {
    let mut fingerprint = FileFingerprint::new(
        row.require_text("filename")?,
        row.text("compression").map(str::to_string),
        row.text("path").unwrap_or_default(),
    );

    fingerprint.size_bytes = row
        .integer("filesize")
        .and_then(|size| u64::try_from(size).ok());
    fingerprint.content_hash = row.text("md5sum").map(str::to_string);

    Ok(fingerprint)
}

/// Whether `path` is `subpath` or one of its descendants, by whole segments
fn within_subpath(path: &str, subpath: &str) -> bool {
    subpath.is_empty()
        || path == subpath
        || path
            .strip_prefix(subpath)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}
