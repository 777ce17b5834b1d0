//! Write side of the catalog: archive and file registration
//!
//! Nothing here commits; callers decide where their transaction ends.

use tracing::debug;

use super::{CatalogConnection, Value};
use crate::error::Result;
use crate::fingerprint::{ArchiveLocation, FileFingerprint};

/// Catalog writer bound to a caller-owned connection
pub struct CatalogWriter<'a, C: CatalogConnection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: CatalogConnection + ?Sized> CatalogWriter<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Add an archive or move an existing one to a new root
    pub fn register_archive(&self, location: &ArchiveLocation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO archive (name, root) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET root = excluded.root",
            &[Value::from(location.name.as_str()), Value::from(location.root.as_str())],
        )?;
        debug!("Registered archive '{}' at {}", location.name, location.root);
        Ok(())
    }

    /// Whether this exact variant is already recorded in the archive
    pub fn is_registered(&self, archive_name: &str, fingerprint: &FileFingerprint) -> Result<bool> {
        let rows = self.conn.execute(
            "SELECT 1 AS present FROM archive_file \
             WHERE archive_name = ?1 AND filename = ?2 AND compression IS ?3",
            &[
                Value::from(archive_name),
                Value::from(fingerprint.logical_name.as_str()),
                Value::from(fingerprint.compression.as_deref()),
            ],
        )?;
        Ok(!rows.is_empty())
    }

    /// Record a file variant in an archive
    ///
    /// The artifact row (size, digest, type, attempt) is created when missing
    /// and has its unknown fields filled otherwise. Returns `false` when the
    /// archive already lists the variant.
    pub fn register_file(
        &self,
        archive_name: &str,
        fingerprint: &FileFingerprint,
        file_type: Option<&str>,
        attempt_id: Option<i64>,
    ) -> Result<bool> {
        self.upsert_artifact(fingerprint, file_type, attempt_id)?;

        if self.is_registered(archive_name, fingerprint)? {
            debug!(
                "'{}' already registered in archive '{}'",
                fingerprint.filename(),
                archive_name
            );
            return Ok(false);
        }

        self.conn.execute(
            "INSERT INTO archive_file (archive_name, filename, compression, path) \
             VALUES (?1, ?2, ?3, ?4)",
            &[
                Value::from(archive_name),
                Value::from(fingerprint.logical_name.as_str()),
                Value::from(fingerprint.compression.as_deref()),
                Value::from(fingerprint.path.as_str()),
            ],
        )?;
        debug!(
            "Registered '{}' in archive '{}' at '{}'",
            fingerprint.filename(),
            archive_name,
            fingerprint.path
        );
        Ok(true)
    }

    fn upsert_artifact(
        &self,
        fingerprint: &FileFingerprint,
        file_type: Option<&str>,
        attempt_id: Option<i64>,
    ) -> Result<()> {
        let size = fingerprint
            .size_bytes
            .and_then(|size| i64::try_from(size).ok());
        let key = [
            Value::from(fingerprint.logical_name.as_str()),
            Value::from(fingerprint.compression.as_deref()),
        ];

        let existing = self.conn.execute(
            "SELECT id FROM artifact WHERE filename = ?1 AND compression IS ?2",
            &key,
        )?;

        match existing.first().and_then(|row| row.integer("id")) {
            Some(id) => {
                self.conn.execute(
                    "UPDATE artifact SET filesize = COALESCE(filesize, ?2), \
                     md5sum = COALESCE(md5sum, ?3), filetype = COALESCE(filetype, ?4), \
                     attempt_id = COALESCE(attempt_id, ?5) WHERE id = ?1",
                    &[
                        Value::Integer(id),
                        Value::from(size),
                        Value::from(fingerprint.content_hash.as_deref()),
                        Value::from(file_type),
                        Value::from(attempt_id),
                    ],
                )?;
            }
            None => {
                self.conn.execute(
                    "INSERT INTO artifact (filename, compression, filesize, md5sum, filetype, attempt_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    &[
                        key[0].clone(),
                        key[1].clone(),
                        Value::from(size),
                        Value::from(fingerprint.content_hash.as_deref()),
                        Value::from(file_type),
                        Value::from(attempt_id),
                    ],
                )?;
            }
        }

        Ok(())
    }
}
