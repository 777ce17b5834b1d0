//! File records shared by the scanner, the catalog reader and the resolver

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::compression::CompressionTable;

/// One representative fingerprint per logical name
pub type FingerprintMap = BTreeMap<String, FileFingerprint>;

/// Every occurrence of each logical name seen more than once
pub type DuplicateMap = BTreeMap<String, Vec<FileFingerprint>>;

/// One physical occurrence of a file, on disk or in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// File name without compression suffix
    pub logical_name: String,
    /// Compression suffix, `None` when uncompressed
    pub compression: Option<String>,
    /// Directory relative to the archive root
    pub path: String,
    /// Size in bytes, always known for files found on disk
    pub size_bytes: Option<u64>,
    /// Lowercase hex digest, only present when verification was requested
    pub content_hash: Option<String>,
}

impl FileFingerprint {
    /// Create a fingerprint without size or hash
    pub fn new(
        logical_name: impl Into<String>,
        compression: Option<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            compression,
            path: normalize_path(&path.into()),
            size_bytes: None,
            content_hash: None,
        }
    }

    /// Set the size
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// Set the content hash
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Physical file name, compression suffix included
    pub fn filename(&self) -> String {
        CompressionTable::join(&self.logical_name, self.compression.as_deref())
    }

    /// Path of the file relative to the archive root
    pub fn relative_path(&self) -> String {
        if self.path.is_empty() {
            self.filename()
        } else {
            format!("{}/{}", self.path, self.filename())
        }
    }

    /// Absolute location of the file below a filesystem root
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        if !self.path.is_empty() {
            full.push(&self.path);
        }
        full.push(self.filename());
        full
    }

    /// Whether two fingerprints describe the same directory
    pub fn same_path(&self, other: &FileFingerprint) -> bool {
        normalize_path(&self.path) == normalize_path(&other.path)
    }
}

/// A storage archive: a name and the root every relative path hangs from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub name: String,
    /// Absolute filesystem path or URL prefix
    pub root: String,
}

impl ArchiveLocation {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Whether the root is a URL rather than a filesystem path
    pub fn is_remote(&self) -> bool {
        self.root.starts_with("http://") || self.root.starts_with("https://")
    }

    /// Full location of a file in this archive, as a path or URL string
    pub fn locate(&self, fingerprint: &FileFingerprint) -> String {
        let root = self.root.trim_end_matches('/');
        format!("{}/{}", root, fingerprint.relative_path())
    }
}

/// Split per-name occurrence lists into representatives and duplicates
///
/// The representative of each name is its last occurrence; every name seen
/// more than once keeps all of its occurrences, the representative included.
pub fn collapse_occurrences(
    occurrences: BTreeMap<String, Vec<FileFingerprint>>,
) -> (FingerprintMap, DuplicateMap) {
    let mut fingerprints = FingerprintMap::new();
    let mut duplicates = DuplicateMap::new();

    for (name, copies) in occurrences {
        if copies.len() > 1 {
            duplicates.insert(name.clone(), copies.clone());
        }
        if let Some(last) = copies.into_iter().last() {
            fingerprints.insert(name, last);
        }
    }

    (fingerprints, duplicates)
}

/// Normalize a stored directory: trailing slashes and a leading `./` are
/// dropped, `.` becomes the empty root path
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}
