//! Archive tree scanning using walkdir
//!
//! Produces one fingerprint per logical file name plus every occurrence of
//! names found more than once. Unreadable entries are skipped and counted,
//! never fatal.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::compression::CompressionTable;
use crate::error::{ArchiveError, Result};
use crate::fingerprint::{collapse_occurrences, normalize_path, FileFingerprint, FingerprintMap, DuplicateMap};

/// Options for archive scanning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Follow symbolic links; unfollowed links count as skipped
    pub follow_links: bool,
    /// Collect content hashes during scan
    pub want_hash: bool,
    /// Hash algorithm to use when want_hash is true
    pub hash_algorithm: HashAlgorithm,
    /// Read buffer size for hashing
    pub buffer_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_links: true,
            want_hash: false,
            hash_algorithm: HashAlgorithm::Md5,
            buffer_size: 64 * 1024,
        }
    }
}

/// Hash algorithms supported for content verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5, the digest recorded in the catalog
    Md5,
    /// SHA-256 hash
    Sha256,
    /// Blake3 hash (faster)
    Blake3,
}

/// Counters gathered during one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Regular files fingerprinted
    pub files: usize,
    /// Total bytes of fingerprinted files
    pub bytes: u64,
    /// Entries skipped because they could not be read
    pub skipped: usize,
    /// Logical names with more than one physical occurrence
    pub duplicate_names: usize,
}

/// Result of scanning one archive subtree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Last occurrence of every logical name, in traversal order
    pub fingerprints: FingerprintMap,
    /// Every occurrence of names seen more than once
    pub duplicates: DuplicateMap,
    pub stats: ScanStats,
}

/// Archive scanner
pub struct DiskScanner {
    options: ScanOptions,
    compression: CompressionTable,
}

impl DiskScanner {
    /// Create a new scanner with options and a suffix table
    pub fn new(options: ScanOptions, compression: CompressionTable) -> Self {
        Self {
            options,
            compression,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan `root/subpath`, hashing according to the scanner options
    pub fn scan(&self, root: &Path, subpath: &str) -> Result<ScanResult> {
        self.scan_with_hash(root, subpath, self.options.want_hash)
    }

    /// Scan `root/subpath`, overriding whether hashes are computed
    pub fn scan_with_hash(&self, root: &Path, subpath: &str, want_hash: bool) -> Result<ScanResult> {
        if !root.is_dir() {
            return Err(ArchiveError::path_not_found(root));
        }

        let subpath = normalize_path(subpath);
        if Path::new(&subpath)
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir))
        {
            return Err(ArchiveError::invalid_filter(format!(
                "subpath '{}' must stay below the scan root",
                subpath
            )));
        }

        let start = if subpath.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&subpath)
        };

        if !start.is_dir() {
            return Err(ArchiveError::path_not_found(start));
        }

        debug!(root = %root.display(), subpath = %subpath, want_hash, "Scanning archive tree");

        let mut occurrences: BTreeMap<String, Vec<FileFingerprint>> = BTreeMap::new();
        let mut stats = ScanStats::default();

        let walker = WalkDir::new(&start)
            .follow_links(self.options.follow_links)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    stats.skipped += 1;
                    continue;
                }
            };

            if entry.file_type().is_symlink() {
                // only reachable with follow_links off
                warn!("Skipping symbolic link '{}'", entry.path().display());
                stats.skipped += 1;
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            match self.fingerprint(root, entry.path(), want_hash) {
                Ok(fingerprint) => {
                    stats.files += 1;
                    stats.bytes += fingerprint.size_bytes.unwrap_or(0);
                    occurrences
                        .entry(fingerprint.logical_name.clone())
                        .or_default()
                        .push(fingerprint);
                }
                Err(e) => {
                    warn!("Skipping '{}': {}", entry.path().display(), e);
                    stats.skipped += 1;
                }
            }
        }

        let (fingerprints, duplicates) = collapse_occurrences(occurrences);
        stats.duplicate_names = duplicates.len();

        for (name, copies) in &duplicates {
            warn!(
                "Logical name '{}' found {} times on disk, keeping '{}'",
                name,
                copies.len(),
                fingerprints
                    .get(name)
                    .map(|fp| fp.relative_path())
                    .unwrap_or_default()
            );
        }

        info!(
            "Scanned {}: {} files, {} bytes, {} skipped, {} duplicated names",
            start.display(),
            stats.files,
            stats.bytes,
            stats.skipped,
            stats.duplicate_names
        );

        Ok(ScanResult {
            fingerprints,
            duplicates,
            stats,
        })
    }

    /// Build the fingerprint of one regular file below `root`
    fn fingerprint(&self, root: &Path, path: &Path, want_hash: bool) -> io::Result<FileFingerprint> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"))?;

        let directory = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root).ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file lies outside the scan root"))?;
        let directory = directory
            .to_str()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "directory is not valid UTF-8"))?
            .replace(std::path::MAIN_SEPARATOR, "/");

        let metadata = std::fs::metadata(path)?;
        let (logical_name, compression) = self.compression.split(filename);

        let mut fingerprint =
            FileFingerprint::new(logical_name, compression, directory).with_size(metadata.len());

        if want_hash {
            let hash = hash_file(path, self.options.hash_algorithm, self.options.buffer_size)?;
            fingerprint = fingerprint.with_hash(hash);
        }

        Ok(fingerprint)
    }
}

/// Compute the hex digest of a file by streaming fixed-size chunks
pub fn hash_file(path: &Path, algorithm: HashAlgorithm, buffer_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; buffer_size.max(1)];

    match algorithm {
        HashAlgorithm::Md5 => {
            use md5::{Digest, Md5};
            let mut hasher = Md5::new();
            stream_into(&mut file, &mut buffer, |chunk| hasher.update(chunk))?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            stream_into(&mut file, &mut buffer, |chunk| hasher.update(chunk))?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            stream_into(&mut file, &mut buffer, |chunk| {
                hasher.update(chunk);
            })?;
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

fn stream_into(file: &mut File, buffer: &mut [u8], mut update: impl FnMut(&[u8])) -> io::Result<()> {
    loop {
        let bytes_read = file.read(buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        update(&buffer[..bytes_read]);
    }
}
