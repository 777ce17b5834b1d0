//! Compression suffix handling: splitting file names into logical name and
//! compression, and ordering compression variants by preference

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Suffixes recognized when no table is configured
pub const DEFAULT_SUFFIXES: &[&str] = &[".fz", ".gz", ".bz2"];

/// Ordered table of recognized compression suffixes
///
/// Matching always tries the longest suffix first, so a table holding both
/// `.gz` and `.tar.gz` strips `.tar.gz` from `x.tar.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionTable {
    suffixes: Vec<String>,
}

impl Default for CompressionTable {
    fn default() -> Self {
        let mut suffixes: Vec<String> = DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect();
        suffixes.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { suffixes }
    }
}

impl CompressionTable {
    /// Create a table from configured suffixes
    pub fn new<I, S>(suffixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table: Vec<String> = Vec::new();
        for suffix in suffixes {
            let suffix = suffix.into();
            if suffix.len() < 2 || !suffix.starts_with('.') {
                return Err(ArchiveError::config_error(format!(
                    "compression suffix '{}' must start with '.' and be non-empty",
                    suffix
                )));
            }
            if !table.contains(&suffix) {
                table.push(suffix);
            }
        }

        // Stable sort keeps the configured order among equal lengths
        table.sort_by(|a, b| b.len().cmp(&a.len()));

        Ok(Self { suffixes: table })
    }

    /// Recognized suffixes, longest first
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Whether `suffix` is a recognized compression suffix
    pub fn recognizes(&self, suffix: &str) -> bool {
        self.suffixes.iter().any(|s| s == suffix)
    }

    /// Split a file name into `(logical_name, compression)`
    ///
    /// A name consisting only of a suffix (".fz") is not stripped.
    pub fn split(&self, filename: &str) -> (String, Option<String>) {
        for suffix in &self.suffixes {
            if filename.len() > suffix.len() && filename.ends_with(suffix.as_str()) {
                let logical = &filename[..filename.len() - suffix.len()];
                return (logical.to_string(), Some(suffix.clone()));
            }
        }
        (filename.to_string(), None)
    }

    /// Rejoin a logical name and its compression into a file name
    pub fn join(logical_name: &str, compression: Option<&str>) -> String {
        match compression {
            Some(suffix) => format!("{}{}", logical_name, suffix),
            None => logical_name.to_string(),
        }
    }
}

/// Ordered list of compression variants, most preferred first
///
/// `None` stands for the uncompressed variant. The list is never empty and
/// never names the same variant twice. Serialized as a list of strings with
/// `"none"` for the uncompressed variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CompressionPreference {
    order: Vec<Option<String>>,
}

impl CompressionPreference {
    /// Build a preference, rejecting empty or repeating orders
    pub fn new(order: Vec<Option<String>>) -> Result<Self> {
        if order.is_empty() {
            return Err(ArchiveError::AmbiguousCompressionOrder(
                "compression order is empty".to_string(),
            ));
        }

        for (i, entry) in order.iter().enumerate() {
            if let Some(suffix) = entry {
                if !suffix.starts_with('.') || suffix.len() < 2 {
                    return Err(ArchiveError::AmbiguousCompressionOrder(format!(
                        "'{}' is not a compression suffix",
                        suffix
                    )));
                }
            }
            if order[..i].contains(entry) {
                return Err(ArchiveError::AmbiguousCompressionOrder(format!(
                    "{} listed more than once",
                    describe(entry.as_deref())
                )));
            }
        }

        Ok(Self { order })
    }

    /// Prefer compressed `.fz` files, fall back to uncompressed
    pub fn prefer_compressed() -> Self {
        Self {
            order: vec![Some(".fz".to_string()), None],
        }
    }

    /// Prefer uncompressed files, fall back to `.fz`
    pub fn prefer_uncompressed() -> Self {
        Self {
            order: vec![None, Some(".fz".to_string())],
        }
    }

    /// Parse a comma separated order such as `.fz,none`
    ///
    /// `none`, `uncompressed` and `-` denote the uncompressed variant.
    pub fn parse(text: &str) -> Result<Self> {
        let order = text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_entry)
            .collect();
        Self::new(order)
    }

    /// The variants in preference order
    pub fn order(&self) -> &[Option<String>] {
        &self.order
    }

    /// Position of a variant in the order, if listed
    pub fn rank(&self, compression: Option<&str>) -> Option<usize> {
        self.order
            .iter()
            .position(|entry| entry.as_deref() == compression)
    }
}

impl TryFrom<Vec<String>> for CompressionPreference {
    type Error = ArchiveError;

    fn try_from(order: Vec<String>) -> Result<Self> {
        Self::new(order.iter().map(|item| parse_entry(item.trim())).collect())
    }
}

impl From<CompressionPreference> for Vec<String> {
    fn from(preference: CompressionPreference) -> Self {
        preference
            .order
            .into_iter()
            .map(|entry| entry.unwrap_or_else(|| "none".to_string()))
            .collect()
    }
}

impl fmt::Display for CompressionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .order
            .iter()
            .map(|entry| entry.as_deref().unwrap_or("none"))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

fn parse_entry(item: &str) -> Option<String> {
    match item.to_ascii_lowercase().as_str() {
        "none" | "uncompressed" | "-" => None,
        _ => Some(item.to_string()),
    }
}

fn describe(compression: Option<&str>) -> String {
    match compression {
        Some(suffix) => format!("'{}'", suffix),
        None => "uncompressed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("image.fits.fz", "image.fits", Some(".fz"); "fpack")]
    #[test_case("image.fits.gz", "image.fits", Some(".gz"); "gzip")]
    #[test_case("image.fits", "image.fits", None; "uncompressed")]
    #[test_case("catalog.fits.xz", "catalog.fits.xz", None; "unknown suffix kept")]
    #[test_case(".fz", ".fz", None; "bare suffix")]
    fn test_split(filename: &str, logical: &str, compression: Option<&str>) {
        let table = CompressionTable::default();
        let (name, comp) = table.split(filename);
        assert_eq!(name, logical);
        assert_eq!(comp.as_deref(), compression);
    }

    #[test]
    fn test_longest_suffix_wins() {
        let table = CompressionTable::new([".gz", ".tar.gz"]).unwrap();
        assert_eq!(table.suffixes()[0], ".tar.gz");

        let (name, comp) = table.split("bundle.tar.gz");
        assert_eq!(name, "bundle");
        assert_eq!(comp.as_deref(), Some(".tar.gz"));
    }

    #[test]
    fn test_invalid_suffix_rejected() {
        assert!(matches!(
            CompressionTable::new(["fz"]),
            Err(ArchiveError::Config(_))
        ));
        assert!(CompressionTable::new(["."]).is_err());
    }

    #[test]
    fn test_join() {
        assert_eq!(CompressionTable::join("a.fits", Some(".fz")), "a.fits.fz");
        assert_eq!(CompressionTable::join("a.fits", None), "a.fits");
    }

    #[test]
    fn test_preference_parse() {
        let pref = CompressionPreference::parse(".fz, none").unwrap();
        assert_eq!(pref, CompressionPreference::prefer_compressed());
        assert_eq!(pref.to_string(), ".fz,none");

        let pref = CompressionPreference::parse("uncompressed,.fz").unwrap();
        assert_eq!(pref, CompressionPreference::prefer_uncompressed());
        assert_eq!(pref.rank(None), Some(0));
        assert_eq!(pref.rank(Some(".gz")), None);
    }

    #[test]
    fn test_preference_rejects_ambiguous_orders() {
        assert!(matches!(
            CompressionPreference::new(vec![]),
            Err(ArchiveError::AmbiguousCompressionOrder(_))
        ));
        assert!(matches!(
            CompressionPreference::parse(".fz,none,.fz"),
            Err(ArchiveError::AmbiguousCompressionOrder(_))
        ));
        assert!(matches!(
            CompressionPreference::parse("none,-"),
            Err(ArchiveError::AmbiguousCompressionOrder(_))
        ));
        assert!(matches!(
            CompressionPreference::parse("fz"),
            Err(ArchiveError::AmbiguousCompressionOrder(_))
        ));
    }

    #[test]
    fn test_preference_deserialize() {
        let pref: CompressionPreference = serde_json::from_str(r#"[".fz", "none"]"#).unwrap();
        assert_eq!(pref, CompressionPreference::prefer_compressed());
        assert_eq!(serde_json::to_string(&pref).unwrap(), r#"[".fz","none"]"#);

        let err = serde_json::from_str::<CompressionPreference>("[]");
        assert!(err.is_err());
    }
}
