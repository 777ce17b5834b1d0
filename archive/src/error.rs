//! Error types for the archive library

use std::path::PathBuf;

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error type for archive bookkeeping operations
///
/// Every variant is a caller-visible condition; nothing in this crate retries
/// on its own.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A scan root or subtree does not exist
    #[error("Path not found: '{path}'")]
    PathNotFound { path: PathBuf },

    /// The catalog collaborator could not be reached
    #[error("Catalog connection error: {0}")]
    CatalogConnection(String),

    /// A catalog query failed after the connection was established
    #[error("Catalog query error: {0}")]
    Catalog(String),

    /// Archive name not known to the catalog
    #[error("Invalid archive '{0}': not present in catalog")]
    InvalidArchive(String),

    /// Unusable combination of catalog filters
    #[error("Invalid file filter: {0}")]
    InvalidFilter(String),

    /// Archive metadata (row or root) missing while resolving locations
    #[error("Unknown archive '{0}': no root recorded in catalog")]
    UnknownArchive(String),

    /// Compression preference is not a usable ordered list
    #[error("Ambiguous compression order: {0}")]
    AmbiguousCompressionOrder(String),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transfer backend failures affecting the whole request
    #[error("Transfer error ({backend}): {message}")]
    Transfer { backend: String, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArchiveError {
    /// Create a new path-not-found error
    pub fn path_not_found(path: impl Into<PathBuf>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a new invalid filter error
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter(message.into())
    }

    /// Create a new configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transfer error
    pub fn transfer_error(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether the error describes a precondition the caller can fix by
    /// changing its input (as opposed to an environment failure)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound { .. }
                | Self::InvalidArchive(_)
                | Self::InvalidFilter(_)
                | Self::UnknownArchive(_)
                | Self::AmbiguousCompressionOrder(_)
                | Self::Config(_)
        )
    }
}
