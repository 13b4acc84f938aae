//! Error types for modelpack

use thiserror::Error;

/// Main error type for modelpack
#[derive(Error, Debug)]
pub enum PackError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source files of a package are missing or malformed
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// A stored manifest is malformed or structurally wrong
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A digest string could not be parsed
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Blob not found in the blob store
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Reference (tag) not found in the index
    #[error("Reference not found: {0}")]
    RefNotFound(String),

    /// Stored bytes do not hash to the digest they are filed under
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Storage error with the stage that failed
    #[error("Storage error ({stage}): {detail}")]
    Storage { stage: String, detail: String },

    /// Zip or tar codec error
    #[error("Archive error: {0}")]
    Archive(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for modelpack operations
pub type PackResult<T> = Result<T, PackError>;

impl PackError {
    /// Build a storage error for the given stage
    pub fn storage(stage: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        PackError::Storage {
            stage: stage.into(),
            detail: detail.to_string(),
        }
    }

    /// Whether the error is a missing blob or reference
    pub fn is_not_found(&self) -> bool {
        matches!(self, PackError::BlobNotFound(_) | PackError::RefNotFound(_))
    }
}

impl From<serde_json::Error> for PackError {
    fn from(err: serde_json::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PackError {
    fn from(err: toml::de::Error) -> Self {
        PackError::Config(err.to_string())
    }
}
