//! Blob store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modelpack_core::{Descriptor, Digest, PackResult};

/// Metadata of a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStat {
    /// Blob length in bytes
    pub size: u64,
    /// When the blob was committed
    pub created_at: DateTime<Utc>,
}

/// Content-addressed storage of immutable blobs
///
/// Blobs are keyed by the digest of their bytes. Storing bytes that are
/// already present succeeds without rewriting them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and describe them under `media_type`
    async fn put(&self, media_type: &str, bytes: &[u8]) -> PackResult<Descriptor>;

    /// Read a blob, failing with `BlobNotFound` if it is absent
    async fn get(&self, digest: &Digest) -> PackResult<Vec<u8>>;

    /// Blob metadata without reading its content
    async fn stat(&self, digest: &Digest) -> PackResult<BlobStat>;

    /// Check if a blob is present
    async fn exists(&self, digest: &Digest) -> PackResult<bool>;

    /// Get the store name
    fn name(&self) -> &'static str;
}
