//! OCI image layout blob store
//!
//! Layout under the store root:
//! ```text
//! <root>/
//!   oci-layout            {"imageLayoutVersion": "1.0.0"}
//!   index.json            reference index (see `index`)
//!   blobs/sha256/<hex>    committed blobs
//!   ingest/               staging area for in-flight writes
//! ```

use crate::blob::{BlobStat, BlobStore};
use crate::fsutil::{self, CommitOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modelpack_core::{Descriptor, Digest, PackError, PackResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_CONTENT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;

/// Filesystem blob store in OCI image layout
#[derive(Debug, Clone)]
pub struct OciStore {
    /// Root of the layout
    root: PathBuf,
}

impl OciStore {
    /// Create a store rooted at `root` without touching the filesystem
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Open a store, creating the layout if it does not exist yet
    pub async fn open(root: PathBuf) -> PackResult<Self> {
        let store = Self::new(root);
        store.init().await?;
        Ok(store)
    }

    /// Create the layout directories and marker file
    pub async fn init(&self) -> PackResult<()> {
        tokio::fs::create_dir_all(self.root.join("blobs"))
            .await
            .map_err(|e| PackError::storage(format!("create {}", self.root.display()), e))?;
        let marker = self.root.join(LAYOUT_FILE);
        if !tokio::fs::try_exists(&marker).await? {
            tokio::fs::write(&marker, LAYOUT_CONTENT)
                .await
                .map_err(|e| PackError::storage("write oci-layout", e))?;
            info!(path = %self.root.display(), "Created model store");
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the reference index inside this layout
    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Path a blob is committed to
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    fn ingest_dir(&self) -> PathBuf {
        self.root.join("ingest")
    }
}

#[async_trait]
impl BlobStore for OciStore {
    async fn put(&self, media_type: &str, bytes: &[u8]) -> PackResult<Descriptor> {
        let descriptor = Descriptor::for_bytes(media_type, bytes);
        let dest = self.blob_path(&descriptor.digest);

        if tokio::fs::try_exists(&dest).await? {
            debug!(digest = %descriptor.digest, "Blob already present");
            return Ok(descriptor);
        }

        let stage = format!("commit {}", descriptor.digest);
        let ingest = self.ingest_dir();
        let data = bytes.to_vec();
        let outcome =
            tokio::task::spawn_blocking(move || fsutil::commit_if_absent(&ingest, &dest, &data))
                .await
                .map_err(|e| PackError::storage(&stage, e))?
                .map_err(|e| PackError::storage(&stage, e))?;

        match outcome {
            CommitOutcome::Written => debug!(
                digest = %descriptor.digest,
                media_type = media_type,
                size = descriptor.size,
                "Stored blob"
            ),
            CommitOutcome::AlreadyExists => debug!(
                digest = %descriptor.digest,
                "Blob committed concurrently by another writer"
            ),
        }
        Ok(descriptor)
    }

    async fn get(&self, digest: &Digest) -> PackResult<Vec<u8>> {
        let path = self.blob_path(digest);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PackError::BlobNotFound(digest.to_string()))
            }
            Err(e) => return Err(PackError::storage(format!("read {}", digest), e)),
        };
        digest.verify(&bytes)?;
        Ok(bytes)
    }

    async fn stat(&self, digest: &Digest) -> PackResult<BlobStat> {
        let metadata = match tokio::fs::metadata(self.blob_path(digest)).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PackError::BlobNotFound(digest.to_string()))
            }
            Err(e) => return Err(PackError::storage(format!("stat {}", digest), e)),
        };
        let created_at: DateTime<Utc> = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::from)
            .map_err(|e| PackError::storage(format!("stat {}", digest), e))?;
        Ok(BlobStat {
            size: metadata.len(),
            created_at,
        })
    }

    async fn exists(&self, digest: &Digest) -> PackResult<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(digest)).await?)
    }

    fn name(&self) -> &'static str {
        "oci-layout"
    }
}
