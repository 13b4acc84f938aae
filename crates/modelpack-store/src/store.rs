//! Package store: ties blobs, the reference index and the archive codecs
//! together

use crate::blob::BlobStore;
use crate::builder::{ManifestBuilder, PackageBlobs};
use crate::fsutil;
use crate::index::ReferenceIndex;
use crate::loader::ManifestLoader;
use crate::oci::OciStore;
use chrono::{DateTime, Utc};
use modelpack_core::{
    Descriptor, Digest, Manifest, PackError, PackResult, PackageMetadata, PackageSpec,
    CONFIG_MEDIA_TYPE, CONTENT_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, WEIGHTS_MEDIA_TYPE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of importing or building a package
#[derive(Debug, Clone)]
pub struct ImportSummary {
    /// Tag the package was stored under
    pub reference: String,
    /// Manifest descriptor recorded in the index
    pub manifest: Descriptor,
    pub config: Descriptor,
    pub weights: Descriptor,
    pub content: Descriptor,
    /// Combined size of the manifest and its blobs
    pub size: u64,
}

/// Outcome of removing a tag
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// The tag was present and has been untagged
    Removed(Descriptor),
    /// Nothing was stored under the tag
    NotFound,
}

/// A tag resolved to its manifest and metadata
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub reference: String,
    pub manifest_descriptor: Descriptor,
    pub manifest: Manifest,
    pub metadata: PackageMetadata,
    /// Digest of the weights layer
    pub weights: Digest,
    /// Combined size of the config and layer blobs
    pub size: u64,
    /// When the manifest blob was committed
    pub created_at: DateTime<Utc>,
}

/// Model package store
///
/// The index is reloaded from disk before every read or mutation, so
/// several processes can share one store root.
pub struct PackageStore {
    blobs: Arc<dyn BlobStore>,
    index: Mutex<ReferenceIndex>,
}

impl PackageStore {
    /// Create a store from its collaborators
    pub fn new(blobs: Arc<dyn BlobStore>, index: ReferenceIndex) -> Self {
        Self {
            blobs,
            index: Mutex::new(index),
        }
    }

    /// Open the OCI layout store at `root`, creating it if needed
    pub async fn open(root: PathBuf) -> PackResult<Self> {
        let oci = OciStore::open(root).await?;
        let index = ReferenceIndex::new(oci.index_path());
        info!(root = %oci.root().display(), backend = oci.name(), "Opened model store");
        Ok(Self::new(Arc::new(oci), index))
    }

    /// Import a model archive under `tag`
    pub async fn import(&self, tag: &str, archive: &[u8]) -> PackResult<ImportSummary> {
        let blobs = ManifestLoader::decompose(archive)?;
        self.store_package(tag, blobs).await
    }

    /// Import a model archive read from `path`
    pub async fn import_file(&self, tag: &str, path: &Path) -> PackResult<ImportSummary> {
        let archive = tokio::fs::read(path).await.map_err(|e| {
            PackError::InvalidPackage(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.import(tag, &archive).await
    }

    /// Build a package from loose files and store it under `tag`
    pub async fn build(&self, tag: &str, spec: &PackageSpec) -> PackResult<ImportSummary> {
        let blobs = ManifestBuilder::new(spec).build().await?;
        self.store_package(tag, blobs).await
    }

    async fn store_package(&self, tag: &str, blobs: PackageBlobs) -> PackResult<ImportSummary> {
        let config = self.blobs.put(CONFIG_MEDIA_TYPE, &blobs.config).await?;
        let weights = self
            .blobs
            .put(WEIGHTS_MEDIA_TYPE, &blobs.weights)
            .await?
            .with_title(blobs.metadata.model.serialized_file.as_str());
        let content = self
            .blobs
            .put(CONTENT_MEDIA_TYPE, &blobs.content)
            .await?
            .with_title(blobs.metadata.model.model_name.as_str());

        let manifest = ManifestBuilder::assemble(config.clone(), weights.clone(), content.clone())?;
        let manifest_bytes = manifest.to_vec()?;
        let manifest_descriptor = self.blobs.put(MANIFEST_MEDIA_TYPE, &manifest_bytes).await?;

        {
            let mut index = self.index.lock().await;
            index.load().await?;
            index.add(tag, manifest_descriptor.clone());
            index.save().await?;
        }
        info!(
            tag = tag,
            digest = %manifest_descriptor.digest,
            model = %blobs.metadata.model.model_name,
            "Stored package"
        );

        let size = manifest_descriptor.size + config.size + weights.size + content.size;
        Ok(ImportSummary {
            reference: tag.to_string(),
            manifest: manifest_descriptor,
            config,
            weights,
            content,
            size,
        })
    }

    /// Reassemble the archive stored under `tag`
    pub async fn export(&self, tag: &str) -> PackResult<Vec<u8>> {
        let descriptor = self.lookup(tag).await?;
        let manifest = self.read_manifest(&descriptor).await?;
        let layers = manifest.layers()?;
        for digest in [
            &manifest.config.digest,
            &layers.weights.digest,
            &layers.content.digest,
        ] {
            if !self.blobs.exists(digest).await? {
                return Err(PackError::BlobNotFound(digest.to_string()));
            }
        }

        let config = self.blobs.get(&manifest.config.digest).await?;
        let weights = self.blobs.get(&layers.weights.digest).await?;
        let content = self.blobs.get(&layers.content.digest).await?;

        let archive = ManifestLoader::assemble(&manifest, &config, &weights, &content)?;
        debug!(tag = tag, size = archive.len(), "Exported package");
        Ok(archive)
    }

    /// Export `tag` to `path`, replacing the file atomically
    pub async fn export_to(&self, tag: &str, path: &Path) -> PackResult<()> {
        let archive = self.export(tag).await?;
        let dest = path.to_path_buf();
        tokio::task::spawn_blocking(move || fsutil::replace(&dest, &archive))
            .await
            .map_err(|e| PackError::storage("export", e))?
            .map_err(|e| PackError::storage(format!("write {}", path.display()), e))?;
        info!(tag = tag, path = %path.display(), "Exported package");
        Ok(())
    }

    /// Point `dest` at the manifest `src` refers to
    pub async fn tag(&self, src: &str, dest: &str) -> PackResult<Descriptor> {
        let mut index = self.index.lock().await;
        index.load().await?;
        let descriptor = index
            .get(src)
            .cloned()
            .ok_or_else(|| PackError::RefNotFound(src.to_string()))?;
        index.add(dest, descriptor.clone());
        index.save().await?;
        info!(src = src, dest = dest, digest = %descriptor.digest, "Tagged package");
        Ok(descriptor)
    }

    /// Untag `tag`; a missing tag leaves the index file untouched
    pub async fn remove(&self, tag: &str) -> PackResult<RemoveOutcome> {
        let mut index = self.index.lock().await;
        index.load().await?;
        let Some(descriptor) = index.remove(tag) else {
            debug!(tag = tag, "Reference not found");
            return Ok(RemoveOutcome::NotFound);
        };
        index.save().await?;
        info!(tag = tag, digest = %descriptor.digest, "Removed reference");
        Ok(RemoveOutcome::Removed(descriptor))
    }

    /// Resolve a tag to its manifest and metadata
    pub async fn resolve(&self, tag: &str) -> PackResult<Option<ResolvedPackage>> {
        let descriptor = {
            let mut index = self.index.lock().await;
            index.load().await?;
            index.get(tag).cloned()
        };
        match descriptor {
            Some(descriptor) => Ok(Some(self.describe(tag, descriptor).await?)),
            None => Ok(None),
        }
    }

    /// Every stored reference in index order
    ///
    /// References whose manifest or config cannot be read are skipped.
    pub async fn list(&self) -> PackResult<Vec<ResolvedPackage>> {
        let entries: Vec<(String, Descriptor)> = {
            let mut index = self.index.lock().await;
            index.load().await?;
            index
                .list()
                .map(|(tag, descriptor)| (tag.to_string(), descriptor.clone()))
                .collect()
        };

        let mut packages = Vec::with_capacity(entries.len());
        for (tag, descriptor) in entries {
            match self.describe(&tag, descriptor).await {
                Ok(package) => packages.push(package),
                Err(e) => warn!(tag = %tag, error = %e, "Skipping unreadable reference"),
            }
        }
        Ok(packages)
    }

    async fn lookup(&self, tag: &str) -> PackResult<Descriptor> {
        let mut index = self.index.lock().await;
        index.load().await?;
        index
            .get(tag)
            .cloned()
            .ok_or_else(|| PackError::RefNotFound(tag.to_string()))
    }

    async fn read_manifest(&self, descriptor: &Descriptor) -> PackResult<Manifest> {
        let bytes = self.blobs.get(&descriptor.digest).await?;
        Manifest::from_slice(&bytes)
    }

    async fn describe(&self, tag: &str, descriptor: Descriptor) -> PackResult<ResolvedPackage> {
        let manifest = self.read_manifest(&descriptor).await?;
        let layers = manifest.layers()?;
        let weights = layers.weights.digest.clone();
        let size = manifest.config.size + layers.weights.size + layers.content.size;

        let config = self.blobs.get(&manifest.config.digest).await?;
        let metadata = PackageMetadata::from_slice(&config)?;
        let created_at = self.blobs.stat(&descriptor.digest).await?.created_at;

        Ok(ResolvedPackage {
            reference: tag.to_string(),
            manifest_descriptor: descriptor,
            manifest,
            metadata,
            weights,
            size,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelpack_core::{DefaultHandler, Handler};

    fn spec(dir: &Path) -> PackageSpec {
        let write = |name: &str, content: &[u8]| {
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            path
        };
        PackageSpec {
            model_name: "squeezenet".to_string(),
            version: None,
            model_file: write("model.py", b"class Net: pass\n"),
            serialized_file: write("squeezenet.pth", b"weights"),
            extra_files: vec![],
            handler: Handler::Default(DefaultHandler::ImageClassifier),
            source_vocab: None,
            runtime: "python".to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path().join("store")).await.unwrap();
        let summary = store
            .build("local/squeezenet:v1", &spec(dir.path()))
            .await
            .unwrap();

        assert_eq!(summary.weights.title(), Some("squeezenet.pth"));
        assert_eq!(summary.content.title(), Some("squeezenet"));

        let resolved = store.resolve("local/squeezenet:v1").await.unwrap().unwrap();
        assert_eq!(resolved.manifest_descriptor, summary.manifest);
        assert_eq!(resolved.metadata.model.model_name, "squeezenet");
        assert_eq!(resolved.weights, summary.weights.digest);
        assert_eq!(
            resolved.size,
            summary.config.size + summary.weights.size + summary.content.size
        );
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.resolve("nothing:here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_export_missing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(matches!(
            store.export("nothing:here").await,
            Err(PackError::RefNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tag_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(matches!(
            store.tag("nothing:here", "other:tag").await,
            Err(PackError::RefNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_broken_references() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = PackageStore::open(root.clone()).await.unwrap();
        store.build("good:v1", &spec(dir.path())).await.unwrap();

        let mut index = ReferenceIndex::new(root.join("index.json"));
        index.load().await.unwrap();
        index.add(
            "broken:v1",
            Descriptor::for_bytes(MANIFEST_MEDIA_TYPE, b"never stored"),
        );
        index.save().await.unwrap();

        let listed: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.reference)
            .collect();
        assert_eq!(listed, vec!["good:v1"]);
    }

    #[tokio::test]
    async fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStore::open(dir.path().join("store")).await.unwrap();
        store.build("local/squeezenet:v1", &spec(dir.path())).await.unwrap();

        let out = dir.path().join("squeezenet.mar");
        store.export_to("local/squeezenet:v1", &out).await.unwrap();
        let exported = std::fs::read(&out).unwrap();
        assert_eq!(exported, store.export("local/squeezenet:v1").await.unwrap());
    }
}
