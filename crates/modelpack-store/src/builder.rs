//! Build package blobs from loose files

use crate::content::{self, ContentEntry};
use modelpack_core::{
    base_name, Descriptor, Manifest, PackError, PackResult, PackageMetadata, PackageSpec,
};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Raw bytes of the three blobs that make up a package
#[derive(Debug, Clone)]
pub struct PackageBlobs {
    /// Parsed form of `config`
    pub metadata: PackageMetadata,
    /// Metadata document as stored
    pub config: Vec<u8>,
    /// Serialized weights
    pub weights: Vec<u8>,
    /// Content layer tar
    pub content: Vec<u8>,
}

/// Turns a package description into blobs and a manifest
pub struct ManifestBuilder<'a> {
    spec: &'a PackageSpec,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(spec: &'a PackageSpec) -> Self {
        Self { spec }
    }

    /// Read every source file and produce the config, weights and content
    /// blobs
    ///
    /// All files are checked before anything is read, so a missing file
    /// fails the build without producing any blob.
    pub async fn build(&self) -> PackResult<PackageBlobs> {
        let files = self.spec.content_files();
        for path in files.iter().copied().chain([self.spec.serialized_file.as_path()]) {
            ensure_file(path).await?;
        }

        let mut seen = HashSet::new();
        for path in &files {
            let name = base_name(path)?;
            if !seen.insert(name.clone()) {
                return Err(PackError::InvalidPackage(format!(
                    "more than one content file is named {}",
                    name
                )));
            }
        }

        let metadata = self.spec.metadata()?;
        if seen.contains(&metadata.model.serialized_file) {
            return Err(PackError::InvalidPackage(format!(
                "serialized file {} collides with a content file",
                metadata.model.serialized_file
            )));
        }
        let config = metadata.to_vec()?;

        let weights = read(&self.spec.serialized_file).await?;
        if weights.is_empty() {
            return Err(PackError::InvalidPackage(format!(
                "serialized file {} is empty",
                self.spec.serialized_file.display()
            )));
        }

        let mut entries = Vec::with_capacity(files.len());
        for path in files {
            let data = read(path).await?;
            let mode = file_mode(path).await?;
            entries.push(ContentEntry::new(base_name(path)?, mode, data));
        }
        let content = content::pack(&entries)?;

        debug!(
            model = %metadata.model.model_name,
            config = config.len(),
            weights = weights.len(),
            content = content.len(),
            "Built package blobs"
        );

        Ok(PackageBlobs {
            metadata,
            config,
            weights,
            content,
        })
    }

    /// Manifest for blobs that have been stored under the given descriptors
    pub fn assemble(
        config: Descriptor,
        weights: Descriptor,
        content: Descriptor,
    ) -> PackResult<Manifest> {
        let manifest = Manifest::new(config, weights, content);
        manifest.layers()?;
        Ok(manifest)
    }
}

async fn ensure_file(path: &Path) -> PackResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(PackError::InvalidPackage(format!(
            "{} is not a regular file",
            path.display()
        ))),
        Err(e) => Err(PackError::InvalidPackage(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}

async fn read(path: &Path) -> PackResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| PackError::InvalidPackage(format!("failed to read {}: {}", path.display(), e)))
}

#[cfg(unix)]
async fn file_mode(path: &Path) -> PackResult<u32> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = tokio::fs::metadata(path).await?;
    Ok(metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
async fn file_mode(_path: &Path) -> PackResult<u32> {
    Ok(content::DEFAULT_MODE)
}
