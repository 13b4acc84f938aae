//! Translate between model archives (zip) and package blobs

use crate::builder::PackageBlobs;
use crate::content::{self, ContentEntry, DEFAULT_MODE};
use modelpack_core::{Descriptor, Manifest, PackError, PackResult, PackageMetadata, METADATA_PATH};
use std::io::{Cursor, Read, Write};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Decomposes archives into blobs and reassembles them
pub struct ManifestLoader;

impl ManifestLoader {
    /// Split a model archive into config, weights and content blobs
    ///
    /// The metadata document is kept byte-for-byte as the config blob. The
    /// member named by `model.serializedFile` becomes the weights blob and
    /// every other file goes into the content layer in archive order.
    pub fn decompose(archive: &[u8]) -> PackResult<PackageBlobs> {
        let mut zip = ZipArchive::new(Cursor::new(archive))
            .map_err(|e| PackError::InvalidPackage(format!("not a model archive: {}", e)))?;

        let config = {
            let mut member = zip.by_name(METADATA_PATH).map_err(|_| {
                PackError::InvalidPackage(format!(
                    "invalid model archive, {} not found",
                    METADATA_PATH
                ))
            })?;
            read_member(&mut member)?
        };
        let metadata = PackageMetadata::from_slice(&config)?;
        let serialized_file = metadata.model.serialized_file.as_str();

        let mut weights = None;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut member = zip
                .by_index(i)
                .map_err(|e| PackError::Archive(format!("reading member {}: {}", i, e)))?;
            if member.is_dir() || member.name() == METADATA_PATH {
                continue;
            }
            let name = member.name().to_string();
            content::check_member_name(&name)
                .map_err(|e| PackError::InvalidPackage(e.to_string()))?;
            let mode = member.unix_mode().unwrap_or(DEFAULT_MODE);
            let data = read_member(&mut member)?;
            if name == serialized_file {
                weights = Some(data);
            } else {
                entries.push(ContentEntry::new(name, mode, data));
            }
        }

        let weights = weights.ok_or_else(|| {
            PackError::InvalidPackage(format!(
                "serialized file {} not found in archive",
                serialized_file
            ))
        })?;
        if weights.is_empty() {
            return Err(PackError::InvalidPackage(format!(
                "serialized file {} is empty",
                serialized_file
            )));
        }
        let content = content::pack(&entries)?;

        debug!(
            model = %metadata.model.model_name,
            members = entries.len() + 2,
            "Decomposed model archive"
        );

        Ok(PackageBlobs {
            metadata,
            config,
            weights,
            content,
        })
    }

    /// Rebuild a model archive from a manifest and its blobs
    ///
    /// The manifest and blobs are fully validated before the first member
    /// is written.
    pub fn assemble(
        manifest: &Manifest,
        config: &[u8],
        weights: &[u8],
        content: &[u8],
    ) -> PackResult<Vec<u8>> {
        let layers = manifest.layers()?;
        check_size(&manifest.config, config)?;
        check_size(layers.weights, weights)?;
        check_size(layers.content, content)?;

        let metadata = PackageMetadata::from_slice(config)
            .map_err(|e| PackError::InvalidManifest(format!("config blob: {}", e)))?;
        let entries = content::unpack(content)?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        add_member(&mut zip, METADATA_PATH, DEFAULT_MODE, config)?;
        add_member(
            &mut zip,
            &metadata.model.serialized_file,
            DEFAULT_MODE,
            weights,
        )?;
        for entry in &entries {
            add_member(&mut zip, &entry.name, entry.mode, &entry.data)?;
        }

        let archive = zip
            .finish()
            .map_err(|e| PackError::Archive(format!("finishing archive: {}", e)))?
            .into_inner();
        debug!(
            model = %metadata.model.model_name,
            members = entries.len() + 2,
            size = archive.len(),
            "Assembled model archive"
        );
        Ok(archive)
    }
}

fn read_member(member: &mut zip::read::ZipFile<'_>) -> PackResult<Vec<u8>> {
    let mut data = Vec::with_capacity(member.size() as usize);
    member
        .read_to_end(&mut data)
        .map_err(|e| PackError::Archive(format!("reading {}: {}", member.name(), e)))?;
    Ok(data)
}

/// Members this large must carry zip64 extra fields
fn needs_zip64(len: u64) -> bool {
    len >= u64::from(u32::MAX)
}

fn member_options(mode: u32, len: u64) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode)
        .large_file(needs_zip64(len))
}

fn add_member(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    mode: u32,
    data: &[u8],
) -> PackResult<()> {
    zip.start_file(name, member_options(mode, data.len() as u64))
        .map_err(|e| PackError::Archive(format!("writing {}: {}", name, e)))?;
    zip.write_all(data)
        .map_err(|e| PackError::Archive(format!("writing {}: {}", name, e)))
}

fn check_size(descriptor: &Descriptor, bytes: &[u8]) -> PackResult<()> {
    if descriptor.size != bytes.len() as u64 {
        return Err(PackError::InvalidManifest(format!(
            "blob {} has {} bytes, descriptor says {}",
            descriptor.digest,
            bytes.len(),
            descriptor.size
        )));
    }
    Ok(())
}
