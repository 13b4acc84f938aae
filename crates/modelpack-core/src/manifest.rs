//! OCI descriptor and manifest types

use crate::{Digest, PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Media type of the package metadata (config) blob
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.torchserve.model.config.v1+json";
/// Media type of the serialized weights layer
pub const WEIGHTS_MEDIA_TYPE: &str = "application/vnd.pytorch.model.layer.v1";
/// Media type of the auxiliary content (tar) layer
pub const CONTENT_MEDIA_TYPE: &str = "application/vnd.torchserve.model.content.layer.v1.tar";
/// Media type of the top-level manifest
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// Media type of the reference index
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Suggested filename of a blob
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
/// Tag a manifest descriptor is filed under in the index
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Schema version written into manifests and the index
pub const SCHEMA_VERSION: u32 = 2;

/// Reference to a blob by media type, digest and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Kind of blob
    pub media_type: String,
    /// Digest of the blob content
    pub digest: Digest,
    /// Blob length in bytes
    pub size: u64,
    /// Free-form annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Describe `bytes` under the given media type
    pub fn for_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: Digest::from_bytes(bytes),
            size: bytes.len() as u64,
            annotations: None,
        }
    }

    /// Set the title annotation
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ANNOTATION_TITLE.to_string(), title.into());
        self
    }

    /// Look up an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.annotation(ANNOTATION_TITLE)
    }
}

/// Role of a layer inside a package manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Serialized model weights
    Weights,
    /// Tar of model code and auxiliary files
    Content,
}

impl LayerKind {
    /// Classify a media type
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            WEIGHTS_MEDIA_TYPE => Some(LayerKind::Weights),
            CONTENT_MEDIA_TYPE => Some(LayerKind::Content),
            _ => None,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            LayerKind::Weights => WEIGHTS_MEDIA_TYPE,
            LayerKind::Content => CONTENT_MEDIA_TYPE,
        }
    }
}

/// OCI image manifest describing one model package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    /// Package metadata blob
    pub config: Descriptor,
    /// Weights layer followed by the content layer
    pub layers: Vec<Descriptor>,
}

/// The two layers of a validated manifest
#[derive(Debug, Clone, Copy)]
pub struct PackageLayers<'a> {
    pub weights: &'a Descriptor,
    pub content: &'a Descriptor,
}

impl Manifest {
    /// Create a manifest with the layers in their fixed order
    pub fn new(config: Descriptor, weights: Descriptor, content: Descriptor) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            config,
            layers: vec![weights, content],
        }
    }

    /// Parse a stored manifest blob
    pub fn from_slice(bytes: &[u8]) -> PackResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PackError::InvalidManifest(format!("unparsable manifest: {}", e)))
    }

    /// Serialize for storage as a blob
    pub fn to_vec(&self) -> PackResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check the structural invariants and return the two layers
    ///
    /// A valid manifest has schema version 2, a config of the package
    /// config media type, and exactly one weights and one content layer,
    /// both non-empty.
    pub fn layers(&self) -> PackResult<PackageLayers<'_>> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(PackError::InvalidManifest(format!(
                "unsupported schema version {}",
                self.schema_version
            )));
        }
        if self.config.media_type != CONFIG_MEDIA_TYPE {
            return Err(PackError::InvalidManifest(format!(
                "config has media type {}, expected {}",
                self.config.media_type, CONFIG_MEDIA_TYPE
            )));
        }
        if self.layers.len() != 2 {
            return Err(PackError::InvalidManifest(format!(
                "manifest does not contain exactly 2 layers (total: {})",
                self.layers.len()
            )));
        }

        let mut weights = None;
        let mut content = None;
        for layer in &self.layers {
            let kind = LayerKind::from_media_type(&layer.media_type).ok_or_else(|| {
                PackError::InvalidManifest(format!(
                    "unsupported layer media type {}",
                    layer.media_type
                ))
            })?;
            let slot = match kind {
                LayerKind::Weights => &mut weights,
                LayerKind::Content => &mut content,
            };
            if slot.replace(layer).is_some() {
                return Err(PackError::InvalidManifest(format!(
                    "duplicate layer with media type {}",
                    kind.media_type()
                )));
            }
            if layer.size == 0 {
                return Err(PackError::InvalidManifest(format!(
                    "manifest layer with media type {} is of size 0",
                    kind.media_type()
                )));
            }
        }

        // Two layers, no duplicates, so both slots are filled.
        match (weights, content) {
            (Some(weights), Some(content)) => Ok(PackageLayers { weights, content }),
            _ => Err(PackError::InvalidManifest(
                "manifest is missing a required layer".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::new(
            Descriptor::for_bytes(CONFIG_MEDIA_TYPE, b"{}"),
            Descriptor::for_bytes(WEIGHTS_MEDIA_TYPE, b"W").with_title("weights.pth"),
            Descriptor::for_bytes(CONTENT_MEDIA_TYPE, b"tar").with_title("resnet"),
        )
    }

    #[test]
    fn test_descriptor_json_shape() {
        let desc = Descriptor::for_bytes(WEIGHTS_MEDIA_TYPE, b"W").with_title("weights.pth");
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["mediaType"], WEIGHTS_MEDIA_TYPE);
        assert_eq!(value["size"], 1);
        assert_eq!(value["annotations"][ANNOTATION_TITLE], "weights.pth");

        let bare = serde_json::to_value(Descriptor::for_bytes(CONFIG_MEDIA_TYPE, b"{}")).unwrap();
        assert!(bare.get("annotations").is_none());
    }

    #[test]
    fn test_identical_bytes_identical_descriptor() {
        let a = Descriptor::for_bytes(WEIGHTS_MEDIA_TYPE, b"same");
        let b = Descriptor::for_bytes(WEIGHTS_MEDIA_TYPE, b"same");
        assert_eq!(a, b);
    }

    #[test]
    fn test_valid_manifest_layers() {
        let manifest = manifest();
        let layers = manifest.layers().unwrap();
        assert_eq!(layers.weights.title(), Some("weights.pth"));
        assert_eq!(layers.content.title(), Some("resnet"));
    }

    #[test]
    fn test_manifest_roundtrip_through_bytes() {
        let manifest = manifest();
        let bytes = manifest.to_vec().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(Manifest::from_slice(&bytes).unwrap(), manifest);
    }

    #[test]
    fn test_rejects_single_layer() {
        let mut manifest = manifest();
        manifest.layers.remove(0);
        assert!(matches!(
            manifest.layers(),
            Err(PackError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_rejects_empty_layer() {
        let mut manifest = manifest();
        manifest.layers[1].size = 0;
        assert!(matches!(
            manifest.layers(),
            Err(PackError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_kind() {
        let mut manifest = manifest();
        manifest.layers[1] = manifest.layers[0].clone();
        assert!(matches!(
            manifest.layers(),
            Err(PackError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_media_type() {
        let mut manifest = manifest();
        manifest.layers[1].media_type = "application/octet-stream".to_string();
        assert!(manifest.layers().is_err());
    }

    #[test]
    fn test_layer_kind() {
        assert_eq!(
            LayerKind::from_media_type(WEIGHTS_MEDIA_TYPE),
            Some(LayerKind::Weights)
        );
        assert_eq!(LayerKind::Content.media_type(), CONTENT_MEDIA_TYPE);
        assert_eq!(LayerKind::from_media_type(CONFIG_MEDIA_TYPE), None);
    }
}
