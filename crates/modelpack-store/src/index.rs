//! Reference index: tag → manifest descriptor
//!
//! Persisted as an OCI image index whose manifest descriptors carry the tag
//! in the `org.opencontainers.image.ref.name` annotation. Mutations stay in
//! memory until `save` is called, so a caller can batch several of them
//! into one durable write.

use crate::fsutil;
use modelpack_core::{
    Descriptor, PackError, PackResult, ANNOTATION_REF_NAME, INDEX_MEDIA_TYPE, SCHEMA_VERSION,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

/// On-disk index document
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// In-memory view of the reference index
#[derive(Debug)]
pub struct ReferenceIndex {
    /// Index file path
    path: PathBuf,
    /// Entries in insertion order
    entries: Vec<(String, Descriptor)>,
}

impl ReferenceIndex {
    /// Create an empty index backed by `path`
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
        }
    }

    /// Replace the in-memory entries with the persisted ones
    ///
    /// A missing or empty index file loads as an empty index.
    pub async fn load(&mut self) -> PackResult<()> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.entries.clear();
                return Ok(());
            }
            Err(e) => return Err(PackError::storage("load index", e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            self.entries.clear();
            return Ok(());
        }

        let document: IndexDocument = serde_json::from_slice(&bytes)
            .map_err(|e| PackError::storage(format!("parse {}", self.path.display()), e))?;

        let mut entries: Vec<(String, Descriptor)> = Vec::with_capacity(document.manifests.len());
        for mut descriptor in document.manifests {
            let Some(tag) = take_ref_name(&mut descriptor) else {
                warn!(digest = %descriptor.digest, "Skipping index entry without a reference name");
                continue;
            };
            match entries.iter_mut().find(|(t, _)| *t == tag) {
                Some(entry) => entry.1 = descriptor,
                None => entries.push((tag, descriptor)),
            }
        }
        self.entries = entries;
        debug!(path = %self.path.display(), references = self.entries.len(), "Loaded index");
        Ok(())
    }

    /// Atomically write the in-memory entries to the index file
    pub async fn save(&self) -> PackResult<()> {
        let manifests = self
            .entries
            .iter()
            .map(|(tag, descriptor)| {
                let mut descriptor = descriptor.clone();
                descriptor
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(ANNOTATION_REF_NAME.to_string(), tag.clone());
                descriptor
            })
            .collect();
        let document = IndexDocument {
            schema_version: SCHEMA_VERSION,
            media_type: Some(INDEX_MEDIA_TYPE.to_string()),
            manifests,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || fsutil::replace(&path, &bytes))
            .await
            .map_err(|e| PackError::storage("save index", e))?
            .map_err(|e| PackError::storage("save index", e))?;
        debug!(path = %self.path.display(), references = self.entries.len(), "Saved index");
        Ok(())
    }

    /// Insert or overwrite a tag; an overwritten tag keeps its position
    pub fn add(&mut self, tag: &str, mut descriptor: Descriptor) {
        take_ref_name(&mut descriptor);
        match self.entries.iter_mut().find(|(t, _)| *t == tag) {
            Some(entry) => entry.1 = descriptor,
            None => self.entries.push((tag.to_string(), descriptor)),
        }
    }

    /// Delete a tag, returning its descriptor if it was present
    pub fn remove(&mut self, tag: &str) -> Option<Descriptor> {
        let position = self.entries.iter().position(|(t, _)| t == tag)?;
        Some(self.entries.remove(position).1)
    }

    /// Look up a tag
    pub fn get(&self, tag: &str) -> Option<&Descriptor> {
        self.entries
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, descriptor)| descriptor)
    }

    /// Tags and descriptors in insertion order
    pub fn list(&self) -> impl Iterator<Item = (&str, &Descriptor)> + '_ {
        self.entries
            .iter()
            .map(|(tag, descriptor)| (tag.as_str(), descriptor))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Remove the ref-name annotation, dropping the map if it becomes empty
fn take_ref_name(descriptor: &mut Descriptor) -> Option<String> {
    let annotations = descriptor.annotations.as_mut()?;
    let tag = annotations.remove(ANNOTATION_REF_NAME);
    if annotations.is_empty() {
        descriptor.annotations = None;
    }
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelpack_core::MANIFEST_MEDIA_TYPE;

    fn descriptor(content: &[u8]) -> Descriptor {
        Descriptor::for_bytes(MANIFEST_MEDIA_TYPE, content)
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ReferenceIndex::new(dir.path().join("index.json"));
        index.load().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "\n").unwrap();
        let mut index = ReferenceIndex::new(path);
        index.load().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let d = descriptor(b"manifest");

        let mut index = ReferenceIndex::new(path.clone());
        index.load().await.unwrap();
        index.add("local/resnet:v1", d.clone());
        index.save().await.unwrap();

        let mut reloaded = ReferenceIndex::new(path);
        reloaded.load().await.unwrap();
        let entries: Vec<_> = reloaded.list().collect();
        assert_eq!(entries, vec![("local/resnet:v1", &d)]);
    }

    #[tokio::test]
    async fn test_saved_document_is_oci_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut index = ReferenceIndex::new(path.clone());
        index.add("a:v1", descriptor(b"a"));
        index.save().await.unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(
            value["manifests"][0]["annotations"][ANNOTATION_REF_NAME],
            "a:v1"
        );
    }

    #[test]
    fn test_add_overwrites_in_place() {
        let mut index = ReferenceIndex::new(PathBuf::from("index.json"));
        index.add("a", descriptor(b"1"));
        index.add("b", descriptor(b"2"));
        index.add("a", descriptor(b"3"));

        let tags: Vec<_> = index.list().map(|(t, _)| t).collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(index.get("a"), Some(&descriptor(b"3")));
    }

    #[test]
    fn test_add_strips_stale_ref_name() {
        let mut index = ReferenceIndex::new(PathBuf::from("index.json"));
        let mut d = descriptor(b"1");
        d.annotations = Some(
            [(ANNOTATION_REF_NAME.to_string(), "old".to_string())]
                .into_iter()
                .collect(),
        );
        index.add("new", d);
        assert_eq!(index.get("new").unwrap().annotations, None);
    }

    #[test]
    fn test_remove() {
        let mut index = ReferenceIndex::new(PathBuf::from("index.json"));
        index.add("a", descriptor(b"1"));
        assert_eq!(index.remove("a"), Some(descriptor(b"1")));
        assert_eq!(index.remove("a"), None);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_load_discards_unsaved_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = ReferenceIndex::new(dir.path().join("index.json"));
        index.add("a", descriptor(b"1"));
        index.save().await.unwrap();
        index.add("b", descriptor(b"2"));

        index.load().await.unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get("b").is_none());
    }
}
