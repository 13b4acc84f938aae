//! Package description, handler selection, and archive metadata types

use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Path of the metadata document inside a model archive
pub const METADATA_PATH: &str = "MAR-INF/MANIFEST.json";

/// Version written into the metadata version fields
pub const METADATA_VERSION: &str = "1.0";

/// Suffix that marks a handler value as a custom handler script
const CUSTOM_HANDLER_SUFFIX: &str = ".py";

/// Handlers shipped with the model server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultHandler {
    TextClassifier,
    ImageClassifier,
    ObjectDetector,
    ImageSegmenter,
}

impl DefaultHandler {
    pub const ALL: [DefaultHandler; 4] = [
        DefaultHandler::TextClassifier,
        DefaultHandler::ImageClassifier,
        DefaultHandler::ObjectDetector,
        DefaultHandler::ImageSegmenter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultHandler::TextClassifier => "text_classifier",
            DefaultHandler::ImageClassifier => "image_classifier",
            DefaultHandler::ObjectDetector => "object_detector",
            DefaultHandler::ImageSegmenter => "image_segmenter",
        }
    }
}

impl fmt::Display for DefaultHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefaultHandler {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| PackError::InvalidPackage(format!("unknown default handler: {}", s)))
    }
}

/// How requests to the packaged model are handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Handler {
    /// One of the server's built-in handlers
    Default(DefaultHandler),
    /// A handler script shipped inside the package
    Custom(PathBuf),
}

impl Handler {
    /// Parse a handler value: a `.py` path is custom, anything else must
    /// name a default handler
    pub fn parse(value: &str) -> PackResult<Self> {
        if value.ends_with(CUSTOM_HANDLER_SUFFIX) {
            return Ok(Handler::Custom(PathBuf::from(value)));
        }
        value.parse().map(Handler::Default)
    }

    /// Script to pack into the content layer, if any
    pub fn script(&self) -> Option<&Path> {
        match self {
            Handler::Custom(path) => Some(path),
            Handler::Default(_) => None,
        }
    }

    /// Value recorded in the archive metadata
    pub fn metadata_name(&self) -> PackResult<String> {
        match self {
            Handler::Default(handler) => Ok(handler.as_str().to_string()),
            Handler::Custom(path) => base_name(path),
        }
    }
}

impl TryFrom<String> for Handler {
    type Error = PackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Handler::parse(&value)
    }
}

impl From<Handler> for String {
    fn from(handler: Handler) -> Self {
        match handler {
            Handler::Default(h) => h.as_str().to_string(),
            Handler::Custom(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Description of a package to build from loose files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Model name
    #[serde(alias = "modelName")]
    pub model_name: String,
    /// Model version
    #[serde(default)]
    pub version: Option<String>,
    /// Python file defining the model architecture
    #[serde(alias = "modelFile")]
    pub model_file: PathBuf,
    /// Serialized weights file
    #[serde(alias = "serializedFile")]
    pub serialized_file: PathBuf,
    /// Additional files packed next to the model file
    #[serde(default, alias = "extraFiles")]
    pub extra_files: Vec<PathBuf>,
    /// Request handler
    pub handler: Handler,
    /// Vocabulary file for text models
    #[serde(default, alias = "sourceVocab")]
    pub source_vocab: Option<PathBuf>,
    /// Runtime the model server should use
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

fn default_runtime() -> String {
    "python".to_string()
}

impl PackageSpec {
    /// Load a package description from a TOML file
    ///
    /// Relative paths are resolved against the file's directory.
    pub fn from_file(path: &Path) -> PackResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PackError::InvalidPackage(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut spec: PackageSpec = toml::from_str(&content).map_err(|e| {
            PackError::InvalidPackage(format!("failed to parse {}: {}", path.display(), e))
        })?;
        if let Some(dir) = path.parent() {
            spec.resolve_relative_to(dir);
        }
        Ok(spec)
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        resolve(&mut self.model_file);
        resolve(&mut self.serialized_file);
        for extra in &mut self.extra_files {
            resolve(extra);
        }
        if let Some(vocab) = self.source_vocab.as_mut() {
            resolve(vocab);
        }
        if let Handler::Custom(script) = &mut self.handler {
            resolve(script);
        }
    }

    /// Files packed into the content layer, in their fixed order
    pub fn content_files(&self) -> Vec<&Path> {
        let mut files = vec![self.model_file.as_path()];
        files.extend(self.extra_files.iter().map(PathBuf::as_path));
        if let Some(vocab) = &self.source_vocab {
            files.push(vocab);
        }
        if let Some(script) = self.handler.script() {
            files.push(script);
        }
        files
    }

    /// Archive metadata with every filename reduced to its base name
    pub fn metadata(&self) -> PackResult<PackageMetadata> {
        Ok(PackageMetadata {
            runtime: self.runtime.clone(),
            model: ModelInfo {
                model_name: self.model_name.clone(),
                model_version: self.version.clone(),
                model_file: base_name(&self.model_file)?,
                serialized_file: base_name(&self.serialized_file)?,
                handler: self.handler.metadata_name()?,
                source_vocab: self.source_vocab.as_deref().map(base_name).transpose()?,
            },
            model_server_version: METADATA_VERSION.to_string(),
            implementation_version: METADATA_VERSION.to_string(),
            specification_version: METADATA_VERSION.to_string(),
        })
    }
}

/// Model section of the archive metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default)]
    pub model_file: String,
    pub serialized_file: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_vocab: Option<String>,
}

/// Archive metadata stored as `MAR-INF/MANIFEST.json` and as the config blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(default = "default_runtime")]
    pub runtime: String,
    pub model: ModelInfo,
    #[serde(default)]
    pub model_server_version: String,
    #[serde(default)]
    pub implementation_version: String,
    #[serde(default)]
    pub specification_version: String,
}

impl PackageMetadata {
    /// Parse a metadata document, rejecting one without a weights filename
    pub fn from_slice(bytes: &[u8]) -> PackResult<Self> {
        let metadata: PackageMetadata = serde_json::from_slice(bytes).map_err(|e| {
            PackError::InvalidPackage(format!("malformed {}: {}", METADATA_PATH, e))
        })?;
        if metadata.model.serialized_file.is_empty() {
            return Err(PackError::InvalidPackage(format!(
                "{} does not name a serialized file",
                METADATA_PATH
            )));
        }
        Ok(metadata)
    }

    pub fn to_vec(&self) -> PackResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Final path component as a string
pub fn base_name(path: &Path) -> PackResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PackError::InvalidPackage(format!("not a file path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(handler: &str) -> PackageSpec {
        PackageSpec {
            model_name: "densenet161".to_string(),
            version: Some("0.1".to_string()),
            model_file: PathBuf::from("/src/models/model.py"),
            serialized_file: PathBuf::from("/src/weights/densenet161.pth"),
            extra_files: vec![PathBuf::from("/src/index_to_name.json")],
            handler: Handler::parse(handler).unwrap(),
            source_vocab: None,
            runtime: "python".to_string(),
        }
    }

    #[test]
    fn test_handler_parse() {
        assert_eq!(
            Handler::parse("image_classifier").unwrap(),
            Handler::Default(DefaultHandler::ImageClassifier)
        );
        assert_eq!(
            Handler::parse("handlers/my_handler.py").unwrap(),
            Handler::Custom(PathBuf::from("handlers/my_handler.py"))
        );
        assert!(matches!(
            Handler::parse("speech_recognizer"),
            Err(PackError::InvalidPackage(_))
        ));
    }

    #[test]
    fn test_metadata_uses_base_names() {
        let metadata = spec("image_classifier").metadata().unwrap();
        assert_eq!(metadata.model.model_name, "densenet161");
        assert_eq!(metadata.model.model_version.as_deref(), Some("0.1"));
        assert_eq!(metadata.model.model_file, "model.py");
        assert_eq!(metadata.model.serialized_file, "densenet161.pth");
        assert_eq!(metadata.model.handler, "image_classifier");
        assert_eq!(metadata.model_server_version, "1.0");
    }

    #[test]
    fn test_custom_handler_metadata_and_content() {
        let spec = spec("/src/handlers/handler.py");
        assert_eq!(spec.metadata().unwrap().model.handler, "handler.py");
        let files = spec.content_files();
        assert_eq!(files.last().unwrap(), &Path::new("/src/handlers/handler.py"));
    }

    #[test]
    fn test_content_files_order() {
        let mut spec = spec("text_classifier");
        spec.source_vocab = Some(PathBuf::from("/src/vocab.txt"));
        let files = spec.content_files();
        assert_eq!(
            files,
            vec![
                Path::new("/src/models/model.py"),
                Path::new("/src/index_to_name.json"),
                Path::new("/src/vocab.txt"),
            ]
        );
    }

    #[test]
    fn test_metadata_json_shape() {
        let metadata = spec("image_classifier").metadata().unwrap();
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["model"]["modelName"], "densenet161");
        assert_eq!(value["model"]["serializedFile"], "densenet161.pth");
        assert_eq!(value["specificationVersion"], "1.0");
        assert!(value["model"].get("sourceVocab").is_none());
    }

    #[test]
    fn test_metadata_requires_serialized_file() {
        let bytes = br#"{"runtime":"python","model":{"modelName":"m","serializedFile":""}}"#;
        assert!(matches!(
            PackageMetadata::from_slice(bytes),
            Err(PackError::InvalidPackage(_))
        ));
        assert!(PackageMetadata::from_slice(b"not json").is_err());
    }

    #[test]
    fn test_spec_from_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Modelfile.toml");
        std::fs::write(
            &path,
            r#"
model_name = "resnet"
model_file = "model.py"
serialized_file = "weights/resnet.pth"
extra_files = ["labels.json"]
handler = "image_classifier"
"#,
        )
        .unwrap();

        let spec = PackageSpec::from_file(&path).unwrap();
        assert_eq!(spec.model_file, dir.path().join("model.py"));
        assert_eq!(spec.serialized_file, dir.path().join("weights/resnet.pth"));
        assert_eq!(spec.extra_files, vec![dir.path().join("labels.json")]);
        assert_eq!(spec.runtime, "python");
        assert_eq!(spec.handler, Handler::Default(DefaultHandler::ImageClassifier));
    }

    #[test]
    fn test_spec_from_file_rejects_unknown_handler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Modelfile.toml");
        std::fs::write(
            &path,
            r#"
model_name = "m"
model_file = "m.py"
serialized_file = "m.pth"
handler = "nope"
"#,
        )
        .unwrap();
        assert!(matches!(
            PackageSpec::from_file(&path),
            Err(PackError::InvalidPackage(_))
        ));
    }

    #[test]
    fn test_spec_from_file_accepts_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Modelfile.toml");
        std::fs::write(
            &path,
            r#"
modelName = "bert"
modelFile = "model.py"
serializedFile = "bert.bin"
extraFiles = ["config.json"]
sourceVocab = "vocab.txt"
handler = "text_classifier"
"#,
        )
        .unwrap();

        let spec = PackageSpec::from_file(&path).unwrap();
        assert_eq!(spec.model_name, "bert");
        assert_eq!(spec.serialized_file, dir.path().join("bert.bin"));
        assert_eq!(spec.extra_files, vec![dir.path().join("config.json")]);
        assert_eq!(spec.source_vocab, Some(dir.path().join("vocab.txt")));
        assert_eq!(spec.handler, Handler::Default(DefaultHandler::TextClassifier));
    }
}
