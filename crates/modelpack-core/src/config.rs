//! Configuration types for modelpack

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::PackError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::PackError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::PackError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the on-disk OCI layout
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: home.join(".modelpack").join("store"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.storage.root.ends_with(".modelpack/store"));
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_config_parse() {
        let toml_str = r#"
[storage]
root = "/var/lib/modelpack"

[logging]
level = "debug"
format = "json"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/var/lib/modelpack"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            toml::from_str("[logging]\nlevel = \"info\"\nformat = \"text\"\n").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.storage.root.ends_with(".modelpack/store"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/modelpack.toml")).unwrap_err();
        assert!(matches!(err, crate::PackError::Config(_)));
    }
}
