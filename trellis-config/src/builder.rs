// Layered configuration builder

use crate::{ConfigError, ConfigManager, FileFormat, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

struct FileSource {
    path: PathBuf,
    format: Option<FileFormat>,
    required: bool,
}

/// Builds a [`ConfigManager`] from defaults, files and the environment.
///
/// Sources apply in that order regardless of the order the builder methods
/// are called; files apply in the order they were added.
#[derive(Default)]
pub struct ConfigBuilder {
    prefix: Option<String>,
    defaults: Vec<(String, Value)>,
    files: Vec<FileSource>,
    env: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set environment variable prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn default_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.push((key.into(), value.into()));
        self
    }

    /// A file that must exist; format detected from the extension
    pub fn add_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(FileSource {
            path: path.into(),
            format: None,
            required: true,
        });
        self
    }

    /// A file that is skipped when missing
    pub fn add_optional_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(FileSource {
            path: path.into(),
            format: None,
            required: false,
        });
        self
    }

    pub fn add_file_with_format(mut self, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        self.files.push(FileSource {
            path: path.into(),
            format: Some(format),
            required: true,
        });
        self
    }

    /// Enable loading from environment variables
    pub fn load_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn build(self) -> Result<ConfigManager> {
        let manager = match self.prefix {
            Some(prefix) => ConfigManager::with_prefix(prefix),
            None => ConfigManager::new(),
        };

        for (key, value) in self.defaults {
            manager.set(&key, value)?;
        }

        for source in self.files {
            if !source.path.exists() {
                if source.required {
                    return Err(ConfigError::LoadError(format!(
                        "Configuration file not found: {}",
                        source.path.display()
                    )));
                }
                debug!(path = %source.path.display(), "Optional configuration file missing");
                continue;
            }
            let format = match source.format {
                Some(format) => format,
                None => FileFormat::detect(&source.path)?,
            };
            manager.load_file(&source.path, format)?;
        }

        if self.env {
            manager.load_env();
        }

        Ok(manager)
    }
}
