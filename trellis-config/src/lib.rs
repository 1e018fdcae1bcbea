//! Configuration management for the Trellis framework.
//!
//! [`ConfigManager`] holds a tree of JSON values addressed by dotted keys
//! (`server.port`). Sources are layered in load order, later ones winning:
//!
//! ```
//! use trellis_config::{ConfigManager, FileFormat};
//!
//! let config = ConfigManager::new();
//! config
//!     .load_str("[server]\nport = 3000\n", FileFormat::Toml)
//!     .unwrap();
//! config.load_env_from(vec![("SERVER__PORT".to_string(), "9000".to_string())]);
//!
//! let port: u16 = config.get("server.port").unwrap();
//! assert_eq!(port, 9000);
//! ```
//!
//! Bind the manager into a container to make it injectable:
//!
//! ```
//! use trellis_config::ConfigManager;
//! use trellis_core::Container;
//!
//! let container = Container::new();
//! container.register_instance(ConfigManager::new());
//! assert!(container.resolve::<ConfigManager>().is_ok());
//! ```

pub mod builder;
pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use builder::ConfigBuilder;
pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::ServerSettings;
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{Provider, ProviderDefinition, Token};

/// Main configuration manager
///
/// Clones share the same underlying tree.
#[derive(Clone, Default)]
pub struct ConfigManager {
    root: Arc<RwLock<Map<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            root: Arc::default(),
            env_prefix: Some(prefix.into()),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref()
    }

    /// Load matching variables from the process environment.
    ///
    /// Returns the number of keys set.
    pub fn load_env(&self) -> usize {
        let loaded = self.env_loader().load();
        self.apply_env(loaded)
    }

    /// Like [`ConfigManager::load_env`] but from an explicit variable list
    pub fn load_env_from<I>(&self, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let loaded = self.env_loader().load_from(vars);
        self.apply_env(loaded)
    }

    fn env_loader(&self) -> EnvLoader {
        EnvLoader::new(self.env_prefix.clone())
    }

    fn apply_env(&self, loaded: Vec<(String, String)>) -> usize {
        let count = loaded.len();
        let mut root = self.root.write();
        for (key, value) in loaded {
            set_path(&mut root, &key, Value::String(value));
        }
        debug!(count, prefix = ?self.env_prefix, "Loaded environment configuration");
        count
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;
        self.merge_value(data);
        debug!(path = %path.display(), ?format, "Loaded configuration file");
        Ok(())
    }

    /// Load a file, detecting the format from its extension
    pub fn load_file_auto(&self, path: impl AsRef<Path>) -> Result<()> {
        let format = FileFormat::detect(&path)?;
        self.load_file(path, format)
    }

    /// Load configuration from an in-memory source
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data);
        Ok(())
    }

    fn merge_value(&self, data: Value) {
        if let Value::Object(map) = data {
            merge_into(&mut self.root.write(), map);
        }
    }

    /// Set a value, creating intermediate tables as needed
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        set_path(&mut self.root.write(), key, value);
        Ok(())
    }

    /// Get a typed value.
    ///
    /// Strings that hold numbers or booleans, as environment variables
    /// always do, are coerced when the target type asks for one.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .get_value(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        match serde_json::from_value(value.clone()) {
            Ok(typed) => Ok(typed),
            Err(first) => serde_json::from_value::<T>(coerce(value)).map_err(|_| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: first.to_string(),
                }
            }),
        }
    }

    /// The raw value at `key`
    pub fn get_value(&self, key: &str) -> Option<Value> {
        lookup(&self.root.read(), key).cloned()
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.get(key)
    }

    /// Deserialize a section and validate it
    pub fn load_validated<T: DeserializeOwned + Validate>(&self, key: &str) -> Result<T> {
        let section: T = self.get(key)?;
        section.validate()?;
        Ok(section)
    }

    pub fn has(&self, key: &str) -> bool {
        lookup(&self.root.read(), key).is_some()
    }

    /// Dotted keys of every leaf value, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(&self.root.read(), "", &mut keys);
        keys.sort();
        keys
    }

    /// Overlay `other` onto this configuration
    pub fn merge(&self, other: &ConfigManager) {
        if Arc::ptr_eq(&self.root, &other.root) {
            return;
        }
        let theirs = other.root.read().clone();
        merge_into(&mut self.root.write(), theirs);
    }

    /// A registry definition binding this manager under its own type
    pub fn definition(self) -> ProviderDefinition {
        ProviderDefinition::config(Token::of::<ConfigManager>(), self)
    }
}

impl Provider for ConfigManager {}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("env_prefix", &self.env_prefix)
            .field("keys", &self.keys().len())
            .finish()
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = root.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn set_path(root: &mut Map<String, Value>, key: &str, value: Value) {
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut table = root;
    for part in parts {
        let slot = table
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        table = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    table.insert(last.to_string(), value);
}

fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match value {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_into(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}

fn collect_keys(map: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => collect_keys(inner, &full, out),
            _ => out.push(full),
        }
    }
}

fn coerce(value: Value) -> Value {
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
            _ => Value::String(s),
        },
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, coerce(v))).collect()),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce).collect()),
        other => other,
    }
}
