// Environment variable loading

use crate::{ConfigError, Result};
use std::env;

/// Maps environment variables onto configuration keys.
///
/// With prefix `APP`, `APP_SERVER__PORT` becomes `server.port`: the prefix
/// and its separator are stripped, the rest is lowercased and `__` marks a
/// nesting level. Without a prefix every variable is taken.
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Load every matching variable of the process environment
    pub fn load(&self) -> Vec<(String, String)> {
        self.load_from(env::vars())
    }

    /// Load matching variables from an explicit source
    pub fn load_from<I>(&self, vars: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(name, value)| self.key_for(&name).map(|key| (key, value)))
            .collect()
    }

    /// The configuration key for variable `name`, if it matches the prefix
    pub fn key_for(&self, name: &str) -> Option<String> {
        let rest = match &self.prefix {
            Some(prefix) => name.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => name,
        };
        if rest.is_empty() {
            return None;
        }
        Some(rest.to_lowercase().replace("__", "."))
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.var_name(key)).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Inverse of [`EnvLoader::key_for`]
    pub fn var_name(&self, key: &str) -> String {
        let name = key.replace('.', "__").to_uppercase();
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, name),
            None => name,
        }
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}
