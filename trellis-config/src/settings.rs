// Typed server settings

use crate::{ConfigError, ConfigManager, ConfigValidator, Result, Validate};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use trellis_core::logging::{LogConfig, LogFormat, LogLevel};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];
const LOG_FORMATS: &[&str] = &["json", "plain", "pretty", "compact"];

/// The `[server]` section.
///
/// Every field has a default, so an empty or missing section is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ServerSettings {
    pub const SECTION: &'static str = "server";

    /// Read and validate the `server` section, falling back to defaults
    /// when it is absent.
    pub fn from_config(config: &ConfigManager) -> Result<Self> {
        if !config.has(Self::SECTION) {
            return Ok(Self::default());
        }
        config.load_validated(Self::SECTION)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.host.parse().map_err(|_| ConfigError::InvalidValue {
            key: "server.host".to_string(),
            message: format!("{:?} is not an IP address", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Logging configuration matching `log_level` and `log_format`
    pub fn log_config(&self) -> Result<LogConfig> {
        let level: LogLevel = self.log_level.parse().map_err(|message| {
            ConfigError::InvalidValue {
                key: "server.log_level".to_string(),
                message,
            }
        })?;
        let format: LogFormat = self.log_format.parse().map_err(|message| {
            ConfigError::InvalidValue {
                key: "server.log_format".to_string(),
                message,
            }
        })?;
        Ok(LogConfig::new().level(level).format(format))
    }
}

impl Validate for ServerSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "server.host")?;
        ConfigValidator::is_port(self.port, "server.port")?;
        ConfigValidator::one_of(&self.log_level, LOG_LEVELS, "server.log_level")?;
        ConfigValidator::one_of(&self.log_format, LOG_FORMATS, "server.log_format")?;
        Ok(())
    }
}
