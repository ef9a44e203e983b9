//! Application configuration persisted as TOML

use crate::buffer::DEFAULT_CAPACITY;
use crate::error::ConfigError;
use crate::filter::FilterSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "spacemouse";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device to engage; discovery is used when unset
    pub name: Option<String>,
    pub engage_on_start: bool,
    /// Fall back to discovery if the named device cannot be opened
    pub discover: bool,
    /// Catalog file replacing the built-in device list
    pub catalog: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: None,
            engage_on_start: true,
            discover: true,
            catalog: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Hid,
    Simulated,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Hid => write!(f, "hid"),
            TransportKind::Simulated => write!(f, "simulated"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hid" => Ok(TransportKind::Hid),
            "simulated" | "mock" => Ok(TransportKind::Simulated),
            _ => Err(ConfigError::InvalidValue {
                param: "transport.kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub control_rate_hz: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Hid,
            control_rate_hz: 20,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// Period of the status line, 0 disables it
    pub interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub transport: TransportConfig,
    pub filter: FilterSettings,
    pub buffer: BufferConfig,
    pub report: ReportConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.filter.validate()?;
        if self.transport.control_rate_hz == 0 {
            return Err(ConfigError::InvalidValue {
                param: "transport.control_rate_hz",
                value: "0".to_string(),
            });
        }
        if self.buffer.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                param: "buffer.capacity",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !tokio::fs::try_exists(parent).await? {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, self.to_toml_string()?).await?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Writes the defaults on first start, then loads whatever is on disk
    pub async fn ensure_default_config(path: &Path) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await? {
            info!("No config at {}, writing defaults", path.display());
            AppConfig::default().save(path).await?;
        }
        Self::load(path).await
    }
}

/// `<config dir>/spacemouse/config.toml`
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}
