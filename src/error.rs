//! Error definitions for the device layer and the configuration surface

use thiserror::Error;

/// Errors raised while engaging or probing a device
///
/// None of these are fatal: total hardware unavailability degrades to
/// "not connected".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    /// Device absent, unplugged, or blocked by permissions / driver setup
    #[error("Device not found: {device} ({reason})")]
    NotFound { device: String, reason: String },

    /// A session is already open; the request was a no-op
    #[error("Already engaged with {active}")]
    AlreadyEngaged { active: String },

    /// The requested name is not part of the device catalog
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Discovery probed every catalog entry without success
    #[error("No device available after probing {attempted} catalog entries")]
    NoDeviceAvailable { attempted: usize },
}

impl DeviceError {
    pub fn not_found(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::NotFound {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by configuration writes and config file handling
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Value outside the documented bounds; the previous value is kept
    #[error("{param} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        param: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for {param}: {value}")]
    InvalidValue { param: &'static str, value: String },

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
