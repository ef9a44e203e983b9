//! Filter parameters: a plain serde snapshot and the live, atomically updated config.

use crate::error::ConfigError;
use crate::sample::DofGroup;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use tracing::{debug, info, warn};

pub const SMOOTHING_RANGE: (f64, f64) = (0.0, 0.99);
pub const TEMPERATURE_RANGE: (f64, f64) = (0.01, 2.0);
pub const SENSITIVITY_RANGE: (f64, f64) = (0.0, 2.0);
pub const DEADBAND_RANGE: (f64, f64) = (0.0, 0.8);

/// Shape of the deadband applied before emphasis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandCurve {
    /// Zero inside the band, untouched outside
    #[default]
    Step,
    /// Zero inside the band, linearly rescaled outside so the output is continuous
    Linear,
    /// Like `Linear` but through a cubic response curve
    Cubic,
}

impl DeadbandCurve {
    fn to_u8(self) -> u8 {
        match self {
            DeadbandCurve::Step => 0,
            DeadbandCurve::Linear => 1,
            DeadbandCurve::Cubic => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeadbandCurve::Linear,
            2 => DeadbandCurve::Cubic,
            _ => DeadbandCurve::Step,
        }
    }
}

impl FromStr for DeadbandCurve {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "step" => Ok(DeadbandCurve::Step),
            "linear" => Ok(DeadbandCurve::Linear),
            "cubic" => Ok(DeadbandCurve::Cubic),
            _ => Err(ConfigError::InvalidValue {
                param: "deadband_curve",
                value: s.to_string(),
            }),
        }
    }
}

/// Plain copy of every filter parameter
///
/// Used for the config file and as the per-sample snapshot handed to
/// [`transform`](super::transform).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// EMA weight of the previous output (0 = no memory)
    pub smoothing_factor: f64,
    /// Emphasis sharpness; small values let the dominant component win
    pub softmax_temperature: f64,
    pub translation_sensitivity: f64,
    pub rotation_sensitivity: f64,
    pub translation_deadband: f64,
    pub rotation_deadband: f64,
    pub translation_enabled: bool,
    pub rotation_enabled: bool,
    pub deadband_curve: DeadbandCurve,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.5,
            softmax_temperature: 0.85,
            translation_sensitivity: 1.0,
            rotation_sensitivity: 1.0,
            translation_deadband: 0.1,
            rotation_deadband: 0.1,
            translation_enabled: true,
            rotation_enabled: true,
            deadband_curve: DeadbandCurve::Step,
        }
    }
}

impl FilterSettings {
    pub fn sensitivity(&self, group: DofGroup) -> f64 {
        match group {
            DofGroup::Translation => self.translation_sensitivity,
            DofGroup::Rotation => self.rotation_sensitivity,
        }
    }

    pub fn deadband(&self, group: DofGroup) -> f64 {
        match group {
            DofGroup::Translation => self.translation_deadband,
            DofGroup::Rotation => self.rotation_deadband,
        }
    }

    pub fn enabled(&self, group: DofGroup) -> bool {
        match group {
            DofGroup::Translation => self.translation_enabled,
            DofGroup::Rotation => self.rotation_enabled,
        }
    }

    /// Checks every numeric field against its documented bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        for param in FilterParam::ALL {
            if let Some(value) = param.numeric_value(self) {
                param.check(value)?;
            }
        }
        Ok(())
    }
}

/// Every recognized option of the configuration surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterParam {
    SmoothingFactor,
    SoftmaxTemperature,
    TranslationSensitivity,
    RotationSensitivity,
    TranslationDeadband,
    RotationDeadband,
    TranslationEnabled,
    RotationEnabled,
    DeadbandCurve,
}

impl FilterParam {
    pub const ALL: [FilterParam; 9] = [
        FilterParam::SmoothingFactor,
        FilterParam::SoftmaxTemperature,
        FilterParam::TranslationSensitivity,
        FilterParam::RotationSensitivity,
        FilterParam::TranslationDeadband,
        FilterParam::RotationDeadband,
        FilterParam::TranslationEnabled,
        FilterParam::RotationEnabled,
        FilterParam::DeadbandCurve,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterParam::SmoothingFactor => "smoothing_factor",
            FilterParam::SoftmaxTemperature => "softmax_temperature",
            FilterParam::TranslationSensitivity => "translation_sensitivity",
            FilterParam::RotationSensitivity => "rotation_sensitivity",
            FilterParam::TranslationDeadband => "translation_deadband",
            FilterParam::RotationDeadband => "rotation_deadband",
            FilterParam::TranslationEnabled => "translation_enabled",
            FilterParam::RotationEnabled => "rotation_enabled",
            FilterParam::DeadbandCurve => "deadband_curve",
        }
    }

    /// Valid range of a numeric parameter, `None` for flags and the curve selector
    pub fn range(self) -> Option<(f64, f64)> {
        match self {
            FilterParam::SmoothingFactor => Some(SMOOTHING_RANGE),
            FilterParam::SoftmaxTemperature => Some(TEMPERATURE_RANGE),
            FilterParam::TranslationSensitivity | FilterParam::RotationSensitivity => {
                Some(SENSITIVITY_RANGE)
            }
            FilterParam::TranslationDeadband | FilterParam::RotationDeadband => {
                Some(DEADBAND_RANGE)
            }
            FilterParam::TranslationEnabled
            | FilterParam::RotationEnabled
            | FilterParam::DeadbandCurve => None,
        }
    }

    fn check(self, value: f64) -> Result<(), ConfigError> {
        if let Some((min, max)) = self.range() {
            // NaN fails both comparisons and is rejected here as well
            if !(value >= min && value <= max) {
                return Err(ConfigError::OutOfRange {
                    param: self.name(),
                    value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    fn numeric_value(self, settings: &FilterSettings) -> Option<f64> {
        match self {
            FilterParam::SmoothingFactor => Some(settings.smoothing_factor),
            FilterParam::SoftmaxTemperature => Some(settings.softmax_temperature),
            FilterParam::TranslationSensitivity => Some(settings.translation_sensitivity),
            FilterParam::RotationSensitivity => Some(settings.rotation_sensitivity),
            FilterParam::TranslationDeadband => Some(settings.translation_deadband),
            FilterParam::RotationDeadband => Some(settings.rotation_deadband),
            _ => None,
        }
    }
}

impl fmt::Display for FilterParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterParam {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        FilterParam::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownParameter(wanted.to_string()))
    }
}

// f64 stored as raw bits so a write is a single atomic store
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Live filter configuration shared between the control context and the sampling path
///
/// Each field is an independent atomic cell. Writes are validated at the
/// boundary: an out-of-range value is rejected with
/// [`ConfigError::OutOfRange`] and the previous value stays in effect.
/// There is no cross-field consistency; a sample may observe a change to one
/// field and not yet to another.
#[derive(Debug)]
pub struct FilterConfig {
    smoothing_factor: AtomicF64,
    softmax_temperature: AtomicF64,
    translation_sensitivity: AtomicF64,
    rotation_sensitivity: AtomicF64,
    translation_deadband: AtomicF64,
    rotation_deadband: AtomicF64,
    translation_enabled: AtomicBool,
    rotation_enabled: AtomicBool,
    deadband_curve: AtomicU8,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::from_valid(&FilterSettings::default())
    }
}

impl FilterConfig {
    /// Builds a live config from validated settings
    pub fn new(settings: &FilterSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self::from_valid(settings))
    }

    fn from_valid(settings: &FilterSettings) -> Self {
        Self {
            smoothing_factor: AtomicF64::new(settings.smoothing_factor),
            softmax_temperature: AtomicF64::new(settings.softmax_temperature),
            translation_sensitivity: AtomicF64::new(settings.translation_sensitivity),
            rotation_sensitivity: AtomicF64::new(settings.rotation_sensitivity),
            translation_deadband: AtomicF64::new(settings.translation_deadband),
            rotation_deadband: AtomicF64::new(settings.rotation_deadband),
            translation_enabled: AtomicBool::new(settings.translation_enabled),
            rotation_enabled: AtomicBool::new(settings.rotation_enabled),
            deadband_curve: AtomicU8::new(settings.deadband_curve.to_u8()),
        }
    }

    /// Reads every field once; called by the sampling path for each sample
    pub fn snapshot(&self) -> FilterSettings {
        FilterSettings {
            smoothing_factor: self.smoothing_factor.load(),
            softmax_temperature: self.softmax_temperature.load(),
            translation_sensitivity: self.translation_sensitivity.load(),
            rotation_sensitivity: self.rotation_sensitivity.load(),
            translation_deadband: self.translation_deadband.load(),
            rotation_deadband: self.rotation_deadband.load(),
            translation_enabled: self.translation_enabled.load(Ordering::Acquire),
            rotation_enabled: self.rotation_enabled.load(Ordering::Acquire),
            deadband_curve: DeadbandCurve::from_u8(self.deadband_curve.load(Ordering::Acquire)),
        }
    }

    /// Replaces every field after validating the whole set
    pub fn apply(&self, settings: &FilterSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.smoothing_factor.store(settings.smoothing_factor);
        self.softmax_temperature.store(settings.softmax_temperature);
        self.translation_sensitivity
            .store(settings.translation_sensitivity);
        self.rotation_sensitivity.store(settings.rotation_sensitivity);
        self.translation_deadband.store(settings.translation_deadband);
        self.rotation_deadband.store(settings.rotation_deadband);
        self.translation_enabled
            .store(settings.translation_enabled, Ordering::Release);
        self.rotation_enabled
            .store(settings.rotation_enabled, Ordering::Release);
        self.deadband_curve
            .store(settings.deadband_curve.to_u8(), Ordering::Release);
        info!("Applied filter settings: {:?}", settings);
        Ok(())
    }

    /// Writes one numeric parameter
    pub fn set_value(&self, param: FilterParam, value: f64) -> Result<(), ConfigError> {
        if let Err(e) = param.check(value) {
            warn!("Rejected filter update: {}", e);
            return Err(e);
        }

        let cell = match param {
            FilterParam::SmoothingFactor => &self.smoothing_factor,
            FilterParam::SoftmaxTemperature => &self.softmax_temperature,
            FilterParam::TranslationSensitivity => &self.translation_sensitivity,
            FilterParam::RotationSensitivity => &self.rotation_sensitivity,
            FilterParam::TranslationDeadband => &self.translation_deadband,
            FilterParam::RotationDeadband => &self.rotation_deadband,
            FilterParam::TranslationEnabled
            | FilterParam::RotationEnabled
            | FilterParam::DeadbandCurve => {
                return Err(ConfigError::InvalidValue {
                    param: param.name(),
                    value: value.to_string(),
                })
            }
        };
        cell.store(value);
        debug!("Filter parameter {} set to {}", param, value);
        Ok(())
    }

    pub fn set_enabled(&self, group: DofGroup, enabled: bool) {
        let cell = match group {
            DofGroup::Translation => &self.translation_enabled,
            DofGroup::Rotation => &self.rotation_enabled,
        };
        cell.store(enabled, Ordering::Release);
        debug!("{} enabled: {}", group, enabled);
    }

    pub fn set_deadband_curve(&self, curve: DeadbandCurve) {
        self.deadband_curve.store(curve.to_u8(), Ordering::Release);
        debug!("Deadband curve set to {:?}", curve);
    }

    /// Writes a parameter from its textual form, e.g. `("rotation_enabled", "false")`
    pub fn set_from_str(&self, name: &str, value: &str) -> Result<(), ConfigError> {
        let param: FilterParam = name.parse()?;
        let invalid = || ConfigError::InvalidValue {
            param: param.name(),
            value: value.to_string(),
        };

        match param {
            FilterParam::TranslationEnabled | FilterParam::RotationEnabled => {
                let enabled: bool = value.trim().parse().map_err(|_| invalid())?;
                let group = if param == FilterParam::TranslationEnabled {
                    DofGroup::Translation
                } else {
                    DofGroup::Rotation
                };
                self.set_enabled(group, enabled);
                Ok(())
            }
            FilterParam::DeadbandCurve => {
                self.set_deadband_curve(value.parse()?);
                Ok(())
            }
            _ => {
                let number: f64 = value.trim().parse().map_err(|_| invalid())?;
                self.set_value(param, number)
            }
        }
    }
}
