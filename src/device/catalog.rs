//! Catalog of supported 3D mice and their HID report layouts

use crate::error::ConfigError;
use crate::sample::Axis;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

const LOGITECH: u16 = 0x046D;
const THREE_D_CONNEXION: u16 = 0x256F;

/// Full-scale raw reading of the built-in devices
const DEFAULT_AXIS_SCALE: f64 = 350.0;

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HidId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl HidId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

/// Location of one axis in the input report
///
/// The value is the little-endian i16 formed by `report[byte1]` and
/// `report[byte2]` of a report whose first byte equals `channel`. `scale` is
/// usually +1 or -1 and flips the axis direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub channel: u8,
    pub byte1: usize,
    pub byte2: usize,
    pub scale: f64,
}

impl AxisSpec {
    pub const fn new(channel: u8, byte1: usize, byte2: usize, scale: f64) -> Self {
        Self {
            channel,
            byte1,
            byte2,
            scale,
        }
    }
}

/// Report layout of all six axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisMap {
    pub x: AxisSpec,
    pub y: AxisSpec,
    pub z: AxisSpec,
    pub roll: AxisSpec,
    pub pitch: AxisSpec,
    pub yaw: AxisSpec,
}

impl AxisMap {
    pub fn get(&self, axis: Axis) -> &AxisSpec {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::Roll => &self.roll,
            Axis::Pitch => &self.pitch,
            Axis::Yaw => &self.yaw,
        }
    }

    // translation on channel 1, rotation on channel 2
    fn split_channels() -> Self {
        Self {
            x: AxisSpec::new(1, 1, 2, 1.0),
            y: AxisSpec::new(1, 3, 4, -1.0),
            z: AxisSpec::new(1, 5, 6, -1.0),
            pitch: AxisSpec::new(2, 1, 2, -1.0),
            roll: AxisSpec::new(2, 3, 4, -1.0),
            yaw: AxisSpec::new(2, 5, 6, 1.0),
        }
    }

    // all six axes in a single channel 1 report
    fn single_channel() -> Self {
        Self {
            x: AxisSpec::new(1, 1, 2, 1.0),
            y: AxisSpec::new(1, 3, 4, -1.0),
            z: AxisSpec::new(1, 5, 6, -1.0),
            pitch: AxisSpec::new(1, 7, 8, -1.0),
            roll: AxisSpec::new(1, 9, 10, -1.0),
            yaw: AxisSpec::new(1, 11, 12, 1.0),
        }
    }
}

/// One button bit in the input report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonSpec {
    pub name: String,
    pub channel: u8,
    pub byte: usize,
    pub bit: u8,
}

impl ButtonSpec {
    fn new(name: &str, channel: u8, byte: usize, bit: u8) -> Self {
        Self {
            name: name.to_string(),
            channel,
            byte,
            bit,
        }
    }
}

/// Immutable description of one supported device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Unique identifier, also used for device selection
    pub name: String,
    /// Alternative vendor/product ids, tried in order
    pub hid_ids: Vec<HidId>,
    pub axes: AxisMap,
    #[serde(default)]
    pub buttons: Vec<ButtonSpec>,
    /// Raw reading mapped to full deflection
    pub axis_scale: f64,
}

impl DeviceSpec {
    pub fn vendor_id(&self) -> Option<u16> {
        self.hid_ids.first().map(|id| id.vendor_id)
    }

    pub fn product_id(&self) -> Option<u16> {
        self.hid_ids.first().map(|id| id.product_id)
    }

    /// Bit index of a named button in [`ButtonState`](crate::sample::ButtonState)
    pub fn button_index(&self, name: &str) -> Option<usize> {
        self.buttons.iter().position(|b| b.name == name)
    }
}

fn two_buttons() -> Vec<ButtonSpec> {
    vec![
        ButtonSpec::new("LEFT", 3, 1, 0),
        ButtonSpec::new("RIGHT", 3, 1, 1),
    ]
}

fn pro_buttons() -> Vec<ButtonSpec> {
    vec![
        ButtonSpec::new("MENU", 3, 1, 0),
        ButtonSpec::new("ALT", 3, 3, 7),
        ButtonSpec::new("CTRL", 3, 4, 1),
        ButtonSpec::new("SHIFT", 3, 4, 0),
        ButtonSpec::new("ESC", 3, 3, 6),
        ButtonSpec::new("1", 3, 2, 4),
        ButtonSpec::new("2", 3, 2, 5),
        ButtonSpec::new("3", 3, 2, 6),
        ButtonSpec::new("4", 3, 2, 7),
        ButtonSpec::new("ROLL CLOCKWISE", 3, 2, 0),
        ButtonSpec::new("T", 3, 1, 2),
        ButtonSpec::new("ROTATION", 3, 4, 2),
        ButtonSpec::new("F", 3, 1, 5),
        ButtonSpec::new("R", 3, 1, 4),
        ButtonSpec::new("FIT", 3, 1, 1),
    ]
}

fn spec(name: &str, hid_ids: &[HidId], axes: AxisMap, buttons: Vec<ButtonSpec>) -> DeviceSpec {
    DeviceSpec {
        name: name.to_string(),
        hid_ids: hid_ids.to_vec(),
        axes,
        buttons,
        axis_scale: DEFAULT_AXIS_SCALE,
    }
}

#[derive(Deserialize, Serialize)]
struct CatalogFile {
    device: Vec<DeviceSpec>,
}

/// Ordered set of device specs; discovery probes them in this order
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCatalog {
    specs: Vec<DeviceSpec>,
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DeviceCatalog {
    /// Rejects catalogs with duplicate names or unusable axis scales
    pub fn new(specs: Vec<DeviceSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    param: "device.name",
                    value: format!("duplicate device name {}", spec.name),
                });
            }
            if !(spec.axis_scale > 0.0) {
                return Err(ConfigError::InvalidValue {
                    param: "device.axis_scale",
                    value: spec.axis_scale.to_string(),
                });
            }
        }
        Ok(Self { specs })
    }

    /// Devices known to work with the 3Dconnexion report format
    pub fn builtin() -> Self {
        Self {
            specs: vec![
                spec(
                    "SpaceNavigator",
                    &[HidId::new(LOGITECH, 0xC626)],
                    AxisMap::split_channels(),
                    two_buttons(),
                ),
                spec(
                    "SpaceMouse Compact",
                    &[HidId::new(THREE_D_CONNEXION, 0xC635)],
                    AxisMap::split_channels(),
                    two_buttons(),
                ),
                spec(
                    "SpaceMouse Pro Wireless",
                    &[
                        HidId::new(THREE_D_CONNEXION, 0xC632),
                        HidId::new(THREE_D_CONNEXION, 0xC631),
                    ],
                    AxisMap::single_channel(),
                    pro_buttons(),
                ),
                spec(
                    "SpaceMouse Pro",
                    &[HidId::new(LOGITECH, 0xC62B)],
                    AxisMap::split_channels(),
                    pro_buttons(),
                ),
                spec(
                    "SpaceMouse Wireless",
                    &[
                        HidId::new(THREE_D_CONNEXION, 0xC62E),
                        HidId::new(THREE_D_CONNEXION, 0xC652),
                    ],
                    AxisMap::single_channel(),
                    two_buttons(),
                ),
                spec(
                    "3Dconnexion Universal Receiver",
                    &[HidId::new(THREE_D_CONNEXION, 0xC652)],
                    AxisMap::single_channel(),
                    pro_buttons(),
                ),
            ],
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile = toml::from_str(content)?;
        debug!("Parsed catalog with {} devices", file.device.len());
        Self::new(file.device)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let file = CatalogFile {
            device: self.specs.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Loads a catalog file, replacing the built-in list
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_toml_str(&content)?;
        info!(
            "Loaded device catalog from {} ({} devices)",
            path.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
