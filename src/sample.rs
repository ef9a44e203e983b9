//! Sample types shared by the device layer, the filter and the history buffer.

use serde::{Deserialize, Serialize};

/// Three components of one degree-of-freedom group.
pub type Vec3 = [f64; 3];

/// One of the two 3-component axis sets of a 6-DoF device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DofGroup {
    Translation,
    Rotation,
}

impl DofGroup {
    pub const ALL: [DofGroup; 2] = [DofGroup::Translation, DofGroup::Rotation];
}

impl std::fmt::Display for DofGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DofGroup::Translation => write!(f, "translation"),
            DofGroup::Rotation => write!(f, "rotation"),
        }
    }
}

/// Single axis of a 6-DoF sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
    Roll,
    Pitch,
    Yaw,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::X,
        Axis::Y,
        Axis::Z,
        Axis::Roll,
        Axis::Pitch,
        Axis::Yaw,
    ];

    pub fn group(self) -> DofGroup {
        match self {
            Axis::X | Axis::Y | Axis::Z => DofGroup::Translation,
            Axis::Roll | Axis::Pitch | Axis::Yaw => DofGroup::Rotation,
        }
    }

    /// Index of the axis inside its group
    pub fn component(self) -> usize {
        match self {
            Axis::X | Axis::Roll => 0,
            Axis::Y | Axis::Pitch => 1,
            Axis::Z | Axis::Yaw => 2,
        }
    }
}

/// Packed button bitfield, bit `i` is the `i`-th entry of the device's button mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ButtonState(pub u32);

impl ButtonState {
    pub fn is_pressed(self, index: usize) -> bool {
        index < 32 && (self.0 >> index) & 1 == 1
    }

    pub fn set(&mut self, index: usize, pressed: bool) {
        if index >= 32 {
            return;
        }
        if pressed {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }
}

/// Snapshot of translation and rotation as delivered by the device
///
/// The filter produces the same type, so consumers never need to know whether
/// they are looking at raw or conditioned values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub buttons: ButtonState,
}

impl RawSample {
    pub fn new(translation: Vec3, rotation: Vec3) -> Self {
        Self {
            translation,
            rotation,
            buttons: ButtonState::default(),
        }
    }

    pub fn group(&self, group: DofGroup) -> Vec3 {
        match group {
            DofGroup::Translation => self.translation,
            DofGroup::Rotation => self.rotation,
        }
    }

    pub fn group_mut(&mut self, group: DofGroup) -> &mut Vec3 {
        match group {
            DofGroup::Translation => &mut self.translation,
            DofGroup::Rotation => &mut self.rotation,
        }
    }

    pub fn axis(&self, axis: Axis) -> f64 {
        self.group(axis.group())[axis.component()]
    }

    /// Euclidean norm of one group
    pub fn magnitude(&self, group: DofGroup) -> f64 {
        norm(&self.group(group))
    }

    pub fn is_zero(&self) -> bool {
        self.translation.iter().chain(self.rotation.iter()).all(|c| *c == 0.0)
    }
}

pub fn norm(v: &Vec3) -> f64 {
    v.iter().map(|c| c * c).sum::<f64>().sqrt()
}
