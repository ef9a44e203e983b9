//! Decoding of raw HID input reports into samples

use crate::device::catalog::{AxisSpec, DeviceSpec};
use crate::sample::{Axis, ButtonState, RawSample};

/// Turns the stream of channel reports of one device into complete samples
///
/// Devices either send all six axes in one report or split translation and
/// rotation over two channels. A sample is emitted once both the X and the
/// roll readings have been refreshed since the last emission, or as soon as
/// a button changes.
#[derive(Debug)]
pub struct ReportDecoder {
    spec: DeviceSpec,
    values: [f64; 6],
    buttons: ButtonState,
    axis_updates: u8,
    buttons_changed: bool,
}

impl ReportDecoder {
    pub fn new(spec: &DeviceSpec) -> Self {
        Self {
            spec: spec.clone(),
            values: [0.0; 6],
            buttons: ButtonState::default(),
            axis_updates: 0,
            buttons_changed: false,
        }
    }

    pub fn feed(&mut self, report: &[u8]) -> Option<RawSample> {
        let channel = *report.first()?;

        for (index, axis) in Axis::ALL.iter().enumerate() {
            let mapping = self.spec.axes.get(*axis);
            if let Some(value) = decode_axis(mapping, channel, report, self.spec.axis_scale) {
                self.values[index] = value;
                if matches!(axis, Axis::X | Axis::Roll) {
                    self.axis_updates += 1;
                }
            }
        }

        for (index, button) in self.spec.buttons.iter().enumerate() {
            if button.channel != channel || button.byte >= report.len() || button.bit > 7 {
                continue;
            }
            let pressed = (report[button.byte] >> button.bit) & 1 == 1;
            if self.buttons.is_pressed(index) != pressed {
                self.buttons.set(index, pressed);
                self.buttons_changed = true;
            }
        }

        if self.axis_updates >= 2 || self.buttons_changed {
            self.axis_updates = 0;
            self.buttons_changed = false;
            let mut sample = RawSample::new(
                [self.values[0], self.values[1], self.values[2]],
                [self.values[3], self.values[4], self.values[5]],
            );
            sample.buttons = self.buttons;
            return Some(sample);
        }
        None
    }
}

fn decode_axis(mapping: &AxisSpec, channel: u8, report: &[u8], axis_scale: f64) -> Option<f64> {
    if mapping.channel != channel {
        return None;
    }
    let low = *report.get(mapping.byte1)?;
    let high = *report.get(mapping.byte2)?;
    let raw = i16::from_le_bytes([low, high]) as f64;
    Some(mapping.scale * (raw / axis_scale).clamp(-1.0, 1.0))
}
