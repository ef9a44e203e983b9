//! Per-sample conditioning: deadband, emphasis, sensitivity, smoothing, gating.

use super::settings::{
    DeadbandCurve, FilterConfig, FilterSettings, DEADBAND_RANGE, SMOOTHING_RANGE,
    TEMPERATURE_RANGE,
};
use crate::sample::{norm, DofGroup, RawSample, Vec3};
use std::sync::Arc;
use tracing::debug;

/// Weight of the cubic term in the cubic deadband response
const CUBIC_WEIGHT: f64 = 0.4;

/// Exponential memory of the filter, one entry per axis
///
/// Owned by the sampling path only. A new session starts from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterState {
    previous_output: [f64; 6],
}

impl FilterState {
    pub fn previous_output(&self) -> [f64; 6] {
        self.previous_output
    }

    pub fn reset(&mut self) {
        self.previous_output = [0.0; 6];
    }

    fn group_mut(&mut self, group: DofGroup) -> &mut [f64] {
        match group {
            DofGroup::Translation => &mut self.previous_output[..3],
            DofGroup::Rotation => &mut self.previous_output[3..],
        }
    }
}

/// Transforms one raw sample into a filtered sample
///
/// Both groups run through the same stages with their own sensitivity,
/// deadband and enable flag:
///
/// 1. deadband (a component exactly at the threshold passes)
/// 2. emphasis of the dominant component, norm preserving
/// 3. sensitivity scaling
/// 4. exponential smoothing against `state`
/// 5. gating of disabled groups
///
/// A disabled group outputs zeros while its memory keeps tracking the
/// ungated value, so re-enabling resumes where an always-enabled filter
/// would be. Buttons pass through untouched.
pub fn transform(raw: RawSample, settings: &FilterSettings, state: &mut FilterState) -> RawSample {
    let smoothing = clamp_param(settings.smoothing_factor, SMOOTHING_RANGE);
    let temperature = clamp_param(settings.softmax_temperature, TEMPERATURE_RANGE);

    let mut output = raw;
    for group in DofGroup::ALL {
        let mut values = raw.group(group);

        let deadband = clamp_param(settings.deadband(group), DEADBAND_RANGE);
        apply_deadband(&mut values, deadband, settings.deadband_curve);
        emphasize(&mut values, temperature);

        let sensitivity = settings.sensitivity(group);
        for v in values.iter_mut() {
            *v *= sensitivity;
        }

        for (v, previous) in values.iter_mut().zip(state.group_mut(group).iter_mut()) {
            let mut smoothed = smoothing * *previous + (1.0 - smoothing) * *v;
            if smoothed.abs() < f64::EPSILON {
                smoothed = 0.0;
            }
            *previous = smoothed;
            *v = smoothed;
        }

        if !settings.enabled(group) {
            values = [0.0; 3];
        }
        *output.group_mut(group) = values;
    }

    output
}

// NaN falls back to the lower bound
fn clamp_param(value: f64, (min, max): (f64, f64)) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

fn cubic(x: f64, weight: f64) -> f64 {
    weight * x.powi(3) + (1.0 - weight) * x
}

fn apply_deadband(values: &mut Vec3, deadband: f64, curve: DeadbandCurve) {
    for v in values.iter_mut() {
        if v.abs() < deadband {
            *v = 0.0;
            continue;
        }

        let sign = v.signum();
        match curve {
            DeadbandCurve::Step => {}
            DeadbandCurve::Linear => {
                *v = (*v - deadband * sign) / (1.0 - deadband);
            }
            DeadbandCurve::Cubic => {
                let edge = cubic(deadband, CUBIC_WEIGHT);
                *v = (cubic(*v, CUBIC_WEIGHT) - edge * sign) / (1.0 - edge);
            }
        }
    }
}

/// Redistributes the group's magnitude toward its strongest component
///
/// Weights are a softmax over `|c| / temperature`; the weighted vector is
/// rescaled to the original norm, so a group with equal components comes
/// out unchanged and signs are preserved.
fn emphasize(values: &mut Vec3, temperature: f64) {
    let magnitude = norm(values);
    if magnitude == 0.0 {
        return;
    }

    // shift by the peak so exp never overflows at low temperatures
    let peak = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let weights = values.map(|v| ((v.abs() - peak) / temperature).exp());
    let total: f64 = weights.iter().sum();

    for (v, w) in values.iter_mut().zip(weights) {
        *v *= w / total;
    }

    let weighted = norm(values);
    if weighted > 0.0 {
        let scale = magnitude / weighted;
        for v in values.iter_mut() {
            *v *= scale;
        }
    }
}

/// Filter bound to a live config, as installed on a device session
///
/// Reads a fresh config snapshot for every sample, so configuration writes
/// take effect on the next sample.
#[derive(Debug)]
pub struct SignalFilter {
    config: Arc<FilterConfig>,
    state: FilterState,
}

impl SignalFilter {
    pub fn new(config: Arc<FilterConfig>) -> Self {
        debug!("Creating signal filter with zeroed memory");
        Self {
            config,
            state: FilterState::default(),
        }
    }

    pub fn process(&mut self, raw: RawSample) -> RawSample {
        let settings = self.config.snapshot();
        transform(raw, &settings, &mut self.state)
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}
