//! Edge detection with per-button debouncing
//!
//! A button edge is reported only if the previous change of the same button
//! is older than `max_wait`. Buttons selected for neither edge are passed
//! through with their current level.

use crate::device::catalog::DeviceSpec;
use crate::error::ConfigError;
use crate::sample::ButtonState;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Which buttons an edge type is reported for
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EdgeSelection {
    #[default]
    None,
    All,
    Only(Vec<String>),
}

impl EdgeSelection {
    fn mask(&self, spec: &DeviceSpec) -> Result<u32, ConfigError> {
        match self {
            EdgeSelection::None => Ok(0),
            EdgeSelection::All => Ok(u32::MAX),
            EdgeSelection::Only(names) => {
                let mut mask = ButtonState::default();
                for name in names {
                    let index = spec.button_index(name).ok_or_else(|| ConfigError::InvalidValue {
                        param: "buttons",
                        value: format!("{} has no button {}", spec.name, name),
                    })?;
                    mask.set(index, true);
                }
                Ok(mask.0)
            }
        }
    }
}

/// Turns successive button levels into debounced edge events
///
/// The output has a bit set for every reported edge (press for `leading`,
/// release for `trailing`) plus the current level of every passthrough button.
#[derive(Debug, Clone)]
pub struct ButtonDebouncer {
    leading: u32,
    trailing: u32,
    passthrough: u32,
    max_wait: Duration,
    last: ButtonState,
    // None until the button first changes
    last_change: [Option<Instant>; 32],
}

impl ButtonDebouncer {
    pub fn new(
        spec: &DeviceSpec,
        leading: EdgeSelection,
        trailing: EdgeSelection,
        max_wait: Duration,
    ) -> Result<Self, ConfigError> {
        let leading = leading.mask(spec)?;
        let trailing = trailing.mask(spec)?;
        debug!(
            "Debouncing {} buttons: leading {:#b}, trailing {:#b}, max_wait {:?}",
            spec.name, leading, trailing, max_wait
        );
        Ok(Self {
            leading,
            trailing,
            passthrough: !leading & !trailing,
            max_wait,
            last: ButtonState::default(),
            last_change: [None; 32],
        })
    }

    pub fn update(&mut self, state: ButtonState) -> ButtonState {
        self.update_at(state, Instant::now())
    }

    pub fn update_at(&mut self, state: ButtonState, now: Instant) -> ButtonState {
        let changed = self.last.0 ^ state.0;
        let rising = changed & state.0;
        let falling = changed & !state.0;

        let mut settled = 0u32;
        for (i, last_change) in self.last_change.iter_mut().enumerate() {
            let bit = 1u32 << i;
            if self.passthrough & bit != 0 || changed & bit == 0 {
                continue;
            }
            let stale = match last_change {
                Some(at) => now.saturating_duration_since(*at) > self.max_wait,
                None => true,
            };
            if stale {
                settled |= bit;
                *last_change = Some(now);
            } else {
                trace!("Suppressed bounce on button {}", i);
            }
        }

        let edges = settled & ((rising & self.leading) | (falling & self.trailing));
        self.last = state;
        ButtonState((edges & !self.passthrough) | (state.0 & self.passthrough))
    }

    /// Forgets levels and change times, e.g. when a new session starts
    pub fn reset(&mut self) {
        self.last = ButtonState::default();
        self.last_change = [None; 32];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::catalog::DeviceCatalog;

    const LEFT: u32 = 0b01;
    const RIGHT: u32 = 0b10;

    fn navigator() -> DeviceSpec {
        DeviceCatalog::builtin()
            .get("SpaceNavigator")
            .expect("builtin")
            .clone()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_press_reported_once() {
        let mut debouncer =
            ButtonDebouncer::new(&navigator(), EdgeSelection::All, EdgeSelection::None, ms(100))
                .expect("debouncer");
        let t0 = Instant::now();

        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0), ButtonState(LEFT));
        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0 + ms(200)), ButtonState(0));
        // release is not a leading edge
        assert_eq!(debouncer.update_at(ButtonState(0), t0 + ms(400)), ButtonState(0));
    }

    #[test]
    fn test_bounce_within_max_wait_suppressed() {
        let mut debouncer =
            ButtonDebouncer::new(&navigator(), EdgeSelection::All, EdgeSelection::None, ms(100))
                .expect("debouncer");
        let t0 = Instant::now();

        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0), ButtonState(LEFT));
        assert_eq!(debouncer.update_at(ButtonState(0), t0 + ms(10)), ButtonState(0));
        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0 + ms(20)), ButtonState(0));
        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0 + ms(130)), ButtonState(0));

        // a settled release followed by a settled press is a new edge
        assert_eq!(debouncer.update_at(ButtonState(0), t0 + ms(140)), ButtonState(0));
        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0 + ms(300)), ButtonState(LEFT));
    }

    #[test]
    fn test_release_edges() {
        let mut debouncer =
            ButtonDebouncer::new(&navigator(), EdgeSelection::None, EdgeSelection::All, ms(50))
                .expect("debouncer");
        let t0 = Instant::now();

        assert_eq!(debouncer.update_at(ButtonState(LEFT | RIGHT), t0), ButtonState(0));
        assert_eq!(debouncer.update_at(ButtonState(RIGHT), t0 + ms(100)), ButtonState(LEFT));
        // LEFT bounces within max_wait of its release
        assert_eq!(debouncer.update_at(ButtonState(LEFT | RIGHT), t0 + ms(130)), ButtonState(0));
        assert_eq!(debouncer.update_at(ButtonState(RIGHT), t0 + ms(140)), ButtonState(0));
        assert_eq!(debouncer.update_at(ButtonState(0), t0 + ms(150)), ButtonState(RIGHT));
    }

    #[test]
    fn test_unselected_buttons_pass_through() {
        let mut debouncer = ButtonDebouncer::new(
            &navigator(),
            EdgeSelection::Only(vec!["LEFT".to_string()]),
            EdgeSelection::None,
            ms(100),
        )
        .expect("debouncer");
        let t0 = Instant::now();

        assert_eq!(debouncer.update_at(ButtonState(RIGHT), t0), ButtonState(RIGHT));
        assert_eq!(
            debouncer.update_at(ButtonState(LEFT | RIGHT), t0 + ms(1)),
            ButtonState(LEFT | RIGHT)
        );
        assert_eq!(debouncer.update_at(ButtonState(LEFT | RIGHT), t0 + ms(2)), ButtonState(RIGHT));
        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0 + ms(3)), ButtonState(0));
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut debouncer =
            ButtonDebouncer::new(&navigator(), EdgeSelection::All, EdgeSelection::None, ms(100))
                .expect("debouncer");
        let t0 = Instant::now();

        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0), ButtonState(LEFT));
        debouncer.reset();
        assert_eq!(debouncer.update_at(ButtonState(LEFT), t0 + ms(5)), ButtonState(LEFT));
    }

    #[test]
    fn test_unknown_button_name_rejected() {
        let result = ButtonDebouncer::new(
            &navigator(),
            EdgeSelection::Only(vec!["MENU".to_string()]),
            EdgeSelection::None,
            ms(100),
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
