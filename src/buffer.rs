//! Rolling history of filtered samples for plotting and derived metrics

use crate::sample::{Axis, DofGroup, RawSample};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// History length used by the live plots
pub const DEFAULT_CAPACITY: usize = 360;

#[derive(Debug)]
struct Ring {
    slots: Vec<RawSample>,
    // slot holding the newest sample
    head: usize,
}

impl Ring {
    fn get(&self, index: usize) -> RawSample {
        self.slots[(self.head + index) % self.slots.len()]
    }
}

/// Fixed-capacity ring of the last N samples, newest at index 0
///
/// Starts out filled with zero samples, so it always holds exactly
/// `capacity()` entries. Pushing overwrites the oldest slot in place; the
/// observable order is the same as shifting every entry one slot toward the
/// tail. Written by the sampling path, read by presentation; a reader never
/// sees a half-written slot.
#[derive(Debug)]
pub struct SampleBuffer {
    ring: RwLock<Ring>,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!("Creating sample buffer with capacity {}", capacity);
        Self {
            ring: RwLock::new(Ring {
                slots: vec![RawSample::default(); capacity],
                head: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.read(|ring| ring.slots.len())
    }

    pub fn push(&self, sample: RawSample) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let len = ring.slots.len();
        ring.head = (ring.head + len - 1) % len;
        let head = ring.head;
        ring.slots[head] = sample;
    }

    pub fn latest(&self) -> RawSample {
        self.read(|ring| ring.get(0))
    }

    /// Copy of the whole history, most recent first
    pub fn window(&self) -> Vec<RawSample> {
        self.read(|ring| (0..ring.slots.len()).map(|i| ring.get(i)).collect())
    }

    /// Euclidean norm of `group` for every sample in the history, most recent first
    ///
    /// Recomputed from the buffer contents on every call.
    pub fn magnitude(&self, group: DofGroup) -> impl Iterator<Item = f64> {
        self.window()
            .into_iter()
            .map(move |sample| sample.magnitude(group))
    }

    /// Value stream of one axis, most recent first
    pub fn axis(&self, axis: Axis) -> impl Iterator<Item = f64> {
        self.window().into_iter().map(move |sample| sample.axis(axis))
    }

    /// Resets every slot to the zero sample
    pub fn clear(&self) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        ring.slots.fill(RawSample::default());
        ring.head = 0;
    }

    fn read<T>(&self, f: impl FnOnce(&Ring) -> T) -> T {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        f(&ring)
    }
}
