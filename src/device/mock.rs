//! In-process transport for tests and the simulated mode
//!
//! Every opened device is a [`MockDevice`] that the caller drives by hand:
//! push samples with [`MockDevice::emit`], pull the plug with
//! [`MockDevice::disconnect`].

use crate::device::catalog::DeviceSpec;
use crate::device::transport::{CloseCallback, SampleCallback, Transport, TransportHandle};
use crate::error::DeviceError;
use crate::sample::RawSample;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Default)]
struct DeviceSlot {
    open: bool,
    on_sample: Option<SampleCallback>,
    on_close: Option<CloseCallback>,
}

/// Control side of one opened mock device
#[derive(Clone)]
pub struct MockDevice {
    name: String,
    serial: u64,
    slot: Arc<Mutex<DeviceSlot>>,
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("name", &self.name)
            .field("serial", &self.serial)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MockDevice {
    fn lock(&self) -> MutexGuard<'_, DeviceSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinguishes successive opens of the same device
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Delivers a sample; returns false if nothing received it
    pub fn emit(&self, sample: RawSample) -> bool {
        let mut slot = self.lock();
        if !slot.open {
            return false;
        }
        match slot.on_sample.as_mut() {
            Some(callback) => {
                callback(sample);
                true
            }
            None => false,
        }
    }

    /// Simulates the device being unplugged
    pub fn disconnect(&self) {
        let on_close = {
            let mut slot = self.lock();
            if !slot.open {
                return;
            }
            slot.open = false;
            slot.on_sample = None;
            slot.on_close.take()
        };
        info!("Mock device {} disconnected", self.name);
        if let Some(callback) = on_close {
            callback();
        }
    }
}

struct MockHandle {
    device: MockDevice,
}

impl TransportHandle for MockHandle {
    fn register_sample_callback(&mut self, callback: SampleCallback) {
        self.device.lock().on_sample = Some(callback);
    }

    fn register_unexpected_close_callback(&mut self, callback: CloseCallback) {
        self.device.lock().on_close = Some(callback);
    }

    fn close(&mut self) {
        let mut slot = self.device.lock();
        if slot.open {
            debug!("Mock device {} closed", self.device.name);
        }
        slot.open = false;
        slot.on_sample = None;
        slot.on_close = None;
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct MockState {
    available: HashSet<String>,
    attempts: Vec<String>,
    opened: HashMap<String, MockDevice>,
}

/// Transport whose devices exist only when marked available
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    serials: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_available(names: &[&str]) -> Self {
        let transport = Self::new();
        for name in names {
            transport.set_available(name, true);
        }
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plugs a device in or out; unplugging does not affect an open device
    pub fn set_available(&self, name: &str, available: bool) {
        let mut state = self.lock();
        if available {
            state.available.insert(name.to_string());
        } else {
            state.available.remove(name);
        }
    }

    /// Device names in the order `open` was called for them
    pub fn open_attempts(&self) -> Vec<String> {
        self.lock().attempts.clone()
    }

    /// Most recently opened device with this name
    pub fn device(&self, name: &str) -> Option<MockDevice> {
        self.lock().opened.get(name).cloned()
    }
}

impl Transport for MockTransport {
    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn TransportHandle>, DeviceError> {
        let mut state = self.lock();
        state.attempts.push(spec.name.clone());
        if !state.available.contains(&spec.name) {
            return Err(DeviceError::not_found(&spec.name, "mock device not plugged in"));
        }

        let device = MockDevice {
            name: spec.name.clone(),
            serial: self.serials.fetch_add(1, Ordering::Relaxed),
            slot: Arc::new(Mutex::new(DeviceSlot {
                open: true,
                ..Default::default()
            })),
        };
        state.opened.insert(spec.name.clone(), device.clone());
        debug!("Mock device {} opened", spec.name);
        Ok(Box::new(MockHandle { device }))
    }
}

/// Feeds a slow Lissajous motion into `device` until it is closed
pub fn drive_synthetic(device: MockDevice, rate_hz: u32) -> JoinHandle<()> {
    let period = Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)));
    std::thread::spawn(move || {
        info!("Synthetic motion started on {}", device.name());
        let mut t = 0.0_f64;
        loop {
            let sample = RawSample::new(
                [0.6 * t.sin(), 0.4 * (0.7 * t).cos(), 0.05 * (3.0 * t).sin()],
                [0.02 * (1.3 * t).sin(), 0.3 * (0.5 * t).sin(), 0.5 * (0.9 * t).cos()],
            );
            if !device.emit(sample) {
                break;
            }
            t += period.as_secs_f64();
            std::thread::sleep(period);
        }
        info!("Synthetic motion stopped on {}", device.name());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::catalog::DeviceCatalog;
    use std::sync::atomic::AtomicUsize;

    fn spec(name: &str) -> DeviceSpec {
        DeviceCatalog::builtin().get(name).expect("builtin").clone()
    }

    #[test]
    fn test_unavailable_device_fails() {
        let transport = MockTransport::new();
        let result = transport.open(&spec("SpaceMouse Pro"));
        assert!(matches!(result, Err(DeviceError::NotFound { .. })));
        assert!(transport.device("SpaceMouse Pro").is_none());
    }

    #[test]
    fn test_close_silences_callbacks() {
        let transport = MockTransport::with_available(&["SpaceMouse Pro"]);
        let mut handle = transport.open(&spec("SpaceMouse Pro")).expect("open");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        handle.register_sample_callback(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let device = transport.device("SpaceMouse Pro").expect("device");
        assert!(device.emit(RawSample::default()));
        handle.close();
        handle.close();
        assert!(!device.emit(RawSample::default()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_synthetic_driver_stops_on_close() {
        let transport = MockTransport::with_available(&["SpaceMouse Pro"]);
        let mut handle = transport.open(&spec("SpaceMouse Pro")).expect("open");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        handle.register_sample_callback(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        let driver = drive_synthetic(transport.device("SpaceMouse Pro").expect("device"), 500);
        while count.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle.close();
        driver.join().expect("driver thread");
    }
}
