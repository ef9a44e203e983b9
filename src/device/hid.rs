//! hidapi-backed transport
//!
//! Each opened device gets a reader thread that polls input reports,
//! decodes them with [`ReportDecoder`] and hands the samples to the
//! registered callback. A read error is treated as the device going away.

use crate::device::catalog::DeviceSpec;
use crate::device::report::ReportDecoder;
use crate::device::transport::{CloseCallback, SampleCallback, Transport, TransportHandle};
use crate::error::DeviceError;
use chrono::Local;
use hidapi::{HidApi, HidDevice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

const REPORT_SIZE: usize = 64;

pub struct HidTransport {
    api: Mutex<HidApi>,
    read_timeout_ms: i32,
}

impl HidTransport {
    /// `control_rate_hz` bounds how long a close waits for the reader thread
    pub fn new(control_rate_hz: u32) -> Result<Self, DeviceError> {
        let api = HidApi::new()
            .map_err(|e| DeviceError::not_found("hidapi", format!("HID backend unavailable: {}", e)))?;
        let read_timeout_ms = (1000 / control_rate_hz.max(1)).max(1) as i32;
        info!("HID transport ready (read timeout {} ms)", read_timeout_ms);
        Ok(Self {
            api: Mutex::new(api),
            read_timeout_ms,
        })
    }
}

impl Transport for HidTransport {
    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn TransportHandle>, DeviceError> {
        let mut api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = api.refresh_devices() {
            warn!("Failed to refresh HID device list: {}", e);
        }

        let mut reason = String::from("no HID ids configured");
        for id in &spec.hid_ids {
            match api.open(id.vendor_id, id.product_id) {
                Ok(device) => {
                    info!(
                        "Opened {} ({:04x}:{:04x})",
                        spec.name, id.vendor_id, id.product_id
                    );
                    return Ok(Box::new(HidHandle::spawn(
                        device,
                        spec.clone(),
                        self.read_timeout_ms,
                    )));
                }
                Err(e) => {
                    debug!(
                        "{} not available at {:04x}:{:04x}: {}",
                        spec.name, id.vendor_id, id.product_id, e
                    );
                    reason = e.to_string();
                }
            }
        }

        debug!(
            "Unable to open {}; check that it is plugged in and that udev rules grant access",
            spec.name
        );
        Err(DeviceError::not_found(&spec.name, reason))
    }
}

#[derive(Default)]
struct Callbacks {
    on_sample: Option<SampleCallback>,
    on_close: Option<CloseCallback>,
}

struct Shared {
    stop: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct HidHandle {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl HidHandle {
    fn spawn(device: HidDevice, spec: DeviceSpec, read_timeout_ms: i32) -> Self {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            callbacks: Mutex::new(Callbacks::default()),
        });
        let reader_shared = shared.clone();
        let reader = std::thread::spawn(move || read_loop(device, spec, reader_shared, read_timeout_ms));
        Self {
            shared,
            reader: Some(reader),
        }
    }
}

impl TransportHandle for HidHandle {
    fn register_sample_callback(&mut self, callback: SampleCallback) {
        self.shared.callbacks().on_sample = Some(callback);
    }

    fn register_unexpected_close_callback(&mut self, callback: CloseCallback) {
        self.shared.callbacks().on_close = Some(callback);
    }

    fn close(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            // waits for a sample delivery in progress
            let mut callbacks = self.shared.callbacks();
            callbacks.on_sample = None;
            callbacks.on_close = None;
        }

        if let Some(reader) = self.reader.take() {
            if reader.thread().id() == std::thread::current().id() {
                debug!("HID handle closed from its reader thread");
            } else if reader.join().is_err() {
                error!("HID reader thread panicked");
            }
        }
    }
}

impl Drop for HidHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(device: HidDevice, spec: DeviceSpec, shared: Arc<Shared>, read_timeout_ms: i32) {
    info!("Reading reports from {}", spec.name);
    let mut decoder = ReportDecoder::new(&spec);
    let mut buf = [0u8; REPORT_SIZE];

    let mut sample_count = 0u64;
    let mut last_log_time = Local::now();
    let log_interval = chrono::Duration::seconds(30);

    let mut lost = false;
    while !shared.stop.load(Ordering::Acquire) {
        match device.read_timeout(&mut buf, read_timeout_ms) {
            Ok(0) => {}
            Ok(len) => {
                if let Some(sample) = decoder.feed(&buf[..len]) {
                    let mut callbacks = shared.callbacks();
                    if let Some(on_sample) = callbacks.on_sample.as_mut() {
                        on_sample(sample);
                        sample_count += 1;
                    }
                }
            }
            Err(e) => {
                if !shared.stop.load(Ordering::Acquire) {
                    warn!("Lost connection to {}: {}", spec.name, e);
                    lost = true;
                }
                break;
            }
        }

        let now = Local::now();
        if now - last_log_time > log_interval {
            debug!(
                "{}: {} samples in last {} seconds (avg {:.2}/sec)",
                spec.name,
                sample_count,
                log_interval.num_seconds(),
                sample_count as f64 / log_interval.num_seconds() as f64
            );
            sample_count = 0;
            last_log_time = now;
        }
    }

    drop(device);

    if lost {
        let on_close = {
            let mut callbacks = shared.callbacks();
            callbacks.on_sample = None;
            callbacks.on_close.take()
        };
        if let Some(on_close) = on_close {
            on_close();
        }
    }
    debug!("Reader for {} stopped", spec.name);
}
