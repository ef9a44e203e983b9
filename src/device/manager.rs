//! Device engagement: one active session at a time, discovery over the catalog
//!
//! ```text
//!              engage / discover
//! NotEngaged ─────────────────────► Engaged
//!     ▲                               │
//!     ├──────── disengage ────────────┤
//!     └──── unexpected close ─────────┘
//! ```
//!
//! Control operations (`engage`, `disengage`, `discover`) are serialized on
//! the manager. Samples arrive on the transport's own thread and run through
//! a per-session [`SignalFilter`] into the shared [`SampleBuffer`].

use crate::buffer::{SampleBuffer, DEFAULT_CAPACITY};
use crate::device::catalog::{DeviceCatalog, DeviceSpec};
use crate::device::session::{DeviceSession, Open};
use crate::device::transport::{CloseCallback, SampleCallback, Transport};
use crate::error::DeviceError;
use crate::filter::{FilterConfig, SignalFilter};
use crate::sample::RawSample;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// What the manager is currently connected to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected { device: String, session_id: u64 },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Engaged,
    /// Closed on request
    Disengaged,
    /// Closed because the device went away
    Lost,
}

/// Lifecycle notification of one session
///
/// Events of a single session arrive in order (`Engaged` before its closure
/// event). Across sessions there is no such guarantee: a `Lost` is published
/// from the transport thread and may trail the `Engaged` of a session opened
/// right after the loss was reaped. Use `session_id` to tell them apart.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device: String,
    pub session_id: u64,
    pub at: DateTime<Local>,
}

impl DeviceEvent {
    pub fn is_closure(&self) -> bool {
        matches!(self.kind, DeviceEventKind::Disengaged | DeviceEventKind::Lost)
    }
}

/// Channel and buffer sizes
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub buffer_capacity: usize,
    pub event_capacity: usize,
    pub sample_capacity: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            event_capacity: 64,
            sample_capacity: 256,
        }
    }
}

pub struct DeviceManager {
    me: Weak<DeviceManager>,
    catalog: DeviceCatalog,
    transport: Arc<dyn Transport>,
    config: Arc<FilterConfig>,
    buffer: Arc<SampleBuffer>,
    active: Mutex<Option<DeviceSession<Open>>>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<DeviceEvent>,
    samples: broadcast::Sender<RawSample>,
}

impl DeviceManager {
    pub fn new(
        catalog: DeviceCatalog,
        transport: Arc<dyn Transport>,
        config: FilterConfig,
        settings: Option<ManagerSettings>,
    ) -> Arc<Self> {
        let settings = settings.unwrap_or_default();
        info!(
            "Creating device manager with {} catalog entries",
            catalog.len()
        );

        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (samples, _) = broadcast::channel(settings.sample_capacity.max(1));

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            catalog,
            transport,
            config: Arc::new(config),
            buffer: Arc::new(SampleBuffer::new(settings.buffer_capacity)),
            active: Mutex::new(None),
            status,
            events,
            samples,
        })
    }

    /// Opens a session on `spec` unless one is already active
    ///
    /// While engaged this is a no-op returning `AlreadyEngaged`; the current
    /// session is left untouched.
    pub fn engage(&self, spec: &DeviceSpec) -> Result<(), DeviceError> {
        let mut active = self.lock_active();
        self.reap_lost(&mut active);
        self.engage_locked(&mut active, spec)
    }

    pub fn engage_by_name(&self, name: &str) -> Result<(), DeviceError> {
        let spec = self
            .catalog
            .get(name)
            .ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))?;
        self.engage(spec)
    }

    /// Closes the active session; returns false if there was nothing to close
    pub fn disengage(&self) -> bool {
        let mut active = self.lock_active();
        let Some(session) = active.take() else {
            debug!("Disengage requested without an active session");
            return false;
        };

        let id = session.id();
        let device = session.device_name().to_string();
        let closed = session.close();
        if !closed.closed_by_request() {
            // the loss notification already reported this session
            debug!("Session {} was already lost", id);
            return false;
        }

        self.clear_status(id);
        self.emit(DeviceEventKind::Disengaged, device, id);
        true
    }

    /// Probes the catalog in order and engages the first device that opens
    ///
    /// Each entry is tried once. While engaged, returns the active device
    /// without probing.
    pub fn discover(&self) -> Result<String, DeviceError> {
        let mut active = self.lock_active();
        self.reap_lost(&mut active);
        if let Some(session) = active.as_ref() {
            debug!("Discovery skipped, already engaged with {}", session.device_name());
            return Ok(session.device_name().to_string());
        }

        info!("Discovering devices ({} candidates)", self.catalog.len());
        let mut attempted = 0;
        for spec in self.catalog.iter() {
            attempted += 1;
            match self.engage_locked(&mut active, spec) {
                Ok(()) => {
                    info!("Discovered {} after {} attempts", spec.name, attempted);
                    return Ok(spec.name.clone());
                }
                Err(e) => debug!("Probe {}/{} failed: {}", attempted, self.catalog.len(), e),
            }
        }

        warn!("No device found, staying disconnected");
        Err(DeviceError::NoDeviceAvailable { attempted })
    }

    /// Toggle used by the UI: engage a named device, discover, or disengage
    pub fn set_engaged(&self, engaged: bool, device: Option<&str>) -> Result<(), DeviceError> {
        if !engaged {
            self.disengage();
            return Ok(());
        }
        let result = match device {
            Some(name) => self.engage_by_name(name),
            None => self.discover().map(|_| ()),
        };
        match result {
            Err(DeviceError::AlreadyEngaged { .. }) => Ok(()),
            other => other,
        }
    }

    pub fn is_open(&self) -> bool {
        let mut active = self.lock_active();
        self.reap_lost(&mut active);
        active.is_some()
    }

    pub fn active_device(&self) -> Option<String> {
        let mut active = self.lock_active();
        self.reap_lost(&mut active);
        active.as_ref().map(|s| s.device_name().to_string())
    }

    pub fn active_session_id(&self) -> Option<u64> {
        let mut active = self.lock_active();
        self.reap_lost(&mut active);
        active.as_ref().map(|s| s.id())
    }

    /// Current status without touching the control lock
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Filtered samples as they are produced
    pub fn subscribe_samples(&self) -> broadcast::Receiver<RawSample> {
        self.samples.subscribe()
    }

    pub fn config(&self) -> &Arc<FilterConfig> {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<DeviceSession<Open>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn engage_locked(
        &self,
        active: &mut Option<DeviceSession<Open>>,
        spec: &DeviceSpec,
    ) -> Result<(), DeviceError> {
        if let Some(session) = active.as_ref() {
            info!(
                "Already engaged with {} (session {})",
                session.device_name(),
                session.id()
            );
            return Err(DeviceError::AlreadyEngaged {
                active: session.device_name().to_string(),
            });
        }

        let session = DeviceSession::create(spec.clone());
        let id = session.id();
        let on_sample = self.pipeline();
        let on_lost = self.loss_notifier(id, spec.name.clone());
        let session = session.open(self.transport.as_ref(), on_sample, on_lost)?;

        *active = Some(session);
        self.status.send_replace(ConnectionStatus::Connected {
            device: spec.name.clone(),
            session_id: id,
        });
        self.emit(DeviceEventKind::Engaged, spec.name.clone(), id);
        Ok(())
    }

    // fresh filter memory per session
    fn pipeline(&self) -> SampleCallback {
        let mut filter = SignalFilter::new(self.config.clone());
        let buffer = self.buffer.clone();
        let samples = self.samples.clone();
        Box::new(move |raw| {
            let filtered = filter.process(raw);
            buffer.push(filtered);
            // no subscribers is fine
            let _ = samples.send(filtered);
        })
    }

    fn loss_notifier(&self, session_id: u64, device: String) -> CloseCallback {
        let manager = self.me.clone();
        Box::new(move || {
            if let Some(manager) = manager.upgrade() {
                manager.on_unexpected_close(session_id, device);
            }
        })
    }

    // runs on the transport thread, at most once per session
    fn on_unexpected_close(&self, session_id: u64, device: String) {
        warn!("Lost connection to {}", device);
        self.clear_status(session_id);
        self.emit(DeviceEventKind::Lost, device, session_id);

        // a control operation holding the lock reaps the session itself
        match self.active.try_lock() {
            Ok(mut active) => self.reap_lost(&mut active),
            Err(TryLockError::Poisoned(poisoned)) => self.reap_lost(&mut poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                debug!("Control operation in flight, session {} reaped later", session_id)
            }
        }
    }

    fn reap_lost(&self, active: &mut Option<DeviceSession<Open>>) {
        if active.as_ref().is_some_and(|s| !s.is_open()) {
            if let Some(session) = active.take() {
                let closed = session.close();
                debug!("Reaped lost session {}", closed.id());
            }
        }
    }

    fn clear_status(&self, session_id: u64) {
        self.status.send_if_modified(|status| match status {
            ConnectionStatus::Connected { session_id: id, .. } if *id == session_id => {
                *status = ConnectionStatus::Disconnected;
                true
            }
            _ => false,
        });
    }

    fn emit(&self, kind: DeviceEventKind, device: String, session_id: u64) {
        debug!("Device event {:?} for {} (session {})", kind, device, session_id);
        // no subscribers is fine
        let _ = self.events.send(DeviceEvent {
            kind,
            device,
            session_id,
            at: Local::now(),
        });
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = active.take() {
            info!("Closing {} on shutdown", session.device_name());
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockTransport;
    use crate::filter::{transform, FilterParam, FilterSettings, FilterState};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    const FIRST: &str = "SpaceNavigator";
    const SECOND: &str = "SpaceMouse Compact";
    const THIRD: &str = "SpaceMouse Pro Wireless";

    fn catalog() -> DeviceCatalog {
        DeviceCatalog::new(DeviceCatalog::builtin().iter().take(3).cloned().collect())
            .expect("catalog")
    }

    fn manager(available: &[&str]) -> (Arc<DeviceManager>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::with_available(available));
        let manager = DeviceManager::new(
            catalog(),
            transport.clone(),
            FilterConfig::default(),
            None,
        );
        (manager, transport)
    }

    fn drain(events: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn closures(events: &[DeviceEvent]) -> usize {
        events.iter().filter(|e| e.is_closure()).count()
    }

    #[test]
    fn test_engage_opens_session() {
        let (manager, _) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();

        manager.engage_by_name(FIRST).expect("engage");
        assert!(manager.is_open());
        assert_eq!(manager.active_device().as_deref(), Some(FIRST));
        assert!(manager.status().is_connected());

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DeviceEventKind::Engaged);
    }

    #[test]
    fn test_failed_engage_stays_disconnected() {
        let (manager, transport) = manager(&[]);
        let result = manager.engage_by_name(FIRST);
        assert!(matches!(result, Err(DeviceError::NotFound { .. })));
        assert!(!manager.is_open());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.open_attempts().len(), 1);
    }

    #[test]
    fn test_unknown_device() {
        let (manager, transport) = manager(&[FIRST]);
        let result = manager.engage_by_name("Trackball");
        assert_eq!(result, Err(DeviceError::UnknownDevice("Trackball".into())));
        assert!(transport.open_attempts().is_empty());
    }

    #[test]
    fn test_second_engage_is_noop() {
        let (manager, transport) = manager(&[FIRST, SECOND]);
        manager.engage_by_name(FIRST).expect("engage");
        let id = manager.active_session_id();

        let result = manager.engage_by_name(SECOND);
        assert_eq!(
            result,
            Err(DeviceError::AlreadyEngaged {
                active: FIRST.to_string()
            })
        );
        assert_eq!(manager.active_session_id(), id);
        assert_eq!(transport.open_attempts(), vec![FIRST.to_string()]);
    }

    #[test]
    fn test_discover_engages_first_available() {
        let (manager, transport) = manager(&[THIRD]);
        let found = manager.discover().expect("discover");
        assert_eq!(found, THIRD);
        assert!(manager.is_open());
        assert_eq!(
            transport.open_attempts(),
            vec![FIRST.to_string(), SECOND.to_string(), THIRD.to_string()]
        );
    }

    #[test]
    fn test_discover_without_devices() {
        let (manager, transport) = manager(&[]);
        let result = manager.discover();
        assert_eq!(result, Err(DeviceError::NoDeviceAvailable { attempted: 3 }));
        assert!(!manager.is_open());
        assert_eq!(transport.open_attempts().len(), 3);
    }

    #[test]
    fn test_discover_while_engaged() {
        let (manager, transport) = manager(&[FIRST, SECOND]);
        manager.engage_by_name(SECOND).expect("engage");
        assert_eq!(manager.discover().expect("discover"), SECOND);
        assert_eq!(transport.open_attempts().len(), 1);
    }

    #[test]
    fn test_samples_are_filtered_into_buffer() {
        let (manager, transport) = manager(&[FIRST]);
        let mut samples = manager.subscribe_samples();
        manager.engage_by_name(FIRST).expect("engage");

        let raw = RawSample::new([0.5, -0.3, 0.0], [0.0, 0.2, 0.0]);
        let device = transport.device(FIRST).expect("device");
        assert!(device.emit(raw));

        let expected = transform(raw, &FilterSettings::default(), &mut FilterState::default());
        assert_eq!(manager.buffer().latest(), expected);
        assert_eq!(samples.try_recv().expect("sample"), expected);
    }

    #[test]
    fn test_filter_memory_resets_per_session() {
        let (manager, transport) = manager(&[FIRST]);
        manager
            .config()
            .set_value(FilterParam::SmoothingFactor, 0.9)
            .expect("smoothing");
        let raw = RawSample::new([0.7, 0.0, 0.0], [0.0; 3]);

        manager.engage_by_name(FIRST).expect("engage");
        let device = transport.device(FIRST).expect("device");
        for _ in 0..5 {
            device.emit(raw);
        }
        assert!(manager.disengage());

        manager.engage_by_name(FIRST).expect("re-engage");
        let device = transport.device(FIRST).expect("device");
        device.emit(raw);

        let fresh = transform(
            raw,
            &manager.config().snapshot(),
            &mut FilterState::default(),
        );
        assert_eq!(manager.buffer().latest(), fresh);
    }

    #[test]
    fn test_config_changes_apply_to_running_session() {
        let (manager, transport) = manager(&[FIRST]);
        manager.engage_by_name(FIRST).expect("engage");
        let device = transport.device(FIRST).expect("device");

        manager
            .config()
            .set_from_str("translation_enabled", "false")
            .expect("toggle");
        device.emit(RawSample::new([0.9, 0.0, 0.0], [0.0; 3]));
        assert_eq!(manager.buffer().latest().translation, [0.0; 3]);
    }

    #[test]
    fn test_disengage_stops_delivery() {
        let (manager, transport) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();
        manager.engage_by_name(FIRST).expect("engage");
        let device = transport.device(FIRST).expect("device");

        assert!(manager.disengage());
        assert!(!device.is_open());
        assert!(!device.emit(RawSample::new([0.9, 0.0, 0.0], [0.0; 3])));
        assert_eq!(manager.buffer().latest(), RawSample::default());
        assert!(!manager.is_open());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        let events = drain(&mut events);
        assert_eq!(events.last().map(|e| e.kind), Some(DeviceEventKind::Disengaged));
    }

    #[test]
    fn test_disengage_without_session() {
        let (manager, _) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();
        assert!(!manager.disengage());
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_unexpected_close() {
        let (manager, transport) = manager(&[FIRST]);
        let mut status = manager.subscribe_status();
        let mut events = manager.subscribe_events();
        manager.engage_by_name(FIRST).expect("engage");
        status.borrow_and_update();

        transport.device(FIRST).expect("device").disconnect();

        assert!(status.has_changed().expect("status channel"));
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
        assert!(!manager.is_open());
        assert_eq!(manager.active_session_id(), None);

        let events = drain(&mut events);
        assert_eq!(closures(&events), 1);
        assert_eq!(events.last().map(|e| e.kind), Some(DeviceEventKind::Lost));

        manager.engage_by_name(FIRST).expect("engage after loss");
        assert!(manager.is_open());
    }

    #[test]
    fn test_loss_then_disengage_reports_once() {
        let (manager, transport) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();
        manager.engage_by_name(FIRST).expect("engage");

        transport.device(FIRST).expect("device").disconnect();
        assert!(!manager.disengage());
        assert_eq!(closures(&drain(&mut events)), 1);
    }

    #[test]
    fn test_disengage_then_loss_reports_once() {
        let (manager, transport) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();
        manager.engage_by_name(FIRST).expect("engage");

        let device = transport.device(FIRST).expect("device");
        assert!(manager.disengage());
        device.disconnect();
        assert_eq!(closures(&drain(&mut events)), 1);
    }

    #[test]
    fn test_concurrent_close_reports_once() {
        let (manager, transport) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();

        for _ in 0..100 {
            manager.engage_by_name(FIRST).expect("engage");
            let device = transport.device(FIRST).expect("device");
            let barrier = Arc::new(Barrier::new(2));

            let unplug = {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    device.disconnect();
                })
            };
            barrier.wait();
            manager.disengage();
            unplug.join().expect("unplug thread");

            assert!(!manager.is_open());
            let events = drain(&mut events);
            assert_eq!(closures(&events), 1, "events: {:?}", events);
        }
    }

    #[test]
    fn test_samples_during_engage_cycles() {
        let (manager, transport) = manager(&[FIRST]);
        manager.engage_by_name(FIRST).expect("engage");
        let stop = Arc::new(AtomicBool::new(false));

        let feeder = {
            let transport = transport.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Acquire) {
                    if let Some(device) = transport.device(FIRST) {
                        let v = 0.5 + (i % 1000) as f64 * 1e-4;
                        device.emit(RawSample::new([v, 0.0, 0.0], [0.0, v, 0.0]));
                    }
                    i += 1;
                }
            })
        };

        for _ in 0..50 {
            manager.disengage();
            manager.engage_by_name(FIRST).expect("engage");
        }
        assert!(manager.is_open());

        assert!(manager.disengage());
        let after_close = manager.buffer().window();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(manager.buffer().window(), after_close);

        stop.store(true, Ordering::Release);
        feeder.join().expect("feeder thread");
        assert_eq!(manager.buffer().window(), after_close);
    }

    #[test]
    fn test_events_of_a_session_are_ordered() {
        let (manager, transport) = manager(&[FIRST]);
        let mut events = manager.subscribe_events();

        manager.engage_by_name(FIRST).expect("engage");
        let first = manager.active_session_id().expect("session");
        transport.device(FIRST).expect("device").disconnect();
        manager.engage_by_name(FIRST).expect("re-engage");
        let second = manager.active_session_id().expect("session");
        assert_ne!(first, second);

        let seen: Vec<(DeviceEventKind, u64)> = drain(&mut events)
            .into_iter()
            .map(|e| (e.kind, e.session_id))
            .collect();
        assert_eq!(
            seen,
            vec![
                (DeviceEventKind::Engaged, first),
                (DeviceEventKind::Lost, first),
                (DeviceEventKind::Engaged, second),
            ]
        );
    }

    #[test]
    fn test_set_engaged_toggle() {
        let (manager, _) = manager(&[SECOND]);
        manager.set_engaged(true, None).expect("discover");
        assert_eq!(manager.active_device().as_deref(), Some(SECOND));

        // already engaged is not an error for the toggle
        manager.set_engaged(true, Some(SECOND)).expect("noop");

        manager.set_engaged(false, None).expect("disengage");
        assert!(!manager.is_open());
    }

    #[test]
    fn test_drop_closes_device() {
        let (manager, transport) = manager(&[FIRST]);
        manager.engage_by_name(FIRST).expect("engage");
        let device = transport.device(FIRST).expect("device");
        drop(manager);
        assert!(!device.is_open());
    }
}
