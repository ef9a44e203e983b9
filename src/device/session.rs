//! Lifecycle of one engagement with a physical device
//!
//! ```text
//! Opening ──► Open ──► Closing ──► Closed
//!    │
//!    └── open fails: DeviceError, no session
//! ```
//!
//! A session is closed either on request or because the device disappeared.
//! Both paths race through [`SessionLink::mark_closed`], so exactly one of
//! them reports the closure.

use crate::device::catalog::DeviceSpec;
use crate::device::transport::{CloseCallback, SampleCallback, Transport, TransportHandle};
use crate::error::DeviceError;
use statum::{machine, state};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Open flag shared between a session and the callbacks it hands out
#[derive(Debug, Default)]
pub struct SessionLink {
    open: AtomicBool,
}

impl SessionLink {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn mark_open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Returns true for the single caller that performed the Open -> Closed step
    pub fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Opening,
    Open,
    Closing,
    Closed,
}

#[machine]
pub struct DeviceSession<S: SessionState> {
    id: u64,
    spec: DeviceSpec,
    handle: Option<Box<dyn TransportHandle>>,
    link: Arc<SessionLink>,
    // set when close() rather than the device ended the session
    closed_by_request: bool,
}

impl<S: SessionState> DeviceSession<S> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    pub fn device_name(&self) -> &str {
        &self.spec.name
    }

    pub fn link(&self) -> Arc<SessionLink> {
        self.link.clone()
    }
}

impl DeviceSession<Opening> {
    pub fn create(spec: DeviceSpec) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Creating session {} for {}", id, spec.name);
        Self::new(id, spec, None, Arc::new(SessionLink::default()), false)
    }

    /// Opens the device through `transport` and wires up the callbacks
    ///
    /// `on_sample` only sees samples while the session is open. `on_lost`
    /// runs at most once, and only if the device goes away before the session
    /// is closed on request. A failed open is not retried.
    pub fn open(
        mut self,
        transport: &dyn Transport,
        mut on_sample: SampleCallback,
        on_lost: CloseCallback,
    ) -> Result<DeviceSession<Open>, DeviceError> {
        info!("Opening {} (session {})", self.spec.name, self.id);

        let mut handle = match transport.open(&self.spec) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open {}: {}", self.spec.name, e);
                return Err(e);
            }
        };

        self.link.mark_open();

        let link = self.link.clone();
        handle.register_sample_callback(Box::new(move |sample| {
            if link.is_open() {
                on_sample(sample);
            }
        }));

        let link = self.link.clone();
        let id = self.id;
        let name = self.spec.name.clone();
        handle.register_unexpected_close_callback(Box::new(move || {
            if link.mark_closed() {
                warn!("{} disconnected unexpectedly (session {})", name, id);
                on_lost();
            } else {
                debug!("Ignoring disconnect of already closed session {}", id);
            }
        }));

        self.handle = Some(handle);
        info!("Session {} open on {}", self.id, self.spec.name);
        Ok(self.transition())
    }
}

impl DeviceSession<Open> {
    /// False once the device has gone away; the session then only needs closing
    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    pub fn close(self) -> DeviceSession<Closed> {
        self.begin_close().release()
    }

    fn begin_close(mut self) -> DeviceSession<Closing> {
        self.closed_by_request = self.link.mark_closed();
        if self.closed_by_request {
            info!("Closing session {} on {}", self.id, self.spec.name);
        } else {
            debug!("Releasing session {} after device loss", self.id);
        }
        self.transition()
    }
}

impl DeviceSession<Closing> {
    fn release(mut self) -> DeviceSession<Closed> {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.transition()
    }
}

impl DeviceSession<Closed> {
    pub fn close(self) -> Self {
        self
    }

    /// True if this session was ended by `close` rather than by the device
    pub fn closed_by_request(&self) -> bool {
        self.closed_by_request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::catalog::DeviceCatalog;
    use crate::device::mock::MockTransport;
    use crate::sample::RawSample;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    fn navigator() -> DeviceSpec {
        DeviceCatalog::builtin()
            .get("SpaceNavigator")
            .expect("builtin")
            .clone()
    }

    fn counter() -> (Arc<AtomicUsize>, SampleCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let callback: SampleCallback = Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_open_and_close() {
        let transport = MockTransport::with_available(&["SpaceNavigator"]);
        let (samples, on_sample) = counter();
        let lost = Arc::new(AtomicUsize::new(0));
        let l = lost.clone();

        let session = DeviceSession::create(navigator())
            .open(
                &transport,
                on_sample,
                Box::new(move || {
                    l.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("open");
        assert!(session.is_open());

        let device = transport.device("SpaceNavigator").expect("opened");
        assert!(device.emit(RawSample::new([0.1, 0.0, 0.0], [0.0; 3])));
        assert_eq!(samples.load(Ordering::SeqCst), 1);

        let closed = session.close();
        assert!(closed.closed_by_request());
        assert!(!device.is_open());
        assert!(!device.emit(RawSample::default()));
        assert_eq!(samples.load(Ordering::SeqCst), 1);

        // the device going away afterwards is not reported
        device.disconnect();
        assert_eq!(lost.load(Ordering::SeqCst), 0);

        let closed = closed.close();
        assert!(closed.closed_by_request());
    }

    #[test]
    fn test_open_failure_is_not_found() {
        let transport = MockTransport::new();
        let (_, on_sample) = counter();
        let result = DeviceSession::create(navigator()).open(&transport, on_sample, Box::new(|| {}));
        assert!(matches!(result, Err(DeviceError::NotFound { .. })));
        assert_eq!(transport.open_attempts(), vec!["SpaceNavigator".to_string()]);
    }

    #[test]
    fn test_device_loss_is_reported_once() {
        let transport = MockTransport::with_available(&["SpaceNavigator"]);
        let (_, on_sample) = counter();
        let lost = Arc::new(AtomicUsize::new(0));
        let l = lost.clone();
        let session = DeviceSession::create(navigator())
            .open(
                &transport,
                on_sample,
                Box::new(move || {
                    l.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("open");

        let device = transport.device("SpaceNavigator").expect("opened");
        device.disconnect();
        device.disconnect();
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(!session.is_open());

        let closed = session.close();
        assert!(!closed.closed_by_request());
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = DeviceSession::create(navigator());
        let b = DeviceSession::create(navigator());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_mark_closed_has_single_winner() {
        for _ in 0..200 {
            let link = Arc::new(SessionLink::default());
            link.mark_open();
            let barrier = Arc::new(Barrier::new(4));
            let winners: usize = (0..4)
                .map(|_| {
                    let link = link.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        link.mark_closed()
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|t| t.join().expect("thread") as usize)
                .sum();
            assert_eq!(winners, 1);
            assert!(!link.is_open());
        }
    }
}
