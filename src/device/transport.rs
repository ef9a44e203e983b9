use crate::device::catalog::DeviceSpec;
use crate::error::DeviceError;
use crate::sample::RawSample;

/// Invoked on the transport's delivery thread for every decoded sample
pub type SampleCallback = Box<dyn FnMut(RawSample) + Send + 'static>;

/// Invoked at most once when the device goes away without being closed
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Something that can open a device described by a [`DeviceSpec`]
pub trait Transport: Send + Sync {
    fn open(&self, spec: &DeviceSpec) -> Result<Box<dyn TransportHandle>, DeviceError>;
}

/// An opened device
///
/// Once [`close`](TransportHandle::close) has returned, no callback
/// registered on the handle runs again. Closing twice is a no-op.
pub trait TransportHandle: Send {
    fn register_sample_callback(&mut self, callback: SampleCallback);

    fn register_unexpected_close_callback(&mut self, callback: CloseCallback);

    fn close(&mut self);
}
