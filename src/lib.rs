//! Signal conditioning and device engagement for 6-DoF 3D mice
//!
//! ```text
//! HID device ──► Transport ──► DeviceSession ──► SignalFilter ──► SampleBuffer
//!                                   ▲                 ▲
//!                             DeviceManager      FilterConfig
//!                          (engage/discover)   (live parameters)
//! ```

pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod sample;

pub use buffer::SampleBuffer;
pub use config::AppConfig;
pub use device::{DeviceCatalog, DeviceManager};
pub use error::{ConfigError, DeviceError};
pub use filter::{FilterConfig, FilterSettings, SignalFilter};
pub use sample::{Axis, ButtonState, DofGroup, RawSample};
