//! Device layer: catalog, transports, sessions and the engagement manager
//!
//! ```text
//! Transport ──► TransportHandle ──► DeviceSession ──► DeviceManager
//!  (hid/mock)     (callbacks)         (typestate)      (engage/discover)
//! ```

pub mod buttons;
pub mod catalog;
#[cfg(feature = "hid")]
pub mod hid;
pub mod manager;
pub mod mock;
pub mod report;
pub mod session;
pub mod transport;

pub use buttons::{ButtonDebouncer, EdgeSelection};
pub use catalog::{DeviceCatalog, DeviceSpec};
pub use manager::{ConnectionStatus, DeviceEvent, DeviceEventKind, DeviceManager, ManagerSettings};
pub use session::{DeviceSession, SessionLink};
pub use transport::{CloseCallback, SampleCallback, Transport, TransportHandle};
