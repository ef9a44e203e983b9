//! Signal conditioning for 6-DoF samples
//!
//! ```text
//! RawSample ──► deadband ──► emphasis ──► sensitivity ──► smoothing ──► gating ──► RawSample
//!                                                            ▲
//!                                                      FilterState
//! ```
//!
//! [`FilterConfig`] is shared with the control context and read once per
//! sample; [`FilterState`] belongs to the sampling path alone.

pub mod settings;
pub mod signal_filter;

pub use settings::{DeadbandCurve, FilterConfig, FilterParam, FilterSettings};
pub use signal_filter::{transform, FilterState, SignalFilter};
