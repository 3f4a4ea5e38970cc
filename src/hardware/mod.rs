//! Sensor I/O: frame decoding, raw sample feed, link tasks and health tracking.

pub mod feed;
pub mod frame;
pub mod monitor;
#[cfg(feature = "instrument_serial")]
pub mod serial_link;
pub mod simulated;

pub use feed::{RawFeed, RawPublisher};
pub use frame::FrameDecoder;
pub use monitor::{
    BackoffPolicy, ConnectionMonitor, HealthState, HealthTransition, MonitorConfig, SensorHealth,
};
#[cfg(feature = "instrument_serial")]
pub use serial_link::SerialLink;
pub use simulated::SimulatedLink;
