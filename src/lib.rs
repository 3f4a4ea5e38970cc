//! # Sensor DAQ Core Library
//!
//! Acquisition core for a bench of serial sensors: one load cell and up to
//! five displacement transducers, each streaming ASCII frames over its own
//! USB-serial adapter. The library detects which port each sensor is on,
//! reads the streams, zeroes and stores calibrated samples at a fixed cadence,
//! derives computed channels, tracks connection health with exponential
//! backoff, and answers "latest value" and "last N seconds" queries.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The `Acquisition` facade owning every component, and the
//!   task lifecycle (`start` / `AcquisitionHandle::shutdown`).
//! - **`calibration`**: Fixed-cadence loop turning raw readings into calibrated,
//!   stored samples and derived-channel values.
//! - **`channel`**: Closed channel enumeration, the derived-formula table and `Sample`.
//! - **`config`**: Layered configuration (defaults, TOML, environment) via Figment.
//! - **`data`**: Ring buffers and precomputed window offsets.
//! - **`detection`**: Serial port auto-detection with confidence scoring.
//! - **`error`**: The `DaqError` enum shared by the whole crate.
//! - **`hardware`**: Frame decoding, link tasks (serial and simulated), the raw
//!   sample feed and the connection health monitor.
//! - **`logging`**: `tracing-subscriber` setup.

pub mod acquisition;
pub mod calibration;
pub mod channel;
pub mod clock;
pub mod config;
pub mod data;
pub mod detection;
pub mod error;
pub mod hardware;
pub mod logging;

pub use acquisition::{Acquisition, AcquisitionHandle};
pub use channel::{Channel, DerivedChannel, PhysicalChannel, Sample};
pub use config::DaqConfig;
pub use error::{AppResult, DaqError};
pub use hardware::monitor::HealthState;
