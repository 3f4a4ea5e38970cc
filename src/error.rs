//! Custom error types for the acquisition core.
//!
//! This module defines `DaqError`, the single error type returned by every
//! fallible operation of the core. Using the `thiserror` crate, each variant
//! maps to one named condition callers can match on:
//!
//! - **`InvalidWindow`**: a window query used a duration that is not in the
//!   configured window set. Never silently coerced.
//! - **`NotConnected`**: a query hit a channel whose health is not `connected`
//!   (or that has never produced data). Expected and recoverable.
//! - **`NoSample`**: a calibration operation needs a raw value the channel has
//!   not produced yet.
//! - **`DetectionAmbiguous`**: two detections claimed the same port or channel.
//!   PortScout resolves these itself and only records them; the variant exists
//!   so the conflict can be reported with a uniform message.
//! - **`LinkTimeout`**: a probe or read exceeded its timeout. Treated as "no
//!   match" or "no sample", never propagated as a crash.
//! - **`Configuration`**, **`Io`**, **`Serial`**: ambient failures while
//!   loading configuration or talking to ports.

use crate::channel::{Channel, PhysicalChannel};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors produced by the acquisition core.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Requested window duration is not supported.
    #[error("Unsupported window duration: {0}s")]
    InvalidWindow(u32),

    /// Channel is not currently connected (or has no data yet).
    #[error("Channel {0} is not connected")]
    NotConnected(Channel),

    /// Channel has not produced a raw sample yet.
    #[error("Channel {0} has not produced a sample yet")]
    NoSample(Channel),

    /// Conflicting detections for the same port or channel.
    #[error(
        "Ambiguous detection: {discarded} on {discarded_port} discarded, {kept} on {kept_port} kept"
    )]
    DetectionAmbiguous {
        /// Channel whose assignment survived.
        kept: PhysicalChannel,
        /// Port of the surviving assignment.
        kept_port: String,
        /// Channel of the discarded candidate.
        discarded: PhysicalChannel,
        /// Port of the discarded candidate.
        discarded_port: String,
    },

    /// A probe or read exceeded its timeout.
    #[error("Timed out after {timeout:?} on {port}")]
    LinkTimeout {
        /// Port being read.
        port: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Configuration parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Functionality compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the condition is expected to clear on its own (retry makes sense).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::NotConnected(_)
                | DaqError::NoSample(_)
                | DaqError::LinkTimeout { .. }
                | DaqError::DetectionAmbiguous { .. }
        )
    }
}
