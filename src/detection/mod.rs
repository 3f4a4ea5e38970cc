//! Serial port auto-detection.
//!
//! Sensors are plugged into whatever USB-serial adapter happens to be free, so
//! port names are not stable between sessions. Detection listens passively to
//! every candidate port, classifies the lines it hears with each channel's
//! frame decoder and builds a one-to-one channel→port table.
//!
//! - [`prober`]: the I/O seam (`PortProber`), with a serial implementation and
//!   a recorded one for tests and dry runs.
//! - [`scout`]: probing passes, confidence scoring and conflict resolution.

pub mod prober;
pub mod scout;

pub use prober::{PortProber, RecordedProber};
#[cfg(feature = "instrument_serial")]
pub use prober::SerialProber;
pub use scout::{PortScout, ProbeTarget};

use crate::channel::PhysicalChannel;
use crate::error::DaqError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Probe tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    /// Upper bound on the time spent reading one (port, baud) pair.
    pub timeout: Duration,
    /// Pause after opening a port before reading.
    pub settle: Duration,
    /// Lines to read per probe.
    pub max_lines: usize,
    /// Matching lines required for a detection.
    pub min_matching_lines: usize,
    /// Matching fraction required for a detection.
    pub min_confidence: f64,
    /// Bauds tried for channels the expected-baud pass did not find.
    pub fallback_bauds: Vec<u32>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            settle: Duration::from_millis(1000),
            max_lines: 10,
            min_matching_lines: 2,
            min_confidence: 0.5,
            fallback_bauds: vec![9600, 19200, 38400, 57600, 115200],
        }
    }
}

/// A channel bound to a port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortAssignment {
    /// Channel detected.
    pub channel: PhysicalChannel,
    /// Port it was heard on.
    pub port: String,
    /// Baud the lines were readable at.
    pub baud: u32,
    /// Matching lines / lines read.
    pub confidence: f64,
    /// Found only during the fallback-baud pass.
    pub off_expected_baud: bool,
}

/// Channel → port mapping. Undetected channels are absent.
pub type AssignmentTable = BTreeMap<PhysicalChannel, PortAssignment>;

/// A candidate that lost conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionConflict {
    /// Assignment that blocked the candidate.
    pub kept: PortAssignment,
    /// Candidate that was dropped.
    pub discarded: PortAssignment,
}

impl DetectionConflict {
    /// The conflict as an error value, for uniform reporting.
    #[must_use]
    pub fn to_error(&self) -> DaqError {
        DaqError::DetectionAmbiguous {
            kept: self.kept.channel,
            kept_port: self.kept.port.clone(),
            discarded: self.discarded.channel,
            discarded_port: self.discarded.port.clone(),
        }
    }
}

/// Outcome of one detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    /// Accepted assignments.
    pub assignments: AssignmentTable,
    /// Candidates discarded while resolving conflicts.
    pub conflicts: Vec<DetectionConflict>,
}

impl DetectionReport {
    /// Port assigned to `channel`.
    #[must_use]
    pub fn port_for(&self, channel: PhysicalChannel) -> Option<&PortAssignment> {
        self.assignments.get(&channel)
    }

    /// Channels among `wanted` that were not found.
    #[must_use]
    pub fn missing(&self, wanted: &[PhysicalChannel]) -> Vec<PhysicalChannel> {
        wanted
            .iter()
            .copied()
            .filter(|c| !self.assignments.contains_key(c))
            .collect()
    }
}
