//! Channel identities and the sample type.
//!
//! Channels form a closed enumeration: a fixed set of physical sensors, each
//! owning a serial link, plus derived channels computed from the latest
//! calibrated values of other channels. Derived channels are declared in a
//! static formula table so the hot path never dispatches on strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Immutable `(timestamp, value)` pair. Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Measured or computed value.
    pub value: f64,
}

impl Sample {
    /// Create a new sample.
    #[must_use]
    pub const fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Textual shape of the frames a sensor family emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFamily {
    /// `ASC2 <counter> <raw> <x> <calibrated> ...` load-cell records.
    Force,
    /// `... SPC_VAL usSenderId=<id> ulMicros=<t> Val=<v>` displacement records.
    Motion,
}

/// A sensor with its own serial link.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PhysicalChannel {
    /// Load cell.
    #[serde(rename = "FORCE", alias = "force")]
    Force,
    /// Displacement sensor 1.
    #[serde(rename = "DISP_1", alias = "disp_1")]
    Disp1,
    /// Displacement sensor 2.
    #[serde(rename = "DISP_2", alias = "disp_2")]
    Disp2,
    /// Displacement sensor 3.
    #[serde(rename = "DISP_3", alias = "disp_3")]
    Disp3,
    /// Displacement sensor 4.
    #[serde(rename = "DISP_4", alias = "disp_4")]
    Disp4,
    /// Displacement sensor 5.
    #[serde(rename = "DISP_5", alias = "disp_5")]
    Disp5,
}

impl PhysicalChannel {
    /// Every physical channel, in declaration order.
    pub const ALL: [PhysicalChannel; 6] = [
        PhysicalChannel::Force,
        PhysicalChannel::Disp1,
        PhysicalChannel::Disp2,
        PhysicalChannel::Disp3,
        PhysicalChannel::Disp4,
        PhysicalChannel::Disp5,
    ];

    /// Position in [`PhysicalChannel::ALL`]; doubles as the storage index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable identifier used in configuration and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PhysicalChannel::Force => "FORCE",
            PhysicalChannel::Disp1 => "DISP_1",
            PhysicalChannel::Disp2 => "DISP_2",
            PhysicalChannel::Disp3 => "DISP_3",
            PhysicalChannel::Disp4 => "DISP_4",
            PhysicalChannel::Disp5 => "DISP_5",
        }
    }

    /// Frame family this sensor emits.
    #[must_use]
    pub const fn family(self) -> SignatureFamily {
        match self {
            PhysicalChannel::Force => SignatureFamily::Force,
            _ => SignatureFamily::Motion,
        }
    }

    /// Factory baud rate for the sensor.
    #[must_use]
    pub const fn default_baud(self) -> u32 {
        match self {
            PhysicalChannel::Force => 115_200,
            _ => 9_600,
        }
    }
}

impl fmt::Display for PhysicalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A channel computed from other channels' calibrated values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum DerivedChannel {
    /// Circular deflection: `DISP_1 - (DISP_2 + DISP_3) / 2`.
    #[serde(rename = "ARC", alias = "arc")]
    Arc,
}

/// Declarative definition of a derived channel.
pub struct DerivedFormula {
    /// Channel being defined.
    pub channel: DerivedChannel,
    /// Inputs, in the order `compute` expects them.
    pub dependencies: &'static [PhysicalChannel],
    /// Pure function over the dependency values.
    pub compute: fn(&[f64]) -> f64,
}

impl fmt::Debug for DerivedFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedFormula")
            .field("channel", &self.channel)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

fn arc_deflection(values: &[f64]) -> f64 {
    values[0] - (values[1] + values[2]) / 2.0
}

/// Derived channel table.
pub static DERIVED_FORMULAS: [DerivedFormula; 1] = [DerivedFormula {
    channel: DerivedChannel::Arc,
    dependencies: &[
        PhysicalChannel::Disp1,
        PhysicalChannel::Disp2,
        PhysicalChannel::Disp3,
    ],
    compute: arc_deflection,
}];

impl DerivedChannel {
    /// Every derived channel, in declaration order.
    pub const ALL: [DerivedChannel; 1] = [DerivedChannel::Arc];

    /// Position in [`DerivedChannel::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable identifier used in configuration and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DerivedChannel::Arc => "ARC",
        }
    }

    /// Formula entry for this channel.
    #[must_use]
    pub fn formula(self) -> &'static DerivedFormula {
        &DERIVED_FORMULAS[self.index()]
    }

    /// Physical channels this one is computed from.
    #[must_use]
    pub fn dependencies(self) -> &'static [PhysicalChannel] {
        self.formula().dependencies
    }

    /// Evaluate the formula. `values` must follow [`Self::dependencies`] order.
    #[must_use]
    pub fn compute(self, values: &[f64]) -> f64 {
        (self.formula().compute)(values)
    }
}

impl fmt::Display for DerivedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Sensor with a link.
    Physical(PhysicalChannel),
    /// Channel computed from others.
    Derived(DerivedChannel),
}

impl Channel {
    /// Total number of channels.
    pub const COUNT: usize = PhysicalChannel::ALL.len() + DerivedChannel::ALL.len();

    /// Every channel: physical first, then derived.
    pub fn all() -> impl Iterator<Item = Channel> {
        PhysicalChannel::ALL
            .into_iter()
            .map(Channel::Physical)
            .chain(DerivedChannel::ALL.into_iter().map(Channel::Derived))
    }

    /// Dense storage index in `0..Channel::COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Channel::Physical(p) => p.index(),
            Channel::Derived(d) => PhysicalChannel::ALL.len() + d.index(),
        }
    }

    /// Stable identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Channel::Physical(p) => p.name(),
            Channel::Derived(d) => d.name(),
        }
    }

    /// The physical channel, if this is one.
    #[must_use]
    pub const fn as_physical(self) -> Option<PhysicalChannel> {
        match self {
            Channel::Physical(p) => Some(p),
            Channel::Derived(_) => None,
        }
    }

    /// Physical channels that feed this one (itself, for a physical channel).
    #[must_use]
    pub fn physical_sources(self) -> Vec<PhysicalChannel> {
        match self {
            Channel::Physical(p) => vec![p],
            Channel::Derived(d) => d.dependencies().to_vec(),
        }
    }
}

impl From<PhysicalChannel> for Channel {
    fn from(value: PhysicalChannel) -> Self {
        Channel::Physical(value)
    }
}

impl From<DerivedChannel> for Channel {
    fn from(value: DerivedChannel) -> Self {
        Channel::Derived(value)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Channel::all()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| format!("Unknown channel '{s}'"))
    }
}
