//! Fixed-cadence calibration loop.
//!
//! Every tick the loop takes the newest raw reading of each physical channel
//! (if one arrived since the previous tick), subtracts the channel's zero
//! offset, stores the result, recomputes derived channels and reports the
//! reading to the connection monitor. Channels without a fresh reading are
//! skipped; nothing is interpolated or repeated.

use crate::channel::{Channel, DerivedChannel, PhysicalChannel, Sample};
use crate::data::SampleStore;
use crate::error::{AppResult, DaqError};
use crate::hardware::feed::RawFeed;
use crate::hardware::monitor::ConnectionMonitor;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

const PHYSICAL: usize = PhysicalChannel::ALL.len();

/// Loop-private bookkeeping.
#[derive(Debug)]
struct TickState {
    receivers: Vec<(PhysicalChannel, watch::Receiver<Option<Sample>>)>,
    /// Latest calibrated value per physical channel.
    values: [Option<f64>; PHYSICAL],
    /// Latest stored timestamp per channel (physical and derived).
    stamps: Vec<f64>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Physical channels that had a fresh reading.
    pub fresh: Vec<PhysicalChannel>,
    /// Derived channels recomputed.
    pub derived: Vec<DerivedChannel>,
}

/// Turns raw readings into calibrated, stored samples.
#[derive(Debug)]
pub struct CalibrationLoop {
    feed: Arc<RawFeed>,
    store: Arc<SampleStore>,
    monitor: Arc<ConnectionMonitor>,
    offsets: RwLock<[f64; PHYSICAL]>,
    state: Mutex<TickState>,
    period: Duration,
}

impl CalibrationLoop {
    /// Loop over `channels`, ticking every `period`.
    #[must_use]
    pub fn new(
        feed: Arc<RawFeed>,
        store: Arc<SampleStore>,
        monitor: Arc<ConnectionMonitor>,
        channels: &[PhysicalChannel],
        period: Duration,
    ) -> Self {
        let receivers = channels.iter().map(|c| (*c, feed.subscribe(*c))).collect();
        Self {
            feed,
            store,
            monitor,
            offsets: RwLock::new([0.0; PHYSICAL]),
            state: Mutex::new(TickState {
                receivers,
                values: [None; PHYSICAL],
                stamps: vec![f64::NEG_INFINITY; Channel::COUNT],
            }),
            period,
        }
    }

    /// Tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Current zero offset of a physical channel.
    #[must_use]
    pub fn offset(&self, channel: PhysicalChannel) -> f64 {
        self.offsets.read().unwrap_or_else(PoisonError::into_inner)[channel.index()]
    }

    /// Newest raw (uncalibrated) reading.
    #[must_use]
    pub fn raw_latest(&self, channel: PhysicalChannel) -> Option<Sample> {
        self.feed.latest(channel)
    }

    /// Make the channel's current raw reading the new zero.
    ///
    /// Zeroing a derived channel zeroes each of its dependencies. Only samples
    /// calibrated after the call are affected; stored history is untouched.
    /// Fails with `NoSample` (changing nothing) if any source has not
    /// produced a reading yet.
    pub fn zero(&self, channel: Channel) -> AppResult<()> {
        let mut raws = Vec::new();
        for source in channel.physical_sources() {
            let raw = self
                .feed
                .latest(source)
                .ok_or(DaqError::NoSample(source.into()))?;
            raws.push((source, raw.value));
        }

        let mut offsets = self.offsets.write().unwrap_or_else(PoisonError::into_inner);
        for (source, value) in raws {
            offsets[source.index()] = value;
            info!(channel = %source, offset = value, "Channel zeroed");
        }
        Ok(())
    }

    /// Clear a channel's zero offset (and its dependencies' for a derived channel).
    pub fn clear_offset(&self, channel: Channel) {
        let mut offsets = self.offsets.write().unwrap_or_else(PoisonError::into_inner);
        for source in channel.physical_sources() {
            offsets[source.index()] = 0.0;
        }
    }

    /// Run one calibration pass.
    pub fn tick(&self) -> TickReport {
        let offsets = *self.offsets.read().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let TickState {
            receivers,
            values,
            stamps,
        } = &mut *state;
        let mut report = TickReport::default();

        for (channel, rx) in receivers.iter_mut() {
            // A closed sender cannot happen while the feed is alive; treat as no news
            if !rx.has_changed().unwrap_or(false) {
                continue;
            }
            let Some(raw) = *rx.borrow_and_update() else {
                continue;
            };
            let i = channel.index();
            let calibrated = raw.value - offsets[i];
            let stored_at = raw.timestamp.max(stamps[i]);

            self.store
                .append((*channel).into(), Sample::new(stored_at, calibrated));
            values[i] = Some(calibrated);
            stamps[i] = stored_at;
            report.fresh.push(*channel);

            if let Some(transition) = self.monitor.record_sample(*channel, raw.timestamp) {
                debug!(?transition, "Health transition on sample");
            }
        }

        for derived in DerivedChannel::ALL {
            let deps = derived.dependencies();
            if !deps.iter().any(|d| report.fresh.contains(d)) {
                continue;
            }
            let inputs: Option<Vec<f64>> = deps.iter().map(|d| values[d.index()]).collect();
            let Some(inputs) = inputs else {
                continue;
            };
            let channel = Channel::Derived(derived);
            let newest = deps
                .iter()
                .map(|d| stamps[d.index()])
                .fold(f64::NEG_INFINITY, f64::max);
            let stored_at = newest.max(stamps[channel.index()]);

            self.store
                .append(channel, Sample::new(stored_at, derived.compute(&inputs)));
            stamps[channel.index()] = stored_at;
            report.derived.push(derived);
        }
        report
    }

    /// Tick at the configured cadence until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(period = ?self.period, "Calibration loop started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Calibration loop stopped");
    }
}
