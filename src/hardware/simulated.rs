//! Emulated sensors for running without hardware.
//!
//! Force follows a noisy sine around 500; displacements ramp as a sawtooth
//! (period 100 s, amplitude 10) with a per-sensor phase and scale so the
//! curves do not overlap.

use crate::channel::{PhysicalChannel, Sample};
use crate::clock::now_secs;
use crate::hardware::feed::RawPublisher;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

const DISP_PHASES: [f64; 5] = [0.0, 1.5, 3.0, 4.5, 6.0];
const DISP_SCALES: [f64; 5] = [1.0, 1.1, 0.9, 1.2, 0.8];

/// Noise-free reading of `channel` at `elapsed` seconds.
#[must_use]
pub fn ideal_value(channel: PhysicalChannel, elapsed: f64) -> f64 {
    match channel {
        PhysicalChannel::Force => 500.0 + 500.0 * elapsed.sin(),
        disp => {
            let i = disp.index() - 1;
            (((elapsed + DISP_PHASES[i]) * 0.1) % 10.0) * DISP_SCALES[i]
        }
    }
}

/// Reading of `channel` at `elapsed` seconds, with uniform noise.
pub fn simulated_value<R: Rng + ?Sized>(channel: PhysicalChannel, elapsed: f64, rng: &mut R) -> f64 {
    let noise = match channel {
        PhysicalChannel::Force => rng.gen_range(-10.0..=10.0),
        _ => rng.gen_range(-0.05..=0.05),
    };
    ideal_value(channel, elapsed) + noise
}

/// Emulated link publishing one reading per period.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    publisher: RawPublisher,
    period: Duration,
    start: f64,
}

impl SimulatedLink {
    /// Link producing `rate_hz` readings per second, with time measured from `start`.
    #[must_use]
    pub fn new(publisher: RawPublisher, rate_hz: f64, start: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(0.001));
        Self {
            publisher,
            period,
            start,
        }
    }

    /// Publish readings until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let channel = self.publisher.channel();
        debug!(channel = %channel, "Simulated link started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_secs();
                    let value = simulated_value(channel, now - self.start, &mut rand::thread_rng());
                    self.publisher.publish(Sample::new(now, value));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(channel = %channel, "Simulated link stopped");
    }
}
