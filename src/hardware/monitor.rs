//! Per-sensor connection health and reconnection backoff.
//!
//! # State Machine
//!
//! ```text
//!                 fresh sample
//!   ┌──────────────────────────────────────────┐
//!   ▼                                          │
//! Connected ──silence──> Disconnected ──> Reconnecting ──attempts exhausted──> Failed
//!                                          │    ▲                               │
//!                                          └────┘                            reset()
//!                                    retry due, no sample:                      │
//!                                    delay = min(delay × m, max)        back to Connected
//! ```
//!
//! A channel with no link at all (never detected) is [`ConnectionMonitor::detach`]ed:
//! it rests in `Disconnected`, runs no retry cycle, and only a sample connects it.
//!
//! Each physical channel has its own mutex. The calibration task (reporting
//! samples) and the health task (checking silence, advancing backoff) both take
//! it, so a sample report and a silence check can never interleave into an
//! inconsistent combination of states.
//!
//! Derived channels keep no state: their health is the AND of their
//! dependencies, evaluated on demand over a snapshot taken while holding every
//! dependency lock.

use crate::channel::{Channel, PhysicalChannel};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Health of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Samples are arriving.
    Connected,
    /// No link, or the silence timeout elapsed.
    ///
    /// A linked channel passes through this state and into `Reconnecting`
    /// within one health check, so for it `Disconnected` is only observable
    /// through [`HealthTransition::Disconnected`]. As a resting state it is
    /// held by detached channels until their first sample.
    Disconnected,
    /// Waiting for a retry to succeed.
    Reconnecting,
    /// Retries exhausted; needs an explicit reset.
    Failed,
}

impl HealthState {
    /// Short lowercase label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            HealthState::Connected => "connected",
            HealthState::Disconnected => "disconnected",
            HealthState::Reconnecting => "reconnecting",
            HealthState::Failed => "failed",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// First retry delay in seconds.
    pub initial_delay: f64,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Cap on the delay in seconds.
    pub max_delay: f64,
    /// Failed attempts before `Failed` (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: 1.0,
            multiplier: 1.5,
            max_delay: 30.0,
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given attempt (1-based): `min(initial × multiplier^(n-1), max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        (self.initial_delay * self.multiplier.powi(exponent)).min(self.max_delay)
    }

    /// Delay following `current`.
    #[must_use]
    pub fn next_delay(&self, current: f64) -> f64 {
        (current * self.multiplier).min(self.max_delay)
    }

    /// Whether `failed_attempts` failures exhaust the policy.
    #[must_use]
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts != 0 && failed_attempts >= self.max_attempts
    }
}

/// Monitor parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Seconds without a sample before a channel is disconnected.
    pub silence_timeout: f64,
    /// Retry schedule.
    pub backoff: BackoffPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            silence_timeout: 5.0,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Health record of one physical channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorHealth {
    /// Current state.
    pub state: HealthState,
    /// Timestamp of the newest sample seen (or of construction/reset).
    pub last_sample_time: f64,
    /// Retries that came due without a sample.
    pub consecutive_failed_attempts: u32,
    /// Delay used for the pending (or next) retry, in seconds.
    pub next_retry_delay: f64,
    /// When the pending retry is due.
    pub next_retry_at: Option<f64>,
}

impl SensorHealth {
    fn fresh(now: f64, policy: &BackoffPolicy) -> Self {
        Self {
            state: HealthState::Connected,
            last_sample_time: now,
            consecutive_failed_attempts: 0,
            next_retry_delay: policy.initial_delay,
            next_retry_at: None,
        }
    }
}

/// A state change reported by the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthTransition {
    /// Silence timeout elapsed.
    Disconnected {
        /// Channel concerned.
        channel: PhysicalChannel,
        /// Seconds since the last sample.
        silent_for: f64,
    },
    /// A retry was scheduled.
    RetryScheduled {
        /// Channel concerned.
        channel: PhysicalChannel,
        /// 1-based attempt number.
        attempt: u32,
        /// Seconds until the retry is due.
        delay: f64,
    },
    /// A sample arrived while not connected.
    Reconnected {
        /// Channel concerned.
        channel: PhysicalChannel,
    },
    /// Retries exhausted.
    Failed {
        /// Channel concerned.
        channel: PhysicalChannel,
        /// Failed attempts.
        attempts: u32,
    },
}

/// Health state machines for every tracked physical channel.
#[derive(Debug)]
pub struct ConnectionMonitor {
    config: MonitorConfig,
    bypass: bool,
    /// Indexed by `PhysicalChannel::index`; `None` for untracked channels.
    slots: Vec<Option<Mutex<SensorHealth>>>,
}

impl ConnectionMonitor {
    /// Track `channels`, all starting connected as of `now`.
    #[must_use]
    pub fn new(config: MonitorConfig, channels: &[PhysicalChannel], now: f64) -> Self {
        let slots = PhysicalChannel::ALL
            .iter()
            .map(|c| {
                channels
                    .contains(c)
                    .then(|| Mutex::new(SensorHealth::fresh(now, &config.backoff)))
            })
            .collect();
        Self {
            config,
            bypass: false,
            slots,
        }
    }

    /// Monitor that reports every tracked channel as connected and never transitions.
    ///
    /// Used when running without hardware.
    #[must_use]
    pub fn bypass(channels: &[PhysicalChannel]) -> Self {
        Self {
            bypass: true,
            ..Self::new(MonitorConfig::default(), channels, 0.0)
        }
    }

    /// Whether this monitor is in bypass mode.
    #[must_use]
    pub fn is_bypass(&self) -> bool {
        self.bypass
    }

    /// Parameters in effect.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Whether `channel` has a state machine.
    #[must_use]
    pub fn is_tracked(&self, channel: PhysicalChannel) -> bool {
        self.slots[channel.index()].is_some()
    }

    fn lock(&self, channel: PhysicalChannel) -> Option<MutexGuard<'_, SensorHealth>> {
        self.slots[channel.index()]
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Report a fresh sample.
    pub fn record_sample(
        &self,
        channel: PhysicalChannel,
        timestamp: f64,
    ) -> Option<HealthTransition> {
        if self.bypass {
            return None;
        }
        let mut health = self.lock(channel)?;
        health.last_sample_time = health.last_sample_time.max(timestamp);

        match health.state {
            HealthState::Failed => {
                debug!(channel = %channel, "Sample on failed channel ignored until reset");
                None
            }
            HealthState::Connected => {
                health.consecutive_failed_attempts = 0;
                health.next_retry_delay = self.config.backoff.initial_delay;
                None
            }
            HealthState::Disconnected | HealthState::Reconnecting => {
                let attempts = health.consecutive_failed_attempts;
                health.state = HealthState::Connected;
                health.consecutive_failed_attempts = 0;
                health.next_retry_delay = self.config.backoff.initial_delay;
                health.next_retry_at = None;
                info!(channel = %channel, failed_attempts = attempts, "Sensor reconnected");
                Some(HealthTransition::Reconnected { channel })
            }
        }
    }

    /// Run the silence check and backoff advance for every tracked channel.
    pub fn check(&self, now: f64) -> Vec<HealthTransition> {
        PhysicalChannel::ALL
            .into_iter()
            .flat_map(|channel| self.check_channel(channel, now))
            .collect()
    }

    /// Run the silence check and backoff advance for one channel.
    pub fn check_channel(&self, channel: PhysicalChannel, now: f64) -> Vec<HealthTransition> {
        let mut transitions = Vec::new();
        if self.bypass {
            return transitions;
        }
        let Some(mut health) = self.lock(channel) else {
            return transitions;
        };
        let policy = &self.config.backoff;

        match health.state {
            // Detached: nothing to retry until a sample shows up.
            HealthState::Failed | HealthState::Disconnected => {}
            HealthState::Connected => {
                let silent_for = now - health.last_sample_time;
                if silent_for <= self.config.silence_timeout {
                    return transitions;
                }
                warn!(
                    channel = %channel,
                    silent_for = %format!("{silent_for:.1}s"),
                    "Sensor disconnected"
                );
                health.state = HealthState::Disconnected;
                transitions.push(HealthTransition::Disconnected {
                    channel,
                    silent_for,
                });

                // Disconnected moves straight on to reconnecting.
                health.state = HealthState::Reconnecting;
                health.consecutive_failed_attempts = 0;
                health.next_retry_delay = policy.initial_delay;
                health.next_retry_at = Some(now + policy.initial_delay);
                debug!(channel = %channel, delay = policy.initial_delay, "Retry scheduled");
                transitions.push(HealthTransition::RetryScheduled {
                    channel,
                    attempt: 1,
                    delay: policy.initial_delay,
                });
            }
            HealthState::Reconnecting => {
                let due = health.next_retry_at.is_some_and(|at| now >= at);
                if !due {
                    return transitions;
                }
                health.consecutive_failed_attempts += 1;
                let attempts = health.consecutive_failed_attempts;

                if policy.is_exhausted(attempts) {
                    health.state = HealthState::Failed;
                    health.next_retry_at = None;
                    error!(channel = %channel, attempts, "Reconnection attempts exhausted");
                    transitions.push(HealthTransition::Failed { channel, attempts });
                } else {
                    let delay = policy.next_delay(health.next_retry_delay);
                    health.next_retry_delay = delay;
                    health.next_retry_at = Some(now + delay);
                    debug!(channel = %channel, attempt = attempts + 1, delay, "Retry scheduled");
                    transitions.push(HealthTransition::RetryScheduled {
                        channel,
                        attempt: attempts + 1,
                        delay,
                    });
                }
            }
        }
        transitions
    }

    /// Put a channel back to connected as of `now`, whatever its state.
    ///
    /// This is the only way out of `Failed`.
    pub fn reset(&self, channel: PhysicalChannel, now: f64) {
        if let Some(mut health) = self.lock(channel) {
            info!(channel = %channel, previous = %health.state, "Health state reset");
            *health = SensorHealth::fresh(now, &self.config.backoff);
        }
    }

    /// Mark a channel as having no link: `Disconnected` with no retry cycle.
    ///
    /// Only a reported sample (or [`reset`](Self::reset)) connects it again.
    pub fn detach(&self, channel: PhysicalChannel, now: f64) {
        if let Some(mut health) = self.lock(channel) {
            *health = SensorHealth {
                state: HealthState::Disconnected,
                ..SensorHealth::fresh(now, &self.config.backoff)
            };
            debug!(channel = %channel, "Sensor detached");
        }
    }

    /// Snapshot of one channel's record.
    #[must_use]
    pub fn health(&self, channel: PhysicalChannel) -> Option<SensorHealth> {
        self.lock(channel).map(|h| h.clone())
    }

    /// Current state; derived channels combine their dependencies.
    #[must_use]
    pub fn state(&self, channel: Channel) -> HealthState {
        match channel {
            Channel::Physical(p) => self.physical_state(p),
            Channel::Derived(d) => combine(&self.snapshot(d.dependencies())),
        }
    }

    /// Whether the channel (or, for a derived channel, every dependency) is connected.
    #[must_use]
    pub fn is_connected(&self, channel: Channel) -> bool {
        self.state(channel) == HealthState::Connected
    }

    fn physical_state(&self, channel: PhysicalChannel) -> HealthState {
        if !self.is_tracked(channel) {
            return HealthState::Disconnected;
        }
        if self.bypass {
            return HealthState::Connected;
        }
        self.lock(channel)
            .map_or(HealthState::Disconnected, |h| h.state)
    }

    /// States of `channels`, read while holding all of their locks at once.
    ///
    /// Locks are taken in channel index order, the same order every other
    /// multi-lock path uses.
    fn snapshot(&self, channels: &[PhysicalChannel]) -> Vec<HealthState> {
        if self.bypass {
            return channels.iter().map(|c| self.physical_state(*c)).collect();
        }
        let mut ordered = channels.to_vec();
        ordered.sort_unstable();
        let guards: Vec<(PhysicalChannel, Option<MutexGuard<'_, SensorHealth>>)> =
            ordered.iter().map(|c| (*c, self.lock(*c))).collect();
        channels
            .iter()
            .map(|c| {
                guards
                    .iter()
                    .find(|(g, _)| g == c)
                    .and_then(|(_, guard)| guard.as_ref().map(|h| h.state))
                    .unwrap_or(HealthState::Disconnected)
            })
            .collect()
    }

    /// Current retry delay for a channel's link to wait before reopening.
    #[must_use]
    pub fn retry_delay(&self, channel: PhysicalChannel) -> Duration {
        let secs = self
            .lock(channel)
            .map_or(self.config.backoff.initial_delay, |h| h.next_retry_delay);
        Duration::from_secs_f64(secs)
    }
}

/// Connected only if every input is; otherwise the most severe input state.
fn combine(states: &[HealthState]) -> HealthState {
    if states.iter().all(|s| *s == HealthState::Connected) {
        HealthState::Connected
    } else if states.contains(&HealthState::Failed) {
        HealthState::Failed
    } else if states.contains(&HealthState::Reconnecting) {
        HealthState::Reconnecting
    } else {
        HealthState::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DerivedChannel;

    const FORCE: PhysicalChannel = PhysicalChannel::Force;

    fn monitor(max_attempts: u32) -> ConnectionMonitor {
        let config = MonitorConfig {
            backoff: BackoffPolicy {
                max_attempts,
                ..BackoffPolicy::default()
            },
            ..MonitorConfig::default()
        };
        ConnectionMonitor::new(
            config,
            &[
                FORCE,
                PhysicalChannel::Disp1,
                PhysicalChannel::Disp2,
                PhysicalChannel::Disp3,
            ],
            0.0,
        )
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = BackoffPolicy::default();
        let expected = [1.0, 1.5, 2.25, 3.375, 5.0625];
        for (i, want) in expected.iter().enumerate() {
            let got = policy.delay_for_attempt(i as u32 + 1);
            assert!((got - want).abs() < 1e-12, "attempt {}: {got}", i + 1);
        }
        for n in 1..=20 {
            let want = (1.0 * 1.5f64.powi(n as i32 - 1)).min(30.0);
            assert!((policy.delay_for_attempt(n) - want).abs() < 1e-9);
        }
        assert_eq!(policy.delay_for_attempt(10), 30.0);
        assert_eq!(policy.next_delay(25.0), 30.0);
    }

    #[test]
    fn test_starts_connected() {
        let m = monitor(10);
        assert_eq!(m.state(FORCE.into()), HealthState::Connected);
        assert!(m.check(4.9).is_empty());
    }

    #[test]
    fn test_silence_disconnects_then_reconnecting() {
        let m = monitor(10);
        m.record_sample(FORCE, 1.0);
        let transitions = m.check_channel(FORCE, 6.5);
        assert!(matches!(
            transitions[0],
            HealthTransition::Disconnected { channel: FORCE, .. }
        ));
        assert_eq!(
            transitions[1],
            HealthTransition::RetryScheduled {
                channel: FORCE,
                attempt: 1,
                delay: 1.0
            }
        );
        assert_eq!(m.state(FORCE.into()), HealthState::Reconnecting);
        assert!(!m.is_connected(FORCE.into()));
    }

    #[test]
    fn test_retry_delays_follow_policy() {
        let m = monitor(0);
        let mut now = 6.0;
        m.check_channel(FORCE, now);
        let mut delays = vec![m.health(FORCE).unwrap().next_retry_delay];
        for _ in 0..12 {
            now = m.health(FORCE).unwrap().next_retry_at.unwrap();
            m.check_channel(FORCE, now);
            delays.push(m.health(FORCE).unwrap().next_retry_delay);
        }
        for (i, delay) in delays.iter().enumerate() {
            let want = (1.5f64.powi(i as i32)).min(30.0);
            assert!((delay - want).abs() < 1e-9, "retry {i}: {delay}");
        }
        assert_eq!(m.health(FORCE).unwrap().consecutive_failed_attempts, 12);
    }

    #[test]
    fn test_retry_not_due_does_nothing() {
        let m = monitor(10);
        m.check_channel(FORCE, 6.0);
        assert!(m.check_channel(FORCE, 6.5).is_empty());
        assert_eq!(m.health(FORCE).unwrap().consecutive_failed_attempts, 0);
    }

    #[test]
    fn test_sample_resets_backoff() {
        let m = monitor(10);
        m.check_channel(FORCE, 6.0);
        m.check_channel(FORCE, 7.0);
        m.check_channel(FORCE, 8.5);
        assert_eq!(m.health(FORCE).unwrap().consecutive_failed_attempts, 2);

        let t = m.record_sample(FORCE, 9.0);
        assert_eq!(t, Some(HealthTransition::Reconnected { channel: FORCE }));
        let health = m.health(FORCE).unwrap();
        assert_eq!(health.state, HealthState::Connected);
        assert_eq!(health.consecutive_failed_attempts, 0);
        assert_eq!(health.next_retry_delay, 1.0);
        assert!(health.next_retry_at.is_none());
    }

    #[test]
    fn test_exhausted_attempts_fail_terminally() {
        let m = monitor(3);
        m.check_channel(FORCE, 6.0);
        let mut last = Vec::new();
        for _ in 0..3 {
            let at = m.health(FORCE).unwrap().next_retry_at.unwrap();
            last = m.check_channel(FORCE, at);
        }
        assert_eq!(
            last,
            vec![HealthTransition::Failed {
                channel: FORCE,
                attempts: 3
            }]
        );
        assert_eq!(m.state(FORCE.into()), HealthState::Failed);

        // Terminal: samples and checks leave it failed
        assert!(m.record_sample(FORCE, 100.0).is_none());
        assert!(m.check(200.0).iter().all(|t| !matches!(t, HealthTransition::Reconnected { channel: FORCE })));
        assert_eq!(m.state(FORCE.into()), HealthState::Failed);

        m.reset(FORCE, 300.0);
        assert_eq!(m.state(FORCE.into()), HealthState::Connected);
        assert_eq!(m.health(FORCE).unwrap().last_sample_time, 300.0);
    }

    #[test]
    fn test_derived_health_is_and_of_dependencies() {
        let m = monitor(10);
        let arc = Channel::Derived(DerivedChannel::Arc);
        for c in [PhysicalChannel::Disp1, PhysicalChannel::Disp2, PhysicalChannel::Disp3] {
            m.record_sample(c, 10.0);
        }
        assert!(m.is_connected(arc));

        // Only DISP_2 goes silent
        m.record_sample(PhysicalChannel::Disp1, 15.0);
        m.record_sample(PhysicalChannel::Disp3, 15.0);
        m.check(15.5);
        assert!(!m.is_connected(arc));
        assert_eq!(m.state(arc), HealthState::Reconnecting);

        m.record_sample(PhysicalChannel::Disp2, 16.0);
        assert!(m.is_connected(arc));
    }

    #[test]
    fn test_untracked_and_bypass() {
        let m = ConnectionMonitor::new(MonitorConfig::default(), &[FORCE], 0.0);
        assert_eq!(
            m.state(PhysicalChannel::Disp4.into()),
            HealthState::Disconnected
        );
        assert!(m.record_sample(PhysicalChannel::Disp4, 1.0).is_none());

        let b = ConnectionMonitor::bypass(&[FORCE, PhysicalChannel::Disp1]);
        assert!(b.is_bypass());
        assert!(b.check(1e9).is_empty());
        assert!(b.is_connected(FORCE.into()));
        assert!(!b.is_connected(Channel::Derived(DerivedChannel::Arc)));
        assert!(!b.is_connected(PhysicalChannel::Disp5.into()));
    }

    #[test]
    fn test_detached_channel_waits_for_sample() {
        let m = monitor(2);
        m.detach(PhysicalChannel::Disp2, 0.0);
        let arc = Channel::Derived(DerivedChannel::Arc);
        assert_eq!(m.state(PhysicalChannel::Disp2.into()), HealthState::Disconnected);
        assert_eq!(m.state(arc), HealthState::Disconnected);

        // No retry cycle however long it stays silent
        for now in [1.0, 10.0, 100.0, 1000.0] {
            assert!(m.check_channel(PhysicalChannel::Disp2, now).is_empty());
        }
        let health = m.health(PhysicalChannel::Disp2).unwrap();
        assert_eq!(health.state, HealthState::Disconnected);
        assert_eq!(health.consecutive_failed_attempts, 0);
        assert!(health.next_retry_at.is_none());

        assert_eq!(
            m.record_sample(PhysicalChannel::Disp2, 1001.0),
            Some(HealthTransition::Reconnected { channel: PhysicalChannel::Disp2 })
        );
        assert!(m.is_connected(PhysicalChannel::Disp2.into()));
    }

    #[test]
    fn test_concurrent_sample_and_check_stay_consistent() {
        use std::sync::Arc;
        use std::thread;

        let m = Arc::new(monitor(3));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let sampler = {
            let m = m.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut t = 0.0;
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    t += 0.5;
                    m.record_sample(FORCE, t);
                }
            })
        };
        let checker = {
            let m = m.clone();
            thread::spawn(move || {
                for i in 0..20_000 {
                    // Far enough ahead that every check sees silence or a due retry
                    m.check_channel(FORCE, 1e6 + f64::from(i) * 100.0);
                    let h = m.health(FORCE).unwrap();
                    assert!(
                        !(h.state == HealthState::Failed && h.consecutive_failed_attempts == 0),
                        "failed with no attempts: {h:?}"
                    );
                    assert!(
                        !(h.state == HealthState::Connected && h.next_retry_at.is_some()),
                        "connected with a pending retry: {h:?}"
                    );
                    if h.state == HealthState::Failed {
                        m.reset(FORCE, 0.0);
                    }
                }
            })
        };
        checker.join().unwrap();
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        sampler.join().unwrap();
    }

    #[test]
    fn test_combine_prefers_most_severe() {
        use HealthState::*;
        assert_eq!(combine(&[Connected, Connected]), Connected);
        assert_eq!(combine(&[Connected, Disconnected]), Disconnected);
        assert_eq!(combine(&[Reconnecting, Disconnected]), Reconnecting);
        assert_eq!(combine(&[Reconnecting, Failed]), Failed);
    }
}
