//! Acquisition facade.
//!
//! [`Acquisition`] owns every component (raw feed, sample store, connection
//! monitor, calibration loop) and exposes the query, calibration, health and
//! detection operations. [`Acquisition::start`] spawns the link tasks, the
//! calibration task and the health task; the returned
//! [`AcquisitionHandle`] stops and joins them.
//!
//! ```no_run
//! use sensor_daq::{Acquisition, Channel, DaqConfig, PhysicalChannel};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut config = DaqConfig::default();
//! config.hardware.simulate = true;
//! let acq = Acquisition::new(config)?;
//! let handle = acq.start(&Default::default());
//!
//! tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//! let force = Channel::Physical(PhysicalChannel::Force);
//! println!("{:?}", acq.get_latest(force)?);
//! println!("{} points", acq.get_window(force, 30)?.len());
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::calibration::CalibrationLoop;
use crate::channel::{Channel, PhysicalChannel, Sample};
use crate::clock::now_secs;
use crate::config::DaqConfig;
use crate::data::{BufferStats, SampleStore, WindowIndex};
use crate::detection::{
    AssignmentTable, DetectionReport, PortAssignment, PortProber, PortScout, ProbeTarget,
};
use crate::error::{AppResult, DaqError};
use crate::hardware::feed::{RawFeed, RawPublisher};
use crate::hardware::monitor::{ConnectionMonitor, HealthState, SensorHealth};
use crate::hardware::simulated::SimulatedLink;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// The acquisition system.
#[derive(Debug)]
pub struct Acquisition {
    config: DaqConfig,
    channels: Vec<PhysicalChannel>,
    feed: Arc<RawFeed>,
    store: Arc<SampleStore>,
    monitor: Arc<ConnectionMonitor>,
    calibration: Arc<CalibrationLoop>,
}

impl Acquisition {
    /// Validate `config` and build every component. Spawns nothing.
    pub fn new(config: DaqConfig) -> AppResult<Self> {
        config.validate()?;
        let channels = config.enabled_channels();
        let capacity = config.ring_capacity();

        let index = Arc::new(WindowIndex::new(
            capacity,
            config.acquisition.sample_rate_hz,
            &config.acquisition.window_durations_secs,
            config.output_points(),
        ));
        let store = Arc::new(SampleStore::new(capacity, index));
        let feed = Arc::new(RawFeed::new());
        let monitor = Arc::new(if config.hardware.simulate {
            ConnectionMonitor::bypass(&channels)
        } else {
            ConnectionMonitor::new(config.monitor_config(), &channels, now_secs())
        });
        let calibration = Arc::new(CalibrationLoop::new(
            feed.clone(),
            store.clone(),
            monitor.clone(),
            &channels,
            config.tick_interval(),
        ));

        info!(
            channels = ?channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            sample_rate_hz = config.acquisition.sample_rate_hz,
            capacity,
            simulate = config.hardware.simulate,
            "Acquisition configured"
        );

        Ok(Self {
            config,
            channels,
            feed,
            store,
            monitor,
            calibration,
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &DaqConfig {
        &self.config
    }

    /// Enabled physical channels.
    #[must_use]
    pub fn channels(&self) -> &[PhysicalChannel] {
        &self.channels
    }

    /// Calibration loop, for driving ticks manually.
    #[must_use]
    pub fn calibration(&self) -> &Arc<CalibrationLoop> {
        &self.calibration
    }

    /// Connection monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    /// Raw sample feed links publish into.
    #[must_use]
    pub fn feed(&self) -> &Arc<RawFeed> {
        &self.feed
    }

    // --- Queries ---

    /// Newest calibrated sample, or `NotConnected` if the channel is not
    /// connected or has produced nothing yet.
    pub fn get_latest(&self, channel: Channel) -> AppResult<Sample> {
        if !self.monitor.is_connected(channel) {
            return Err(DaqError::NotConnected(channel));
        }
        self.store
            .latest(channel)
            .ok_or(DaqError::NotConnected(channel))
    }

    /// Uniformly spaced samples covering the last `duration` seconds.
    pub fn get_window(&self, channel: Channel, duration: u32) -> AppResult<Vec<Sample>> {
        self.store.window(channel, duration)
    }

    /// Every retained sample, oldest first.
    #[must_use]
    pub fn get_all(&self, channel: Channel) -> Vec<Sample> {
        self.store.all(channel)
    }

    /// Newest raw (uncalibrated) reading.
    #[must_use]
    pub fn get_raw_latest(&self, channel: PhysicalChannel) -> Option<Sample> {
        self.calibration.raw_latest(channel)
    }

    /// Buffer occupancy.
    #[must_use]
    pub fn stats(&self, channel: Channel) -> BufferStats {
        self.store.stats(channel)
    }

    /// Supported window durations, ascending.
    #[must_use]
    pub fn window_durations(&self) -> Vec<u32> {
        self.store.window_index().durations().collect()
    }

    // --- Calibration ---

    /// Zero a channel at its current raw reading.
    pub fn zero(&self, channel: Channel) -> AppResult<()> {
        self.calibration.zero(channel)
    }

    /// Zero offset of a physical channel.
    #[must_use]
    pub fn offset(&self, channel: PhysicalChannel) -> f64 {
        self.calibration.offset(channel)
    }

    // --- Health ---

    /// Whether the channel is connected.
    #[must_use]
    pub fn is_connected(&self, channel: Channel) -> bool {
        self.monitor.is_connected(channel)
    }

    /// Health state of a channel.
    #[must_use]
    pub fn get_state(&self, channel: Channel) -> HealthState {
        self.monitor.state(channel)
    }

    /// Health record of a physical channel.
    #[must_use]
    pub fn health(&self, channel: PhysicalChannel) -> Option<SensorHealth> {
        self.monitor.health(channel)
    }

    /// Reset a channel (or every dependency of a derived channel) to connected.
    pub fn reset(&self, channel: Channel) {
        let now = now_secs();
        for source in channel.physical_sources() {
            self.monitor.reset(source, now);
        }
    }

    // --- Detection ---

    /// Enabled channels that need detection (no fixed port configured).
    #[must_use]
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.channels
            .iter()
            .map(|c| (*c, self.config.sensor(*c)))
            .filter(|(_, s)| s.port.is_none())
            .map(|(c, s)| ProbeTarget::new(c, s.baud, s.sender_id))
            .collect()
    }

    /// Assignments fixed by configuration.
    #[must_use]
    pub fn fixed_assignments(&self) -> AssignmentTable {
        self.channels
            .iter()
            .filter_map(|c| {
                let sensor = self.config.sensor(*c);
                sensor.port.map(|port| {
                    (
                        *c,
                        PortAssignment {
                            channel: *c,
                            port,
                            baud: sensor.baud,
                            confidence: 1.0,
                            off_expected_baud: false,
                        },
                    )
                })
            })
            .collect()
    }

    /// Run detection with a given prober (blocking), merged with fixed ports.
    pub fn detect_with<P: PortProber>(&self, prober: P) -> AppResult<DetectionReport> {
        let fixed = self.fixed_assignments();
        let reserved: Vec<String> = fixed.values().map(|a| a.port.clone()).collect();
        let scout = PortScout::new(prober, self.config.probe_settings());
        let mut report = scout.detect(&self.probe_targets(), &reserved)?;
        report.assignments.extend(fixed);
        Ok(report)
    }

    /// Detect sensors on the system's serial ports.
    #[cfg(feature = "instrument_serial")]
    pub async fn detect(&self) -> AppResult<DetectionReport> {
        use crate::detection::SerialProber;

        let fixed = self.fixed_assignments();
        let reserved: Vec<String> = fixed.values().map(|a| a.port.clone()).collect();
        let targets = self.probe_targets();
        let settings = self.config.probe_settings();

        let mut report = tokio::task::spawn_blocking(move || {
            PortScout::new(SerialProber, settings).detect(&targets, &reserved)
        })
        .await
        .map_err(|e| DaqError::Io(std::io::Error::other(e)))??;
        report.assignments.extend(fixed);
        Ok(report)
    }

    /// Detect sensors on the system's serial ports.
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn detect(&self) -> AppResult<DetectionReport> {
        Err(DaqError::FeatureNotEnabled("instrument_serial".into()))
    }

    // --- Lifecycle ---

    /// Spawn link, calibration and health tasks.
    ///
    /// In simulation every enabled channel gets an emulated link and
    /// `assignments` is ignored. Otherwise each enabled channel gets a serial
    /// link on its assigned (or configured) port; channels without a port
    /// stay disconnected.
    pub fn start(&self, assignments: &AssignmentTable) -> AcquisitionHandle {
        let (shutdown, signal) = watch::channel(false);
        let mut tasks = Vec::new();
        let now = now_secs();

        if self.config.hardware.simulate {
            for channel in &self.channels {
                let link = SimulatedLink::new(
                    RawPublisher::new(*channel, self.feed.clone()),
                    self.config.acquisition.sample_rate_hz,
                    now,
                );
                tasks.push(tokio::spawn(link.run(signal.clone())));
            }
        } else {
            let fixed = self.fixed_assignments();
            for channel in &self.channels {
                match fixed.get(channel).or_else(|| assignments.get(channel)) {
                    Some(assignment) => {
                        // Silence is measured from start, not from construction
                        self.monitor.reset(*channel, now);
                        if let Some(task) = self.spawn_serial_link(assignment, signal.clone()) {
                            tasks.push(task);
                        }
                    }
                    None => {
                        self.monitor.detach(*channel, now);
                        warn!(channel = %channel, "No port for sensor, it will stay disconnected");
                    }
                }
            }
            tasks.push(tokio::spawn(health_task(
                self.monitor.clone(),
                Duration::from_millis(self.config.health.check_interval_ms),
                signal.clone(),
            )));
        }

        tasks.push(tokio::spawn(self.calibration.clone().run(signal)));
        info!(tasks = tasks.len(), "Acquisition started");
        AcquisitionHandle { shutdown, tasks }
    }

    #[cfg(feature = "instrument_serial")]
    fn spawn_serial_link(
        &self,
        assignment: &PortAssignment,
        signal: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        use crate::hardware::frame::FrameDecoder;
        use crate::hardware::serial_link::SerialLink;

        let sensor = self.config.sensor(assignment.channel);
        let link = SerialLink::new(
            assignment.port.clone(),
            assignment.baud,
            FrameDecoder::for_channel(assignment.channel, sensor.sender_id),
            RawPublisher::new(assignment.channel, self.feed.clone()),
            self.monitor.clone(),
        )
        .with_timeout(Duration::from_millis(self.config.hardware.read_timeout_ms));
        Some(tokio::spawn(link.run(signal)))
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn spawn_serial_link(
        &self,
        assignment: &PortAssignment,
        _signal: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        error!(
            channel = %assignment.channel,
            error = %DaqError::FeatureNotEnabled("instrument_serial".into()),
            "Cannot open serial link"
        );
        None
    }
}

/// Periodic silence checks and backoff advance.
async fn health_task(
    monitor: Arc<ConnectionMonitor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                monitor.check(now_secs());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Running acquisition tasks.
#[derive(Debug)]
pub struct AcquisitionHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Number of spawned tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Receiver that flips to `true` when shutdown is requested.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        info!("Stopping acquisition");
        self.shutdown.send_replace(true);
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Acquisition task failed");
            }
        }
        info!("Acquisition stopped");
    }
}
