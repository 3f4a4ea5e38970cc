//! Configuration loading using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`DaqConfig::default`])
//! 2. A TOML file (`config/sensor_daq.toml` unless another path is given)
//! 3. Environment variables prefixed with `SENSOR_DAQ_`, using `__` between
//!    nesting levels
//!
//! Every value is read once at construction time; nothing here is reloaded at
//! runtime.
//!
//! # Example
//! ```no_run
//! use sensor_daq::config::DaqConfig;
//!
//! // SENSOR_DAQ_HEALTH__SILENCE_TIMEOUT_SECS=8 overrides the file value
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Sampling at {} Hz", config.acquisition.sample_rate_hz);
//! # Ok::<(), sensor_daq::error::DaqError>(())
//! ```

use crate::channel::{PhysicalChannel, SignatureFamily};
use crate::detection::ProbeSettings;
use crate::error::{AppResult, DaqError};
use crate::hardware::monitor::{BackoffPolicy, MonitorConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sensor_daq.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SENSOR_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sampling and buffering
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Silence detection and reconnection backoff
    #[serde(default)]
    pub health: HealthConfig,
    /// Port auto-detection tuning
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Hardware/simulation switch
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Per-sensor settings, keyed by channel name (`FORCE`, `DISP_1`, ...)
    #[serde(default = "default_sensors")]
    pub sensors: BTreeMap<PhysicalChannel, SensorConfig>,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            acquisition: AcquisitionConfig::default(),
            health: HealthConfig::default(),
            detection: DetectionConfig::default(),
            hardware: HardwareConfig::default(),
            sensors: default_sensors(),
        }
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Sampling cadence and buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Calibration loop rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
    /// Seconds of history each channel keeps
    #[serde(default = "default_retention")]
    pub retention_secs: u32,
    /// Supported window durations in seconds
    #[serde(default = "default_windows")]
    pub window_durations_secs: Vec<u32>,
    /// Points per window query (defaults to 30 s worth of samples)
    #[serde(default)]
    pub output_points: Option<usize>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            retention_secs: default_retention(),
            window_durations_secs: default_windows(),
            output_points: None,
        }
    }
}

/// Connection health monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds without a sample before a channel counts as disconnected
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_secs: f64,
    /// Period of the health check task in milliseconds
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    /// Reconnection backoff
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            silence_timeout_secs: default_silence_timeout(),
            check_interval_ms: default_check_interval(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: f64,
    /// Growth factor between retries
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on the retry delay in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
    /// Failed attempts before giving up (0 = never give up)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Port auto-detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Upper bound on one probe (open + settle + read) in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Wait after opening a port before reading, in milliseconds
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    /// Lines sampled per probe
    #[serde(default = "default_lines_per_probe")]
    pub lines_per_probe: usize,
    /// Matching lines required for a detection
    #[serde(default = "default_min_matching_lines")]
    pub min_matching_lines: usize,
    /// Fraction of sampled lines that must match
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Alternate baud rates tried for channels not found at their expected rate
    #[serde(default = "default_fallback_bauds")]
    pub fallback_bauds: Vec<u32>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            settle_ms: default_settle(),
            lines_per_probe: default_lines_per_probe(),
            min_matching_lines: default_min_matching_lines(),
            min_confidence: default_min_confidence(),
            fallback_bauds: default_fallback_bauds(),
        }
    }
}

/// Hardware access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Run on simulated sensors instead of serial ports
    #[serde(default)]
    pub simulate: bool,
    /// Per-read timeout of live serial links in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            read_timeout_ms: default_read_timeout(),
        }
    }
}

/// Settings for one physical sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Expected baud rate
    pub baud: u32,
    /// Whether the sensor is acquired at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sender id a displacement sensor stamps on its frames (e.g. `0x2E01`)
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Fixed port; skips auto-detection for this sensor
    #[serde(default)]
    pub port: Option<String>,
    /// Human readable label
    #[serde(default)]
    pub display_name: String,
}

impl SensorConfig {
    /// Factory settings for a channel.
    #[must_use]
    pub fn for_channel(channel: PhysicalChannel) -> Self {
        Self {
            baud: channel.default_baud(),
            enabled: !matches!(channel, PhysicalChannel::Disp4 | PhysicalChannel::Disp5),
            sender_id: None,
            port: None,
            display_name: channel.name().to_string(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "sensor_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> f64 {
    10.0
}

fn default_retention() -> u32 {
    600
}

fn default_windows() -> Vec<u32> {
    vec![30, 60, 120, 300, 600]
}

fn default_silence_timeout() -> f64 {
    5.0
}

fn default_check_interval() -> u64 {
    500
}

fn default_initial_delay() -> f64 {
    1.0
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_delay() -> f64 {
    30.0
}

fn default_max_attempts() -> u32 {
    10
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_settle() -> u64 {
    1000
}

fn default_lines_per_probe() -> usize {
    10
}

fn default_min_matching_lines() -> usize {
    2
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_fallback_bauds() -> Vec<u32> {
    vec![9600, 19200, 38400, 57600, 115_200]
}

fn default_read_timeout() -> u64 {
    100
}

fn default_enabled() -> bool {
    true
}

fn default_sensors() -> BTreeMap<PhysicalChannel, SensorConfig> {
    PhysicalChannel::ALL
        .into_iter()
        .map(|channel| (channel, SensorConfig::for_channel(channel)))
        .collect()
}

/// Lowercase an environment key path, except the channel name under
/// `sensors`, which must match the serialized `FORCE`/`DISP_n` keys.
fn env_key_path(key: &str) -> String {
    let mut segments: Vec<String> = key.split('.').map(str::to_ascii_lowercase).collect();
    if segments.len() > 1 && segments[0] == "sensors" {
        segments[1] = segments[1].to_ascii_uppercase();
    }
    segments.join(".")
}

impl DaqConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The layered provider stack, exposed for callers that merge their own overrides.
    #[must_use]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DaqConfig::default()))
        .merge(Toml::file(path))
        .merge(
            Env::prefixed(ENV_PREFIX)
                .split("__")
                .map(|key| env_key_path(key.as_str()).into())
                .lowercase(false),
        )
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let acq = &self.acquisition;
        if !(acq.sample_rate_hz > 0.0 && acq.sample_rate_hz <= 1000.0) {
            return invalid(format!(
                "Invalid sample_rate_hz {}. Must be in (0, 1000]",
                acq.sample_rate_hz
            ));
        }
        if acq.retention_secs == 0 {
            return invalid("retention_secs must be positive".into());
        }
        if acq.window_durations_secs.is_empty() || acq.window_durations_secs.contains(&0) {
            return invalid("window_durations_secs must be non-empty and positive".into());
        }
        if self.output_points() == 0 {
            return invalid("output_points must be positive".into());
        }

        let health = &self.health;
        if health.silence_timeout_secs <= 0.0 {
            return invalid("silence_timeout_secs must be positive".into());
        }
        if health.check_interval_ms == 0 {
            return invalid("check_interval_ms must be positive".into());
        }
        let backoff = &health.backoff;
        if backoff.initial_delay_secs <= 0.0 || backoff.multiplier < 1.0 {
            return invalid(format!(
                "Invalid backoff: initial_delay_secs {} must be positive and multiplier {} at least 1",
                backoff.initial_delay_secs, backoff.multiplier
            ));
        }
        if backoff.max_delay_secs < backoff.initial_delay_secs {
            return invalid("max_delay_secs must not be below initial_delay_secs".into());
        }

        let det = &self.detection;
        if det.min_matching_lines == 0 || det.lines_per_probe < det.min_matching_lines {
            return invalid(format!(
                "lines_per_probe ({}) must be at least min_matching_lines ({}) and both positive",
                det.lines_per_probe, det.min_matching_lines
            ));
        }
        if !(det.min_confidence > 0.0 && det.min_confidence <= 1.0) {
            return invalid(format!(
                "Invalid min_confidence {}. Must be in (0, 1]",
                det.min_confidence
            ));
        }

        // Fixed ports and sender ids must be unique among enabled sensors
        let mut ports = HashSet::new();
        let mut sender_ids = HashSet::new();
        for (channel, sensor) in self.sensors.iter().filter(|(_, s)| s.enabled) {
            if sensor.baud == 0 {
                return invalid(format!("Sensor {channel} has a zero baud rate"));
            }
            if let Some(port) = &sensor.port {
                if !ports.insert(port) {
                    return invalid(format!("Port {port} assigned to more than one sensor"));
                }
            }
            if channel.family() == SignatureFamily::Motion {
                if let Some(id) = &sensor.sender_id {
                    if !sender_ids.insert(id) {
                        return invalid(format!("Duplicate sender_id {id}"));
                    }
                }
            }
        }

        Ok(())
    }

    /// Settings for a channel, falling back to factory settings when absent.
    #[must_use]
    pub fn sensor(&self, channel: PhysicalChannel) -> SensorConfig {
        self.sensors
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| SensorConfig::for_channel(channel))
    }

    /// Whether a channel is acquired.
    #[must_use]
    pub fn is_enabled(&self, channel: PhysicalChannel) -> bool {
        self.sensors.get(&channel).is_some_and(|s| s.enabled)
    }

    /// Enabled physical channels in declaration order.
    #[must_use]
    pub fn enabled_channels(&self) -> Vec<PhysicalChannel> {
        PhysicalChannel::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    /// Points returned by a window query.
    #[must_use]
    pub fn output_points(&self) -> usize {
        self.acquisition
            .output_points
            .unwrap_or_else(|| (self.acquisition.sample_rate_hz * 30.0) as usize)
    }

    /// Ring capacity: enough for the retention period, rounded up to a power of two.
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        let needed =
            (self.acquisition.sample_rate_hz * f64::from(self.acquisition.retention_secs)).ceil();
        (needed as usize).max(1).next_power_of_two()
    }

    /// Calibration loop period.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.acquisition.sample_rate_hz)
    }

    /// Health monitor parameters.
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        let b = &self.health.backoff;
        MonitorConfig {
            silence_timeout: self.health.silence_timeout_secs,
            backoff: BackoffPolicy {
                initial_delay: b.initial_delay_secs,
                multiplier: b.multiplier,
                max_delay: b.max_delay_secs,
                max_attempts: b.max_attempts,
            },
        }
    }

    /// Port probe parameters.
    #[must_use]
    pub fn probe_settings(&self) -> ProbeSettings {
        let det = &self.detection;
        ProbeSettings {
            timeout: Duration::from_millis(det.probe_timeout_ms),
            settle: Duration::from_millis(det.settle_ms),
            max_lines: det.lines_per_probe,
            min_matching_lines: det.min_matching_lines,
            min_confidence: det.min_confidence,
            fallback_bauds: det.fallback_bauds.clone(),
        }
    }
}
