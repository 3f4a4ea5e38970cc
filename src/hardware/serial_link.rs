//! Live serial link for one sensor.
//!
//! A blocking reader thread owns the open port and forwards complete lines
//! over a channel. The async side decodes them and publishes raw samples.
//! When the reader dies (unplugged adapter, I/O error) the link waits for the
//! channel's current backoff delay from the [`ConnectionMonitor`] and reopens
//! the port, so link retries and health transitions follow one schedule.
//!
//! A port can also stay open and simply go quiet. The link polls the monitor
//! while reading and treats every retry the monitor schedules as a reopen, so
//! each counted attempt is a real one.

use crate::channel::{PhysicalChannel, Sample};
use crate::clock::now_secs;
use crate::hardware::feed::RawPublisher;
use crate::hardware::frame::FrameDecoder;
use crate::hardware::monitor::{ConnectionMonitor, HealthState, SensorHealth};
use anyhow::{Context, Result};
use serialport::SerialPort;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Lines buffered between the reader thread and the decoder.
const LINE_BUFFER: usize = 256;

/// How often an open link looks at its channel's health.
const HEALTH_POLL: Duration = Duration::from_millis(250);

/// Serial link reading one sensor.
#[derive(Debug, Clone)]
pub struct SerialLink {
    port: String,
    baud: u32,
    read_timeout: Duration,
    decoder: FrameDecoder,
    publisher: RawPublisher,
    monitor: Arc<ConnectionMonitor>,
}

impl SerialLink {
    /// Link for the publisher's channel on `port` at `baud`.
    #[must_use]
    pub fn new(
        port: String,
        baud: u32,
        decoder: FrameDecoder,
        publisher: RawPublisher,
        monitor: Arc<ConnectionMonitor>,
    ) -> Self {
        Self {
            port,
            baud,
            read_timeout: Duration::from_millis(100),
            decoder,
            publisher,
            monitor,
        }
    }

    /// Set the per-read timeout (also bounds how quickly the reader notices shutdown).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn channel(&self) -> PhysicalChannel {
        self.publisher.channel()
    }

    /// Read, decode and publish until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let channel = self.channel();
        info!(channel = %channel, port = %self.port, baud = self.baud, "Serial link started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.open().await {
                Ok(port) => {
                    debug!(channel = %channel, port = %self.port, "Port opened");
                    if self.pump(port, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(channel = %channel, port = %self.port, error = %e, "Cannot open port");
                }
            }

            let delay = self.monitor.retry_delay(channel);
            debug!(channel = %channel, delay = ?delay, "Reopening port after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(channel = %channel, "Serial link stopped");
    }

    async fn open(&self) -> Result<Box<dyn SerialPort>> {
        let port = self.port.clone();
        let baud = self.baud;
        let timeout = self.read_timeout;
        tokio::task::spawn_blocking(move || {
            serialport::new(&port, baud)
                .timeout(timeout)
                .open()
                .with_context(|| format!("Failed to open serial port '{port}' at {baud} baud"))
        })
        .await
        .context("Serial open task panicked")?
    }

    /// Forward lines from an open port. Returns `true` when shutdown was requested.
    ///
    /// Also returns when the reader dies or the monitor schedules a new retry.
    async fn pump<R>(&self, port: R, shutdown: &mut watch::Receiver<bool>) -> bool
    where
        R: Read + Send + 'static,
    {
        let channel = self.channel();
        let opened = self.monitor.health(channel);
        let mut poll = tokio::time::interval(HEALTH_POLL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            let name = self.port.clone();
            tokio::task::spawn_blocking(move || read_lines(port, &tx, &stop, &name))
        };

        let stopped = loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => {
                        if let Some(value) = self.decoder.decode(&line) {
                            self.publisher.publish(Sample::new(now_secs(), value));
                        }
                    }
                    None => break false,
                },
                _ = poll.tick() => {
                    let current = self.monitor.health(channel);
                    if let (Some(opened), Some(current)) = (&opened, &current) {
                        if retry_due(opened, current) {
                            info!(
                                channel = %channel,
                                port = %self.port,
                                attempt = current.consecutive_failed_attempts + 1,
                                "Port silent, reopening"
                            );
                            break false;
                        }
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break true;
                    }
                }
            }
        };

        stop.store(true, Ordering::Relaxed);
        rx.close();
        match reader.await {
            Ok(Err(e)) => warn!(channel = %channel, port = %self.port, error = %e, "Serial read failed"),
            Err(e) => warn!(channel = %channel, error = %e, "Serial reader task panicked"),
            Ok(Ok(())) => {}
        }
        stopped
    }
}

/// Whether the monitor scheduled a retry since the port was opened.
///
/// `opened` is the channel's health when the port was opened. Entering
/// `Reconnecting`, or another attempt being counted there, calls for a reopen.
fn retry_due(opened: &SensorHealth, current: &SensorHealth) -> bool {
    current.state == HealthState::Reconnecting
        && (opened.state != HealthState::Reconnecting
            || current.consecutive_failed_attempts != opened.consecutive_failed_attempts)
}

/// Blocking loop: read lines until `stop` is set, the receiver goes away or I/O fails.
fn read_lines<R: Read>(
    port: R,
    tx: &mpsc::Sender<String>,
    stop: &AtomicBool,
    name: &str,
) -> Result<()> {
    let mut reader = BufReader::new(port);
    let mut buf = Vec::new();
    while !stop.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => anyhow::bail!("Serial port '{name}' closed"),
            Ok(_) if buf.ends_with(b"\n") => {
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                buf.clear();
                if !line.is_empty() && tx.blocking_send(line).is_err() {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Serial read error on '{name}'"));
            }
        }
    }
    Ok(())
}
