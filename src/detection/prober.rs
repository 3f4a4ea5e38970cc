//! Port enumeration and passive line capture.

use super::ProbeSettings;
use crate::error::{AppResult, DaqError};
use std::collections::HashMap;

/// Source of ports and of the lines heard on them.
///
/// Probing is blocking; async callers run detection under `spawn_blocking`.
pub trait PortProber: Send + Sync {
    /// Ports present on the system, in enumeration order.
    fn available_ports(&self) -> AppResult<Vec<String>>;

    /// Up to `settings.max_lines` non-empty lines heard on `port` at `baud`.
    ///
    /// Returning fewer lines (or none) is normal for a silent or mismatched
    /// port. `Err` means the port could not be opened or the read timed out.
    fn read_lines(&self, port: &str, baud: u32, settings: &ProbeSettings)
        -> AppResult<Vec<String>>;
}

/// Prober replaying captured traffic.
///
/// Lines are keyed by `(port, baud)`; a port listed without lines for a baud
/// yields nothing at that baud.
#[derive(Debug, Clone, Default)]
pub struct RecordedProber {
    ports: Vec<String>,
    lines: HashMap<(String, u32), Vec<String>>,
    unreadable: Vec<String>,
}

impl RecordedProber {
    /// Empty recording.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a port that produces `lines` at `baud`.
    #[must_use]
    pub fn with_lines<I, S>(mut self, port: &str, baud: u32, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_port(port);
        self.lines.insert(
            (port.to_string(), baud),
            lines.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Add a port that fails to open.
    #[must_use]
    pub fn with_unreadable(mut self, port: &str) -> Self {
        self.add_port(port);
        self.unreadable.push(port.to_string());
        self
    }

    fn add_port(&mut self, port: &str) {
        if !self.ports.iter().any(|p| p == port) {
            self.ports.push(port.to_string());
        }
    }
}

impl PortProber for RecordedProber {
    fn available_ports(&self) -> AppResult<Vec<String>> {
        Ok(self.ports.clone())
    }

    fn read_lines(
        &self,
        port: &str,
        baud: u32,
        settings: &ProbeSettings,
    ) -> AppResult<Vec<String>> {
        if self.unreadable.iter().any(|p| p == port) {
            return Err(DaqError::LinkTimeout {
                port: port.to_string(),
                timeout: settings.timeout,
            });
        }
        Ok(self
            .lines
            .get(&(port.to_string(), baud))
            .map(|lines| lines.iter().take(settings.max_lines).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(feature = "instrument_serial")]
pub use serial::SerialProber;

#[cfg(feature = "instrument_serial")]
mod serial {
    use super::{PortProber, ProbeSettings};
    use crate::error::{AppResult, DaqError};
    use std::io::{BufRead, BufReader, ErrorKind};
    use std::time::{Duration, Instant};
    use tracing::debug;

    /// Internal read timeout; the overall probe deadline is enforced on top of it.
    const READ_SLICE: Duration = Duration::from_millis(100);

    /// Prober backed by the system's serial ports.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SerialProber;

    impl PortProber for SerialProber {
        fn available_ports(&self) -> AppResult<Vec<String>> {
            Ok(serialport::available_ports()?
                .into_iter()
                .map(|info| info.port_name)
                .collect())
        }

        fn read_lines(
            &self,
            port: &str,
            baud: u32,
            settings: &ProbeSettings,
        ) -> AppResult<Vec<String>> {
            let handle = serialport::new(port, baud).timeout(READ_SLICE).open()?;
            std::thread::sleep(settings.settle);
            // Stale bytes may have been buffered at another baud
            let _ = handle.clear(serialport::ClearBuffer::Input);

            let deadline = Instant::now() + settings.timeout;
            let mut reader = BufReader::new(handle);
            let mut lines = Vec::new();
            let mut buf = Vec::new();

            while lines.len() < settings.max_lines {
                if Instant::now() >= deadline {
                    if lines.is_empty() {
                        return Err(DaqError::LinkTimeout {
                            port: port.to_string(),
                            timeout: settings.timeout,
                        });
                    }
                    break;
                }
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if buf.ends_with(b"\n") {
                            // Undecodable bytes are kept; they simply fail to match
                            let line = String::from_utf8_lossy(&buf).trim().to_string();
                            if !line.is_empty() {
                                lines.push(line);
                            }
                            buf.clear();
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            debug!(port, baud, lines = lines.len(), "Probe finished");
            Ok(lines)
        }
    }
}
