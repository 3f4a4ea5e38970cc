//! Probing passes and conflict resolution.

use super::{
    AssignmentTable, DetectionConflict, DetectionReport, PortAssignment, PortProber,
    ProbeSettings,
};
use crate::channel::PhysicalChannel;
use crate::error::AppResult;
use crate::hardware::frame::FrameDecoder;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A channel to look for.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    /// Channel sought.
    pub channel: PhysicalChannel,
    /// Baud the sensor is configured for.
    pub baud: u32,
    /// Decoder the channel's lines must satisfy.
    pub decoder: FrameDecoder,
}

impl ProbeTarget {
    /// Target with the channel's own frame family.
    #[must_use]
    pub fn new(channel: PhysicalChannel, baud: u32, sender_id: Option<String>) -> Self {
        Self {
            channel,
            baud,
            decoder: FrameDecoder::for_channel(channel, sender_id),
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    assignment: PortAssignment,
    target_order: usize,
    port_order: usize,
}

/// Finds which port each channel is plugged into.
#[derive(Debug)]
pub struct PortScout<P> {
    prober: P,
    settings: ProbeSettings,
}

impl<P: PortProber> PortScout<P> {
    /// Scout using `prober` for I/O.
    pub fn new(prober: P, settings: ProbeSettings) -> Self {
        Self { prober, settings }
    }

    /// Probe tuning in effect.
    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Detect `targets` on every available port not listed in `reserved`.
    ///
    /// Targets are given in declaration order, which breaks confidence ties.
    /// Failing to enumerate ports is an error; failing to read one port only
    /// means nothing matched there.
    pub fn detect(
        &self,
        targets: &[ProbeTarget],
        reserved: &[String],
    ) -> AppResult<DetectionReport> {
        let ports: Vec<String> = self
            .prober
            .available_ports()?
            .into_iter()
            .filter(|p| !reserved.contains(p))
            .collect();
        info!(
            ports = ports.len(),
            targets = targets.len(),
            "Starting sensor detection"
        );

        let cache = RefCell::new(HashMap::new());

        let mut candidates = Vec::new();
        for (target_order, target) in targets.iter().enumerate() {
            for (port_order, port) in ports.iter().enumerate() {
                if let Some(c) =
                    self.candidate(&cache, target, target_order, port, port_order, target.baud)
                {
                    candidates.push(c);
                }
            }
        }

        let (first_pass, _) = resolve(candidates.clone());
        let claimed: HashSet<&str> = first_pass.values().map(|a| a.port.as_str()).collect();

        for (target_order, target) in targets.iter().enumerate() {
            if first_pass.contains_key(&target.channel) {
                continue;
            }
            for (port_order, port) in ports.iter().enumerate() {
                if claimed.contains(port.as_str()) {
                    continue;
                }
                for &baud in &self.settings.fallback_bauds {
                    if baud == target.baud {
                        continue;
                    }
                    if let Some(c) =
                        self.candidate(&cache, target, target_order, port, port_order, baud)
                    {
                        candidates.push(c);
                        break;
                    }
                }
            }
        }

        let (assignments, conflicts) = resolve(candidates);

        for a in assignments.values() {
            if a.off_expected_baud {
                warn!(
                    channel = %a.channel,
                    port = %a.port,
                    baud = a.baud,
                    "Sensor detected at an unexpected baud rate"
                );
            } else {
                info!(
                    channel = %a.channel,
                    port = %a.port,
                    baud = a.baud,
                    confidence = a.confidence,
                    "Sensor detected"
                );
            }
        }
        for conflict in &conflicts {
            warn!(error = %conflict.to_error(), "Detection conflict resolved");
        }
        let report = DetectionReport {
            assignments,
            conflicts,
        };
        let wanted: Vec<PhysicalChannel> = targets.iter().map(|t| t.channel).collect();
        let missing = report.missing(&wanted);
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|c| c.name()).collect();
            warn!(missing = %names.join(", "), "Configured sensors not detected");
        }
        Ok(report)
    }

    /// Lines at `(port, baud)`, read at most once per detection run.
    fn lines(
        &self,
        cache: &RefCell<HashMap<(String, u32), Vec<String>>>,
        port: &str,
        baud: u32,
    ) -> Vec<String> {
        let key = (port.to_string(), baud);
        if let Some(lines) = cache.borrow().get(&key) {
            return lines.clone();
        }
        let lines = match self.prober.read_lines(port, baud, &self.settings) {
            Ok(lines) => lines,
            Err(e) => {
                debug!(port, baud, error = %e, "Probe failed");
                Vec::new()
            }
        };
        cache.borrow_mut().insert(key, lines.clone());
        lines
    }

    fn candidate(
        &self,
        cache: &RefCell<HashMap<(String, u32), Vec<String>>>,
        target: &ProbeTarget,
        target_order: usize,
        port: &str,
        port_order: usize,
        baud: u32,
    ) -> Option<Candidate> {
        let lines = self.lines(cache, port, baud);
        let (matched, confidence) = score(&target.decoder, &lines);
        debug!(
            channel = %target.channel,
            port,
            baud,
            read = lines.len(),
            matched,
            "Probe scored"
        );
        let accepted = matched > 0
            && matched >= self.settings.min_matching_lines
            && confidence >= self.settings.min_confidence;
        accepted.then(|| Candidate {
            assignment: PortAssignment {
                channel: target.channel,
                port: port.to_string(),
                baud,
                confidence,
                off_expected_baud: baud != target.baud,
            },
            target_order,
            port_order,
        })
    }
}

/// Matching lines and their fraction of `lines`.
#[must_use]
pub fn score(decoder: &FrameDecoder, lines: &[String]) -> (usize, f64) {
    if lines.is_empty() {
        return (0, 0.0);
    }
    let matched = lines.iter().filter(|l| decoder.matches(l)).count();
    (matched, matched as f64 / lines.len() as f64)
}

/// Greedy one-to-one assignment, best candidates first.
fn resolve(mut candidates: Vec<Candidate>) -> (AssignmentTable, Vec<DetectionConflict>) {
    candidates.sort_by(|a, b| {
        b.assignment
            .confidence
            .total_cmp(&a.assignment.confidence)
            .then(
                a.assignment
                    .off_expected_baud
                    .cmp(&b.assignment.off_expected_baud),
            )
            .then(a.target_order.cmp(&b.target_order))
            .then(a.port_order.cmp(&b.port_order))
    });

    let mut table = AssignmentTable::new();
    let mut port_owner: HashMap<String, PhysicalChannel> = HashMap::new();
    let mut conflicts = Vec::new();

    for candidate in candidates {
        let assignment = candidate.assignment;
        let blocker = table
            .get(&assignment.channel)
            .map(|kept| kept.channel)
            .or_else(|| port_owner.get(&assignment.port).copied());
        match blocker {
            Some(owner) => {
                if let Some(kept) = table.get(&owner) {
                    conflicts.push(DetectionConflict {
                        kept: kept.clone(),
                        discarded: assignment,
                    });
                }
            }
            None => {
                port_owner.insert(assignment.port.clone(), assignment.channel);
                table.insert(assignment.channel, assignment);
            }
        }
    }
    (table, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RecordedProber;

    const FORCE: &str = "ASC2 20945595 -165341 -1.527986e-01 -4.965955e+01 -0.000000e+00";

    fn motion(sender: &str, value: f64) -> String {
        format!("76 144 262 us SPC_VAL usSenderId={sender} ulMicros=76071216 Val={value:.3}")
    }

    fn targets() -> Vec<ProbeTarget> {
        vec![
            ProbeTarget::new(PhysicalChannel::Force, 115200, None),
            ProbeTarget::new(PhysicalChannel::Disp1, 9600, Some("0x2E01".into())),
            ProbeTarget::new(PhysicalChannel::Disp2, 9600, Some("0x2E02".into())),
        ]
    }

    #[test]
    fn assigns_each_channel_to_its_port() {
        let prober = RecordedProber::new()
            .with_lines("/dev/ttyUSB0", 9600, vec![motion("0x2E02", 1.0); 4])
            .with_lines("/dev/ttyUSB1", 115200, vec![FORCE; 5])
            .with_lines("/dev/ttyUSB2", 9600, vec![motion("0x2E01", 2.0); 4]);
        let scout = PortScout::new(prober, ProbeSettings::default());

        let report = scout.detect(&targets(), &[]).unwrap();
        assert_eq!(report.assignments.len(), 3);
        assert_eq!(report.port_for(PhysicalChannel::Force).unwrap().port, "/dev/ttyUSB1");
        assert_eq!(report.port_for(PhysicalChannel::Disp1).unwrap().port, "/dev/ttyUSB2");
        assert_eq!(report.port_for(PhysicalChannel::Disp2).unwrap().port, "/dev/ttyUSB0");
        assert!(report.conflicts.is_empty());
        assert!(report
            .assignments
            .values()
            .all(|a| a.confidence == 1.0 && !a.off_expected_baud));
    }

    #[test]
    fn confidence_is_matched_fraction() {
        let lines = vec![
            FORCE.to_string(),
            "garbage".to_string(),
            FORCE.to_string(),
            "\u{fffd}\u{fffd}".to_string(),
        ];
        let decoder = FrameDecoder::for_channel(PhysicalChannel::Force, None);
        assert_eq!(score(&decoder, &lines), (2, 0.5));
        assert_eq!(score(&decoder, &[]), (0, 0.0));
    }

    #[test]
    fn weak_matches_are_rejected() {
        let mut lines = vec!["noise".to_string(); 9];
        lines.push(FORCE.to_string());
        let prober = RecordedProber::new().with_lines("/dev/ttyUSB0", 115200, lines);
        let scout = PortScout::new(prober, ProbeSettings::default());
        let report = scout.detect(&targets()[..1], &[]).unwrap();
        assert!(report.assignments.is_empty());
    }

    #[test]
    fn unconfigured_sender_takes_best_port_first_declared_wins() {
        // Two motion channels without sender ids both match both ports equally
        let prober = RecordedProber::new()
            .with_lines("/dev/ttyUSB0", 9600, vec![motion("0x2E01", 1.0); 3])
            .with_lines("/dev/ttyUSB1", 9600, vec![motion("0x2E02", 1.0); 3]);
        let scout = PortScout::new(prober, ProbeSettings::default());
        let targets = [
            ProbeTarget::new(PhysicalChannel::Disp1, 9600, None),
            ProbeTarget::new(PhysicalChannel::Disp2, 9600, None),
        ];

        let report = scout.detect(&targets, &[]).unwrap();
        assert_eq!(report.port_for(PhysicalChannel::Disp1).unwrap().port, "/dev/ttyUSB0");
        assert_eq!(report.port_for(PhysicalChannel::Disp2).unwrap().port, "/dev/ttyUSB1");
        assert_eq!(report.conflicts.len(), 2);
        assert!(report
            .conflicts
            .iter()
            .all(|c| matches!(c.to_error(), crate::error::DaqError::DetectionAmbiguous { .. })));
    }

    #[test]
    fn fallback_baud_is_flagged() {
        let prober = RecordedProber::new()
            .with_lines("/dev/ttyUSB0", 38400, vec![FORCE; 4])
            .with_lines("/dev/ttyUSB1", 9600, vec![motion("0x2E01", 0.5); 4]);
        let scout = PortScout::new(prober, ProbeSettings::default());

        let report = scout.detect(&targets(), &[]).unwrap();
        let force = report.port_for(PhysicalChannel::Force).unwrap();
        assert_eq!(force.port, "/dev/ttyUSB0");
        assert_eq!(force.baud, 38400);
        assert!(force.off_expected_baud);
        assert!(!report.port_for(PhysicalChannel::Disp1).unwrap().off_expected_baud);
        assert_eq!(report.missing(&[PhysicalChannel::Disp2]), vec![PhysicalChannel::Disp2]);
    }

    #[test]
    fn unreadable_and_reserved_ports_never_match() {
        let prober = RecordedProber::new()
            .with_unreadable("/dev/ttyUSB0")
            .with_lines("/dev/ttyUSB1", 115200, vec![FORCE; 4]);
        let scout = PortScout::new(prober, ProbeSettings::default());

        let report = scout
            .detect(&targets(), &["/dev/ttyUSB1".to_string()])
            .unwrap();
        assert!(report.assignments.is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let build = || {
            RecordedProber::new()
                .with_lines("/dev/ttyUSB0", 9600, vec![motion("0x2E01", 1.0); 4])
                .with_lines("/dev/ttyUSB1", 115200, vec![FORCE; 4])
        };
        let a = PortScout::new(build(), ProbeSettings::default())
            .detect(&targets(), &[])
            .unwrap();
        let b = PortScout::new(build(), ProbeSettings::default())
            .detect(&targets(), &[])
            .unwrap();
        assert_eq!(a, b);
    }
}
