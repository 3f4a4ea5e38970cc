//! Line frames emitted by the sensors.
//!
//! Both sensor families stream newline-terminated ASCII records:
//!
//! ```text
//! ASC2 20945595 -165341 -1.527986e-01 -4.965955e+01 -0.000000e+00      (force)
//! 76 144 262 us SPC_VAL usSenderId=0x2E01 ulMicros=76071216 Val=0.000  (motion)
//! ```
//!
//! The same decoders drive live acquisition and port detection, so a port is
//! only assigned to a channel whose link would actually accept its lines.

use crate::channel::{PhysicalChannel, SignatureFamily};
use once_cell::sync::Lazy;
use regex::Regex;

static SENDER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)usSenderId=(\S+)").expect("Invalid sender id regex"));

static MOTION_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)Val=(\S+)").expect("Invalid motion value regex"));

/// Token holding the calibrated load in a force record.
const FORCE_VALUE_TOKEN: usize = 4;

/// Decoded motion record.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionFrame {
    /// Transmitter id, e.g. `0x2E01`.
    pub sender_id: String,
    /// Displacement reading.
    pub value: f64,
}

fn parse_finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Value of a force record: `ASC2` marker, at least five tokens, token 4 numeric.
#[must_use]
pub fn parse_force(line: &str) -> Option<f64> {
    if !line.contains("ASC2") {
        return None;
    }
    line.split_whitespace()
        .nth(FORCE_VALUE_TOKEN)
        .and_then(parse_finite)
}

/// Fields of a motion record: `SPC_VAL` marker, non-empty `usSenderId=` and numeric `Val=`.
#[must_use]
pub fn parse_motion(line: &str) -> Option<MotionFrame> {
    if !line.contains("SPC_VAL") {
        return None;
    }
    let sender_id = SENDER_ID.captures(line)?.get(1)?.as_str();
    let value = parse_finite(MOTION_VALUE.captures(line)?.get(1)?.as_str())?;
    Some(MotionFrame {
        sender_id: sender_id.to_string(),
        value,
    })
}

/// Line decoder for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDecoder {
    family: SignatureFamily,
    sender_id: Option<String>,
}

impl FrameDecoder {
    /// Decoder for `family`, optionally pinned to one motion transmitter.
    #[must_use]
    pub fn new(family: SignatureFamily, sender_id: Option<String>) -> Self {
        Self { family, sender_id }
    }

    /// Decoder for a channel's family.
    #[must_use]
    pub fn for_channel(channel: PhysicalChannel, sender_id: Option<String>) -> Self {
        Self::new(channel.family(), sender_id)
    }

    /// Family this decoder accepts.
    #[must_use]
    pub fn family(&self) -> SignatureFamily {
        self.family
    }

    /// Reading carried by `line`, if it belongs to this channel.
    ///
    /// Sender ids compare case-insensitively (`0x2E01` == `0x2e01`).
    #[must_use]
    pub fn decode(&self, line: &str) -> Option<f64> {
        match self.family {
            SignatureFamily::Force => parse_force(line),
            SignatureFamily::Motion => {
                let frame = parse_motion(line)?;
                match &self.sender_id {
                    Some(expected) if !frame.sender_id.eq_ignore_ascii_case(expected) => None,
                    _ => Some(frame.value),
                }
            }
        }
    }

    /// Whether `line` carries a reading for this channel.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.decode(line).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORCE_LINE: &str = "ASC2 20945595 -165341 -1.527986e-01 -4.965955e+01 -0.000000e+00";
    const MOTION_LINE: &str = "76 144 262 us SPC_VAL usSenderId=0x2E01 ulMicros=76071216 Val=0.000";

    #[test]
    fn test_force_frame() {
        assert_eq!(parse_force(FORCE_LINE), Some(-49.65955));
        assert_eq!(parse_force("ASC2 20945595"), None);
        assert_eq!(parse_force("ASC2 1 2 3 abc"), None);
        assert_eq!(parse_force("XYZ 1 2 3 4"), None);
        assert_eq!(parse_force(MOTION_LINE), None);
    }

    #[test]
    fn test_motion_frame() {
        let frame = parse_motion(MOTION_LINE).unwrap();
        assert_eq!(frame.sender_id, "0x2E01");
        assert_eq!(frame.value, 0.0);

        let frame =
            parse_motion("100 200 300 us SPC_VAL usSenderId=0x2E02 ulMicros=100123456 Val=5.234")
                .unwrap();
        assert_eq!(frame.value, 5.234);

        assert!(parse_motion("SPC_VAL usSenderId=0x2E01").is_none());
        assert!(parse_motion("SPC_VAL usSenderId= Val=1.0").is_none());
        assert!(parse_motion("usSenderId=0x2E01 Val=1.0").is_none());
        assert!(parse_motion(FORCE_LINE).is_none());
    }

    #[test]
    fn test_decoder_sender_filter() {
        let any = FrameDecoder::for_channel(PhysicalChannel::Disp1, None);
        let pinned = FrameDecoder::for_channel(PhysicalChannel::Disp1, Some("0x2e01".into()));
        let other = FrameDecoder::for_channel(PhysicalChannel::Disp2, Some("0x2E02".into()));

        assert!(any.matches(MOTION_LINE));
        assert!(pinned.matches(MOTION_LINE));
        assert!(!other.matches(MOTION_LINE));
        assert!(!any.matches(FORCE_LINE));

        let force = FrameDecoder::for_channel(PhysicalChannel::Force, None);
        assert_eq!(force.family(), SignatureFamily::Force);
        assert!(force.matches(FORCE_LINE));
        assert!(!force.matches(MOTION_LINE));
    }
}
