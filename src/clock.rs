//! Wall-clock timestamps.

use chrono::Utc;

/// Seconds since the Unix epoch, microsecond resolution.
#[must_use]
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(now_secs() > 1_577_836_800.0);
    }
}
