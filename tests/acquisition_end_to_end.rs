//! End-to-end acquisition tests driven through the public facade.
//!
//! Raw readings are published into the feed with synthetic timestamps and the
//! calibration loop is ticked by hand, so window contents are exact.

use sensor_daq::{Acquisition, Channel, DaqConfig, DaqError, DerivedChannel, PhysicalChannel, Sample};

const T0: f64 = 1_700_000_000.0;

fn create_test_config() -> DaqConfig {
    let toml_str = r#"
        [application]
        name = "Bench Test"
        log_level = "info"

        [acquisition]
        sample_rate_hz = 10.0
        retention_secs = 600
        window_durations_secs = [30, 60, 120, 300, 600]

        [hardware]
        simulate = true
    "#;
    toml::from_str(toml_str).expect("Failed to parse test config")
}

/// Feed `seconds` of 10 Hz readings on every enabled channel.
fn feed_ramp(acq: &Acquisition, seconds: usize) {
    for i in 0..seconds * 10 {
        let t = T0 + i as f64 * 0.1;
        for (k, channel) in acq.channels().iter().enumerate() {
            acq.feed()
                .publish(*channel, Sample::new(t, i as f64 + k as f64));
        }
        acq.calibration().tick();
    }
}

#[test]
fn thirty_five_seconds_at_ten_hz() {
    let acq = Acquisition::new(create_test_config()).expect("valid config");
    feed_ramp(&acq, 35);
    let force = Channel::Physical(PhysicalChannel::Force);

    let window = acq.get_window(force, 30).unwrap();
    assert_eq!(window.len(), 300);
    for pair in window.windows(2) {
        let dt = pair[1].timestamp - pair[0].timestamp;
        assert!((dt - 0.1).abs() < 1e-6, "spacing {dt}");
    }
    assert_eq!(window.last().unwrap().value, 349.0);

    let long = acq.get_window(force, 600).unwrap();
    assert!(long.len() <= 300);
    let span = long.last().unwrap().timestamp - long.first().unwrap().timestamp;
    assert!((span - 34.9).abs() < 1e-6, "span {span}");
    // every point is a real stored sample, oldest first
    let all = acq.get_all(force);
    assert_eq!(all.len(), 350);
    assert!(long.iter().all(|s| all.contains(s)));
    assert!(long.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
}

#[test]
fn short_history_returns_everything() {
    let acq = Acquisition::new(create_test_config()).unwrap();
    feed_ramp(&acq, 5);
    let window = acq
        .get_window(Channel::Physical(PhysicalChannel::Disp1), 60)
        .unwrap();
    assert_eq!(window.len(), 50);
    assert_eq!(window[0].timestamp, T0);
}

#[test]
fn full_window_spacing_matches_duration() {
    let acq = Acquisition::new(create_test_config()).unwrap();
    feed_ramp(&acq, 130);
    let window = acq
        .get_window(Channel::Physical(PhysicalChannel::Force), 120)
        .unwrap();
    assert_eq!(window.len(), 300);
    // 120 s over 300 points: one point every 0.4 s, within one sample period
    for pair in window[..window.len() - 1].windows(2) {
        let dt = pair[1].timestamp - pair[0].timestamp;
        assert!((dt - 0.4).abs() <= 0.1 + 1e-6, "spacing {dt}");
    }
    assert_eq!(window.last().unwrap().value, 1299.0);
}

#[test]
fn unsupported_window_is_rejected() {
    let acq = Acquisition::new(create_test_config()).unwrap();
    let err = acq
        .get_window(Channel::Physical(PhysicalChannel::Force), 90)
        .unwrap_err();
    assert!(matches!(err, DaqError::InvalidWindow(90)));
    assert_eq!(acq.window_durations(), vec![30, 60, 120, 300, 600]);
}

#[test]
fn derived_channel_tracks_dependencies() {
    let acq = Acquisition::new(create_test_config()).unwrap();
    feed_ramp(&acq, 1);
    // channels are FORCE, DISP_1..3 with values i, i+1, i+2, i+3
    let arc = acq
        .get_latest(Channel::Derived(DerivedChannel::Arc))
        .unwrap();
    assert_eq!(arc.value, (9.0 + 1.0) - ((9.0 + 2.0) + (9.0 + 3.0)) / 2.0);
}

#[test]
fn zero_is_idempotent_and_forward_only() {
    let acq = Acquisition::new(create_test_config()).unwrap();
    let disp2 = Channel::Physical(PhysicalChannel::Disp2);
    feed_ramp(&acq, 1);
    let before = acq.get_all(disp2);

    acq.zero(disp2).unwrap();
    let offset = acq.offset(PhysicalChannel::Disp2);
    acq.zero(disp2).unwrap();
    assert_eq!(acq.offset(PhysicalChannel::Disp2), offset);
    assert_eq!(acq.get_all(disp2), before);

    acq.feed()
        .publish(PhysicalChannel::Disp2, Sample::new(T0 + 10.0, offset + 0.25));
    acq.calibration().tick();
    assert_eq!(acq.get_latest(disp2).unwrap().value, 0.25);
}

#[test]
fn zero_without_sample_fails() {
    let acq = Acquisition::new(create_test_config()).unwrap();
    assert!(matches!(
        acq.zero(Channel::Derived(DerivedChannel::Arc)),
        Err(DaqError::NoSample(_))
    ));
}
