//! Port auto-detection against recorded serial traffic.

use sensor_daq::detection::{ProbeSettings, PortScout, ProbeTarget, RecordedProber};
use sensor_daq::{Acquisition, DaqConfig, PhysicalChannel};
use serial_test::serial;
use std::io::Write;

const FORCE: &str = "ASC2 20945595 -165341 -1.527986e-01 -4.965955e+01 -0.000000e+00";

fn motion(sender: &str) -> String {
    format!("100 200 300 us SPC_VAL usSenderId={sender} ulMicros=100123456 Val=5.234")
}

fn bench_recording() -> RecordedProber {
    RecordedProber::new()
        .with_lines("/dev/ttyUSB0", 9600, vec![motion("0x2E03"); 10])
        .with_lines("/dev/ttyUSB1", 9600, vec![motion("0x2E01"); 10])
        .with_lines("/dev/ttyUSB2", 115200, vec![FORCE; 10])
        .with_lines(
            "/dev/ttyUSB3",
            9600,
            // half garbage from a noisy adapter
            [motion("0x2E02"), "\u{fffd}#\u{fffd}".to_string()].iter().cloned().cycle().take(10).collect::<Vec<String>>(),
        )
        .with_unreadable("/dev/ttyS0")
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn detects_bench_from_config_file() {
    let file = write_config(
        r#"
        [sensors.FORCE]
        baud = 115200

        [sensors.DISP_1]
        baud = 9600
        sender_id = "0x2E01"

        [sensors.DISP_2]
        baud = 9600
        sender_id = "0x2E02"

        [sensors.DISP_3]
        baud = 9600
        sender_id = "0x2E03"
        "#,
    );
    let config = DaqConfig::load_from(file.path()).expect("config loads");
    let acq = Acquisition::new(config).expect("valid config");

    let report = acq.detect_with(bench_recording()).unwrap();
    let port = |c| report.port_for(c).map(|a| a.port.as_str());
    assert_eq!(port(PhysicalChannel::Force), Some("/dev/ttyUSB2"));
    assert_eq!(port(PhysicalChannel::Disp1), Some("/dev/ttyUSB1"));
    assert_eq!(port(PhysicalChannel::Disp2), Some("/dev/ttyUSB3"));
    assert_eq!(port(PhysicalChannel::Disp3), Some("/dev/ttyUSB0"));
    assert_eq!(report.port_for(PhysicalChannel::Disp2).unwrap().confidence, 0.5);
    assert!(report.conflicts.is_empty());
    assert!(report.missing(acq.channels()).is_empty());
}

#[test]
#[serial]
fn fixed_port_is_never_probed() {
    let file = write_config(
        r#"
        [sensors.FORCE]
        baud = 115200
        port = "/dev/ttyUSB2"

        [sensors.DISP_1]
        baud = 9600
        enabled = true

        [sensors.DISP_2]
        baud = 9600
        enabled = false

        [sensors.DISP_3]
        baud = 9600
        enabled = false
        "#,
    );
    let acq = Acquisition::new(DaqConfig::load_from(file.path()).unwrap()).unwrap();
    assert_eq!(acq.channels(), &[PhysicalChannel::Force, PhysicalChannel::Disp1]);

    let report = acq.detect_with(bench_recording()).unwrap();
    assert_eq!(report.assignments.len(), 2);
    assert_eq!(report.port_for(PhysicalChannel::Force).unwrap().port, "/dev/ttyUSB2");
    // without a sender id the first motion port in enumeration order wins
    assert_eq!(report.port_for(PhysicalChannel::Disp1).unwrap().port, "/dev/ttyUSB0");
}

#[test]
fn same_recording_same_answer() {
    let targets = [
        ProbeTarget::new(PhysicalChannel::Force, 115200, None),
        ProbeTarget::new(PhysicalChannel::Disp1, 9600, Some("0x2E01".into())),
    ];
    let first = PortScout::new(bench_recording(), ProbeSettings::default())
        .detect(&targets, &[])
        .unwrap();
    for _ in 0..5 {
        let again = PortScout::new(bench_recording(), ProbeSettings::default())
            .detect(&targets, &[])
            .unwrap();
        assert_eq!(again, first);
    }
}

#[test]
fn stricter_threshold_drops_noisy_port() {
    let settings = ProbeSettings {
        min_confidence: 0.8,
        ..ProbeSettings::default()
    };
    let report = PortScout::new(bench_recording(), settings)
        .detect(
            &[ProbeTarget::new(PhysicalChannel::Disp2, 9600, Some("0x2E02".into()))],
            &[],
        )
        .unwrap();
    assert!(report.port_for(PhysicalChannel::Disp2).is_none());
}
