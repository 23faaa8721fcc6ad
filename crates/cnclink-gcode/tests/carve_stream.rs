use cnclink_communication::{
    CncController, ControllerConfig, DeviceBackend, IoContext, SimulatedDevice, SimulatorConfig,
};
use cnclink_core::{FirmwareInfo, MachineState, MachineStatus};
use cnclink_gcode::{resume_program, scan, CarveStreamer, DistanceMode, MultiPassToolpath, ToolpathConfig, ToolpathPoint};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn point() -> impl Strategy<Value = ToolpathPoint> {
    (-50.0f64..50.0, -50.0f64..50.0, -5.0f64..5.0, any::<bool>()).prop_map(|(x, y, z, rapid)| {
        if rapid {
            ToolpathPoint::rapid(x, y, z)
        } else {
            ToolpathPoint::feed(x, y, z)
        }
    })
}

fn toolpath() -> impl Strategy<Value = MultiPassToolpath> {
    (
        prop::collection::vec(point(), 0..40),
        prop::collection::vec(point(), 0..40),
    )
        .prop_map(|(clearing, finishing)| MultiPassToolpath {
            clearing,
            finishing,
        })
}

proptest! {
    #[test]
    fn emitted_lines_match_total(path in toolpath()) {
        let mut streamer = CarveStreamer::new(path, ToolpathConfig::default());
        streamer.start();
        let mut count = 0;
        let mut last_fraction = 0.0;
        while let Some(line) = streamer.next_line() {
            prop_assert!(!line.trim().is_empty());
            let fraction = streamer.progress_fraction();
            prop_assert!(fraction >= last_fraction);
            last_fraction = fraction;
            count += 1;
        }
        prop_assert_eq!(count, streamer.total_lines());
        prop_assert_eq!(streamer.progress_fraction(), 1.0);
    }

    #[test]
    fn feed_word_only_on_change(path in toolpath()) {
        let mut streamer = CarveStreamer::new(path, ToolpathConfig::default());
        streamer.start();
        let mut last_feed: Option<String> = None;
        while let Some(line) = streamer.next_line() {
            if line.starts_with("G0") {
                prop_assert!(!line.contains('F'));
            }
            if let Some(feed) = line.split_whitespace().find(|w| w.starts_with('F')) {
                prop_assert_ne!(Some(feed.to_string()), last_feed.clone());
                last_feed = Some(feed.to_string());
            }
        }
    }
}

#[test]
fn test_consecutive_feeds_carry_one_f_word() {
    let path = MultiPassToolpath {
        clearing: vec![
            ToolpathPoint::feed(1.0, 0.0, 0.0),
            ToolpathPoint::feed(2.0, 0.0, 0.0),
        ],
        finishing: vec![],
    };
    let mut streamer = CarveStreamer::new(path, ToolpathConfig::default());
    streamer.start();
    let lines: Vec<String> = std::iter::from_fn(|| streamer.next_line()).collect();
    assert_eq!(lines[2], "G1 X1.000 Y0.000 Z0.000 F1000");
    assert_eq!(lines[3], "G1 X2.000 Y0.000 Z0.000");
}

#[test]
fn test_resume_after_incremental_switch() {
    let program = [
        "G21",
        "G90",
        "G54",
        "M3 S12000",
        "G0 Z5",
        "G0 X0 Y0",
        "G1 Z-1 F200",
        "G1 X10 F800",
        "G91",
        "G1 X5",
        "G1 Y5",
    ];
    let state = scan(&program, 9);
    assert_eq!(state.distance_mode, DistanceMode::Incremental);

    let preamble = state.preamble();
    assert!((5..=7).contains(&preamble.len()));
    assert_eq!(preamble, vec!["G21", "G54", "G91", "F800", "S12000", "M3", "M9"]);

    let resumed = resume_program(&program, 9);
    assert_eq!(&resumed[preamble.len()..], &["G1 X5", "G1 Y5"]);
}

#[test]
fn test_carve_streams_through_controller() {
    let mut device = SimulatedDevice::new(SimulatorConfig::default());
    device.poll().unwrap();
    let (mut controller, _events) = CncController::new(ControllerConfig::default());
    let idle = MachineStatus {
        state: MachineState::Idle,
        ..MachineStatus::default()
    };
    let mut io = controller
        .attach(device, FirmwareInfo::default(), Some(idle))
        .unwrap();

    let path = MultiPassToolpath {
        clearing: (0..20)
            .map(|i| ToolpathPoint::feed(i as f64 * 0.1, 0.0, 0.0))
            .collect(),
        finishing: vec![ToolpathPoint::rapid(0.0, 0.0, 0.0)],
    };
    let streamer = CarveStreamer::new(
        path,
        ToolpathConfig {
            safe_z: 1.0,
            feed_rate: 3000.0,
            plunge_rate: 300.0,
        },
    )
    .with_realtime(Arc::new(controller.realtime_handle()));
    let total = streamer.total_lines();
    let streamer = Arc::new(Mutex::new(streamer));
    streamer.lock().start();
    controller
        .start_stream_source(Box::new(streamer.clone()))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while controller.is_streaming() {
        assert!(Instant::now() < deadline, "carve did not finish");
        assert!(io.tick(Instant::now()));
        std::thread::sleep(Duration::from_millis(1));
    }
    let progress = controller.progress().unwrap();
    assert_eq!(progress.acked_lines, total);
    assert_eq!(progress.error_count, 0);
    assert_eq!(streamer.lock().progress_fraction(), 1.0);
}

fn attach_simulator() -> (CncController, IoContext<SimulatedDevice>) {
    let mut device = SimulatedDevice::new(SimulatorConfig::default());
    device.poll().unwrap();
    let (mut controller, _events) = CncController::new(ControllerConfig::default());
    let idle = MachineStatus {
        state: MachineState::Idle,
        ..MachineStatus::default()
    };
    let io = controller
        .attach(device, FirmwareInfo::default(), Some(idle))
        .unwrap();
    (controller, io)
}

fn tick_until(
    io: &mut IoContext<SimulatedDevice>,
    what: &str,
    mut done: impl FnMut(&IoContext<SimulatedDevice>) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(io) {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        assert!(io.tick(Instant::now()));
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_carve_control_pauses_and_aborts_through_controller() {
    let (controller, mut io) = attach_simulator();
    let path = MultiPassToolpath {
        clearing: (1..=60)
            .map(|i| ToolpathPoint::feed(i as f64, 0.0, 0.0))
            .collect(),
        finishing: vec![],
    };
    let mut streamer = CarveStreamer::new(
        path,
        ToolpathConfig {
            feed_rate: 600.0,
            ..ToolpathConfig::default()
        },
    )
    .with_realtime(Arc::new(controller.realtime_handle()));
    let total = streamer.total_lines();
    let control = streamer.control();
    streamer.start();
    controller.start_stream_source(Box::new(streamer)).unwrap();

    tick_until(&mut io, "first acks", |_| {
        controller.progress().is_some_and(|p| p.acked_lines >= 3)
    });
    control.pause();
    tick_until(&mut io, "feed hold", |io| {
        io.device()
            .simulator()
            .is_some_and(|sim| sim.state() == MachineState::Hold)
    });
    assert!(controller.is_streaming());

    control.resume();
    tick_until(&mut io, "resume", |io| {
        io.device()
            .simulator()
            .is_some_and(|sim| sim.state() != MachineState::Hold)
    });

    control.abort();
    tick_until(&mut io, "stream end", |_| !controller.is_streaming());
    assert_eq!(controller.buffer_used(), 0);
    assert!(controller.progress().unwrap().acked_lines < total);
}
