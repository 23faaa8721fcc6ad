use cnclink_communication::{
    CncController, ControllerConfig, DeviceBackend, IoContext, SimulatedDevice, Simulator,
    SimulatorConfig,
};
use cnclink_core::{
    ControllerEvent, ControllerEvents, Firmware, FirmwareInfo, MachineState, MachineStatus,
    Position,
};
use std::time::{Duration, Instant};

fn attach_simulator(
    config: SimulatorConfig,
) -> (CncController, ControllerEvents, IoContext<SimulatedDevice>) {
    let mut device = SimulatedDevice::new(config.clone());
    let banner = device.poll().unwrap();
    assert_eq!(banner.first().map(String::as_str), Some(Simulator::banner(config.firmware)));

    let (mut controller, events) = CncController::new(ControllerConfig::default());
    let info = FirmwareInfo {
        firmware: config.firmware,
        version: "1.1h".to_string(),
        rx_buffer: Some(config.rx_buffer_size),
        ..FirmwareInfo::default()
    };
    let state = if config.start_in_alarm {
        MachineState::Alarm
    } else {
        MachineState::Idle
    };
    let status = MachineStatus {
        state,
        ..MachineStatus::default()
    };
    let io = controller.attach(device, info, Some(status)).unwrap();
    (controller, events, io)
}

fn run_until(
    io: &mut IoContext<SimulatedDevice>,
    limit: Duration,
    mut done: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        assert!(io.tick(Instant::now()), "link dropped");
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Tick until the simulated planner has run dry
fn settle(io: &mut IoContext<SimulatedDevice>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while io.device().simulator().is_some_and(|sim| sim.planner_len() > 0) {
        assert!(Instant::now() < deadline, "planner never drained");
        assert!(io.tick(Instant::now()));
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn square(side: f64, steps: usize) -> Vec<String> {
    let mut program = vec!["G21".to_string(), "G90".to_string(), "G1 F3000".to_string()];
    for i in 1..=steps {
        let t = side * i as f64 / steps as f64;
        program.push(format!("G1 X{:.3} Y0.000", t));
    }
    for i in 1..=steps {
        let t = side * i as f64 / steps as f64;
        program.push(format!("G1 X{:.3} Y{:.3}", side, t));
    }
    program.push("G0 X0 Y0".to_string());
    program
}

#[test]
fn test_stream_to_simulator_without_overflow() {
    let (controller, mut events, mut io) = attach_simulator(SimulatorConfig::default());
    let program = square(4.0, 40);
    let total = program.len();
    controller.start_stream(program).unwrap();

    let finished = run_until(&mut io, Duration::from_secs(20), || !controller.is_streaming());
    assert!(finished, "stream did not finish");
    assert_eq!(controller.buffer_used(), 0);

    let sim = io.device().simulator().unwrap();
    assert_eq!(sim.rx_overflows(), 0);

    let completed = std::iter::from_fn(|| events.try_next()).find_map(|e| match e {
        ControllerEvent::StreamCompleted(progress) => Some(progress),
        _ => None,
    });
    let progress = completed.expect("completion event");
    assert_eq!(progress.acked_lines, total);
    assert_eq!(progress.error_count, 0);

    settle(&mut io);
    let sim = io.device().simulator().unwrap();
    assert_eq!(sim.state(), MachineState::Idle);
    assert_eq!(sim.position(), Position::new(0.0, 0.0, 0.0));
}

#[test]
fn test_simulator_error_blocks_stream() {
    let (controller, _events, mut io) = attach_simulator(SimulatorConfig::default());
    controller
        .start_stream(vec!["G21".into(), "G5 X1".into(), "G0 X1".into()])
        .unwrap();
    let errored = run_until(&mut io, Duration::from_secs(5), || {
        controller.pending_error().is_some()
    });
    assert!(errored);
    let error = controller.pending_error().unwrap();
    assert_eq!(error.failed_line, "G5 X1");
    assert!(controller.is_streaming());

    controller.acknowledge_error();
    assert!(run_until(&mut io, Duration::from_secs(5), || !controller.is_streaming()));
    assert_eq!(controller.progress().map(|p| p.error_count), Some(1));
}

#[test]
fn test_simulator_alarm_requires_unlock() {
    let (controller, _events, mut io) = attach_simulator(SimulatorConfig {
        start_in_alarm: true,
        ..SimulatorConfig::default()
    });
    assert!(controller
        .start_stream(vec!["G0 X1".into()])
        .unwrap_err()
        .is_alarm_lock());

    controller.unlock().unwrap();
    let idle = run_until(&mut io, Duration::from_secs(5), || {
        controller.state() == MachineState::Idle
    });
    assert!(idle);
    controller.start_stream(vec!["G0 X1".into()]).unwrap();
}

#[test]
fn test_simulator_homing_clears_alarm() {
    let (controller, _events, mut io) = attach_simulator(SimulatorConfig {
        start_in_alarm: true,
        ..SimulatorConfig::default()
    });
    controller.home().unwrap();
    let homed = run_until(&mut io, Duration::from_secs(20), || {
        controller.state() == MachineState::Idle && controller.buffer_used() == 0
    });
    assert!(homed);
    assert!(io.device().simulator().unwrap().alarm().is_none());
}

#[test]
fn test_simulator_feed_hold_and_resume() {
    let (controller, _events, mut io) = attach_simulator(SimulatorConfig::default());
    controller
        .start_stream(vec!["G1 X100 F600".into()])
        .unwrap();
    assert!(run_until(&mut io, Duration::from_secs(5), || {
        controller.state() == MachineState::Run
    }));

    controller.feed_hold().unwrap();
    assert!(run_until(&mut io, Duration::from_secs(5), || {
        controller.state() == MachineState::Hold
    }));
    let held_at = io.device().simulator().unwrap().position();
    std::thread::sleep(Duration::from_millis(20));
    io.tick(Instant::now());
    assert_eq!(io.device().simulator().unwrap().position(), held_at);

    controller.cycle_start().unwrap();
    assert!(run_until(&mut io, Duration::from_secs(5), || {
        controller.state() == MachineState::Run
    }));
    controller.abort().unwrap();
    assert!(run_until(&mut io, Duration::from_secs(5), || !controller.is_streaming()));
}

#[test]
fn test_fluidnc_simulator_reports_firmware() {
    let (controller, _events, mut io) = attach_simulator(SimulatorConfig {
        firmware: Firmware::FluidNc,
        ..SimulatorConfig::default()
    });
    controller.query_build_info().unwrap();
    assert!(run_until(&mut io, Duration::from_secs(5), || {
        controller
            .firmware()
            .is_some_and(|f| f.firmware == Firmware::FluidNc && !f.options.is_empty())
    }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_simulator_end_to_end() {
    let (mut controller, mut events) = CncController::new(ControllerConfig::default());
    controller.connect_simulator().await.unwrap();
    assert!(controller.is_connected());
    assert_eq!(controller.firmware().map(|f| f.firmware), Some(Firmware::Grbl));

    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap();
    assert!(matches!(
        first,
        Some(ControllerEvent::ConnectionChanged { connected: true, .. })
    ));

    controller.start_stream(square(2.0, 10)).unwrap();
    let completed = tokio::time::timeout(Duration::from_secs(20), async {
        while let Some(event) = events.next().await {
            if let ControllerEvent::StreamCompleted(progress) = event {
                return Some(progress);
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(completed.map(|p| p.error_count), Some(0));
    assert_eq!(controller.buffer_used(), 0);

    let err = controller.connect_simulator().await.unwrap_err();
    assert!(err.is_controller_error());

    controller.disconnect();
    assert!(!controller.is_connected());
    controller.disconnect();
}
