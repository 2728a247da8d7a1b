//! End-to-end runs of the control core against the simulated rig.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use vaahak::color::{default_reference_table, ColorClassifier};
use vaahak::config::{
    DistanceConfig, DriveConfig, HeadingConfig, NavConfig, SamplingConfig, SweepConfig,
};
use vaahak::estop::EmergencyStopSupervisor;
use vaahak::fusion::{HubControl, SensorFusionHub};
use vaahak::hardware::mock::{
    AudioProbe, ColorScript, DriveSim, MockAudio, MockButtonSensor, MockColorSensor, MockMotor,
    MockProcessControl, MotorProbe,
};
use vaahak::hardware::{shared_motor, AudioOutput, SharedMotor, ToneSpec};
use vaahak::motion::{DrivePair, HeadingController};
use vaahak::nav::{Landmark, NavState, NavigationPlan, NavigationStateMachine};
use vaahak::state::{EmergencyLatch, NavContext, SharedSensed};
use vaahak::sweep::RoomSweepProcedure;

struct Stack {
    shared: Arc<SharedSensed>,
    latch: Arc<EmergencyLatch>,
    hub: SensorFusionHub,
    hub_control: Arc<HubControl>,
    sim: DriveSim,
    drive: Arc<DrivePair>,
    arm: SharedMotor,
    feeder: SharedMotor,
    feeder_probe: MotorProbe,
    audio: Arc<Mutex<Box<dyn AudioOutput>>>,
    audio_probe: AudioProbe,
    color: ColorScript,
    machine: Option<NavigationStateMachine>,
}

fn sampling() -> SamplingConfig {
    SamplingConfig {
        color_poll_ms: 10,
        heading_poll_ms: 5,
        distance_poll_ms: 20,
        emergency_poll_ms: 5,
        silence_window_ms: 500,
        join_timeout_ms: 500,
    }
}

fn nav_cfg() -> NavConfig {
    NavConfig {
        delivery_quota: 2,
        nav_poll_ms: 5,
        entrance_advance_ms: 20,
        entrance_window_ms: 400,
        entrance_poll_ms: 5,
        exit_window_ms: 2000,
        exit_poll_ms: 5,
        ..NavConfig::default()
    }
}

fn sweep_cfg() -> SweepConfig {
    SweepConfig {
        max_attempts: 3,
        advance_ms: 20,
        hit_window_ms: 500,
        hit_poll_ms: 5,
        ..SweepConfig::default()
    }
}

fn stack(plan: Vec<Landmark>, with_color: bool) -> Stack {
    let shared = Arc::new(SharedSensed::new(Duration::from_millis(
        sampling().silence_window_ms,
    )));
    let latch = Arc::new(EmergencyLatch::new());
    let hub_control = Arc::new(HubControl::new());

    let sim = DriveSim::new(3.0);
    let drive = Arc::new(DrivePair::new(
        Box::new(sim.left_motor()),
        Box::new(sim.right_motor()),
    ));

    let heading_cfg = HeadingConfig {
        turn_poll_ms: 5,
        ..HeadingConfig::default()
    };
    let mut hub = SensorFusionHub::new(
        Arc::clone(&shared),
        Arc::clone(&hub_control),
        sampling(),
        heading_cfg.clone(),
        DistanceConfig::default(),
    );
    hub.start_heading(Box::new(sim.heading_sensor()));

    let color_sensor = MockColorSensor::new();
    let color = color_sensor.script();
    if with_color {
        hub.start_color(
            Box::new(color_sensor),
            ColorClassifier::new(default_reference_table(), false),
        );
    }

    let heading = Arc::new(HeadingController::new(
        Arc::clone(&drive),
        Arc::clone(&shared),
        Arc::clone(&latch),
        heading_cfg,
    ));

    let arm = shared_motor(MockMotor::new());
    let feeder_motor = MockMotor::new();
    let feeder_probe = feeder_motor.probe();
    let feeder = shared_motor(feeder_motor);
    let mock_audio = MockAudio::new();
    let audio_probe = mock_audio.probe();
    let audio: Arc<Mutex<Box<dyn AudioOutput>>> = Arc::new(Mutex::new(Box::new(mock_audio)));

    let sweep = RoomSweepProcedure::new(
        Arc::clone(&drive),
        Arc::clone(&heading),
        Arc::clone(&arm),
        Arc::clone(&feeder),
        Arc::clone(&audio),
        Arc::clone(&shared),
        Arc::clone(&latch),
        sweep_cfg(),
    );
    let machine = NavigationStateMachine::new(
        Arc::clone(&shared),
        Arc::clone(&latch),
        Arc::clone(&hub_control),
        Arc::clone(&drive),
        heading,
        sweep,
        Arc::clone(&arm),
        Arc::clone(&audio),
        NavigationPlan::new(plan),
        nav_cfg(),
        DriveConfig::default(),
    );

    Stack {
        shared,
        latch,
        hub,
        hub_control,
        sim,
        drive,
        arm,
        feeder,
        feeder_probe,
        audio,
        audio_probe,
        color,
        machine: Some(machine),
    }
}

#[test]
fn single_branch_marker_turns_exactly_once() {
    let mut s = stack(vec![Landmark::Turn], true);
    // Plain hallway floor until the branch strip appears.
    s.color.hold((234.59, 245.94, 296.59));

    let machine = s.machine.take().unwrap();
    let nav = thread::spawn(move || machine.run());

    thread::sleep(Duration::from_millis(100));
    // One black tick: the white-to-black edge fires the branch signal
    // once; afterwards the sensor keeps reading black with no new edge.
    s.color.push_rgb((33.70, 35.45, 21.35));

    let deadline = Instant::now() + Duration::from_secs(3);
    while s.sim.heading() < 85.0 {
        assert!(Instant::now() < deadline, "turn never happened");
        thread::sleep(Duration::from_millis(10));
    }

    // Give it time to (wrongly) start a second turn; heading must hold.
    thread::sleep(Duration::from_millis(300));
    let heading = s.sim.heading();
    assert!(
        (85.0..120.0).contains(&heading),
        "expected a single 90 degree turn, heading = {}",
        heading
    );

    s.latch.set();
    let report = nav.join().unwrap();
    assert_eq!(report.final_state, NavState::EmergencyHalted);
    assert_eq!(report.plan_cursor, 1);
    assert_eq!(s.sim.powers(), (0.0, 0.0));
    s.hub.stop_all();
}

#[test]
fn button_press_stops_everything_and_terminates() {
    let mut s = stack(Vec::new(), false);

    let button = MockButtonSensor::new();
    let button_probe = button.probe();
    let process = MockProcessControl::new();
    let process_probe = process.probe();
    let supervisor = EmergencyStopSupervisor::new(
        Box::new(button),
        Arc::clone(&s.latch),
        Arc::clone(&s.drive),
        vec![Arc::clone(&s.arm), Arc::clone(&s.feeder)],
        Arc::clone(&s.audio),
        Arc::clone(&s.hub_control),
        Box::new(process),
        &sampling(),
    );
    let supervisor_handle = supervisor.spawn();

    let machine = s.machine.take().unwrap();
    let nav = thread::spawn(move || machine.run());

    thread::sleep(Duration::from_millis(150));
    // Heading sampler plus the enrolled navigation thread.
    assert_eq!(s.hub_control.active_loops(), 2);
    button_probe.press();

    let report = nav.join().unwrap();
    assert_eq!(report.final_state, NavState::EmergencyHalted);

    let deadline = Instant::now() + Duration::from_secs(2);
    while process_probe.exit_code().is_none() {
        assert!(Instant::now() < deadline, "shutdown sequence never finished");
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(s.sim.powers(), (0.0, 0.0));
    assert!(s.audio_probe.played().contains(&ToneSpec::alarm()));
    assert_eq!(process_probe.resets(), 1);
    assert_eq!(process_probe.exit_code(), Some(1));
    // Every enrolled loop, navigator included, drained before the reset.
    assert_eq!(s.hub_control.active_loops(), 0);

    supervisor_handle.stop_and_join();
    s.hub.stop_all();
}

#[test]
fn home_branch_is_honored_only_after_the_quota() {
    let mut s = stack(
        vec![
            Landmark::Room,
            Landmark::HomeValid,
            Landmark::Room,
            Landmark::HomeValid,
        ],
        false,
    );

    // Stand-in for the floor colors: fire whichever signal the current
    // navigation phase is waiting on, the way the pattern table would.
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let shared = Arc::clone(&s.shared);
    let choreographer = thread::spawn(move || {
        while !stop_flag.load(Ordering::Acquire) {
            let signals = shared.signals();
            match shared.context() {
                NavContext::Hallway => signals.turn_available.set(),
                NavContext::ValidatingEntrance => signals.valid_entrance.set(),
                NavContext::SweepingRoom => signals.marker_found.set(),
                NavContext::ExitingRoom => signals.room_exit.set(),
                NavContext::HeadingHome => signals.arrived_home.set(),
            }
            thread::sleep(Duration::from_millis(5));
        }
    });

    let machine = s.machine.take().unwrap();
    let report = thread::spawn(move || machine.run()).join().unwrap();
    stop.store(true, Ordering::Release);
    choreographer.join().unwrap();

    assert_eq!(report.final_state, NavState::Arrived);
    assert_eq!(report.delivery.packages_delivered, 2);
    assert!(report.delivery.home_eligible);
    // The first home branch was passed by, so the whole plan was consumed.
    assert_eq!(report.plan_cursor, 4);

    // Two delivery tones, then the completion tone at home.
    assert_eq!(
        s.audio_probe.played(),
        vec![
            ToneSpec::delivery(),
            ToneSpec::delivery(),
            ToneSpec::completion()
        ]
    );
    // The feeder ran a full revolution for the latest drop.
    assert_eq!(s.feeder_probe.position(), 359.0);
    assert_eq!(s.sim.powers(), (0.0, 0.0));
    s.hub.stop_all();
}
