//! Vaahak bootstrap: wiring, signals, and the run lifecycle.
//!
//! Runs the control core against the simulated hardware rig. Real device
//! drivers plug in behind the same traits without touching anything here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use vaahak::color::ColorClassifier;
use vaahak::config::VaahakConfig;
use vaahak::error::Result;
use vaahak::estop::EmergencyStopSupervisor;
use vaahak::fusion::{HubControl, SensorFusionHub};
use vaahak::hardware::mock::{
    DriveSim, MockAudio, MockButtonSensor, MockColorSensor, MockDistanceSensor, MockMotor,
};
use vaahak::hardware::{shared_motor, ProcessControl};
use vaahak::motion::{DrivePair, HeadingController};
use vaahak::nav::{NavigationPlan, NavigationStateMachine};
use vaahak::state::{EmergencyLatch, SharedSensed};
use vaahak::sweep::RoomSweepProcedure;

/// Process control for a host run: no brick to reset, exit is real.
struct HostProcess;

impl ProcessControl for HostProcess {
    fn hardware_reset(&mut self) -> Result<()> {
        tracing::info!("hardware reset requested (no-op on host)");
        Ok(())
    }

    fn terminate(&mut self, code: i32) {
        std::process::exit(code);
    }
}

fn load_config() -> Result<VaahakConfig> {
    if let Some(arg) = std::env::args().nth(1) {
        return VaahakConfig::load(&PathBuf::from(arg));
    }
    let default_path = Path::new("vaahak.toml");
    if default_path.exists() {
        return VaahakConfig::load(default_path);
    }
    tracing::info!("no config file, using built-in defaults");
    Ok(VaahakConfig::default())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config()?;

    let shared = Arc::new(SharedSensed::new(Duration::from_millis(
        config.sampling.silence_window_ms,
    )));
    let latch = Arc::new(EmergencyLatch::new());
    let hub_control = Arc::new(HubControl::new());

    // SIGINT/SIGTERM raise the emergency latch like a button press.
    let signal_flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&signal_flag))
        .map_err(vaahak::VaahakError::Io)?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&signal_flag))
        .map_err(vaahak::VaahakError::Io)?;

    // Hardware wiring. This build carries only the simulated rig
    // (coupled drive/gyro, scriptable sensors); real drivers implement
    // the same `hardware` traits and replace this block without touching
    // the rest of the bootstrap.
    let sim = DriveSim::new(3.0);
    let drive = Arc::new(DrivePair::new(
        Box::new(sim.left_motor()),
        Box::new(sim.right_motor()),
    ));
    let arm = shared_motor(MockMotor::new());
    let feeder = shared_motor(MockMotor::new());
    let audio: Arc<Mutex<Box<dyn vaahak::hardware::AudioOutput>>> =
        Arc::new(Mutex::new(Box::new(MockAudio::new())));

    let mut hub = SensorFusionHub::new(
        Arc::clone(&shared),
        Arc::clone(&hub_control),
        config.sampling.clone(),
        config.heading.clone(),
        config.distance.clone(),
    );
    hub.start_color(
        Box::new(MockColorSensor::new()),
        ColorClassifier::new(config.colors.reference.clone(), config.colors.normalize),
    );
    hub.start_heading(Box::new(sim.heading_sensor()));
    hub.start_distance(Box::new(MockDistanceSensor::new(
        config.distance.near_setpoint_cm,
    )));

    let heading = Arc::new(HeadingController::new(
        Arc::clone(&drive),
        Arc::clone(&shared),
        Arc::clone(&latch),
        config.heading.clone(),
    ));

    let supervisor = EmergencyStopSupervisor::new(
        Box::new(MockButtonSensor::new()),
        Arc::clone(&latch),
        Arc::clone(&drive),
        vec![Arc::clone(&arm), Arc::clone(&feeder)],
        Arc::clone(&audio),
        Arc::clone(&hub_control),
        Box::new(HostProcess),
        &config.sampling,
    );
    let supervisor_handle = supervisor.spawn();

    let sweep = RoomSweepProcedure::new(
        Arc::clone(&drive),
        Arc::clone(&heading),
        Arc::clone(&arm),
        Arc::clone(&feeder),
        Arc::clone(&audio),
        Arc::clone(&shared),
        Arc::clone(&latch),
        config.sweep.clone(),
    );
    let machine = NavigationStateMachine::new(
        Arc::clone(&shared),
        Arc::clone(&latch),
        Arc::clone(&hub_control),
        Arc::clone(&drive),
        heading,
        sweep,
        Arc::clone(&arm),
        audio,
        NavigationPlan::new(config.plan.landmarks.clone()),
        config.nav.clone(),
        config.drive.clone(),
    );

    let navigator = thread::Builder::new()
        .name("navigator".into())
        .spawn(move || machine.run())
        .map_err(vaahak::VaahakError::Io)?;

    while !navigator.is_finished() {
        if signal_flag.swap(false, Ordering::AcqRel) {
            tracing::warn!("termination signal received, raising emergency latch");
            latch.set();
        }
        thread::sleep(Duration::from_millis(50));
    }

    let report = match navigator.join() {
        Ok(report) => report,
        Err(_) => {
            tracing::error!("navigator thread panicked");
            latch.set();
            supervisor_handle.stop_and_join();
            hub.stop_all();
            std::process::exit(1);
        }
    };

    tracing::info!(
        final_state = ?report.final_state,
        plan_cursor = report.plan_cursor,
        delivered = report.delivery.packages_delivered,
        "navigation finished"
    );

    supervisor_handle.stop_and_join();
    hub.stop_all();

    if report.final_state == vaahak::nav::NavState::Arrived {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
