//! Mock devices for testing and hardware-free runs
//!
//! Every mock exposes a cloneable probe handle so tests can script
//! readings and observe commands while the core owns the device. The
//! `DriveSim` couples a pair of simulated wheel motors to a simulated
//! gyro with differential-drive kinematics, so closed-loop turns behave
//! like they do on the real chassis.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{
    AudioOutput, ButtonSensor, ColorSensor, DistanceSensor, HeadingSensor, Motor, ProcessControl,
    ToneSpec,
};
use crate::error::{Result, VaahakError};

// ---------------------------------------------------------------------------
// Motors
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MotorState {
    power: f64,
    target: Option<f64>,
    position: f64,
    speed_limit: f64,
    encoder_resets: u32,
    power_history: Vec<f64>,
}

/// Probe into a mock motor's command log.
#[derive(Clone, Default)]
pub struct MotorProbe(Arc<Mutex<MotorState>>);

impl MotorProbe {
    pub fn power(&self) -> f64 {
        self.0.lock().power
    }

    pub fn position(&self) -> f64 {
        self.0.lock().position
    }

    /// Inject an encoder position, e.g. to place the sweep arm mid-sweep.
    pub fn set_position(&self, degrees: f64) {
        self.0.lock().position = degrees;
    }

    pub fn last_target(&self) -> Option<f64> {
        self.0.lock().target
    }

    pub fn speed_limit(&self) -> f64 {
        self.0.lock().speed_limit
    }

    pub fn encoder_resets(&self) -> u32 {
        self.0.lock().encoder_resets
    }

    pub fn power_history(&self) -> Vec<f64> {
        self.0.lock().power_history.clone()
    }
}

/// Command-recording motor. Position commands complete instantly: the
/// encoder jumps to the target when the command is issued.
pub struct MockMotor {
    probe: MotorProbe,
}

impl MockMotor {
    pub fn new() -> Self {
        Self {
            probe: MotorProbe::default(),
        }
    }

    pub fn probe(&self) -> MotorProbe {
        self.probe.clone()
    }
}

impl Default for MockMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor for MockMotor {
    fn set_power(&mut self, percent: f64) -> Result<()> {
        let mut st = self.probe.0.lock();
        st.power = percent;
        st.power_history.push(percent);
        Ok(())
    }

    fn set_target_position(&mut self, degrees: f64) -> Result<()> {
        let mut st = self.probe.0.lock();
        st.target = Some(degrees);
        st.position = degrees;
        Ok(())
    }

    fn reset_encoder(&mut self) -> Result<()> {
        let mut st = self.probe.0.lock();
        st.position = 0.0;
        st.encoder_resets += 1;
        Ok(())
    }

    fn position(&mut self) -> Result<f64> {
        Ok(self.probe.0.lock().position)
    }

    fn set_speed_limit(&mut self, dps: f64) -> Result<()> {
        self.probe.0.lock().speed_limit = dps;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Differential-drive simulation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SimState {
    heading_deg: f64,
    left_power: f64,
    right_power: f64,
    last_step: Instant,
    /// Heading rate per unit of differential power (deg/s per percent).
    turn_factor: f64,
}

impl SimState {
    fn step(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_step).as_secs_f64();
        self.heading_deg += (self.left_power - self.right_power) * self.turn_factor * dt;
        self.last_step = now;
    }
}

/// Kinematic simulation of the drive pair and gyro: positive differential
/// power (left forward, right backward) rotates the chassis clockwise.
#[derive(Clone)]
pub struct DriveSim {
    state: Arc<Mutex<SimState>>,
}

impl DriveSim {
    /// `turn_factor`: heading rate in deg/s per percent of differential
    /// power. At 3.0, a 30/-30 turn rotates at 180 deg/s.
    pub fn new(turn_factor: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                heading_deg: 0.0,
                left_power: 0.0,
                right_power: 0.0,
                last_step: Instant::now(),
                turn_factor,
            })),
        }
    }

    pub fn left_motor(&self) -> SimMotor {
        SimMotor {
            state: Arc::clone(&self.state),
            left: true,
        }
    }

    pub fn right_motor(&self) -> SimMotor {
        SimMotor {
            state: Arc::clone(&self.state),
            left: false,
        }
    }

    pub fn heading_sensor(&self) -> SimHeadingSensor {
        SimHeadingSensor {
            state: Arc::clone(&self.state),
            dead: false,
        }
    }

    pub fn heading(&self) -> f64 {
        let mut st = self.state.lock();
        st.step();
        st.heading_deg
    }

    pub fn powers(&self) -> (f64, f64) {
        let st = self.state.lock();
        (st.left_power, st.right_power)
    }
}

/// One wheel of the simulated drive pair.
pub struct SimMotor {
    state: Arc<Mutex<SimState>>,
    left: bool,
}

impl Motor for SimMotor {
    fn set_power(&mut self, percent: f64) -> Result<()> {
        let mut st = self.state.lock();
        // Integrate at the old power before the change takes effect.
        st.step();
        if self.left {
            st.left_power = percent;
        } else {
            st.right_power = percent;
        }
        Ok(())
    }

    fn set_target_position(&mut self, _degrees: f64) -> Result<()> {
        Ok(())
    }

    fn reset_encoder(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&mut self) -> Result<f64> {
        Ok(0.0)
    }

    fn set_speed_limit(&mut self, _dps: f64) -> Result<()> {
        Ok(())
    }
}

/// Gyro reading straight out of the drive simulation.
pub struct SimHeadingSensor {
    state: Arc<Mutex<SimState>>,
    dead: bool,
}

impl HeadingSensor for SimHeadingSensor {
    fn read_absolute_degrees(&mut self) -> Result<f64> {
        if self.dead {
            return Err(VaahakError::Hardware("gyro unplugged".into()));
        }
        let mut st = self.state.lock();
        st.step();
        Ok(st.heading_deg)
    }

    fn reset_reference(&mut self) -> Result<()> {
        let mut st = self.state.lock();
        st.step();
        st.heading_deg = 0.0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

enum ColorStep {
    Read((f64, f64, f64)),
    Fail,
}

struct ColorScriptState {
    queue: VecDeque<ColorStep>,
    last: (f64, f64, f64),
}

/// Script handle for a mock color sensor. When the script runs out the
/// sensor keeps returning the last reading.
#[derive(Clone)]
pub struct ColorScript(Arc<Mutex<ColorScriptState>>);

impl ColorScript {
    pub fn push_rgb(&self, rgb: (f64, f64, f64)) {
        self.0.lock().queue.push_back(ColorStep::Read(rgb));
    }

    pub fn push_fail(&self) {
        self.0.lock().queue.push_back(ColorStep::Fail);
    }

    /// Replace whatever the sensor would read next with a steady value.
    pub fn hold(&self, rgb: (f64, f64, f64)) {
        let mut st = self.0.lock();
        st.queue.clear();
        st.last = rgb;
    }
}

pub struct MockColorSensor {
    script: ColorScript,
}

impl MockColorSensor {
    pub fn new() -> Self {
        Self {
            script: ColorScript(Arc::new(Mutex::new(ColorScriptState {
                queue: VecDeque::new(),
                last: (0.0, 0.0, 0.0),
            }))),
        }
    }

    pub fn script(&self) -> ColorScript {
        self.script.clone()
    }
}

impl Default for MockColorSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorSensor for MockColorSensor {
    fn read_rgb(&mut self) -> Result<(f64, f64, f64)> {
        let mut st = self.script.0.lock();
        match st.queue.pop_front() {
            Some(ColorStep::Read(rgb)) => {
                st.last = rgb;
                Ok(rgb)
            }
            Some(ColorStep::Fail) => Err(VaahakError::SensorTimeout),
            None => Ok(st.last),
        }
    }
}

struct DistanceCell {
    cm: f64,
    dead: bool,
}

/// Control handle for a mock distance sensor.
#[derive(Clone)]
pub struct DistanceProbe(Arc<Mutex<DistanceCell>>);

impl DistanceProbe {
    pub fn set_cm(&self, cm: f64) {
        self.0.lock().cm = cm;
    }

    /// Make every subsequent read fail, as if the sensor were unplugged.
    pub fn kill(&self) {
        self.0.lock().dead = true;
    }
}

pub struct MockDistanceSensor {
    probe: DistanceProbe,
}

impl MockDistanceSensor {
    pub fn new(cm: f64) -> Self {
        Self {
            probe: DistanceProbe(Arc::new(Mutex::new(DistanceCell { cm, dead: false }))),
        }
    }

    pub fn probe(&self) -> DistanceProbe {
        self.probe.clone()
    }
}

impl DistanceSensor for MockDistanceSensor {
    fn read_cm(&mut self) -> Result<f64> {
        let cell = self.probe.0.lock();
        if cell.dead {
            return Err(VaahakError::Hardware("ultrasonic sensor unplugged".into()));
        }
        Ok(cell.cm)
    }
}

/// Pressable mock emergency button.
#[derive(Clone, Default)]
pub struct ButtonProbe(Arc<AtomicBool>);

impl ButtonProbe {
    pub fn press(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MockButtonSensor {
    probe: ButtonProbe,
}

impl MockButtonSensor {
    pub fn new() -> Self {
        Self {
            probe: ButtonProbe::default(),
        }
    }

    pub fn probe(&self) -> ButtonProbe {
        self.probe.clone()
    }
}

impl Default for MockButtonSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonSensor for MockButtonSensor {
    fn is_pressed(&mut self) -> Result<bool> {
        Ok(self.probe.0.load(Ordering::Acquire))
    }
}

// ---------------------------------------------------------------------------
// Audio and process control
// ---------------------------------------------------------------------------

/// Probe recording every tone played.
#[derive(Clone, Default)]
pub struct AudioProbe(Arc<Mutex<Vec<ToneSpec>>>);

impl AudioProbe {
    pub fn played(&self) -> Vec<ToneSpec> {
        self.0.lock().clone()
    }
}

pub struct MockAudio {
    probe: AudioProbe,
}

impl MockAudio {
    pub fn new() -> Self {
        Self {
            probe: AudioProbe::default(),
        }
    }

    pub fn probe(&self) -> AudioProbe {
        self.probe.clone()
    }
}

impl Default for MockAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for MockAudio {
    fn play(&mut self, tone: ToneSpec) -> Result<()> {
        self.probe.0.lock().push(tone);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProcessLog {
    resets: u32,
    exit_code: Option<i32>,
}

/// Probe recording reset and termination requests instead of acting on
/// them, so shutdown sequences are testable in-process.
#[derive(Clone, Default)]
pub struct ProcessProbe(Arc<Mutex<ProcessLog>>);

impl ProcessProbe {
    pub fn resets(&self) -> u32 {
        self.0.lock().resets
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.0.lock().exit_code
    }
}

pub struct MockProcessControl {
    probe: ProcessProbe,
}

impl MockProcessControl {
    pub fn new() -> Self {
        Self {
            probe: ProcessProbe::default(),
        }
    }

    pub fn probe(&self) -> ProcessProbe {
        self.probe.clone()
    }
}

impl Default for MockProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for MockProcessControl {
    fn hardware_reset(&mut self) -> Result<()> {
        self.probe.0.lock().resets += 1;
        Ok(())
    }

    fn terminate(&mut self, code: i32) {
        self.probe.0.lock().exit_code = Some(code);
    }
}
