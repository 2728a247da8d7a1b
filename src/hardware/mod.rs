//! Hardware abstraction traits
//!
//! The control core talks to motors, sensors, sound, and process control
//! through these traits only. Real drivers wrap the brick I/O; the `mock`
//! module provides scriptable in-memory devices for tests and
//! hardware-free runs. All calls are synchronous and blocking; an I/O
//! fault surfaces as `VaahakError::Hardware` and is fatal for the thread
//! that owns the device.

pub mod mock;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Position/power/velocity motor control with encoder read-back.
pub trait Motor: Send {
    /// Spin continuously at a power level (-100..=100 percent).
    fn set_power(&mut self, percent: f64) -> Result<()>;

    /// Drive to an absolute encoder position (degrees). Returns once the
    /// command is issued; completion is observed by polling `position`
    /// (see `motion::drive_to_position`), never by blocking in here.
    fn set_target_position(&mut self, degrees: f64) -> Result<()>;

    /// Zero the encoder at the current position.
    fn reset_encoder(&mut self) -> Result<()>;

    /// Current encoder position (degrees).
    fn position(&mut self) -> Result<f64>;

    /// Cap the angular rate for subsequent position commands (deg/s).
    fn set_speed_limit(&mut self, dps: f64) -> Result<()>;
}

/// Tri-channel floor color sensor.
pub trait ColorSensor: Send {
    /// Raw RGB triplet; fails with `SensorTimeout` on glare or timeout.
    fn read_rgb(&mut self) -> Result<(f64, f64, f64)>;
}

/// Gyro heading sensor.
pub trait HeadingSensor: Send {
    /// Signed absolute heading since the last reference reset (degrees,
    /// positive = clockwise).
    fn read_absolute_degrees(&mut self) -> Result<f64>;

    /// Re-zero the hardware reference.
    fn reset_reference(&mut self) -> Result<()>;
}

/// Ultrasonic wall-distance sensor.
pub trait DistanceSensor: Send {
    fn read_cm(&mut self) -> Result<f64>;
}

/// Operator emergency button.
pub trait ButtonSensor: Send {
    fn is_pressed(&mut self) -> Result<bool>;
}

/// Tone to play on the speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneSpec {
    pub pitch: &'static str,
    pub duration_s: f64,
    pub volume: u8,
}

impl ToneSpec {
    /// Played after each package drop.
    pub fn delivery() -> Self {
        Self {
            pitch: "C5",
            duration_s: 0.5,
            volume: 100,
        }
    }

    /// Played on arrival at home base.
    pub fn completion() -> Self {
        Self {
            pitch: "G5",
            duration_s: 1.0,
            volume: 100,
        }
    }

    /// Played when the emergency stop engages.
    pub fn alarm() -> Self {
        Self {
            pitch: "A3",
            duration_s: 1.5,
            volume: 100,
        }
    }
}

/// Audio playback; fire-and-forget from the core's perspective.
pub trait AudioOutput: Send {
    fn play(&mut self, tone: ToneSpec) -> Result<()>;
}

/// Process and brick lifecycle control.
pub trait ProcessControl: Send {
    /// Reset the hardware brick, releasing motors and sensors.
    fn hardware_reset(&mut self) -> Result<()>;

    /// Terminate the process with an exit code. Real implementations do
    /// not return; the mock records the code so tests can observe it.
    fn terminate(&mut self, code: i32);
}

/// A motor shared between threads (sensor arm, package feeder). Exclusive
/// use is expressed by holding the lock for the duration of a maneuver's
/// individual commands, never across a blocking wait.
pub type SharedMotor = Arc<Mutex<Box<dyn Motor>>>;

/// Wrap a motor for shared ownership.
pub fn shared_motor<M: Motor + 'static>(motor: M) -> SharedMotor {
    Arc::new(Mutex::new(Box::new(motor)))
}
