//! Drive-pair resource and closed-loop heading control.
//!
//! The two drive motors are one shared resource behind one lock: both the
//! navigation thread and the emergency supervisor write to it. The lock is
//! held only across individual power commands, never across a blocking
//! wait, so the supervisor's preemption stays within one poll tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::HeadingConfig;
use crate::error::{Result, VaahakError};
use crate::hardware::{Motor, SharedMotor};
use crate::state::{EmergencyLatch, SharedSensed};

/// Encoder slack within which a position command counts as settled.
const POSITION_TOLERANCE_DEG: f64 = 2.0;

/// Drive a shared motor to an absolute encoder position.
///
/// The command is issued under the lock, then completion is polled one
/// short critical section at a time: the lock is free between polls, so
/// the emergency supervisor can take it and cut power mid-travel. A
/// raised latch aborts the wait and zeroes the motor.
pub fn drive_to_position(
    motor: &SharedMotor,
    target_degrees: f64,
    latch: &EmergencyLatch,
    poll: Duration,
) -> Result<()> {
    motor.lock().set_target_position(target_degrees)?;
    loop {
        if latch.is_set() {
            let _ = motor.lock().set_power(0.0);
            return Err(VaahakError::EmergencyLatched);
        }
        let position = motor.lock().position()?;
        if (position - target_degrees).abs() <= POSITION_TOLERANCE_DEG {
            return Ok(());
        }
        std::thread::sleep(poll);
    }
}

struct DriveMotors {
    left: Box<dyn Motor>,
    right: Box<dyn Motor>,
}

/// The drive motor pair as a single mutex-guarded resource.
pub struct DrivePair {
    inner: Mutex<DriveMotors>,
}

impl DrivePair {
    pub fn new(left: Box<dyn Motor>, right: Box<dyn Motor>) -> Self {
        Self {
            inner: Mutex::new(DriveMotors { left, right }),
        }
    }

    /// Set both wheel powers in one critical section.
    pub fn set_power(&self, left: f64, right: f64) -> Result<()> {
        let mut motors = self.inner.lock();
        motors.left.set_power(left)?;
        motors.right.set_power(right)?;
        Ok(())
    }

    /// Drive straight at a single power level.
    pub fn forward(&self, power: f64) -> Result<()> {
        self.set_power(power, power)
    }

    pub fn reverse(&self, power: f64) -> Result<()> {
        self.set_power(-power, -power)
    }

    /// Zero both motors.
    pub fn halt(&self) -> Result<()> {
        self.set_power(0.0, 0.0)
    }
}

/// Closed-loop turn-to-angle and straight-line drift correction over the
/// fused heading.
///
/// Control is bang-bang with a single discrete power step-down inside the
/// final angular margin, not a PID. A landmark turn and a drift
/// correction can never run concurrently: both serialize on the maneuver
/// lock.
pub struct HeadingController {
    drive: Arc<DrivePair>,
    sensed: Arc<SharedSensed>,
    latch: Arc<EmergencyLatch>,
    cfg: HeadingConfig,
    maneuver: Mutex<()>,
}

impl HeadingController {
    pub fn new(
        drive: Arc<DrivePair>,
        sensed: Arc<SharedSensed>,
        latch: Arc<EmergencyLatch>,
        cfg: HeadingConfig,
    ) -> Self {
        Self {
            drive,
            sensed,
            latch,
            cfg,
            maneuver: Mutex::new(()),
        }
    }

    /// Turn in place by a relative angle. Positive is clockwise (right).
    ///
    /// The target is taken relative to the heading at the moment the
    /// maneuver starts, not to the last reference reset, so a correction
    /// from +h back to zero is a turn of −h and not a swing to −h. Polls
    /// the fused heading until it crosses the target, steps the power
    /// down once inside the soft-landing margin, then stops both motors
    /// and resets the heading reference to zero.
    pub fn turn_to_relative_angle(&self, angle_degrees: f64) -> Result<()> {
        let _maneuver = self.maneuver.lock();
        self.turn_impl(angle_degrees)
    }

    fn turn_impl(&self, angle_degrees: f64) -> Result<()> {
        if angle_degrees.abs() < 0.5 {
            return Ok(());
        }

        let sign = angle_degrees.signum();
        let target = self.sensed.heading()? + angle_degrees;
        let full_power = self.cfg.turn_power;
        let poll = Duration::from_millis(self.cfg.turn_poll_ms);

        tracing::debug!(angle = angle_degrees, "turn started");
        self.drive.set_power(sign * full_power, -sign * full_power)?;

        let mut reduced = false;
        loop {
            if self.latch.is_set() {
                let _ = self.drive.halt();
                return Err(VaahakError::EmergencyLatched);
            }

            let heading = match self.sensed.heading() {
                Ok(h) => h,
                Err(e) => {
                    let _ = self.drive.halt();
                    return Err(e);
                }
            };

            let crossed = if sign > 0.0 {
                heading >= target
            } else {
                heading <= target
            };
            if crossed {
                break;
            }

            if !reduced && (target - heading).abs() <= self.cfg.soft_margin_deg {
                let soft = full_power * self.cfg.soft_power_factor;
                self.drive.set_power(sign * soft, -sign * soft)?;
                reduced = true;
            }

            std::thread::sleep(poll);
        }

        self.drive.halt()?;
        self.sensed.reset_heading();
        tracing::debug!(angle = angle_degrees, "turn complete");
        Ok(())
    }

    /// Handle a pending drift-realignment request, if any.
    ///
    /// Taking the sticky signal is the acknowledgment; if the fused
    /// heading is still outside the hysteresis band, translation stops
    /// and the drift is nulled with a counter-turn. Returns whether a
    /// correction ran; the caller resumes straight travel afterwards.
    pub fn correct_drift_if_needed(&self) -> Result<bool> {
        if !self.sensed.signals().needs_realignment.take() {
            return Ok(false);
        }

        let _maneuver = self.maneuver.lock();
        let heading = self.sensed.heading()?;
        if heading.abs() <= self.cfg.drift_threshold_deg {
            // Drifted back inside the band on its own.
            return Ok(false);
        }

        tracing::debug!(drift = heading, "nulling heading drift");
        self.drive.halt()?;
        self.turn_impl(-heading)?;
        Ok(true)
    }
}
