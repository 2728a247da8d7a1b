//! Emergency stop supervisor.
//!
//! A dedicated thread polls the operator button and owns the full
//! shutdown sequence. Engagement is one-way: the latch never clears for
//! the lifetime of the process, motor power is cut directly rather than
//! through the navigation thread, and the process exits nonzero after a
//! hardware reset so a watchdog can observe the abnormal stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::SamplingConfig;
use crate::fusion::HubControl;
use crate::hardware::{AudioOutput, ButtonSensor, ProcessControl, SharedMotor, ToneSpec};
use crate::motion::DrivePair;
use crate::state::EmergencyLatch;

pub struct EmergencyStopSupervisor {
    button: Box<dyn ButtonSensor>,
    latch: Arc<EmergencyLatch>,
    drive: Arc<DrivePair>,
    aux_motors: Vec<SharedMotor>,
    audio: Arc<Mutex<Box<dyn AudioOutput>>>,
    hub_control: Arc<HubControl>,
    process: Box<dyn ProcessControl>,
    poll: Duration,
    join_timeout: Duration,
    stop: Arc<AtomicBool>,
}

/// Handle for shutting the supervisor down on a normal exit.
pub struct SupervisorHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn stop_and_join(self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.handle.join();
    }
}

impl EmergencyStopSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        button: Box<dyn ButtonSensor>,
        latch: Arc<EmergencyLatch>,
        drive: Arc<DrivePair>,
        aux_motors: Vec<SharedMotor>,
        audio: Arc<Mutex<Box<dyn AudioOutput>>>,
        hub_control: Arc<HubControl>,
        process: Box<dyn ProcessControl>,
        sampling: &SamplingConfig,
    ) -> Self {
        Self {
            button,
            latch,
            drive,
            aux_motors,
            audio,
            hub_control,
            process,
            poll: Duration::from_millis(sampling.emergency_poll_ms.max(1)),
            join_timeout: Duration::from_millis(sampling.join_timeout_ms),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the supervisor thread.
    pub fn spawn(self) -> SupervisorHandle {
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("estop-supervisor".into())
            .spawn(move || self.run())
            .expect("failed to spawn emergency supervisor");
        SupervisorHandle { stop, handle }
    }

    fn run(mut self) {
        tracing::info!("emergency supervisor started");

        while !self.stop.load(Ordering::Acquire) {
            let pressed = match self.button.is_pressed() {
                Ok(p) => p,
                Err(e) => {
                    // A button we cannot read is a button we must assume
                    // is pressed.
                    tracing::error!(error = %e, "emergency button unreadable");
                    true
                }
            };

            if pressed {
                self.latch.set();
            }

            // Engage on our own button, or on a latch some other thread
            // raised on a fault it could not recover from.
            if self.latch.is_set() {
                self.engage();
                return;
            }

            thread::sleep(self.poll);
        }

        tracing::info!("emergency supervisor stopped");
    }

    /// The full stop sequence. Every step is best-effort: a failing motor
    /// or speaker must not keep the rest of the sequence from running.
    fn engage(&mut self) {
        tracing::error!("emergency stop engaged");

        if let Err(e) = self.drive.halt() {
            tracing::error!(error = %e, "drive halt failed during emergency stop");
        }
        for motor in &self.aux_motors {
            if let Err(e) = motor.lock().set_power(0.0) {
                tracing::error!(error = %e, "auxiliary motor stop failed");
            }
        }

        if let Err(e) = self.audio.lock().play(ToneSpec::alarm()) {
            tracing::error!(error = %e, "alarm tone failed");
        }

        // Wait out every enrolled loop: the samplers and the navigation
        // thread, which observes the latch within one tick.
        self.hub_control.request_stop_all();
        let deadline = Instant::now() + self.join_timeout;
        while self.hub_control.active_loops() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.hub_control.active_loops(),
                    "enrolled loops still running at shutdown deadline"
                );
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        if let Err(e) = self.process.hardware_reset() {
            tracing::error!(error = %e, "hardware reset failed");
        }
        self.process.terminate(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, VaahakError};
    use crate::hardware::mock::{
        MockAudio, MockButtonSensor, MockMotor, MockProcessControl,
    };
    use crate::hardware::shared_motor;

    struct Rig {
        handle: SupervisorHandle,
        button: crate::hardware::mock::ButtonProbe,
        latch: Arc<EmergencyLatch>,
        left: crate::hardware::mock::MotorProbe,
        arm: crate::hardware::mock::MotorProbe,
        audio: crate::hardware::mock::AudioProbe,
        process: crate::hardware::mock::ProcessProbe,
    }

    fn rig_with_button(button: Box<dyn ButtonSensor>) -> Rig {
        let latch = Arc::new(EmergencyLatch::new());
        let left = MockMotor::new();
        let right = MockMotor::new();
        let left_probe = left.probe();
        let drive = Arc::new(DrivePair::new(Box::new(left), Box::new(right)));

        let arm = MockMotor::new();
        let arm_probe = arm.probe();

        let audio = MockAudio::new();
        let audio_probe = audio.probe();
        let process = MockProcessControl::new();
        let process_probe = process.probe();

        let sampling = SamplingConfig {
            emergency_poll_ms: 5,
            join_timeout_ms: 200,
            ..SamplingConfig::default()
        };
        let supervisor = EmergencyStopSupervisor::new(
            button,
            Arc::clone(&latch),
            drive,
            vec![shared_motor(arm)],
            Arc::new(Mutex::new(Box::new(audio))),
            Arc::new(HubControl::new()),
            Box::new(process),
            &sampling,
        );

        Rig {
            handle: supervisor.spawn(),
            button: crate::hardware::mock::ButtonProbe::default(),
            latch,
            left: left_probe,
            arm: arm_probe,
            audio: audio_probe,
            process: process_probe,
        }
    }

    fn rig() -> Rig {
        let sensor = MockButtonSensor::new();
        let probe = sensor.probe();
        let mut r = rig_with_button(Box::new(sensor));
        r.button = probe;
        r
    }

    fn wait_for_exit(process: &crate::hardware::mock::ProcessProbe) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while process.exit_code().is_none() {
            assert!(Instant::now() < deadline, "supervisor never terminated");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn button_press_runs_the_full_stop_sequence() {
        let r = rig();
        r.button.press();
        wait_for_exit(&r.process);

        assert!(r.latch.is_set());
        assert_eq!(r.left.power(), 0.0);
        assert_eq!(r.arm.power(), 0.0);
        assert_eq!(r.audio.played(), vec![ToneSpec::alarm()]);
        assert_eq!(r.process.resets(), 1);
        assert_eq!(r.process.exit_code(), Some(1));
        r.handle.stop_and_join();
    }

    #[test]
    fn externally_raised_latch_engages_without_a_press() {
        let r = rig();
        r.latch.set();
        wait_for_exit(&r.process);
        assert_eq!(r.process.exit_code(), Some(1));
        r.handle.stop_and_join();
    }

    #[test]
    fn unreadable_button_counts_as_pressed() {
        struct BrokenButton;
        impl ButtonSensor for BrokenButton {
            fn is_pressed(&mut self) -> Result<bool> {
                Err(VaahakError::Hardware("button port dead".into()))
            }
        }

        let r = rig_with_button(Box::new(BrokenButton));
        wait_for_exit(&r.process);
        assert!(r.latch.is_set());
        assert_eq!(r.process.exit_code(), Some(1));
        r.handle.stop_and_join();
    }

    #[test]
    fn quiet_button_leaves_everything_running() {
        let r = rig();
        thread::sleep(Duration::from_millis(60));
        assert!(!r.latch.is_set());
        assert_eq!(r.process.exit_code(), None);
        r.handle.stop_and_join();
        // A normal stop never touches the process.
        assert_eq!(r.process.exit_code(), None);
        assert_eq!(r.process.resets(), 0);
    }
}
