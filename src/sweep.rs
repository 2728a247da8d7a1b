//! Room sweep: search-and-deliver procedure.
//!
//! Per room visit the chassis advances in small increments while the
//! sensor arm sweeps across the room width looking for the delivery
//! marker. The marker latch and the emergency latch are polled at the
//! same fine granularity inside the sweep window, so the search is
//! interruptible within one poll interval, not only between attempts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SweepConfig;
use crate::error::{Result, VaahakError};
use crate::hardware::{AudioOutput, SharedMotor, ToneSpec};
use crate::motion::{drive_to_position, DrivePair, HeadingController};
use crate::state::{EmergencyLatch, SharedSensed};

/// Outcome of one room visit's search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepOutcome {
    /// Marker found at the given arm encoder angle (degrees from center).
    Found { drop_angle: f64 },
    /// All attempts exhausted without a hit.
    NotFound,
}

/// Per-visit delivery guard. A room visit drops at most one package; the
/// flag resets only when the next visit constructs a fresh value.
#[derive(Debug, Default)]
pub struct RoomVisit {
    pub already_dropped: bool,
}

impl RoomVisit {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct RoomSweepProcedure {
    drive: Arc<DrivePair>,
    heading: Arc<HeadingController>,
    arm: SharedMotor,
    feeder: SharedMotor,
    audio: Arc<Mutex<Box<dyn AudioOutput>>>,
    sensed: Arc<SharedSensed>,
    latch: Arc<EmergencyLatch>,
    cfg: SweepConfig,
}

impl RoomSweepProcedure {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        drive: Arc<DrivePair>,
        heading: Arc<HeadingController>,
        arm: SharedMotor,
        feeder: SharedMotor,
        audio: Arc<Mutex<Box<dyn AudioOutput>>>,
        sensed: Arc<SharedSensed>,
        latch: Arc<EmergencyLatch>,
        cfg: SweepConfig,
    ) -> Self {
        Self {
            drive,
            heading,
            arm,
            feeder,
            audio,
            sensed,
            latch,
            cfg,
        }
    }

    /// Run the bounded search for this room visit.
    pub fn run(&self, visit: &mut RoomVisit) -> Result<SweepOutcome> {
        // Stale hits from an earlier phase carry no meaning here.
        self.sensed.signals().marker_found.clear();

        for attempt in 1..=self.cfg.max_attempts {
            if self.latch.is_set() {
                return Err(VaahakError::EmergencyLatched);
            }

            tracing::debug!(attempt, "sweep attempt");
            self.advance()?;

            if let Some(drop_angle) = self.sweep_once()? {
                tracing::info!(drop_angle, attempt, "delivery marker found");
                if visit.already_dropped {
                    tracing::warn!("marker found again after delivery, skipping drop");
                    return Ok(SweepOutcome::Found { drop_angle });
                }
                self.deliver_at(drop_angle)?;
                visit.already_dropped = true;
                return Ok(SweepOutcome::Found { drop_angle });
            }
        }

        tracing::info!(
            attempts = self.cfg.max_attempts,
            "no marker found, giving up on this room"
        );
        Ok(SweepOutcome::NotFound)
    }

    /// Advance the chassis one bounded increment, polling the emergency
    /// latch at sweep granularity.
    fn advance(&self) -> Result<()> {
        self.drive.forward(self.cfg.advance_power)?;
        let result = self.poll_window(self.cfg.advance_ms, |_| Ok(false)).map(|_| ());
        self.drive.halt()?;
        result
    }

    /// One arm sweep across the room width. Returns the arm encoder angle
    /// at the moment of a marker hit, or `None` when the window closes.
    fn sweep_once(&self) -> Result<Option<f64>> {
        {
            let mut arm = self.arm.lock();
            arm.reset_encoder()?;
            arm.set_speed_limit(self.cfg.sweep_rate_dps)?;
            arm.set_target_position(-self.cfg.sweep_range_deg)?;
        }

        let signals = self.sensed.signals();
        let hit = self.poll_window(self.cfg.hit_window_ms, |slf| {
            if signals.marker_found.take() {
                let mut arm = slf.arm.lock();
                arm.set_power(0.0)?;
                return Ok(true);
            }
            Ok(false)
        });

        let drop_angle = match hit {
            Ok(true) => Some(self.arm.lock().position()?),
            Ok(false) => None,
            Err(e) => {
                // Emergency: freeze the arm where it is.
                let _ = self.arm.lock().set_power(0.0);
                return Err(e);
            }
        };

        // Return the arm to center regardless of hit or miss.
        drive_to_position(
            &self.arm,
            0.0,
            &self.latch,
            Duration::from_millis(self.cfg.hit_poll_ms.max(1)),
        )?;

        Ok(drop_angle)
    }

    /// Rotate the chassis toward the marker, release one package, rotate
    /// back onto the original heading.
    fn deliver_at(&self, drop_angle: f64) -> Result<()> {
        self.heading.turn_to_relative_angle(drop_angle)?;

        {
            let mut feeder = self.feeder.lock();
            feeder.reset_encoder()?;
            feeder.set_speed_limit(self.cfg.feeder_rate_dps)?;
        }
        // The revolution takes seconds at the limited rate; settle it
        // without holding the feeder lock, so the supervisor can preempt.
        drive_to_position(
            &self.feeder,
            self.cfg.feeder_revolution_deg,
            &self.latch,
            Duration::from_millis(self.cfg.hit_poll_ms.max(1)),
        )?;
        self.audio.lock().play(ToneSpec::delivery())?;
        tracing::info!("package delivered");

        self.heading.turn_to_relative_angle(-drop_angle)?;
        Ok(())
    }

    /// Poll `check` every `hit_poll_ms` until it reports a hit, the
    /// emergency latch rises, or `window_ms` elapses. Timing out is a
    /// defined outcome, not an error.
    fn poll_window<F>(&self, window_ms: u64, mut check: F) -> Result<bool>
    where
        F: FnMut(&Self) -> Result<bool>,
    {
        let poll = Duration::from_millis(self.cfg.hit_poll_ms.max(1));
        let ticks = (window_ms / self.cfg.hit_poll_ms.max(1)).max(1);

        for _ in 0..ticks {
            if self.latch.is_set() {
                return Err(VaahakError::EmergencyLatched);
            }
            if check(self)? {
                return Ok(true);
            }
            std::thread::sleep(poll);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadingConfig;
    use crate::hardware::mock::{AudioProbe, DriveSim, MockAudio, MockMotor, MotorProbe};
    use crate::hardware::shared_motor;

    struct Rig {
        sweep: RoomSweepProcedure,
        sensed: Arc<SharedSensed>,
        latch: Arc<EmergencyLatch>,
        arm_probe: MotorProbe,
        feeder_probe: MotorProbe,
        audio_probe: AudioProbe,
        sim: DriveSim,
    }

    fn rig(cfg: SweepConfig) -> Rig {
        let sim = DriveSim::new(3.0);
        let sensed = Arc::new(SharedSensed::new(Duration::from_secs(3600)));
        let latch = Arc::new(EmergencyLatch::new());
        let drive = Arc::new(DrivePair::new(
            Box::new(sim.left_motor()),
            Box::new(sim.right_motor()),
        ));
        let heading = Arc::new(HeadingController::new(
            Arc::clone(&drive),
            Arc::clone(&sensed),
            Arc::clone(&latch),
            HeadingConfig {
                turn_poll_ms: 2,
                ..HeadingConfig::default()
            },
        ));

        let arm = MockMotor::new();
        let arm_probe = arm.probe();
        let feeder = MockMotor::new();
        let feeder_probe = feeder.probe();
        let audio = MockAudio::new();
        let audio_probe = audio.probe();

        let sweep = RoomSweepProcedure::new(
            drive,
            heading,
            shared_motor(arm),
            shared_motor(feeder),
            Arc::new(Mutex::new(Box::new(audio) as Box<dyn AudioOutput>)),
            Arc::clone(&sensed),
            Arc::clone(&latch),
            cfg,
        );

        Rig {
            sweep,
            sensed,
            latch,
            arm_probe,
            feeder_probe,
            audio_probe,
            sim,
        }
    }

    fn fast_cfg() -> SweepConfig {
        SweepConfig {
            max_attempts: 3,
            advance_ms: 20,
            hit_window_ms: 200,
            hit_poll_ms: 5,
            ..SweepConfig::default()
        }
    }

    #[test]
    fn marker_hit_reports_the_arm_angle_and_delivers() {
        let r = rig(fast_cfg());
        // The heading stream is not running in this rig; publish once so
        // the chassis rotation has a fresh value, and keep it fresh from
        // a helper thread mirroring the sim.
        let sensed = Arc::clone(&r.sensed);
        let sim = r.sim.clone();
        let feeding = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let feeding_flag = Arc::clone(&feeding);
        let publisher = std::thread::spawn(move || {
            while feeding_flag.load(std::sync::atomic::Ordering::Acquire) {
                sensed.publish_heading(sim.heading());
                std::thread::sleep(Duration::from_millis(2));
            }
        });

        // Place the arm mid-sweep and fire the marker latch shortly after
        // the sweep starts.
        let arm_probe = r.arm_probe.clone();
        let signals_sensed = Arc::clone(&r.sensed);
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            arm_probe.set_position(-72.0);
            signals_sensed.signals().marker_found.set();
        });

        let mut visit = RoomVisit::new();
        let outcome = r.sweep.run(&mut visit).unwrap();
        trigger.join().unwrap();
        feeding.store(false, std::sync::atomic::Ordering::Release);
        publisher.join().unwrap();

        match outcome {
            SweepOutcome::Found { drop_angle } => {
                assert!((drop_angle - (-72.0)).abs() < 1e-9);
            }
            SweepOutcome::NotFound => panic!("marker should have been found"),
        }
        assert!(visit.already_dropped);
        // Feeder ran one full revolution and the delivery tone played.
        assert_eq!(r.feeder_probe.position(), 359.0);
        assert_eq!(r.audio_probe.played(), vec![ToneSpec::delivery()]);
        // Arm re-homed after the hit.
        assert_eq!(r.arm_probe.position(), 0.0);
        // Marker latch consumed.
        assert!(!r.sensed.signals().marker_found.is_set());
    }

    #[test]
    fn no_marker_returns_not_found_after_exactly_max_attempts() {
        let cfg = SweepConfig {
            max_attempts: 2,
            advance_ms: 10,
            hit_window_ms: 50,
            hit_poll_ms: 5,
            ..SweepConfig::default()
        };
        let r = rig(cfg);

        let mut visit = RoomVisit::new();
        let outcome = r.sweep.run(&mut visit).unwrap();
        assert_eq!(outcome, SweepOutcome::NotFound);
        assert!(!visit.already_dropped);

        // One encoder reset per sweep attempt.
        assert_eq!(r.arm_probe.encoder_resets(), 2);
        // Nothing was dispensed.
        assert_eq!(r.feeder_probe.position(), 0.0);
        assert!(r.audio_probe.played().is_empty());
    }

    #[test]
    fn second_marker_hit_in_a_visit_does_not_drop_again() {
        let r = rig(fast_cfg());
        let mut visit = RoomVisit {
            already_dropped: true,
        };

        r.sensed.signals().marker_found.set();
        // The pre-set latch is cleared on entry; fire it again mid-sweep.
        let signals_sensed = Arc::clone(&r.sensed);
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            signals_sensed.signals().marker_found.set();
        });

        let outcome = r.sweep.run(&mut visit).unwrap();
        trigger.join().unwrap();

        assert!(matches!(outcome, SweepOutcome::Found { .. }));
        // Guarded: no second feeder revolution, no tone.
        assert_eq!(r.feeder_probe.position(), 0.0);
        assert!(r.audio_probe.played().is_empty());
    }

    #[test]
    fn emergency_latch_interrupts_the_sweep_window() {
        let cfg = SweepConfig {
            max_attempts: 1,
            advance_ms: 10,
            hit_window_ms: 10_000,
            hit_poll_ms: 5,
            ..SweepConfig::default()
        };
        let r = rig(cfg);

        let latch = Arc::clone(&r.latch);
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(40));
            latch.set();
        });

        let started = std::time::Instant::now();
        let mut visit = RoomVisit::new();
        let result = r.sweep.run(&mut visit);
        trigger.join().unwrap();

        assert!(matches!(result, Err(VaahakError::EmergencyLatched)));
        // Interrupted within the window, not after it.
        assert!(started.elapsed() < Duration::from_millis(1000));
    }
}
