//! Landmark-driven navigation state machine.
//!
//! A single table-driven machine consumes the fused sticky signals and a
//! fixed landmark plan: cruise the hallway with drift correction, branch
//! on each turn marker according to the plan, validate and sweep rooms,
//! deliver, and head home once the quota is met. `EmergencyHalted` is
//! terminal and reachable from every state unconditionally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::{DriveConfig, NavConfig};
use crate::error::{Result, VaahakError};
use crate::fusion::{HubControl, LoopGuard};
use crate::hardware::{AudioOutput, SharedMotor, ToneSpec};
use crate::motion::{drive_to_position, DrivePair, HeadingController};
use crate::state::{EmergencyLatch, NavContext, SharedSensed};
use crate::sweep::{RoomSweepProcedure, RoomVisit, SweepOutcome};

/// Meaning of one physical right-hand branch on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Landmark {
    /// Plain corner: turn and keep cruising.
    Turn,
    /// Branch into a candidate delivery room.
    Room,
    /// The home branch, taken only once the quota is met.
    HomeValid,
    /// A branch that looks like home but is not; never taken.
    HomeInvalid,
}

/// Ordered landmark sequence, consumed strictly in order through a
/// monotonically increasing cursor. Fixed at construction; the cursor
/// resets only on process restart.
#[derive(Debug, Clone)]
pub struct NavigationPlan {
    entries: Vec<Landmark>,
    cursor: usize,
}

impl NavigationPlan {
    pub fn new(entries: Vec<Landmark>) -> Self {
        Self { entries, cursor: 0 }
    }

    /// Consume the next landmark, advancing the cursor.
    pub fn next(&mut self) -> Option<Landmark> {
        let entry = self.entries.get(self.cursor).copied();
        if entry.is_some() {
            self.cursor += 1;
        }
        entry
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Delivery progress, mutated only by the navigation thread.
#[derive(Debug, Default, Clone)]
pub struct DeliveryState {
    pub packages_delivered: u32,
    pub home_eligible: bool,
    /// Transient: whether the current/most recent room visit found the
    /// marker. Cleared at the start of each visit.
    pub sweep_marker_found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Cruising,
    Turning,
    ValidatingEntrance,
    SweepingRoom,
    ExitingRoom,
    HeadingHome,
    Arrived,
    EmergencyHalted,
}

/// Verdict of the entrance-validation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntranceVerdict {
    Valid,
    Invalid,
}

/// Summary of a completed run, for the bootstrap and for tests.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub final_state: NavState,
    pub plan_cursor: usize,
    pub delivery: DeliveryState,
}

pub struct NavigationStateMachine {
    sensed: Arc<SharedSensed>,
    latch: Arc<EmergencyLatch>,
    hub_control: Arc<HubControl>,
    drive: Arc<DrivePair>,
    heading: Arc<HeadingController>,
    sweep: RoomSweepProcedure,
    arm: SharedMotor,
    audio: Arc<Mutex<Box<dyn AudioOutput>>>,
    plan: NavigationPlan,
    delivery: DeliveryState,
    state: NavState,
    nav_cfg: NavConfig,
    drive_cfg: DriveConfig,
}

impl NavigationStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensed: Arc<SharedSensed>,
        latch: Arc<EmergencyLatch>,
        hub_control: Arc<HubControl>,
        drive: Arc<DrivePair>,
        heading: Arc<HeadingController>,
        sweep: RoomSweepProcedure,
        arm: SharedMotor,
        audio: Arc<Mutex<Box<dyn AudioOutput>>>,
        plan: NavigationPlan,
        nav_cfg: NavConfig,
        drive_cfg: DriveConfig,
    ) -> Self {
        Self {
            sensed,
            latch,
            hub_control,
            drive,
            heading,
            sweep,
            arm,
            audio,
            plan,
            delivery: DeliveryState::default(),
            state: NavState::Cruising,
            nav_cfg,
            drive_cfg,
        }
    }

    /// Run the delivery circuit to completion.
    ///
    /// Any fatal error escalates to a full stop: motors halted, the
    /// emergency latch raised, final state `EmergencyHalted`. The robot
    /// never guesses past a dead sensor.
    pub fn run(mut self) -> RunReport {
        // Enroll with the hub so the emergency supervisor's bounded
        // shutdown wait covers this thread alongside the samplers.
        let _enrollment = LoopGuard::enter(&self.hub_control);
        let outcome = self.drive_loop();

        let final_state = match outcome {
            Ok(state) => state,
            Err(VaahakError::EmergencyLatched) => {
                let _ = self.drive.halt();
                NavState::EmergencyHalted
            }
            Err(e) => {
                tracing::error!(error = %e, "navigation fault, forcing full stop");
                self.latch.set();
                let _ = self.drive.halt();
                NavState::EmergencyHalted
            }
        };

        RunReport {
            final_state,
            plan_cursor: self.plan.cursor(),
            delivery: self.delivery.clone(),
        }
    }

    fn drive_loop(&mut self) -> Result<NavState> {
        tracing::info!("navigation started");
        self.sensed.set_context(NavContext::Hallway);
        let poll = Duration::from_millis(self.nav_cfg.nav_poll_ms);

        loop {
            if self.latch.is_set() {
                self.drive.halt()?;
                return Err(VaahakError::EmergencyLatched);
            }

            match self.state {
                NavState::Cruising => self.cruise_tick()?,
                NavState::HeadingHome => self.homing_tick()?,
                NavState::Arrived => return Ok(NavState::Arrived),
                // Transient states are handled synchronously inside the
                // ticks above; seeing one here means resume cruising.
                _ => self.state = NavState::Cruising,
            }

            std::thread::sleep(poll);
        }
    }

    /// One hallway tick: keep moving, fix drift, branch on the plan when
    /// a turn marker latches. Signals are checked in fixed priority order
    /// since landmark colors can coincide at intersections.
    fn cruise_tick(&mut self) -> Result<()> {
        self.drive.forward(self.drive_cfg.cruise_power)?;

        if self.heading.correct_drift_if_needed()? {
            // Resume straight travel on the next tick.
            return Ok(());
        }

        if self.sensed.signals().turn_available.take() {
            self.handle_branch()?;
        }
        Ok(())
    }

    /// Branch decision at a turn marker, driven by the plan cursor.
    fn handle_branch(&mut self) -> Result<()> {
        self.drive.halt()?;

        let landmark = match self.plan.next() {
            Some(l) => l,
            None => {
                // Running off the known map must not crash the robot:
                // ignore the marker and keep cruising.
                let err = VaahakError::PlanExhausted {
                    cursor: self.plan.cursor(),
                };
                tracing::warn!(error = %err, "ignoring unplanned branch");
                return Ok(());
            }
        };

        tracing::info!(?landmark, cursor = self.plan.cursor(), "branch reached");
        match landmark {
            Landmark::HomeInvalid => {
                // Not our home; pass it by.
            }
            Landmark::Turn => {
                self.state = NavState::Turning;
                self.heading
                    .turn_to_relative_angle(self.nav_cfg.branch_turn_deg)?;
                self.state = NavState::Cruising;
            }
            Landmark::Room => {
                if self.delivery.home_eligible {
                    tracing::debug!("quota met, skipping room branch");
                } else {
                    self.state = NavState::Turning;
                    self.heading
                        .turn_to_relative_angle(self.nav_cfg.branch_turn_deg)?;
                    self.visit_room()?;
                    self.state = NavState::Cruising;
                    self.sensed.set_context(NavContext::Hallway);
                }
            }
            Landmark::HomeValid => {
                if self.delivery.home_eligible {
                    self.state = NavState::Turning;
                    self.heading
                        .turn_to_relative_angle(self.nav_cfg.branch_turn_deg)?;
                    self.state = NavState::HeadingHome;
                    self.sensed.set_context(NavContext::HeadingHome);
                    tracing::info!("quota met, heading home");
                } else {
                    tracing::debug!("home branch before quota, passing by");
                }
            }
        }
        Ok(())
    }

    /// Full room visit: validate the entrance, sweep if valid, exit.
    fn visit_room(&mut self) -> Result<()> {
        let verdict = self.validate_entrance()?;

        if verdict == EntranceVerdict::Valid {
            self.state = NavState::SweepingRoom;
            self.sensed.set_context(NavContext::SweepingRoom);
            self.delivery.sweep_marker_found = false;

            let mut visit = RoomVisit::new();
            match self.sweep.run(&mut visit)? {
                SweepOutcome::Found { drop_angle } => {
                    self.delivery.sweep_marker_found = true;
                    if visit.already_dropped {
                        self.delivery.packages_delivered += 1;
                        if self.delivery.packages_delivered >= self.nav_cfg.delivery_quota {
                            self.delivery.home_eligible = true;
                        }
                        tracing::info!(
                            delivered = self.delivery.packages_delivered,
                            drop_angle,
                            home_eligible = self.delivery.home_eligible,
                            "delivery complete"
                        );
                    }
                }
                SweepOutcome::NotFound => {
                    // A room with no detectable marker is still exited,
                    // never retried indefinitely.
                    tracing::info!("room yielded no marker");
                }
            }
        } else {
            tracing::info!("entrance rejected, skipping room");
        }

        self.exit_room()
    }

    /// Point the entrance sensor forward, advance briefly, and wait for
    /// the verdict. Timing out the bounded window means valid.
    fn validate_entrance(&mut self) -> Result<EntranceVerdict> {
        self.state = NavState::ValidatingEntrance;
        self.sensed.set_context(NavContext::ValidatingEntrance);
        let signals = self.sensed.signals();
        signals.invalid_entrance.clear();
        signals.valid_entrance.clear();

        drive_to_position(
            &self.arm,
            0.0,
            &self.latch,
            Duration::from_millis(self.nav_cfg.entrance_poll_ms.max(1)),
        )?;

        self.timed_drive(self.drive_cfg.cruise_power, self.nav_cfg.entrance_advance_ms)?;

        let poll = Duration::from_millis(self.nav_cfg.entrance_poll_ms.max(1));
        let ticks =
            (self.nav_cfg.entrance_window_ms / self.nav_cfg.entrance_poll_ms.max(1)).max(1);

        for _ in 0..ticks {
            if self.latch.is_set() {
                return Err(VaahakError::EmergencyLatched);
            }
            if signals.invalid_entrance.take() {
                return Ok(EntranceVerdict::Invalid);
            }
            if signals.valid_entrance.take() {
                return Ok(EntranceVerdict::Valid);
            }
            std::thread::sleep(poll);
        }

        // No rejection observed within the window: assume valid.
        Ok(EntranceVerdict::Valid)
    }

    /// Back out until the entrance threshold is confirmed (debounced in
    /// the pattern table), then turn back onto the hallway heading.
    fn exit_room(&mut self) -> Result<()> {
        self.state = NavState::ExitingRoom;
        self.sensed.set_context(NavContext::ExitingRoom);
        let signals = self.sensed.signals();
        signals.room_exit.clear();

        self.drive.reverse(self.drive_cfg.reverse_power)?;

        let poll = Duration::from_millis(self.nav_cfg.exit_poll_ms.max(1));
        let ticks = (self.nav_cfg.exit_window_ms / self.nav_cfg.exit_poll_ms.max(1)).max(1);

        for _ in 0..ticks {
            if self.latch.is_set() {
                self.drive.halt()?;
                return Err(VaahakError::EmergencyLatched);
            }
            if signals.room_exit.take() {
                break;
            }
            std::thread::sleep(poll);
            // Window exhaustion falls through: treat the robot as back at
            // the threshold rather than reversing forever.
        }

        self.drive.halt()?;
        self.heading
            .turn_to_relative_angle(self.nav_cfg.exit_turn_deg)?;
        Ok(())
    }

    /// Drive at a power level for a bounded time, polling the emergency
    /// latch throughout, then halt.
    fn timed_drive(&self, power: f64, duration_ms: u64) -> Result<()> {
        self.drive.forward(power)?;
        let poll = Duration::from_millis(self.nav_cfg.nav_poll_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(duration_ms);
        while Instant::now() < deadline {
            if self.latch.is_set() {
                self.drive.halt()?;
                return Err(VaahakError::EmergencyLatched);
            }
            std::thread::sleep(poll);
        }
        self.drive.halt()
    }

    /// One homing tick: straight travel with drift correction until the
    /// home marker latches.
    fn homing_tick(&mut self) -> Result<()> {
        self.drive.forward(self.drive_cfg.cruise_power)?;

        if self.sensed.signals().arrived_home.take() {
            self.drive.halt()?;
            self.audio.lock().play(ToneSpec::completion())?;
            tracing::info!(
                delivered = self.delivery.packages_delivered,
                "arrived home"
            );
            self.state = NavState::Arrived;
            return Ok(());
        }

        if self.heading.correct_drift_if_needed()? {
            return Ok(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_cursor_is_monotone_and_stops_at_the_end() {
        let mut plan = NavigationPlan::new(vec![Landmark::Turn, Landmark::Room]);
        assert_eq!(plan.cursor(), 0);
        assert_eq!(plan.next(), Some(Landmark::Turn));
        assert_eq!(plan.cursor(), 1);
        assert_eq!(plan.next(), Some(Landmark::Room));
        assert_eq!(plan.cursor(), 2);
        assert_eq!(plan.next(), None);
        assert_eq!(plan.cursor(), 2);
        assert_eq!(plan.next(), None);
    }
}
