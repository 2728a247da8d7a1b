//! Vaahak - control core for a color-guided delivery robot
//!
//! The robot follows a colored line network through hallways, branches on
//! floor landmarks according to a fixed plan, sweeps rooms for a drop
//! marker, delivers packages, and returns home once its quota is met.
//!
//! Architecture: background sampling loops (`fusion`) turn raw sensor
//! reads into sticky symbolic signals on a shared state block (`state`);
//! a single navigation thread (`nav`) consumes the signals through a
//! landmark-driven state machine, using closed-loop motion primitives
//! (`motion`) and the room-sweep procedure (`sweep`); an independent
//! supervisor (`estop`) polls the emergency button and owns the
//! irreversible full-stop sequence. Hardware is reached only through the
//! traits in `hardware`, so the whole core runs against mock devices.

pub mod color;
pub mod config;
pub mod error;
pub mod estop;
pub mod fusion;
pub mod hardware;
pub mod motion;
pub mod nav;
pub mod state;
pub mod sweep;

pub use color::{ColorClassifier, ColorToken};
pub use config::VaahakConfig;
pub use error::{Result, VaahakError};
pub use estop::EmergencyStopSupervisor;
pub use fusion::{HubControl, SensorFusionHub};
pub use motion::{DrivePair, HeadingController};
pub use nav::{Landmark, NavState, NavigationPlan, NavigationStateMachine, RunReport};
pub use state::{EmergencyLatch, NavContext, SharedSensed};
pub use sweep::{RoomSweepProcedure, SweepOutcome};
