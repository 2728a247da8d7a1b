//! Error types for Vaahak

use thiserror::Error;

/// Vaahak error type
#[derive(Error, Debug)]
pub enum VaahakError {
    /// Transient sensor read failure. Degrades to `Unknown`/stale values,
    /// never propagated across a thread boundary.
    #[error("sensor read timed out")]
    SensorTimeout,

    /// A control loop depends on a sensor stream whose sampling thread has
    /// died or gone silent past the configured window.
    #[error("{stream} sensor stream is stale")]
    StaleSensor { stream: &'static str },

    /// Motor or actuator I/O fault. Fatal: escalates to an emergency stop.
    #[error("hardware fault: {0}")]
    Hardware(String),

    /// The landmark plan cursor ran past the end of the known path.
    /// Logged and ignored; running off the map must not crash the robot.
    #[error("navigation plan exhausted at cursor {cursor}")]
    PlanExhausted { cursor: usize },

    /// The emergency latch was raised. Expected termination path.
    #[error("emergency stop latched")]
    EmergencyLatched,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for VaahakError {
    fn from(e: toml::de::Error) -> Self {
        VaahakError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VaahakError>;
