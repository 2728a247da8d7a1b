//! Configuration loading for Vaahak
//!
//! Loaded from a TOML file; every field has a default so a partial file
//! (or none at all) yields a runnable configuration. Power constants,
//! poll intervals, and turn technique live here rather than in code so
//! course recalibration never forks the control logic.

use serde::Deserialize;
use std::path::Path;

use crate::color::{default_reference_table, ColorReference};
use crate::error::{Result, VaahakError};
use crate::nav::Landmark;

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct VaahakConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub heading: HeadingConfig,
    #[serde(default)]
    pub distance: DistanceConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub nav: NavConfig,
    #[serde(default)]
    pub colors: ColorConfig,
    #[serde(default)]
    pub plan: PlanConfig,
}

/// Poll intervals for the background sampling loops
#[derive(Clone, Debug, Deserialize)]
pub struct SamplingConfig {
    /// Color sampling interval (ms)
    #[serde(default = "default_color_poll_ms")]
    pub color_poll_ms: u64,

    /// Heading sampling interval (ms)
    #[serde(default = "default_heading_poll_ms")]
    pub heading_poll_ms: u64,

    /// Distance sampling interval (ms)
    #[serde(default = "default_distance_poll_ms")]
    pub distance_poll_ms: u64,

    /// Emergency button polling interval (ms)
    #[serde(default = "default_emergency_poll_ms")]
    pub emergency_poll_ms: u64,

    /// Silence window after which a stream counts as stale (ms)
    #[serde(default = "default_silence_window_ms")]
    pub silence_window_ms: u64,

    /// Bound on waiting for sampling loops to exit during shutdown (ms)
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

/// Drive power levels (percent of full motor power)
#[derive(Clone, Debug, Deserialize)]
pub struct DriveConfig {
    /// Forward cruising power
    #[serde(default = "default_cruise_power")]
    pub cruise_power: f64,

    /// Backward power while exiting a room
    #[serde(default = "default_reverse_power")]
    pub reverse_power: f64,
}

/// Closed-loop heading controller parameters
#[derive(Clone, Debug, Deserialize)]
pub struct HeadingConfig {
    /// Differential power used for in-place turns
    #[serde(default = "default_turn_power")]
    pub turn_power: f64,

    /// Angular margin before target where power steps down once (degrees)
    #[serde(default = "default_soft_margin_deg")]
    pub soft_margin_deg: f64,

    /// Power factor applied inside the soft-landing margin
    #[serde(default = "default_soft_power_factor")]
    pub soft_power_factor: f64,

    /// Drift hysteresis band while driving straight (degrees)
    #[serde(default = "default_drift_threshold_deg")]
    pub drift_threshold_deg: f64,

    /// Heading polling interval inside a turn (ms)
    #[serde(default = "default_turn_poll_ms")]
    pub turn_poll_ms: u64,
}

/// Wall-following acceptance band
#[derive(Clone, Debug, Deserialize)]
pub struct DistanceConfig {
    /// Setpoint distance from the near wall (cm)
    #[serde(default = "default_near_setpoint_cm")]
    pub near_setpoint_cm: f64,

    /// Setpoint distance from the far wall (cm)
    #[serde(default = "default_far_setpoint_cm")]
    pub far_setpoint_cm: f64,

    /// Half-width of the acceptance band around the setpoint (cm)
    #[serde(default = "default_band_cm")]
    pub band_cm: f64,
}

/// Room-sweep search parameters
#[derive(Clone, Debug, Deserialize)]
pub struct SweepConfig {
    /// Maximum advance/sweep attempts per room visit
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Duration of each chassis advance increment (ms)
    #[serde(default = "default_advance_ms")]
    pub advance_ms: u64,

    /// Forward power during the advance increment
    #[serde(default = "default_advance_power")]
    pub advance_power: f64,

    /// Angular range the sensor arm sweeps from center (degrees)
    #[serde(default = "default_sweep_range_deg")]
    pub sweep_range_deg: f64,

    /// Arm angular rate during a sweep (degrees per second)
    #[serde(default = "default_sweep_rate_dps")]
    pub sweep_rate_dps: f64,

    /// Bounded window to wait for a marker hit per sweep (ms)
    #[serde(default = "default_hit_window_ms")]
    pub hit_window_ms: u64,

    /// Marker/emergency polling granularity inside the window (ms)
    #[serde(default = "default_hit_poll_ms")]
    pub hit_poll_ms: u64,

    /// Feeder speed limit during a package drop (degrees per second)
    #[serde(default = "default_feeder_rate_dps")]
    pub feeder_rate_dps: f64,

    /// Feeder revolution that releases one package (degrees)
    #[serde(default = "default_feeder_revolution_deg")]
    pub feeder_revolution_deg: f64,
}

/// Navigation state machine parameters
#[derive(Clone, Debug, Deserialize)]
pub struct NavConfig {
    /// Packages to deliver before home becomes eligible
    #[serde(default = "default_delivery_quota")]
    pub delivery_quota: u32,

    /// Main navigation loop tick (ms)
    #[serde(default = "default_nav_poll_ms")]
    pub nav_poll_ms: u64,

    /// Landmark turn angle (degrees, positive = clockwise/right)
    #[serde(default = "default_branch_turn_deg")]
    pub branch_turn_deg: f64,

    /// Turn back onto the hallway heading after a room visit (degrees)
    #[serde(default = "default_exit_turn_deg")]
    pub exit_turn_deg: f64,

    /// Brief advance into the entrance before validating it (ms)
    #[serde(default = "default_entrance_advance_ms")]
    pub entrance_advance_ms: u64,

    /// Bounded window for the entrance verdict; timeout assumes valid (ms)
    #[serde(default = "default_entrance_window_ms")]
    pub entrance_window_ms: u64,

    /// Entrance verdict polling granularity (ms)
    #[serde(default = "default_entrance_poll_ms")]
    pub entrance_poll_ms: u64,

    /// Bounded window for confirming the exit threshold while backing out (ms)
    #[serde(default = "default_exit_window_ms")]
    pub exit_window_ms: u64,

    /// Exit confirmation polling granularity (ms)
    #[serde(default = "default_exit_poll_ms")]
    pub exit_poll_ms: u64,
}

/// Color classifier configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ColorConfig {
    /// Normalize channel sums before the nearest-neighbor match
    #[serde(default)]
    pub normalize: bool,

    /// Reference table of mean colors; replaceable per lighting condition
    #[serde(default = "default_reference_table")]
    pub reference: Vec<ColorReference>,
}

/// Landmark plan: one entry per physical right-hand branch on the path
#[derive(Clone, Debug, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "default_landmarks")]
    pub landmarks: Vec<Landmark>,
}

fn default_color_poll_ms() -> u64 {
    50
}
fn default_heading_poll_ms() -> u64 {
    40
}
fn default_distance_poll_ms() -> u64 {
    60
}
fn default_emergency_poll_ms() -> u64 {
    50
}
fn default_silence_window_ms() -> u64 {
    500
}
fn default_join_timeout_ms() -> u64 {
    2000
}
fn default_cruise_power() -> f64 {
    30.0
}
fn default_reverse_power() -> f64 {
    25.0
}
fn default_turn_power() -> f64 {
    30.0
}
fn default_soft_margin_deg() -> f64 {
    20.0
}
fn default_soft_power_factor() -> f64 {
    0.4
}
fn default_drift_threshold_deg() -> f64 {
    8.0
}
fn default_turn_poll_ms() -> u64 {
    20
}
fn default_near_setpoint_cm() -> f64 {
    5.0
}
fn default_far_setpoint_cm() -> f64 {
    20.0
}
fn default_band_cm() -> f64 {
    0.5
}
fn default_max_attempts() -> u32 {
    6
}
fn default_advance_ms() -> u64 {
    600
}
fn default_advance_power() -> f64 {
    20.0
}
fn default_sweep_range_deg() -> f64 {
    180.0
}
fn default_sweep_rate_dps() -> f64 {
    120.0
}
fn default_hit_window_ms() -> u64 {
    2500
}
fn default_hit_poll_ms() -> u64 {
    30
}
fn default_feeder_rate_dps() -> f64 {
    100.0
}
fn default_feeder_revolution_deg() -> f64 {
    359.0
}
fn default_delivery_quota() -> u32 {
    2
}
fn default_nav_poll_ms() -> u64 {
    40
}
fn default_branch_turn_deg() -> f64 {
    90.0
}
fn default_exit_turn_deg() -> f64 {
    -90.0
}
fn default_entrance_advance_ms() -> u64 {
    500
}
fn default_entrance_window_ms() -> u64 {
    1500
}
fn default_entrance_poll_ms() -> u64 {
    30
}
fn default_exit_window_ms() -> u64 {
    8000
}
fn default_exit_poll_ms() -> u64 {
    40
}
fn default_landmarks() -> Vec<Landmark> {
    vec![
        Landmark::Turn,
        Landmark::Room,
        Landmark::HomeInvalid,
        Landmark::Room,
        Landmark::HomeValid,
    ]
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            color_poll_ms: default_color_poll_ms(),
            heading_poll_ms: default_heading_poll_ms(),
            distance_poll_ms: default_distance_poll_ms(),
            emergency_poll_ms: default_emergency_poll_ms(),
            silence_window_ms: default_silence_window_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            cruise_power: default_cruise_power(),
            reverse_power: default_reverse_power(),
        }
    }
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            turn_power: default_turn_power(),
            soft_margin_deg: default_soft_margin_deg(),
            soft_power_factor: default_soft_power_factor(),
            drift_threshold_deg: default_drift_threshold_deg(),
            turn_poll_ms: default_turn_poll_ms(),
        }
    }
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            near_setpoint_cm: default_near_setpoint_cm(),
            far_setpoint_cm: default_far_setpoint_cm(),
            band_cm: default_band_cm(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            advance_ms: default_advance_ms(),
            advance_power: default_advance_power(),
            sweep_range_deg: default_sweep_range_deg(),
            sweep_rate_dps: default_sweep_rate_dps(),
            hit_window_ms: default_hit_window_ms(),
            hit_poll_ms: default_hit_poll_ms(),
            feeder_rate_dps: default_feeder_rate_dps(),
            feeder_revolution_deg: default_feeder_revolution_deg(),
        }
    }
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            delivery_quota: default_delivery_quota(),
            nav_poll_ms: default_nav_poll_ms(),
            branch_turn_deg: default_branch_turn_deg(),
            exit_turn_deg: default_exit_turn_deg(),
            entrance_advance_ms: default_entrance_advance_ms(),
            entrance_window_ms: default_entrance_window_ms(),
            entrance_poll_ms: default_entrance_poll_ms(),
            exit_window_ms: default_exit_window_ms(),
            exit_poll_ms: default_exit_poll_ms(),
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            normalize: false,
            reference: default_reference_table(),
        }
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            landmarks: default_landmarks(),
        }
    }
}

impl Default for VaahakConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            drive: DriveConfig::default(),
            heading: HeadingConfig::default(),
            distance: DistanceConfig::default(),
            sweep: SweepConfig::default(),
            nav: NavConfig::default(),
            colors: ColorConfig::default(),
            plan: PlanConfig::default(),
        }
    }
}

impl VaahakConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaahakError::Config(format!("failed to read config file: {}", e)))?;
        let config: VaahakConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorToken;

    #[test]
    fn default_config_is_complete() {
        let config = VaahakConfig::default();
        assert_eq!(config.sampling.color_poll_ms, 50);
        assert_eq!(config.heading.drift_threshold_deg, 8.0);
        assert_eq!(config.sweep.max_attempts, 6);
        assert_eq!(config.nav.delivery_quota, 2);
        assert_eq!(config.colors.reference.len(), 8);
        assert!(!config.plan.landmarks.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_content = r#"
[nav]
delivery_quota = 3

[heading]
drift_threshold_deg = 10.0
"#;
        let config: VaahakConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.nav.delivery_quota, 3);
        assert_eq!(config.heading.drift_threshold_deg, 10.0);
        // Untouched sections keep their defaults.
        assert_eq!(config.sweep.max_attempts, 6);
        assert_eq!(config.drive.cruise_power, 30.0);
    }

    #[test]
    fn plan_and_colors_deserialize() {
        let toml_content = r#"
[plan]
landmarks = ["Turn", "Room", "HomeValid"]

[colors]
normalize = true

[[colors.reference]]
token = "Red"
rgb = [140.0, 19.0, 22.0]
"#;
        let config: VaahakConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(
            config.plan.landmarks,
            vec![Landmark::Turn, Landmark::Room, Landmark::HomeValid]
        );
        assert!(config.colors.normalize);
        assert_eq!(config.colors.reference.len(), 1);
        assert_eq!(config.colors.reference[0].token, ColorToken::Red);
    }
}
