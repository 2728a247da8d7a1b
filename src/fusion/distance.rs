//! Wall-distance sampling loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::DistanceConfig;
use crate::hardware::DistanceSensor;
use crate::state::{LateralCorrection, SharedSensed, WallSide};

use super::HubControl;

/// Derive the lateral correction from the acceptance band around the
/// setpoint for whichever wall is currently tracked.
fn check_adjustment(cm: f64, side: WallSide, cfg: &DistanceConfig) -> LateralCorrection {
    let setpoint = match side {
        WallSide::Near => cfg.near_setpoint_cm,
        WallSide::Far => cfg.far_setpoint_cm,
    };
    if cm > setpoint + cfg.band_cm {
        LateralCorrection::Left
    } else if cm < setpoint - cfg.band_cm {
        LateralCorrection::Right
    } else {
        LateralCorrection::Ok
    }
}

pub(super) fn run(
    shared: Arc<SharedSensed>,
    control: Arc<HubControl>,
    stop: Arc<AtomicBool>,
    mut sensor: Box<dyn DistanceSensor>,
    cfg: DistanceConfig,
    poll: Duration,
) {
    tracing::info!("distance sampling loop started");

    while !stop.load(Ordering::Acquire) && !control.stop_requested() {
        match sensor.read_cm() {
            Ok(cm) => {
                let correction = check_adjustment(cm, shared.wall(), &cfg);
                shared.publish_distance(cm, correction);
            }
            Err(e) => {
                tracing::error!(error = %e, "distance read failed, terminating loop");
                shared.mark_distance_dead();
                return;
            }
        }

        std::thread::sleep(poll);
    }

    tracing::info!("distance sampling loop stopped");
}
