//! Heading sampling loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::hardware::HeadingSensor;
use crate::state::SharedSensed;

use super::HubControl;

pub(super) fn run(
    shared: Arc<SharedSensed>,
    control: Arc<HubControl>,
    stop: Arc<AtomicBool>,
    mut sensor: Box<dyn HeadingSensor>,
    drift_threshold_deg: f64,
    poll: Duration,
) {
    tracing::info!("heading sampling loop started");

    while !stop.load(Ordering::Acquire) && !control.stop_requested() {
        match sensor.read_absolute_degrees() {
            Ok(raw) => {
                let fused = shared.publish_heading(raw);
                if fused.abs() > drift_threshold_deg {
                    shared.signals().needs_realignment.set();
                }
            }
            Err(e) => {
                // Fatal to this loop only: the last published value stays
                // in place and consumers observe staleness.
                tracing::error!(error = %e, "heading read failed, terminating loop");
                shared.mark_heading_dead();
                return;
            }
        }

        std::thread::sleep(poll);
    }

    tracing::info!("heading sampling loop stopped");
}
