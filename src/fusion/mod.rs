//! Sensor fusion hub: background sampling loops.
//!
//! One long-lived thread per sensor stream (color, heading, distance).
//! Each loop samples hardware, derives a symbolic value, publishes under
//! a short-held lock, then sleeps its poll interval; a stop request is
//! observed within one interval. Starting an already-running loop is a
//! no-op; stopping joins the thread so teardown can never race a
//! sampling read against the hardware handle it owns.

mod color;
mod distance;
mod heading;

pub use color::evaluate_patterns;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::color::ColorClassifier;
use crate::config::{DistanceConfig, HeadingConfig, SamplingConfig};
use crate::hardware::{ColorSensor, DistanceSensor, HeadingSensor};
use crate::state::SharedSensed;

/// Shared control block for every sampling loop. The emergency supervisor
/// uses it to request a stop of all loops and to observe, without owning
/// any join handle, that they have exited.
#[derive(Debug, Default)]
pub struct HubControl {
    stop_all: AtomicBool,
    active: AtomicUsize,
}

impl HubControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every sampling loop to stop at its next tick.
    pub fn request_stop_all(&self) {
        self.stop_all.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_all.load(Ordering::Acquire)
    }

    /// Number of sampling loops still running.
    pub fn active_loops(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Enrollment token for a loop the emergency supervisor must wait out:
/// decrements the active-loop count when the loop exits, however it
/// exits. The sampling loops enroll themselves; the navigation thread
/// enrolls too, so the shutdown wait covers every motor-touching thread.
pub struct LoopGuard(Arc<HubControl>);

impl LoopGuard {
    pub fn enter(control: &Arc<HubControl>) -> Self {
        control.active.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(control))
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Sampler {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Sampler {
    fn stop_and_join(self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.handle.join();
    }
}

/// Owns the sampling threads and their per-loop stop flags.
pub struct SensorFusionHub {
    shared: Arc<SharedSensed>,
    control: Arc<HubControl>,
    sampling: SamplingConfig,
    heading_cfg: HeadingConfig,
    distance_cfg: DistanceConfig,
    color: Option<Sampler>,
    heading: Option<Sampler>,
    distance: Option<Sampler>,
}

impl SensorFusionHub {
    pub fn new(
        shared: Arc<SharedSensed>,
        control: Arc<HubControl>,
        sampling: SamplingConfig,
        heading_cfg: HeadingConfig,
        distance_cfg: DistanceConfig,
    ) -> Self {
        Self {
            shared,
            control,
            sampling,
            heading_cfg,
            distance_cfg,
            color: None,
            heading: None,
            distance: None,
        }
    }

    pub fn control(&self) -> Arc<HubControl> {
        Arc::clone(&self.control)
    }

    /// Start the color sampling loop. No-op if already running.
    pub fn start_color(&mut self, sensor: Box<dyn ColorSensor>, classifier: ColorClassifier) {
        if self.color.is_some() {
            tracing::debug!("color sampling loop already running");
            return;
        }
        let shared = Arc::clone(&self.shared);
        let control = Arc::clone(&self.control);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let poll = Duration::from_millis(self.sampling.color_poll_ms);

        let handle = thread::Builder::new()
            .name("color-sampler".into())
            .spawn(move || {
                let _guard = LoopGuard::enter(&control);
                color::run(shared, control, loop_stop, sensor, classifier, poll);
            })
            .expect("failed to spawn color sampler");

        self.color = Some(Sampler { stop, handle });
    }

    /// Stop the color loop and block until its thread has exited.
    pub fn stop_color(&mut self) {
        if let Some(sampler) = self.color.take() {
            sampler.stop_and_join();
        }
    }

    /// Start the heading sampling loop. No-op if already running.
    pub fn start_heading(&mut self, sensor: Box<dyn HeadingSensor>) {
        if self.heading.is_some() {
            tracing::debug!("heading sampling loop already running");
            return;
        }
        let shared = Arc::clone(&self.shared);
        let control = Arc::clone(&self.control);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let poll = Duration::from_millis(self.sampling.heading_poll_ms);
        let drift_threshold = self.heading_cfg.drift_threshold_deg;

        let handle = thread::Builder::new()
            .name("heading-sampler".into())
            .spawn(move || {
                let _guard = LoopGuard::enter(&control);
                heading::run(shared, control, loop_stop, sensor, drift_threshold, poll);
            })
            .expect("failed to spawn heading sampler");

        self.heading = Some(Sampler { stop, handle });
    }

    pub fn stop_heading(&mut self) {
        if let Some(sampler) = self.heading.take() {
            sampler.stop_and_join();
        }
    }

    /// Start the distance sampling loop. No-op if already running.
    pub fn start_distance(&mut self, sensor: Box<dyn DistanceSensor>) {
        if self.distance.is_some() {
            tracing::debug!("distance sampling loop already running");
            return;
        }
        let shared = Arc::clone(&self.shared);
        let control = Arc::clone(&self.control);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let poll = Duration::from_millis(self.sampling.distance_poll_ms);
        let cfg = self.distance_cfg.clone();

        let handle = thread::Builder::new()
            .name("distance-sampler".into())
            .spawn(move || {
                let _guard = LoopGuard::enter(&control);
                distance::run(shared, control, loop_stop, sensor, cfg, poll);
            })
            .expect("failed to spawn distance sampler");

        self.distance = Some(Sampler { stop, handle });
    }

    pub fn stop_distance(&mut self) {
        if let Some(sampler) = self.distance.take() {
            sampler.stop_and_join();
        }
    }

    /// Stop every sampling loop, joining each.
    pub fn stop_all(&mut self) {
        self.stop_color();
        self.stop_heading();
        self.stop_distance();
    }
}

impl Drop for SensorFusionHub {
    fn drop(&mut self) {
        self.stop_all();
    }
}
