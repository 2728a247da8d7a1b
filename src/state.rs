//! Shared sensed state for the multi-threaded control core.
//!
//! Provides thread-safe state between:
//! - Sampling threads (color, heading, distance) which publish
//! - The navigation thread, which consumes under short-held locks
//! - The emergency supervisor, which latches the one-shot stop flag
//!
//! Sticky signals are explicit two-state latches with `set` /
//! `test-and-clear` semantics rather than language-level event
//! primitives: once set, a latch stays set across any number of extra
//! triggering ticks until its consumer takes it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::color::ColorToken;
use crate::error::{Result, VaahakError};

/// Edge-triggered, level-held-until-cleared boolean.
///
/// Multiple sets before a take collapse to a single observation: the
/// consumer learns "at least once", never a count.
#[derive(Debug, Default)]
pub struct StickyLatch(AtomicBool);

impl StickyLatch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Test-and-clear: returns whether the latch was set, clearing it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One-shot, run-scoped emergency flag. Set once, never cleared during
/// a run; observed cooperatively by every blocking loop.
#[derive(Debug, Default)]
pub struct EmergencyLatch(AtomicBool);

impl EmergencyLatch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Latch the emergency stop. Returns true if this call was the one
    /// that set it (idempotent on repeats).
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lateral correction derived from the wall-distance acceptance band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateralCorrection {
    /// Too far from the tracked wall: steer left.
    Left,
    /// Too close to the tracked wall: steer right.
    Right,
    /// Inside the acceptance band.
    Ok,
}

/// Which wall the distance sensor is currently tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallSide {
    Near = 0,
    Far = 1,
}

/// Navigation context used to guard color-transition patterns, so that
/// identical colors encountered in a different phase of the run do not
/// fire the wrong signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavContext {
    Hallway = 0,
    ValidatingEntrance = 1,
    SweepingRoom = 2,
    ExitingRoom = 3,
    HeadingHome = 4,
}

impl NavContext {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => NavContext::ValidatingEntrance,
            2 => NavContext::SweepingRoom,
            3 => NavContext::ExitingRoom,
            4 => NavContext::HeadingHome,
            _ => NavContext::Hallway,
        }
    }
}

/// Identifies a sticky signal in the transition-pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    TurnAvailable,
    InvalidEntrance,
    ValidEntrance,
    MarkerFound,
    RoomExit,
    ArrivedHome,
}

/// The full sticky-signal set consumed by the navigation thread.
#[derive(Debug, Default)]
pub struct Signals {
    /// A hallway branch marker passed under the sensor.
    pub turn_available: StickyLatch,
    /// The room past the entrance is marked off-limits.
    pub invalid_entrance: StickyLatch,
    /// Clean room floor confirmed past the entrance.
    pub valid_entrance: StickyLatch,
    /// The delivery marker passed under the sweeping sensor.
    pub marker_found: StickyLatch,
    /// The entrance threshold confirmed on the way out (debounced).
    pub room_exit: StickyLatch,
    /// The home base marker reached.
    pub arrived_home: StickyLatch,
    /// Heading drifted beyond the hysteresis band while cruising.
    pub needs_realignment: StickyLatch,
}

impl Signals {
    pub fn fire(&self, kind: SignalKind) {
        match kind {
            SignalKind::TurnAvailable => self.turn_available.set(),
            SignalKind::InvalidEntrance => self.invalid_entrance.set(),
            SignalKind::ValidEntrance => self.valid_entrance.set(),
            SignalKind::MarkerFound => self.marker_found.set(),
            SignalKind::RoomExit => self.room_exit.set(),
            SignalKind::ArrivedHome => self.arrived_home.set(),
        }
    }
}

/// Raw fused sensor values, mutated only by the sampling threads.
#[derive(Debug)]
struct SensedInner {
    current_color: ColorToken,
    previous_color: ColorToken,
    /// Raw heading as published by the gyro stream, before reference offset.
    heading_raw: f64,
    /// Reference offset subtracted from the raw heading; reset is explicit.
    heading_offset: f64,
    distance_cm: f64,
    lateral_correction: LateralCorrection,
    color_updated_at: Instant,
    heading_updated_at: Instant,
    distance_updated_at: Instant,
}

/// Thread-safe fused sensor state plus the sticky-signal set.
///
/// The `(previous_color, current_color)` pairing and the firing of a
/// signal for that pair are atomic with respect to navigation reads:
/// both happen under the single inner lock, once per tick. The lock is
/// never held across a blocking hardware call.
pub struct SharedSensed {
    inner: Mutex<SensedInner>,
    signals: Signals,
    context: AtomicU8,
    wall: AtomicU8,
    heading_alive: AtomicBool,
    distance_alive: AtomicBool,
    silence_window: Duration,
}

impl SharedSensed {
    pub fn new(silence_window: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(SensedInner {
                current_color: ColorToken::Unknown,
                previous_color: ColorToken::Unknown,
                heading_raw: 0.0,
                heading_offset: 0.0,
                distance_cm: 0.0,
                lateral_correction: LateralCorrection::Ok,
                color_updated_at: now,
                heading_updated_at: now,
                distance_updated_at: now,
            }),
            signals: Signals::default(),
            context: AtomicU8::new(NavContext::Hallway as u8),
            wall: AtomicU8::new(WallSide::Near as u8),
            heading_alive: AtomicBool::new(true),
            distance_alive: AtomicBool::new(true),
            silence_window,
        }
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn context(&self) -> NavContext {
        NavContext::from_u8(self.context.load(Ordering::Acquire))
    }

    pub fn set_context(&self, ctx: NavContext) {
        self.context.store(ctx as u8, Ordering::Release);
    }

    pub fn wall(&self) -> WallSide {
        if self.wall.load(Ordering::Acquire) == WallSide::Far as u8 {
            WallSide::Far
        } else {
            WallSide::Near
        }
    }

    pub fn set_wall(&self, side: WallSide) {
        self.wall.store(side as u8, Ordering::Release);
    }

    /// Publish one color tick and evaluate transition patterns while the
    /// state lock is still held. `previous_color` always becomes the value
    /// `current_color` held one tick earlier; ticks are never skipped.
    pub fn publish_color_and<F>(&self, token: ColorToken, fire: F)
    where
        F: FnOnce(ColorToken, ColorToken),
    {
        let mut st = self.inner.lock();
        st.previous_color = st.current_color;
        st.current_color = token;
        st.color_updated_at = Instant::now();
        fire(st.previous_color, st.current_color);
    }

    /// Current `(previous, current)` color pair.
    pub fn color_pair(&self) -> (ColorToken, ColorToken) {
        let st = self.inner.lock();
        (st.previous_color, st.current_color)
    }

    /// Publish a raw heading reading; returns the fused (offset-corrected)
    /// value so the sampling loop can evaluate the drift band without a
    /// second lock.
    pub fn publish_heading(&self, raw_degrees: f64) -> f64 {
        let mut st = self.inner.lock();
        st.heading_raw = raw_degrees;
        st.heading_updated_at = Instant::now();
        st.heading_raw - st.heading_offset
    }

    /// Fused heading relative to the last reference reset.
    ///
    /// Fails with `StaleSensor` when the heading thread has died or gone
    /// silent past the configured window, so dependent control loops stop
    /// instead of spinning on a stale value forever.
    pub fn heading(&self) -> Result<f64> {
        if !self.heading_alive.load(Ordering::Acquire) {
            return Err(VaahakError::StaleSensor { stream: "heading" });
        }
        let st = self.inner.lock();
        if st.heading_updated_at.elapsed() > self.silence_window {
            return Err(VaahakError::StaleSensor { stream: "heading" });
        }
        Ok(st.heading_raw - st.heading_offset)
    }

    /// Reset the heading reference so the current raw value reads as zero.
    pub fn reset_heading(&self) {
        let mut st = self.inner.lock();
        st.heading_offset = st.heading_raw;
    }

    pub fn publish_distance(&self, cm: f64, correction: LateralCorrection) {
        let mut st = self.inner.lock();
        st.distance_cm = cm;
        st.lateral_correction = correction;
        st.distance_updated_at = Instant::now();
    }

    pub fn distance(&self) -> Result<(f64, LateralCorrection)> {
        if !self.distance_alive.load(Ordering::Acquire) {
            return Err(VaahakError::StaleSensor { stream: "distance" });
        }
        let st = self.inner.lock();
        if st.distance_updated_at.elapsed() > self.silence_window {
            return Err(VaahakError::StaleSensor { stream: "distance" });
        }
        Ok((st.distance_cm, st.lateral_correction))
    }

    /// Mark the heading stream dead after a fatal read failure. The last
    /// published value stays in place, stale-but-available.
    pub fn mark_heading_dead(&self) {
        self.heading_alive.store(false, Ordering::Release);
    }

    pub fn mark_distance_dead(&self) {
        self.distance_alive.store(false, Ordering::Release);
    }
}
