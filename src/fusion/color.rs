//! Color sampling loop and the landmark transition-pattern table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::color::{ColorClassifier, ColorToken};
use crate::state::{NavContext, SharedSensed, SignalKind, Signals};

use super::HubControl;

/// One guarded `(previous, current)` pattern. `prev`/`context` of `None`
/// match anything.
struct TransitionPattern {
    prev: Option<ColorToken>,
    curr: ColorToken,
    context: Option<NavContext>,
    signal: SignalKind,
}

/// Ordered pattern table. Evaluation is first-match-wins, once per tick:
/// the order resolves legitimate color coincidences at path intersections,
/// and the context guards keep identical colors seen in a different
/// navigation phase from firing the wrong signal.
const PATTERNS: &[TransitionPattern] = &[
    // Green at home base ends the run.
    TransitionPattern {
        prev: None,
        curr: ColorToken::Green,
        context: Some(NavContext::HeadingHome),
        signal: SignalKind::ArrivedHome,
    },
    // Red past the entrance marks the room off-limits.
    TransitionPattern {
        prev: None,
        curr: ColorToken::Red,
        context: Some(NavContext::ValidatingEntrance),
        signal: SignalKind::InvalidEntrance,
    },
    // Plain floor past the entrance confirms a deliverable room.
    TransitionPattern {
        prev: None,
        curr: ColorToken::White,
        context: Some(NavContext::ValidatingEntrance),
        signal: SignalKind::ValidEntrance,
    },
    // Blue delivery marker under the sweeping sensor.
    TransitionPattern {
        prev: None,
        curr: ColorToken::Blue,
        context: Some(NavContext::SweepingRoom),
        signal: SignalKind::MarkerFound,
    },
    // Two consecutive orange reads confirm the entrance threshold while
    // backing out; a single sample is not trusted.
    TransitionPattern {
        prev: Some(ColorToken::Orange),
        curr: ColorToken::Orange,
        context: Some(NavContext::ExitingRoom),
        signal: SignalKind::RoomExit,
    },
    // Black strip across the white hallway floor marks a branch.
    TransitionPattern {
        prev: Some(ColorToken::White),
        curr: ColorToken::Black,
        context: Some(NavContext::Hallway),
        signal: SignalKind::TurnAvailable,
    },
];

/// Evaluate the pattern table for one tick. At most one signal fires;
/// `Unknown` carries no information and never advances anything.
pub fn evaluate_patterns(
    prev: ColorToken,
    curr: ColorToken,
    context: NavContext,
    signals: &Signals,
) {
    if curr == ColorToken::Unknown {
        return;
    }
    for pattern in PATTERNS {
        let prev_ok = pattern.prev.map_or(true, |p| p == prev);
        let ctx_ok = pattern.context.map_or(true, |c| c == context);
        if prev_ok && ctx_ok && pattern.curr == curr {
            signals.fire(pattern.signal);
            return;
        }
    }
}

pub(super) fn run(
    shared: Arc<SharedSensed>,
    control: Arc<HubControl>,
    stop: Arc<AtomicBool>,
    mut sensor: Box<dyn crate::hardware::ColorSensor>,
    classifier: ColorClassifier,
    poll: Duration,
) {
    tracing::info!("color sampling loop started");

    while !stop.load(Ordering::Acquire) && !control.stop_requested() {
        let token = match sensor.read_rgb() {
            Ok(rgb) => classifier.classify(rgb),
            Err(e) => {
                // Transient: degrade to Unknown, no signal fires this tick.
                tracing::debug!(error = %e, "color read failed");
                ColorToken::Unknown
            }
        };

        let context = shared.context();
        let signals = shared.signals();
        shared.publish_color_and(token, |prev, curr| {
            evaluate_patterns(prev, curr, context, signals);
        });

        std::thread::sleep(poll);
    }

    tracing::info!("color sampling loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_marker_fires_only_in_hallway_context() {
        let signals = Signals::default();
        evaluate_patterns(
            ColorToken::White,
            ColorToken::Black,
            NavContext::SweepingRoom,
            &signals,
        );
        assert!(!signals.turn_available.is_set());

        evaluate_patterns(
            ColorToken::White,
            ColorToken::Black,
            NavContext::Hallway,
            &signals,
        );
        assert!(signals.turn_available.is_set());
    }

    #[test]
    fn branch_marker_needs_the_white_to_black_edge() {
        let signals = Signals::default();
        evaluate_patterns(
            ColorToken::Black,
            ColorToken::Black,
            NavContext::Hallway,
            &signals,
        );
        evaluate_patterns(
            ColorToken::Unknown,
            ColorToken::Black,
            NavContext::Hallway,
            &signals,
        );
        assert!(!signals.turn_available.is_set());
    }

    #[test]
    fn exit_confirmation_requires_two_consecutive_orange_reads() {
        let signals = Signals::default();
        evaluate_patterns(
            ColorToken::White,
            ColorToken::Orange,
            NavContext::ExitingRoom,
            &signals,
        );
        assert!(!signals.room_exit.is_set());

        evaluate_patterns(
            ColorToken::Orange,
            ColorToken::Orange,
            NavContext::ExitingRoom,
            &signals,
        );
        assert!(signals.room_exit.is_set());
    }

    #[test]
    fn unknown_never_fires_a_signal() {
        let signals = Signals::default();
        for ctx in [
            NavContext::Hallway,
            NavContext::ValidatingEntrance,
            NavContext::SweepingRoom,
            NavContext::ExitingRoom,
            NavContext::HeadingHome,
        ] {
            evaluate_patterns(ColorToken::White, ColorToken::Unknown, ctx, &signals);
        }
        assert!(!signals.turn_available.is_set());
        assert!(!signals.invalid_entrance.is_set());
        assert!(!signals.valid_entrance.is_set());
        assert!(!signals.marker_found.is_set());
        assert!(!signals.room_exit.is_set());
        assert!(!signals.arrived_home.is_set());
    }

    #[test]
    fn at_most_one_signal_fires_per_tick() {
        // Red while validating matches the invalid pattern first, so the
        // valid pattern never gets a look at the same tick.
        let signals = Signals::default();
        evaluate_patterns(
            ColorToken::White,
            ColorToken::Red,
            NavContext::ValidatingEntrance,
            &signals,
        );
        assert!(signals.invalid_entrance.is_set());
        assert!(!signals.valid_entrance.is_set());
    }

    #[test]
    fn marker_only_counts_while_sweeping() {
        let signals = Signals::default();
        evaluate_patterns(
            ColorToken::White,
            ColorToken::Blue,
            NavContext::Hallway,
            &signals,
        );
        assert!(!signals.marker_found.is_set());

        evaluate_patterns(
            ColorToken::White,
            ColorToken::Blue,
            NavContext::SweepingRoom,
            &signals,
        );
        assert!(signals.marker_found.is_set());
    }
}
