//! X01 scoring with double-out.

use tracing::{debug, instrument};

use crate::state::{ClassicScore, TurnRecord};
use crate::types::{ThrowGroup, TurnEvent};

/// Scores one turn dart by dart.
///
/// The turn busts as soon as a dart would take the remaining score below
/// zero, leave exactly one, or reach zero without a double. Reaching zero
/// on a double wins and ignores any darts after it.
#[instrument(skip(score, group), fields(remaining = *score.remaining(), darts = group.len()))]
pub fn score_turn(score: &ClassicScore, group: &ThrowGroup) -> (ClassicScore, TurnEvent, usize) {
    let mut remaining = i32::from(*score.remaining());
    let mut scored: u16 = 0;

    for (index, throw) in group.throws().iter().enumerate() {
        let points = throw.points();
        remaining -= i32::from(points);
        scored += points;

        let bust = remaining < 0 || remaining == 1 || (remaining == 0 && !throw.is_double());
        if bust {
            debug!(dart = index + 1, remaining, "Bust");
            return (score.clone(), TurnEvent::Bust, index + 1);
        }

        if remaining == 0 {
            debug!(dart = index + 1, scored, "Checkout on a double");
            let mut next = score.clone();
            next.record(0, TurnRecord::new(scored, true));
            return (next, TurnEvent::Win, index + 1);
        }
    }

    let mut next = score.clone();
    next.record(remaining as u16, TurnRecord::new(scored, false));
    let event = if scored == 0 {
        TurnEvent::Noop
    } else {
        TurnEvent::Accepted
    };
    (next, event, group.len())
}

/// Returns true if `remaining` can be finished with one double.
pub fn is_one_dart_finish(remaining: u16) -> bool {
    remaining == 50 || (remaining <= 40 && remaining % 2 == 0 && remaining > 0)
}
