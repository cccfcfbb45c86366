//! Around-the-Clock: 1 through 20 in order, then the bull.

use tracing::{debug, instrument};

use crate::state::ClockScore;
use crate::types::{Throw, ThrowGroup, TurnEvent};

/// Scores one turn. Only a dart on the current target counts; the ring
/// does not matter.
#[instrument(skip_all, fields(current = *score.current_target(), darts = group.len()))]
pub fn score_turn(score: &ClockScore, group: &ThrowGroup) -> (ClockScore, TurnEvent, usize) {
    let mut next = score.clone();
    let mut hit_any = false;

    for (index, throw) in group.throws().iter().enumerate() {
        next.count_throw();
        if throw.target != *next.current_target() {
            continue;
        }

        next.validate_current();
        hit_any = true;

        if next.is_finished() {
            debug!(dart = index + 1, throws = *next.throws(), "Bull validated");
            return (next, TurnEvent::Win, index + 1);
        }
    }

    let event = if hit_any {
        TurnEvent::Accepted
    } else {
        TurnEvent::Noop
    };
    (next, event, group.len())
}

/// Converts a hit/miss flag into the dart it stands for.
pub fn throw_for_flag(score: &ClockScore, hit: bool) -> Throw {
    if hit {
        Throw::single(*score.current_target())
    } else {
        Throw::miss()
    }
}
