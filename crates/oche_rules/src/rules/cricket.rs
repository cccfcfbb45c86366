//! Cricket scoring on 15-20 and bull.

use tracing::{debug, instrument};

use crate::state::{CLOSED_HITS, CricketScore};
use crate::types::{ThrowGroup, TurnEvent};

/// Scores one turn for the thrower against the opponents' current marks.
///
/// Hits on an open target close it (excess hits are dropped). Hits on a
/// closed target score `target × multiplier` while any opponent still has
/// it open. The thrower wins once every target is closed and their total
/// is at least every opponent's.
#[instrument(skip_all, fields(darts = group.len(), opponents = opponents.len()))]
pub fn score_turn(
    score: &CricketScore,
    opponents: &[&CricketScore],
    group: &ThrowGroup,
) -> (CricketScore, TurnEvent, usize) {
    let mut next = score.clone();
    let mut changed = false;

    for (index, throw) in group.throws().iter().enumerate() {
        let target = throw.target;
        if next.mark(target).is_none() {
            continue;
        }

        if next.hits(target) < CLOSED_HITS {
            next.add_hits(target, throw.multiplier);
            changed = true;
        } else if opponents.iter().any(|o| o.hits(target) < CLOSED_HITS) {
            next.add_points(target, throw.points());
            changed = true;
        } else {
            debug!(target, "Target closed by everyone, no points");
        }

        if is_winning(&next, opponents) {
            debug!(dart = index + 1, total = *next.total(), "All targets closed with the lead");
            return (next, TurnEvent::Win, index + 1);
        }
    }

    let event = if changed {
        TurnEvent::Accepted
    } else {
        TurnEvent::Noop
    };
    (next, event, group.len())
}

/// Returns true if `target` is closed for this player.
pub fn is_closed(score: &CricketScore, target: u8) -> bool {
    score.mark(target).is_some_and(|m| m.is_closed())
}

/// All targets closed and no opponent ahead on points.
pub fn is_winning(score: &CricketScore, opponents: &[&CricketScore]) -> bool {
    score.all_closed() && opponents.iter().all(|o| score.total() >= o.total())
}
