//! First-class invariants over player state.
//!
//! Invariants are checked in debug builds after every scoring step and
//! always when state is rebuilt from a remote snapshot.

use tracing::{instrument, warn};

use crate::error::RuleError;
use crate::state::{CLOSED_HITS, CRICKET_TARGETS, ClockScore, PlayerState, VariantScore};
use crate::types::BULL;

/// A logical property that must hold for a given state.
pub trait Invariant<S> {
    /// Checks if the invariant holds for the given state.
    fn holds(state: &S) -> bool;

    /// Human-readable description of the invariant.
    fn description() -> &'static str;
}

/// Violation of an invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Description of the violated invariant.
    pub description: String,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// A set of invariants that can be checked together.
pub trait InvariantSet<S> {
    /// Checks all invariants in the set, collecting every violation.
    fn check_all(state: &S) -> Result<(), Vec<InvariantViolation>>;
}

impl<S, I1, I2, I3> InvariantSet<S> for (I1, I2, I3)
where
    I1: Invariant<S>,
    I2: Invariant<S>,
    I3: Invariant<S>,
{
    fn check_all(state: &S) -> Result<(), Vec<InvariantViolation>> {
        let mut violations = Vec::new();
        if !I1::holds(state) {
            violations.push(InvariantViolation::new(I1::description()));
        }
        if !I2::holds(state) {
            violations.push(InvariantViolation::new(I2::description()));
        }
        if !I3::holds(state) {
            violations.push(InvariantViolation::new(I3::description()));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// X01: remaining stays within `0..=starting`, never 1, and matches history.
pub struct ClassicRemainingInvariant;

impl Invariant<PlayerState> for ClassicRemainingInvariant {
    fn holds(state: &PlayerState) -> bool {
        let VariantScore::Classic(score) = state.score() else {
            return true;
        };
        let scored: u32 = score.history().iter().map(|t| u32::from(*t.points())).sum();
        *score.remaining() <= *score.starting()
            && *score.remaining() != 1
            && scored == u32::from(*score.starting() - *score.remaining())
            && score.history().iter().all(|t| *t.points() <= 180)
    }

    fn description() -> &'static str {
        "X01 remaining score must lie in 0..=start, never be 1, and equal start minus recorded points"
    }
}

/// Cricket: targets in board order, hits capped at three, points only on closed targets.
pub struct CricketMarksInvariant;

impl Invariant<PlayerState> for CricketMarksInvariant {
    fn holds(state: &PlayerState) -> bool {
        let VariantScore::Cricket(score) = state.score() else {
            return true;
        };
        let in_order = score
            .marks()
            .iter()
            .zip(CRICKET_TARGETS)
            .all(|(mark, target)| *mark.target() == target);
        let capped = score.marks().iter().all(|m| *m.hits() <= CLOSED_HITS);
        let points_earned = score
            .marks()
            .iter()
            .all(|m| *m.points() == 0 || m.is_closed());
        let sum: u32 = score.marks().iter().map(|m| u32::from(*m.points())).sum();
        in_order && capped && points_earned && sum == u32::from(*score.total())
    }

    fn description() -> &'static str {
        "Cricket hits must not exceed 3, points need a closed target, and total must equal the per-target sum"
    }
}

/// Around-the-Clock: validated numbers form a prefix of the sequence.
pub struct ClockProgressInvariant;

impl Invariant<PlayerState> for ClockProgressInvariant {
    fn holds(state: &PlayerState) -> bool {
        let VariantScore::AroundTheClock(score) = state.score() else {
            return true;
        };
        let mut expected = Some(1u8);
        let mut count = 0usize;
        while let Some(target) = expected {
            if !score.validated().contains(&target) {
                break;
            }
            count += 1;
            expected = ClockScore::next_target(target);
        }
        let prefix = count == score.validated().len();
        let current_ok = match expected {
            Some(next) => *score.current_target() == next,
            None => *score.current_target() == BULL,
        };
        prefix && current_ok && u64::from(*score.throws()) >= count as u64
    }

    fn description() -> &'static str {
        "Around-the-Clock validated numbers must be the sequence prefix before the current target"
    }
}

/// All scoring invariants as a composable set.
pub type ScoreInvariants = (
    ClassicRemainingInvariant,
    CricketMarksInvariant,
    ClockProgressInvariant,
);

/// Checks every invariant, converting violations into a [`RuleError`].
#[instrument(skip(state), fields(player_id = %state.id()))]
pub fn check_invariants(state: &PlayerState) -> Result<(), RuleError> {
    ScoreInvariants::check_all(state).map_err(|violations| {
        let reason = violations
            .iter()
            .map(|v| v.description.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        warn!(reason = %reason, "Player state invariant violated");
        RuleError::CorruptSnapshot {
            player: state.id().clone(),
            reason,
        }
    })
}

/// Asserts that all invariants hold (panics on violation in debug builds).
pub fn assert_invariants(state: &PlayerState) {
    debug_assert!(
        ScoreInvariants::check_all(state).is_ok(),
        "Player state invariant violated for {}",
        state.id()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ClassicScore, CricketMark, CricketScore, Seat, TurnRecord};
    use crate::types::Variant;
    use std::collections::BTreeSet;

    fn seat() -> Seat {
        Seat::new("p1", "Alice")
    }

    #[test]
    fn test_fresh_states_hold() {
        for variant in [
            Variant::Classic301,
            Variant::Classic501,
            Variant::Cricket,
            Variant::AroundTheClock,
        ] {
            let state = PlayerState::initial(&seat(), 0, variant);
            assert!(check_invariants(&state).is_ok(), "{variant} should start valid");
        }
    }

    #[test]
    fn test_classic_history_mismatch_detected() {
        let score = ClassicScore::from_parts(301, 200, vec![TurnRecord::new(60, false)]);
        let state = PlayerState::new(&seat(), 0, VariantScore::Classic(score));
        assert!(matches!(
            check_invariants(&state),
            Err(RuleError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_classic_remaining_one_detected() {
        let score = ClassicScore::from_parts(301, 1, vec![TurnRecord::new(180, false), TurnRecord::new(120, false)]);
        let state = PlayerState::new(&seat(), 0, VariantScore::Classic(score));
        assert!(!ClassicRemainingInvariant::holds(&state));
    }

    #[test]
    fn test_cricket_points_on_open_target_detected() {
        let mut marks = CRICKET_TARGETS.map(|t| CricketMark::new(t, 0, 0));
        marks[5] = CricketMark::new(20, 2, 20);
        let state = PlayerState::new(
            &seat(),
            0,
            VariantScore::Cricket(CricketScore::from_parts(marks, 20)),
        );
        assert!(!CricketMarksInvariant::holds(&state));
    }

    #[test]
    fn test_clock_gap_detected() {
        let validated: BTreeSet<u8> = [1, 2, 4].into_iter().collect();
        let state = PlayerState::new(
            &seat(),
            0,
            VariantScore::AroundTheClock(ClockScore::from_parts(5, validated, 6)),
        );
        assert!(!ClockProgressInvariant::holds(&state));
    }

    #[test]
    fn test_clock_finished_holds() {
        let mut validated: BTreeSet<u8> = (1..=20).collect();
        validated.insert(BULL);
        let state = PlayerState::new(
            &seat(),
            0,
            VariantScore::AroundTheClock(ClockScore::from_parts(BULL, validated, 40)),
        );
        assert!(ClockProgressInvariant::holds(&state));
    }
}
