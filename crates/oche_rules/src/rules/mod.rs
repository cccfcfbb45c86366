//! The variant rule table.
//!
//! Pure functions: a turn goes in, the thrower's next state and what
//! happened come out. Nothing here mutates shared state or performs I/O.

pub mod classic;
pub mod clock;
pub mod cricket;

use derive_getters::Getters;
use tracing::{debug, instrument};

use crate::contracts::{assert_invariants, check_invariants};
use crate::error::RuleError;
use crate::state::{CricketScore, PlayerState, Seat, VariantScore};
use crate::types::{MAX_DARTS_PER_TURN, ThrowGroup, TurnEvent, Variant};

/// Outcome of scoring one turn for the active player.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct ScoreDelta {
    /// The thrower's state after the turn (unchanged on a bust).
    new_state: PlayerState,
    /// What the turn did.
    event: TurnEvent,
    /// Darts that counted; darts after a win or bust are ignored.
    darts_used: usize,
}

impl ScoreDelta {
    /// Consumes the delta, returning the new state.
    pub fn into_state(self) -> PlayerState {
        self.new_state
    }
}

/// Scores `group` for the player at `active`.
///
/// The whole table is passed because Cricket scoring depends on the
/// opponents' marks. Only the active player's state is returned.
///
/// # Errors
///
/// Returns [`RuleError`] if the group is empty or too long, contains an
/// illegal dart, names a missing player, or mixes variants.
#[instrument(skip(players, group), fields(group = %group))]
pub fn score_delta(
    players: &[PlayerState],
    active: usize,
    group: &ThrowGroup,
) -> Result<ScoreDelta, RuleError> {
    if group.is_empty() || group.len() > MAX_DARTS_PER_TURN {
        return Err(RuleError::ThrowCount(group.len()));
    }
    if let Some(throw) = group.first_illegal() {
        return Err(RuleError::IllegalThrow(*throw));
    }
    let player = players.get(active).ok_or(RuleError::NoSuchPlayer {
        index: active,
        players: players.len(),
    })?;

    let (score, event, darts_used) = match player.score() {
        VariantScore::Classic(score) => {
            let (next, event, used) = classic::score_turn(score, group);
            (VariantScore::Classic(next), event, used)
        }
        VariantScore::Cricket(score) => {
            let opponents = cricket_opponents(players, active)?;
            let (next, event, used) = cricket::score_turn(score, &opponents, group);
            (VariantScore::Cricket(next), event, used)
        }
        VariantScore::AroundTheClock(score) => {
            let (next, event, used) = clock::score_turn(score, group);
            (VariantScore::AroundTheClock(next), event, used)
        }
    };

    let new_state = player.with_score(score);
    assert_invariants(&new_state);
    debug!(player_id = %player.id(), %event, darts_used, "Scored turn");

    Ok(ScoreDelta {
        new_state,
        event,
        darts_used,
    })
}

fn cricket_opponents(players: &[PlayerState], active: usize) -> Result<Vec<&CricketScore>, RuleError> {
    players
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != active)
        .map(|(_, p)| match p.score() {
            VariantScore::Cricket(score) => Ok(score),
            _ => Err(RuleError::VariantMismatch(Variant::Cricket)),
        })
        .collect()
}

/// Returns true once the player has three hits on `target`.
///
/// Only meaningful for Cricket; other variants always return false.
pub fn is_closed(state: &PlayerState, target: u8) -> bool {
    match state.score() {
        VariantScore::Cricket(score) => cricket::is_closed(score, target),
        VariantScore::Classic(_) | VariantScore::AroundTheClock(_) => false,
    }
}

/// Builds the player table for a session.
///
/// With an empty `progress` every player starts fresh. Otherwise there
/// must be one entry per seat; `None` entries start fresh and `Some`
/// entries are validated and adopted as-is.
///
/// # Errors
///
/// Returns [`RuleError`] if the progress list has the wrong length, a
/// payload belongs to another variant, or a payload breaks an invariant.
#[instrument(skip(seats, progress), fields(seats = seats.len(), progress = progress.len()))]
pub fn build_initial_state(
    seats: &[Seat],
    variant: Variant,
    progress: &[Option<VariantScore>],
) -> Result<Vec<PlayerState>, RuleError> {
    if !progress.is_empty() && progress.len() != seats.len() {
        return Err(RuleError::ProgressLength {
            expected: seats.len(),
            actual: progress.len(),
        });
    }

    seats
        .iter()
        .enumerate()
        .map(|(position, seat)| {
            let score = match progress.get(position).cloned().flatten() {
                Some(score) if !score.matches(variant) => {
                    return Err(RuleError::VariantMismatch(variant));
                }
                Some(score) => score,
                None => VariantScore::initial(variant),
            };
            let state = PlayerState::new(seat, position, score);
            check_invariants(&state)?;
            Ok(state)
        })
        .collect()
}

/// Inverse of [`build_initial_state`]: the per-player payloads in seat order.
pub fn to_progress(states: &[PlayerState]) -> Vec<Option<VariantScore>> {
    states.iter().map(|s| Some(s.score().clone())).collect()
}

/// Players ordered best first; ties keep turn order.
///
/// X01 ranks by lowest remaining, Cricket by points then closed targets,
/// Around-the-Clock by validated numbers then fewest darts.
pub fn ranking(states: &[PlayerState]) -> Vec<&PlayerState> {
    let mut ranked: Vec<&PlayerState> = states.iter().collect();
    ranked.sort_by_key(|state| rank_key(state));
    ranked
}

/// The current leader, if there are any players.
pub fn leader(states: &[PlayerState]) -> Option<&PlayerState> {
    ranking(states).into_iter().next()
}

fn rank_key(state: &PlayerState) -> (i64, i64) {
    match state.score() {
        VariantScore::Classic(score) => (i64::from(*score.remaining()), 0),
        VariantScore::Cricket(score) => {
            let closed = score.marks().iter().filter(|m| m.is_closed()).count() as i64;
            (-i64::from(*score.total()), -closed)
        }
        VariantScore::AroundTheClock(score) => {
            (-(score.validated().len() as i64), i64::from(*score.throws()))
        }
    }
}
