//! Turn validation.
//!
//! Preconditions are checked before anything reaches the rule table or the
//! network; the validator itself never mutates the session. It returns an
//! [`AppliedTurn`] describing what the turn would do, and the sequencer
//! decides when to apply it.

use derive_getters::Getters;
use oche_rules::{
    MAX_DARTS_PER_TURN, PlayerId, PlayerState, RuleError, ThrowGroup, TurnEvent, score_delta,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::Rejection;
use crate::session::{Session, SessionStatus};

/// Scored turn, not yet applied to any session.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize)]
pub struct AppliedTurn {
    /// Session the turn was scored against.
    session_id: String,
    /// Thrower.
    player_id: PlayerId,
    /// Thrower's seat.
    player_index: usize,
    /// Turn number the turn will become once confirmed.
    turn_number: u32,
    /// Darts as thrown.
    group: ThrowGroup,
    /// What the turn did.
    event: TurnEvent,
    /// Thrower's state after the turn (unchanged on a bust).
    new_state: PlayerState,
    /// Darts that counted.
    darts_used: usize,
}

impl AppliedTurn {
    /// The soft rejection carried by a bust, if any.
    pub fn rejection(&self) -> Option<Rejection> {
        match self.event {
            TurnEvent::Bust => Some(Rejection::Bust),
            TurnEvent::Accepted | TurnEvent::Win | TurnEvent::Noop => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Turn Preconditions
// ─────────────────────────────────────────────────────────────

/// Precondition: the session must be in progress.
pub struct SessionInProgress;

impl SessionInProgress {
    /// Refuses turns on pending or finished sessions.
    #[instrument(skip(session), fields(status = %session.status()))]
    pub fn check(session: &Session) -> Result<(), Rejection> {
        match session.status() {
            SessionStatus::InProgress => Ok(()),
            SessionStatus::Pending => Err(Rejection::SessionNotStarted),
            SessionStatus::Completed | SessionStatus::Cancelled => {
                Err(Rejection::GameAlreadyCompleted)
            }
        }
    }
}

/// Precondition: the thrower must be the active player.
pub struct ActivePlayer;

impl ActivePlayer {
    /// Returns the thrower's seat index.
    #[instrument(skip(session))]
    pub fn check(session: &Session, player_id: &str) -> Result<usize, Rejection> {
        let active = session.active_player();
        match active {
            Some(p) if p.id() == player_id => Ok(*session.active_index()),
            _ => Err(Rejection::NotActivePlayer {
                player: player_id.to_string(),
                active: active.map(|p| p.id().clone()),
            }),
        }
    }
}

/// Precondition: one to three darts.
pub struct ThrowCount;

impl ThrowCount {
    /// Checks the group length.
    pub fn check(group: &ThrowGroup) -> Result<(), Rejection> {
        if group.is_empty() || group.len() > MAX_DARTS_PER_TURN {
            Err(Rejection::InvalidThrowCount { count: group.len() })
        } else {
            Ok(())
        }
    }
}

/// Precondition: every dart is a real board value.
pub struct LegalThrows;

impl LegalThrows {
    /// Checks each dart's segment and ring.
    pub fn check(group: &ThrowGroup) -> Result<(), Rejection> {
        match group.first_illegal() {
            Some(throw) => Err(Rejection::InvalidThrowValue {
                target: throw.target,
                multiplier: throw.multiplier,
            }),
            None => Ok(()),
        }
    }
}

/// Composite precondition for a turn.
pub struct LegalTurn;

impl LegalTurn {
    /// Validates all preconditions, returning the thrower's seat.
    #[instrument(skip(session, group))]
    pub fn check(session: &Session, player_id: &str, group: &ThrowGroup) -> Result<usize, Rejection> {
        SessionInProgress::check(session)?;
        let index = ActivePlayer::check(session, player_id)?;
        ThrowCount::check(group)?;
        LegalThrows::check(group)?;
        Ok(index)
    }
}

// ─────────────────────────────────────────────────────────────
//  Validator
// ─────────────────────────────────────────────────────────────

/// Side-effect free turn validator.
pub struct ScoreValidator;

impl ScoreValidator {
    /// Validates and scores a turn against `session`.
    ///
    /// A bust comes back as `Ok` with [`TurnEvent::Bust`]: it is still a
    /// turn to submit. Hard rejections come back as `Err`.
    #[instrument(skip(session, group), fields(session_id = %session.id(), group = %group))]
    pub fn apply(
        session: &Session,
        player_id: &str,
        group: &ThrowGroup,
    ) -> Result<AppliedTurn, Rejection> {
        let index = LegalTurn::check(session, player_id, group)?;
        let delta = score_delta(session.players(), index, group).map_err(rejection_for)?;

        debug!(event = %delta.event(), darts_used = *delta.darts_used(), "Turn scored");
        Ok(AppliedTurn {
            session_id: session.id().clone(),
            player_id: player_id.to_string(),
            player_index: index,
            turn_number: session.turn_number() + 1,
            group: group.clone(),
            event: *delta.event(),
            darts_used: *delta.darts_used(),
            new_state: delta.into_state(),
        })
    }
}

fn rejection_for(err: RuleError) -> Rejection {
    match err {
        RuleError::IllegalThrow(throw) => Rejection::InvalidThrowValue {
            target: throw.target,
            multiplier: throw.multiplier,
        },
        RuleError::ThrowCount(count) => Rejection::InvalidThrowCount { count },
        other => Rejection::InconsistentState {
            detail: other.to_string(),
        },
    }
}
