//! The match model: one session, its players and its lifecycle.

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use oche_rules::{PlayerId, PlayerState, Seat, Variant, build_initial_state, to_progress};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::SessionError;
use crate::remote::{PlayerPayload, SessionPayload};

/// Unique identifier for a session.
pub type SessionId = String;

/// Lifecycle of a session.
///
/// Transitions are monotonic: `Pending → InProgress → {Completed, Cancelled}`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SessionStatus {
    /// Created, nobody has loaded it yet.
    Pending,
    /// Turns are being played.
    InProgress,
    /// A player won.
    Completed,
    /// Abandoned before a winner was found.
    Cancelled,
}

impl SessionStatus {
    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Cancelled)
        )
    }

    /// Completed and cancelled sessions never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Position in the lifecycle, used to refuse regressing snapshots.
    pub fn stage(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Cancelled => 2,
        }
    }
}

/// Where the local turn state machine stands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnPhase {
    /// Waiting for the active player's darts.
    AwaitingThrow,
    /// A turn has been applied locally and is waiting on the remote store.
    Submitting,
    /// The session is over; no more turns are accepted.
    Resolved,
}

/// One match instance.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize)]
pub struct Session {
    /// Session id.
    id: SessionId,
    /// Game being played.
    variant: Variant,
    /// Lifecycle status.
    status: SessionStatus,
    /// Players in turn order.
    players: Vec<PlayerState>,
    /// Index of the player whose turn it is.
    active_index: usize,
    /// Confirmed turns so far.
    turn_number: u32,
    /// Winner, once completed.
    winner: Option<PlayerId>,
    /// Creation time.
    created_at: DateTime<Utc>,
    /// Last change.
    updated_at: DateTime<Utc>,
    /// Remote write counter.
    revision: u64,
}

impl Session {
    /// Creates a fresh pending session with every player at their starting state.
    #[instrument(skip_all, fields(%variant, players = seats.len()))]
    pub fn new(id: impl Into<SessionId>, variant: Variant, seats: &[Seat]) -> Self {
        let now = Utc::now();
        let players = seats
            .iter()
            .enumerate()
            .map(|(position, seat)| PlayerState::initial(seat, position, variant))
            .collect();
        Self {
            id: id.into(),
            variant,
            status: SessionStatus::Pending,
            players,
            active_index: 0,
            turn_number: 0,
            winner: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Rebuilds a session from a remote snapshot.
    ///
    /// Player progress goes through the rule table's `build_initial_state`,
    /// so a malformed payload is refused rather than adopted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rules`] for bad player progress and
    /// [`SessionError::Snapshot`] for inconsistent session fields.
    #[instrument(skip(payload), fields(session_id = %payload.id, revision = payload.revision))]
    pub fn from_payload(payload: SessionPayload) -> Result<Self, SessionError> {
        let seats: Vec<Seat> = payload
            .players
            .iter()
            .map(|p| Seat::new(p.id.clone(), p.name.clone()))
            .collect();
        let progress: Vec<_> = if payload.players.iter().all(|p| p.progress.is_none()) {
            Vec::new()
        } else {
            payload.players.iter().map(|p| p.progress.clone()).collect()
        };
        let players = build_initial_state(&seats, payload.variant, &progress)?;

        if payload.status == SessionStatus::InProgress && players.is_empty() {
            return Err(SessionError::Snapshot("session in progress without players".into()));
        }
        if !players.is_empty() && payload.active_index >= players.len() {
            return Err(SessionError::Snapshot(format!(
                "active index {} out of range for {} players",
                payload.active_index,
                players.len()
            )));
        }
        if let Some(winner) = &payload.winner
            && !players.iter().any(|p| p.id() == winner)
        {
            return Err(SessionError::Snapshot(format!("winner {winner} is not seated")));
        }
        if payload.status == SessionStatus::Completed && payload.winner.is_none() {
            warn!(session_id = %payload.id, "Completed snapshot without a winner");
        }

        debug!(players = players.len(), status = %payload.status, "Rebuilt session from snapshot");
        Ok(Self {
            id: payload.id,
            variant: payload.variant,
            status: payload.status,
            players,
            active_index: payload.active_index,
            turn_number: payload.turn_number,
            winner: payload.winner,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
            revision: payload.revision,
        })
    }

    /// Serializes the session into its wire snapshot.
    pub fn to_payload(&self) -> SessionPayload {
        let players = self
            .players
            .iter()
            .zip(to_progress(&self.players))
            .map(|(state, progress)| PlayerPayload {
                id: state.id().clone(),
                name: state.name().clone(),
                progress,
            })
            .collect();
        SessionPayload {
            id: self.id.clone(),
            variant: self.variant,
            status: self.status,
            players,
            active_index: self.active_index,
            turn_number: self.turn_number,
            winner: self.winner.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            revision: self.revision,
        }
    }

    /// The player whose turn it is, while the session is in progress.
    pub fn active_player(&self) -> Option<&PlayerState> {
        if self.status == SessionStatus::InProgress {
            self.players.get(self.active_index)
        } else {
            None
        }
    }

    /// Seat index of a player.
    pub fn player_index(&self, player_id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.id() == player_id)
    }

    /// Looks up a player by id.
    pub fn player(&self, player_id: &str) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id() == player_id)
    }

    /// Replaces one player's state.
    pub(crate) fn set_player_state(&mut self, index: usize, state: PlayerState) {
        if let Some(slot) = self.players.get_mut(index) {
            *slot = state;
        }
    }

    /// Passes the turn to the next seat.
    pub(crate) fn advance_turn(&mut self) {
        if !self.players.is_empty() {
            self.active_index = (self.active_index + 1) % self.players.len();
        }
        self.turn_number += 1;
        self.touch();
    }

    /// Moves to `status`, recording the winner if one is given.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] for a non-monotonic move.
    pub(crate) fn transition(
        &mut self,
        status: SessionStatus,
        winner: Option<PlayerId>,
    ) -> Result<(), SessionError> {
        if !self.status.can_transition_to(status) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        if winner.is_some() {
            self.winner = winner;
        }
        self.touch();
        Ok(())
    }

    /// Marks a remote write as applied.
    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Read-only view of a session handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize)]
pub struct SessionSnapshot {
    /// The session as the local engine sees it.
    session: Session,
    /// The turn state machine's phase.
    phase: TurnPhase,
}

impl SessionSnapshot {
    /// Bundles a session with its phase.
    pub fn new(session: Session, phase: TurnPhase) -> Self {
        Self { session, phase }
    }

    /// Consumes the snapshot, returning the session.
    pub fn into_session(self) -> Session {
        self.session
    }
}
