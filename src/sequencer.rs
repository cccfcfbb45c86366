//! Two-phase turn commit: tentative local apply, then confirm or roll back.
//!
//! The sequencer holds the last confirmed session and at most one pending
//! turn. While a turn is pending the UI sees the optimistic session; the
//! confirmed copy is only replaced by a confirmation or by a full snapshot
//! from the remote store.

use oche_rules::{PlayerId, TurnEvent};
use tracing::{debug, info, instrument, warn};

use crate::error::SessionError;
use crate::session::{Session, SessionSnapshot, SessionStatus, TurnPhase};
use crate::validator::AppliedTurn;

/// Handle for one pending turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnTicket(u64);

#[derive(Debug, Clone)]
struct PendingTurn {
    ticket: TurnTicket,
    turn: AppliedTurn,
    base_revision: u64,
    optimistic: Session,
}

/// Result of confirming a pending turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Confirmation {
    /// The turn was folded into the confirmed session.
    Applied,
    /// A newer snapshot landed while the turn was in flight; it was kept
    /// and the local turn dropped. The caller should refetch.
    Superseded,
    /// The ticket is no longer pending (view left or rolled back).
    Stale,
}

/// Result of offering a snapshot to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Replacement {
    /// The snapshot is now the confirmed session.
    Applied,
    /// The snapshot is older than what we have.
    Older,
    /// The snapshot would move the status backwards.
    Regressed,
}

/// Turn state machine for one session.
#[derive(Debug)]
pub struct TurnSequencer {
    confirmed: Session,
    // confirmed holds a locally confirmed turn the store has not echoed yet
    ahead_of_remote: bool,
    pending: Option<PendingTurn>,
    next_ticket: u64,
}

impl TurnSequencer {
    /// Starts from a confirmed session.
    pub fn new(session: Session) -> Self {
        Self {
            confirmed: session,
            ahead_of_remote: false,
            pending: None,
            next_ticket: 0,
        }
    }

    /// Last confirmed or replaced session.
    pub fn confirmed(&self) -> &Session {
        &self.confirmed
    }

    /// What the UI should show: the optimistic session while submitting.
    pub fn view(&self) -> &Session {
        self.pending
            .as_ref()
            .map(|p| &p.optimistic)
            .unwrap_or(&self.confirmed)
    }

    /// Current phase.
    pub fn phase(&self) -> TurnPhase {
        if self.pending.is_some() {
            TurnPhase::Submitting
        } else if self.confirmed.status().is_terminal() {
            TurnPhase::Resolved
        } else {
            TurnPhase::AwaitingThrow
        }
    }

    /// Snapshot for the UI.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(self.view().clone(), self.phase())
    }

    /// Returns true while a turn waits on the remote store.
    pub fn is_submitting(&self) -> bool {
        self.pending.is_some()
    }

    /// The turn waiting on the remote store.
    pub fn pending_turn(&self) -> Option<&AppliedTurn> {
        self.pending.as_ref().map(|p| &p.turn)
    }

    /// Applies `turn` optimistically.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SubmissionInFlight`] if a turn is already
    /// pending, and [`SessionError::Snapshot`] if the turn was scored
    /// against a different session state.
    #[instrument(skip(self, turn), fields(player_id = %turn.player_id(), event = %turn.event()))]
    pub fn begin(&mut self, turn: AppliedTurn) -> Result<TurnTicket, SessionError> {
        if self.pending.is_some() {
            warn!("Turn already in flight");
            return Err(SessionError::SubmissionInFlight);
        }
        if *turn.player_index() != *self.confirmed.active_index()
            || *turn.turn_number() != self.confirmed.turn_number() + 1
        {
            return Err(SessionError::Snapshot(format!(
                "turn {} for seat {} does not follow the confirmed state",
                turn.turn_number(),
                turn.player_index()
            )));
        }

        let mut optimistic = self.confirmed.clone();
        optimistic.set_player_state(*turn.player_index(), turn.new_state().clone());

        let ticket = TurnTicket(self.next_ticket);
        self.next_ticket += 1;
        debug!(ticket = ticket.0, "Turn applied optimistically");
        self.pending = Some(PendingTurn {
            ticket,
            turn,
            base_revision: *self.confirmed.revision(),
            optimistic,
        });
        Ok(ticket)
    }

    /// Confirms a pending turn, optionally with the store's fresh snapshot.
    ///
    /// On success the turn passes to the next seat, or on a win the
    /// session completes and the turn stays with the winner.
    #[instrument(skip(self, fresh), fields(ticket = ticket.0, fresh = fresh.is_some()))]
    pub fn confirm(&mut self, ticket: TurnTicket, fresh: Option<Session>) -> Confirmation {
        let Some(pending) = self.pending.take_if(|p| p.ticket == ticket) else {
            debug!("Confirmation for a turn that is no longer pending");
            return Confirmation::Stale;
        };

        let outcome = if *self.confirmed.revision() > pending.base_revision {
            info!(
                base = pending.base_revision,
                current = *self.confirmed.revision(),
                "Snapshot replaced mid-flight, dropping local turn"
            );
            Confirmation::Superseded
        } else {
            let mut next = pending.optimistic;
            match pending.turn.event() {
                TurnEvent::Win => {
                    let winner: PlayerId = pending.turn.player_id().clone();
                    if let Err(err) = next.transition(SessionStatus::Completed, Some(winner)) {
                        warn!(error = %err, "Could not complete session after win");
                    }
                }
                TurnEvent::Accepted | TurnEvent::Bust | TurnEvent::Noop => next.advance_turn(),
            }
            info!(
                turn_number = *next.turn_number(),
                active_index = *next.active_index(),
                status = %next.status(),
                "Turn confirmed"
            );
            self.confirmed = next;
            self.ahead_of_remote = true;
            Confirmation::Applied
        };

        if let Some(fresh) = fresh {
            self.replace(fresh);
        }
        outcome
    }

    /// Drops a pending turn, restoring the confirmed view.
    #[instrument(skip(self), fields(ticket = ticket.0))]
    pub fn rollback(&mut self, ticket: TurnTicket) -> bool {
        let rolled_back = self.pending.take_if(|p| p.ticket == ticket).is_some();
        if rolled_back {
            info!("Rolled back optimistic turn");
        }
        rolled_back
    }

    /// Drops whatever is pending without rollback bookkeeping.
    pub fn discard_pending(&mut self) -> Option<AppliedTurn> {
        self.pending.take().map(|p| p.turn)
    }

    /// Offers a full snapshot from the remote store.
    ///
    /// Newer revisions win. An equal revision wins unless the confirmed
    /// session carries a local confirmation the store has not echoed yet.
    /// A snapshot that moves the status backwards is refused.
    #[instrument(skip(self, session), fields(incoming = *session.revision(), current = *self.confirmed.revision()))]
    pub fn replace(&mut self, session: Session) -> Replacement {
        let incoming = *session.revision();
        let current = *self.confirmed.revision();
        if incoming < current || (incoming == current && self.ahead_of_remote) {
            debug!("Ignoring older snapshot");
            return Replacement::Older;
        }
        if session.status().stage() < self.confirmed.status().stage()
            || (self.confirmed.status().is_terminal() && session.status() != self.confirmed.status())
        {
            warn!(
                from = %self.confirmed.status(),
                to = %session.status(),
                "Ignoring snapshot that regresses status"
            );
            return Replacement::Regressed;
        }

        debug!(status = %session.status(), "Snapshot replaced local session");
        self.confirmed = session;
        self.ahead_of_remote = false;
        Replacement::Applied
    }

    /// Applies a confirmed status change to the local session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] for a non-monotonic move.
    pub fn transition(
        &mut self,
        status: SessionStatus,
        winner: Option<PlayerId>,
    ) -> Result<(), SessionError> {
        self.confirmed.transition(status, winner)?;
        self.ahead_of_remote = true;
        Ok(())
    }
}
