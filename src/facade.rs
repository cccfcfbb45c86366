//! The game session facade: what a UI talks to.

use std::sync::{Arc, Mutex, MutexGuard};

use derive_getters::Getters;
use oche_rules::{PlayerId, ThrowGroup, TurnEvent};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::auth::Authenticator;
use crate::config::EngineConfig;
use crate::error::{Rejection, SessionError};
use crate::marker::MarkerStore;
use crate::remote::{PushChannel, RemoteError, RemoteStore};
use crate::sequencer::Confirmation;
use crate::session::{SessionSnapshot, SessionStatus};
use crate::sync::{ConnectionStatus, SessionSynchronizer, ViewGuard};
use crate::validator::ScoreValidator;

/// Outcome of a submitted turn.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize)]
pub struct TurnReport {
    /// What the turn did.
    event: TurnEvent,
    /// Session after the turn was confirmed.
    snapshot: SessionSnapshot,
}

impl TurnReport {
    /// False for a bust; the turn was still consumed.
    pub fn accepted(&self) -> bool {
        self.event != TurnEvent::Bust
    }

    /// Soft rejection to show the player, if any.
    pub fn reason(&self) -> Option<Rejection> {
        (self.event == TurnEvent::Bust).then_some(Rejection::Bust)
    }
}

/// One open match.
///
/// The view (push channel and polling) is entered on [`GameSession::open`]
/// and left when the facade is dropped or [`GameSession::leave_view`] is
/// called.
pub struct GameSession {
    sync: SessionSynchronizer,
    auth: Arc<dyn Authenticator>,
    view: Mutex<Option<ViewGuard>>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl GameSession {
    /// Loads a session, starts it if it is still pending, and enters its view.
    ///
    /// # Errors
    ///
    /// Fails if the session cannot be fetched or started.
    #[instrument(skip(config, remote, push, auth))]
    pub async fn open(
        config: &EngineConfig,
        session_id: &str,
        remote: Arc<dyn RemoteStore>,
        push: Arc<dyn PushChannel>,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self, SessionError> {
        let sync = SessionSynchronizer::load(
            session_id,
            remote,
            push,
            auth.clone(),
            config.sync().clone(),
            config.marker_path().as_ref().map(MarkerStore::new),
        )
        .await?;
        let game = Self {
            sync,
            auth,
            view: Mutex::new(None),
        };
        game.start_if_pending().await?;
        game.enter_view();
        game.sync.record_marker();
        info!(phase = %game.state().phase(), "Session open");
        Ok(game)
    }

    /// Reopens the session named by the active-player marker.
    ///
    /// Returns `None` when no marker path is configured or no marker exists.
    ///
    /// # Errors
    ///
    /// Fails if the marker is unreadable or the session cannot be opened.
    #[instrument(skip(config, remote, push, auth))]
    pub async fn resume(
        config: &EngineConfig,
        remote: Arc<dyn RemoteStore>,
        push: Arc<dyn PushChannel>,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Option<Self>, SessionError> {
        let Some(path) = config.marker_path() else {
            debug!("No marker path configured");
            return Ok(None);
        };
        let Some(marker) = MarkerStore::new(path).load()? else {
            debug!("No marker to resume from");
            return Ok(None);
        };
        info!(
            session_id = %marker.session_id(),
            turn_number = *marker.turn_number(),
            "Resuming session"
        );
        let game = Self::open(config, marker.session_id(), remote, push, auth).await?;
        Ok(Some(game))
    }

    async fn start_if_pending(&self) -> Result<(), SessionError> {
        if *self.sync.snapshot().session().status() != SessionStatus::Pending {
            return Ok(());
        }
        info!("Starting pending session");
        match self.sync.update_status(SessionStatus::InProgress, None).await {
            Ok(fresh) => {
                self.sync.with_sequencer(|seq| {
                    if let Err(err) = seq.transition(SessionStatus::InProgress, None) {
                        debug!(error = %err, "Session already moved on");
                    }
                    if let Some(fresh) = fresh {
                        seq.replace(fresh);
                    }
                });
                Ok(())
            }
            Err(SessionError::Remote(RemoteError::Rejected(reason))) => {
                debug!(%reason, "Another client started the session first");
                self.sync.refetch().await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Submits throws for the signed-in player.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoActingPlayer`] when nobody is signed in,
    /// otherwise as [`GameSession::submit_throws_as`].
    pub async fn submit_throws(&self, group: ThrowGroup) -> Result<TurnReport, SessionError> {
        let player = self
            .auth
            .current_player()
            .ok_or(SessionError::NoActingPlayer)?;
        self.submit_throws_as(&player, group).await
    }

    /// Submits throws on behalf of `player_id` (shared scoreboard devices).
    ///
    /// Validation happens before anything is sent. The turn is shown
    /// optimistically while the store confirms it and rolled back if the
    /// store refuses. A bust is reported as a non-accepted turn, not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] for invalid turns,
    /// [`SessionError::SubmissionInFlight`] while another turn is pending,
    /// and [`SessionError::Remote`] when the store fails or refuses.
    #[instrument(skip(self, group), fields(session_id = %self.sync.session_id(), group = %group))]
    pub async fn submit_throws_as(
        &self,
        player_id: &str,
        group: ThrowGroup,
    ) -> Result<TurnReport, SessionError> {
        let (ticket, turn) = self.sync.with_sequencer(|seq| {
            if seq.is_submitting() {
                return Err(SessionError::SubmissionInFlight);
            }
            let turn = ScoreValidator::apply(seq.confirmed(), player_id, &group)?;
            let ticket = seq.begin(turn.clone())?;
            Ok((ticket, turn))
        })?;
        debug!(event = %turn.event(), "Turn applied locally, submitting");

        match self.sync.submit_turn(&turn).await {
            Ok(fresh) => {
                let had_fresh = fresh.is_some();
                let outcome = self.sync.with_sequencer(|seq| seq.confirm(ticket, fresh));
                match outcome {
                    Confirmation::Stale => return Err(SessionError::ViewClosed),
                    Confirmation::Superseded => self.refetch_quietly().await,
                    Confirmation::Applied if !had_fresh && !self.sync.push_connected() => {
                        self.refetch_quietly().await
                    }
                    Confirmation::Applied => {}
                }
                self.sync.record_marker();
                info!(event = %turn.event(), "Turn confirmed");
                Ok(TurnReport {
                    event: *turn.event(),
                    snapshot: self.state(),
                })
            }
            Err(err) => {
                self.sync.with_sequencer(|seq| seq.rollback(ticket));
                warn!(error = %err, "Turn not confirmed, rolled back");
                if matches!(err, SessionError::Remote(RemoteError::Rejected(_))) {
                    // local and remote rules disagree; the store wins
                    self.refetch_quietly().await;
                }
                Err(err)
            }
        }
    }

    /// Current snapshot. Two calls without an intervening change are equal.
    pub fn state(&self) -> SessionSnapshot {
        self.sync.snapshot()
    }

    /// Receives a new snapshot whenever the session changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.sync.subscribe()
    }

    /// Current push-channel state.
    pub fn connection(&self) -> ConnectionStatus {
        self.sync.connection()
    }

    /// Receives push-channel state changes.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.sync.subscribe_connection()
    }

    /// Completes the session with `winner_id`.
    ///
    /// Also confirms a win the rule table already detected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownPlayer`] for a player not seated,
    /// [`SessionError::InvalidTransition`] if the session is not in
    /// progress, or the remote failure.
    #[instrument(skip(self), fields(session_id = %self.sync.session_id()))]
    pub async fn end_game(&self, winner_id: &str) -> Result<SessionSnapshot, SessionError> {
        let session = self.idle_session()?;
        if session.player(winner_id).is_none() {
            return Err(SessionError::UnknownPlayer(winner_id.to_string()));
        }
        match session.status() {
            SessionStatus::InProgress => {}
            SessionStatus::Completed if session.winner().as_deref() == Some(winner_id) => {}
            other => {
                return Err(SessionError::InvalidTransition {
                    from: *other,
                    to: SessionStatus::Completed,
                });
            }
        }
        self.write_status(SessionStatus::Completed, Some(winner_id.to_string()))
            .await
    }

    /// Cancels the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] if the session is not
    /// in progress, or the remote failure.
    #[instrument(skip(self), fields(session_id = %self.sync.session_id()))]
    pub async fn cancel_game(&self) -> Result<SessionSnapshot, SessionError> {
        let session = self.idle_session()?;
        if !session.status().can_transition_to(SessionStatus::Cancelled) {
            return Err(SessionError::InvalidTransition {
                from: *session.status(),
                to: SessionStatus::Cancelled,
            });
        }
        self.write_status(SessionStatus::Cancelled, None).await
    }

    /// Refetches the session now. The way back after a disconnect.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be reached.
    pub async fn refresh(&self) -> Result<SessionSnapshot, SessionError> {
        self.sync.refetch().await
    }

    /// Opens the push channel if the view is not already open.
    ///
    /// The new view refetches the session first, so changes made while it
    /// was closed show up without waiting for the next notification.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the view's tasks
    /// are spawned on the current one.
    pub fn enter_view(&self) {
        let mut view = self.lock_view();
        if view.is_none() {
            *view = Some(self.sync.open_view());
        }
    }

    /// Closes the push channel and drops any in-flight optimistic turn.
    pub fn leave_view(&self) {
        let guard = self.lock_view().take();
        drop(guard);
    }

    /// Closes and reopens the view, resetting the reconnect budget.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like
    /// [`GameSession::enter_view`].
    pub fn reconnect(&self) {
        self.leave_view();
        self.enter_view();
    }

    fn lock_view(&self) -> MutexGuard<'_, Option<ViewGuard>> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn idle_session(&self) -> Result<crate::session::Session, SessionError> {
        self.sync.with_sequencer(|seq| {
            if seq.is_submitting() {
                Err(SessionError::SubmissionInFlight)
            } else {
                Ok(seq.confirmed().clone())
            }
        })
    }

    async fn write_status(
        &self,
        status: SessionStatus,
        winner: Option<PlayerId>,
    ) -> Result<SessionSnapshot, SessionError> {
        match self.sync.update_status(status, winner.clone()).await {
            Ok(fresh) => {
                let had_fresh = fresh.is_some();
                self.sync.with_sequencer(|seq| {
                    if *seq.confirmed().status() != status
                        && let Err(err) = seq.transition(status, winner)
                    {
                        warn!(error = %err, "Local status change refused");
                    }
                    if let Some(fresh) = fresh {
                        seq.replace(fresh);
                    }
                });
                if !had_fresh && !self.sync.push_connected() {
                    self.refetch_quietly().await;
                }
                self.sync.record_marker();
                info!(%status, "Session status written");
                Ok(self.state())
            }
            Err(err) => {
                warn!(error = %err, %status, "Status change failed");
                if matches!(err, SessionError::Remote(RemoteError::Rejected(_))) {
                    self.refetch_quietly().await;
                }
                Err(err)
            }
        }
    }

    async fn refetch_quietly(&self) {
        if let Err(err) = self.sync.refetch().await {
            warn!(error = %err, "Refetch failed");
        }
    }
}
