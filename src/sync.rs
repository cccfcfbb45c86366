//! Keeps the local session consistent with the authoritative store.
//!
//! Every "session changed" notification triggers a full refetch that
//! replaces the local session; nothing is merged field by field. Writes go
//! out with bounded retry. The push channel (and the optional polling
//! fallback) live exactly as long as a [`ViewGuard`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use derive_more::Display;
use oche_rules::PlayerId;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::auth::Authenticator;
use crate::config::SyncConfig;
use crate::error::SessionError;
use crate::marker::{ActivePlayerMarker, MarkerStore};
use crate::remote::{
    PushChannel, RemoteError, RemoteStore, SessionPayload, StatusUpdateRequest, SubmitTurnRequest,
    retry_transient,
};
use crate::sequencer::{Replacement, TurnSequencer};
use crate::session::{Session, SessionId, SessionSnapshot, SessionStatus};
use crate::validator::AppliedTurn;

/// State of the push channel as shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No view is open.
    #[display("closed")]
    Closed,
    /// First connection attempt in progress.
    #[display("connecting")]
    Connecting,
    /// Notifications are flowing.
    #[display("connected")]
    Connected,
    /// The channel dropped; trying again.
    #[display("reconnecting (attempt {})", attempt)]
    Reconnecting {
        /// Reconnect attempt, starting at 1.
        attempt: u32,
    },
    /// Gave up reconnecting. Only a manual refresh updates the view.
    #[display("disconnected")]
    Disconnected,
}

struct Shared {
    session_id: SessionId,
    remote: Arc<dyn RemoteStore>,
    push: Arc<dyn PushChannel>,
    auth: Arc<dyn Authenticator>,
    config: SyncConfig,
    marker: Option<MarkerStore>,
    sequencer: Mutex<TurnSequencer>,
    snapshots: watch::Sender<SessionSnapshot>,
    connection: watch::Sender<ConnectionStatus>,
    // bumped whenever a view opens or closes; tasks from an old view go quiet
    view_epoch: AtomicU64,
}

/// Owner of the local session and its link to the remote store.
#[derive(Clone)]
pub struct SessionSynchronizer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSynchronizer")
            .field("session_id", &self.shared.session_id)
            .field("connection", &self.connection())
            .finish_non_exhaustive()
    }
}

impl SessionSynchronizer {
    /// Fetches the session and builds the local state from it.
    ///
    /// With a `marker`, every confirmed turn and every applied refetch is
    /// recorded there for [`GameSession::resume`](crate::GameSession::resume).
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be reached, refuses the fetch, or returns
    /// a snapshot that does not rebuild.
    #[instrument(skip(remote, push, auth, config, marker))]
    pub async fn load(
        session_id: &str,
        remote: Arc<dyn RemoteStore>,
        push: Arc<dyn PushChannel>,
        auth: Arc<dyn Authenticator>,
        config: SyncConfig,
        marker: Option<MarkerStore>,
    ) -> Result<Self, SessionError> {
        let payload = retry_transient(config.submit_policy(), "fetch_session", || {
            remote.fetch_session(session_id)
        })
        .await
        .inspect_err(|err| escalate(auth.as_ref(), err))?;
        let session = rebuild(session_id, payload)?;
        info!(
            variant = %session.variant(),
            status = %session.status(),
            players = session.players().len(),
            "Session loaded"
        );

        let sequencer = TurnSequencer::new(session);
        let (snapshots, _) = watch::channel(sequencer.snapshot());
        let (connection, _) = watch::channel(ConnectionStatus::Closed);
        Ok(Self {
            shared: Arc::new(Shared {
                session_id: session_id.to_string(),
                remote,
                push,
                auth,
                config,
                marker,
                sequencer: Mutex::new(sequencer),
                snapshots,
                connection,
                view_epoch: AtomicU64::new(0),
            }),
        })
    }

    /// Session this synchronizer tracks.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Receives every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Current push-channel state.
    pub fn connection(&self) -> ConnectionStatus {
        *self.shared.connection.borrow()
    }

    /// Receives push-channel state changes.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.connection.subscribe()
    }

    /// Returns true while push notifications are flowing.
    pub fn push_connected(&self) -> bool {
        self.connection() == ConnectionStatus::Connected
    }

    /// Runs `f` on the sequencer and publishes the resulting snapshot.
    ///
    /// Subscribers are only woken when the snapshot actually changed.
    pub fn with_sequencer<R>(&self, f: impl FnOnce(&mut TurnSequencer) -> R) -> R {
        let mut sequencer = self.lock_sequencer();
        let out = f(&mut sequencer);
        let next = sequencer.snapshot();
        self.shared.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        out
    }

    fn lock_sequencer(&self) -> MutexGuard<'_, TurnSequencer> {
        self.shared
            .sequencer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetches the full session and replaces the local copy with it.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be reached or the snapshot is unusable;
    /// the local session is left untouched.
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn refetch(&self) -> Result<SessionSnapshot, SessionError> {
        let payload = retry_transient(self.shared.config.submit_policy(), "fetch_session", || {
            self.shared.remote.fetch_session(&self.shared.session_id)
        })
        .await
        .inspect_err(|err| self.escalate(err))?;
        let session = rebuild(&self.shared.session_id, payload)?;
        let outcome = self.with_sequencer(|seq| seq.replace(session));
        debug!(%outcome, "Refetch complete");
        if outcome == Replacement::Applied {
            self.record_marker();
        }
        Ok(self.snapshot())
    }

    /// Writes the confirmed turn to the active-player marker, or removes
    /// the marker once the session has ended.
    ///
    /// Marker failures are logged, never returned.
    pub fn record_marker(&self) {
        let Some(store) = &self.shared.marker else {
            return;
        };
        let session = self.lock_sequencer().confirmed().clone();
        let result = if session.status().is_terminal() {
            store.clear()
        } else {
            store.save(&ActivePlayerMarker::new(
                session.id().clone(),
                self.shared.auth.current_player(),
                *session.turn_number(),
            ))
        };
        if let Err(err) = result {
            warn!(error = %err, "Could not update active-player marker");
        }
    }

    /// Sends a turn to the store.
    ///
    /// Returns the store's fresh session when it sends one back. A fresh
    /// snapshot that does not rebuild is dropped with a warning; the
    /// caller refetches instead.
    ///
    /// # Errors
    ///
    /// Returns the remote failure after retries; authorization failures
    /// are also reported to the authenticator.
    #[instrument(skip(self, turn), fields(session_id = %self.shared.session_id, player_id = %turn.player_id(), turn_number = *turn.turn_number()))]
    pub async fn submit_turn(&self, turn: &AppliedTurn) -> Result<Option<Session>, SessionError> {
        let request = SubmitTurnRequest {
            session_id: self.shared.session_id.clone(),
            player_id: turn.player_id().clone(),
            turn_number: *turn.turn_number(),
            throws: turn.group().clone(),
        };
        let fresh = retry_transient(self.shared.config.submit_policy(), "submit_turn", || {
            self.shared.remote.submit_turn(&request)
        })
        .await
        .inspect_err(|err| self.escalate(err))?;
        Ok(self.rebuild_fresh(fresh))
    }

    /// Sends a status change to the store.
    ///
    /// # Errors
    ///
    /// Same as [`SessionSynchronizer::submit_turn`].
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn update_status(
        &self,
        status: SessionStatus,
        winner: Option<PlayerId>,
    ) -> Result<Option<Session>, SessionError> {
        let request = StatusUpdateRequest { status, winner };
        let fresh = retry_transient(self.shared.config.submit_policy(), "update_status", || {
            self.shared
                .remote
                .update_status(&self.shared.session_id, &request)
        })
        .await
        .inspect_err(|err| self.escalate(err))?;
        Ok(self.rebuild_fresh(fresh))
    }

    fn rebuild_fresh(&self, fresh: Option<SessionPayload>) -> Option<Session> {
        let payload = fresh?;
        match rebuild(&self.shared.session_id, payload) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(error = %err, "Ignoring unusable snapshot in write response");
                None
            }
        }
    }

    fn escalate(&self, err: &RemoteError) {
        escalate(self.shared.auth.as_ref(), err);
    }

    /// Opens the push channel (and polling, if configured) for a view.
    ///
    /// Everything is torn down when the returned guard drops.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub fn open_view(&self) -> ViewGuard {
        let epoch = self.shared.view_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_connection(epoch, ConnectionStatus::Connecting);

        let mut tasks = vec![tokio::spawn(run_push(self.clone(), epoch)).abort_handle()];
        if let Some(interval) = self.shared.config.poll_interval() {
            info!(interval_ms = interval.as_millis() as u64, "Polling fallback enabled");
            tasks.push(tokio::spawn(run_poll(self.clone(), epoch, interval)).abort_handle());
        }
        info!("View opened");
        ViewGuard {
            sync: self.clone(),
            tasks,
        }
    }

    /// Publishes a connection state if `epoch` is still the current view.
    fn set_connection(&self, epoch: u64, status: ConnectionStatus) -> bool {
        let shared = &self.shared;
        shared.connection.send_if_modified(|current| {
            if shared.view_epoch.load(Ordering::SeqCst) != epoch || *current == status {
                return false;
            }
            debug!(from = %current, to = %status, "Connection state");
            *current = status;
            true
        })
    }

    fn view_is_current(&self, epoch: u64) -> bool {
        self.shared.view_epoch.load(Ordering::SeqCst) == epoch
    }
}

/// Keeps a session view open; dropping it closes the view.
///
/// Closing aborts the push and polling tasks and discards any in-flight
/// optimistic turn without a remote rollback.
pub struct ViewGuard {
    sync: SessionSynchronizer,
    tasks: Vec<AbortHandle>,
}

impl std::fmt::Debug for ViewGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewGuard")
            .field("session_id", &self.sync.session_id())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        let shared = &self.sync.shared;
        let epoch = shared.view_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(turn) = self.sync.with_sequencer(|seq| seq.discard_pending()) {
            info!(player_id = %turn.player_id(), "Discarded in-flight turn on view close");
        }
        self.sync.set_connection(epoch, ConnectionStatus::Closed);
        info!(session_id = %shared.session_id, "View closed");
    }
}

fn escalate(auth: &dyn Authenticator, err: &RemoteError) {
    if *err == RemoteError::Unauthorized {
        warn!("Store refused credentials, escalating");
        auth.authorization_expired();
    }
}

fn rebuild(session_id: &str, payload: SessionPayload) -> Result<Session, SessionError> {
    if payload.id != session_id {
        return Err(SessionError::WrongSession {
            expected: session_id.to_string(),
            got: payload.id,
        });
    }
    Session::from_payload(payload)
}

/// Push supervisor: subscribe, refetch on every connect and every
/// notification, reconnect with a bounded budget.
///
/// The budget counts consecutive failed attempts; a successful subscribe
/// resets it.
async fn run_push(sync: SessionSynchronizer, epoch: u64) {
    let policy = sync.shared.config.reconnect_policy();
    let mut failures: u32 = 0;
    let mut refetches = JoinSet::new();

    loop {
        match sync.shared.push.subscribe(&sync.shared.session_id).await {
            Ok(mut rx) => {
                if !sync.view_is_current(epoch) {
                    return;
                }
                sync.set_connection(epoch, ConnectionStatus::Connected);
                info!(retries = failures, "Push channel connected");
                failures = 0;
                // anything written while the channel was down or the view closed
                spawn_refetch(&mut refetches, &sync);

                while let Some(note) = rx.recv().await {
                    if note.session_id != sync.shared.session_id {
                        debug!(other = %note.session_id, "Ignoring notification for another session");
                        continue;
                    }
                    debug!(change_kind = %note.change_kind, "Session changed remotely");
                    while refetches.try_join_next().is_some() {}
                    spawn_refetch(&mut refetches, &sync);
                }
                warn!("Push channel dropped");
            }
            Err(err) => {
                escalate(sync.shared.auth.as_ref(), &err);
                if err == RemoteError::Unauthorized {
                    sync.set_connection(epoch, ConnectionStatus::Disconnected);
                    return;
                }
                warn!(error = %err, failures, "Push subscribe failed");
            }
        }

        failures += 1;
        if failures > *policy.attempts() {
            warn!(attempts = *policy.attempts(), "Reconnect budget exhausted");
            sync.set_connection(epoch, ConnectionStatus::Disconnected);
            return;
        }
        sync.set_connection(epoch, ConnectionStatus::Reconnecting { attempt: failures });
        tokio::time::sleep(*policy.delay()).await;
        if !sync.view_is_current(epoch) {
            return;
        }
    }
}

fn spawn_refetch(refetches: &mut JoinSet<()>, sync: &SessionSynchronizer) {
    let sync = sync.clone();
    refetches.spawn(async move {
        if let Err(err) = sync.refetch().await {
            warn!(error = %err, "Refetch after notification failed");
        }
    });
}

/// Polling fallback: refetch on an interval while push is not connected.
async fn run_poll(sync: SessionSynchronizer, epoch: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // the first tick fires at once, catching up on a view that was closed
    loop {
        ticker.tick().await;
        if !sync.view_is_current(epoch) {
            return;
        }
        match sync.connection() {
            ConnectionStatus::Connected => continue,
            ConnectionStatus::Disconnected | ConnectionStatus::Closed => {
                info!("Polling stopped");
                return;
            }
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. } => {}
        }
        debug!("Polling for changes");
        if let Err(err) = sync.refetch().await {
            warn!(error = %err, "Poll refetch failed");
        }
    }
}
