//! In-process authoritative store.
//!
//! Backs hot-seat play on one machine and the test-suite. It scores turns
//! with the same rule table as the client, bumps the revision on every
//! write and notifies subscribers, so the engine sees it exactly as it
//! would see a remote server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use oche_rules::{Seat, TurnEvent, Variant, score_delta};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::wire::{
    ChangeKind, ChangeNotification, SessionPayload, StatusUpdateRequest, SubmitTurnRequest,
};
use super::{PushChannel, RemoteError, RemoteStore};
use crate::session::{Session, SessionId, SessionStatus};

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Default)]
struct Faults {
    transient_fetches: u32,
    transient_writes: u32,
    reject_next_write: Option<String>,
    unauthorized: bool,
    refuse_subscriptions: bool,
    omit_snapshots: bool,
    write_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoreState {
    sessions: HashMap<SessionId, Session>,
    subscribers: Vec<(SessionId, mpsc::Sender<ChangeNotification>)>,
    faults: Faults,
    next_id: u64,
    fetches: u64,
    writes: u64,
}

/// Shared in-memory store implementing [`RemoteStore`] and [`PushChannel`].
#[derive(Debug, Clone, Default)]
pub struct StandaloneStore {
    inner: Arc<Mutex<StoreState>>,
}

impl StandaloneStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a pending session, standing in for the session-creation flow.
    #[instrument(skip(self, seats), fields(players = seats.len()))]
    pub fn create_session(&self, variant: Variant, seats: &[Seat]) -> SessionId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("local-{}", state.next_id);
        state
            .sessions
            .insert(id.clone(), Session::new(id.clone(), variant, seats));
        info!(session_id = %id, "Created standalone session");
        id
    }

    /// Stores a snapshot as-is, replacing any session with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Protocol`] if the payload does not rebuild.
    pub fn insert(&self, payload: SessionPayload) -> Result<(), RemoteError> {
        let session =
            Session::from_payload(payload).map_err(|e| RemoteError::Protocol(e.to_string()))?;
        self.lock().sessions.insert(session.id().clone(), session);
        Ok(())
    }

    /// Current snapshot of a session.
    pub fn session(&self, session_id: &str) -> Option<SessionPayload> {
        self.lock().sessions.get(session_id).map(Session::to_payload)
    }

    /// Open subscriptions for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|(id, _)| id == session_id)
            .count()
    }

    /// Number of fetches served, failed ones included.
    pub fn fetch_count(&self) -> u64 {
        self.lock().fetches
    }

    /// Number of writes attempted, failed ones included.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// The next `count` fetches fail as if the network dropped.
    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().faults.transient_fetches = count;
    }

    /// The next `count` writes fail as if the network dropped.
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().faults.transient_writes = count;
    }

    /// The next write is refused with `reason`.
    pub fn reject_next_write(&self, reason: impl Into<String>) {
        self.lock().faults.reject_next_write = Some(reason.into());
    }

    /// Every call fails with [`RemoteError::Unauthorized`] until restored.
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().faults.unauthorized = unauthorized;
    }

    /// Refuses new push subscriptions.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.lock().faults.refuse_subscriptions = refuse;
    }

    /// Writes answer without a snapshot, forcing clients to refetch.
    pub fn omit_snapshots(&self, omit: bool) {
        self.lock().faults.omit_snapshots = omit;
    }

    /// Delays write responses after the write has landed and been broadcast.
    pub fn delay_writes(&self, delay: Option<Duration>) {
        self.lock().faults.write_delay = delay;
    }

    /// Closes every open subscription, as a server restart would.
    pub fn drop_subscribers(&self) {
        let dropped = std::mem::take(&mut self.lock().subscribers);
        info!(count = dropped.len(), "Dropped push subscribers");
    }

    /// Applies a turn directly, as another client would.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteStore::submit_turn`].
    pub fn apply_turn(&self, request: &SubmitTurnRequest) -> Result<SessionPayload, RemoteError> {
        let mut state = self.lock();
        let payload = write_turn(&mut state, request)?;
        notify(&mut state, &request.session_id, ChangeKind::TurnSubmitted);
        Ok(payload)
    }

    /// Changes a session's status directly, as another client would.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteStore::update_status`].
    pub fn apply_status(
        &self,
        session_id: &str,
        request: &StatusUpdateRequest,
    ) -> Result<SessionPayload, RemoteError> {
        let mut state = self.lock();
        let payload = write_status(&mut state, session_id, request)?;
        notify(&mut state, session_id, ChangeKind::StatusChanged);
        Ok(payload)
    }

    /// Checks faults for a write; `Ok` means the write may proceed.
    fn write_faults(&self) -> Result<Option<Duration>, RemoteError> {
        let mut state = self.lock();
        state.writes += 1;
        let faults = &mut state.faults;
        if faults.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if faults.transient_writes > 0 {
            faults.transient_writes -= 1;
            return Err(RemoteError::Transport("connection reset (injected)".into()));
        }
        if let Some(reason) = faults.reject_next_write.take() {
            return Err(RemoteError::Rejected(reason));
        }
        Ok(faults.write_delay)
    }

    async fn respond(
        &self,
        payload: SessionPayload,
        delay: Option<Duration>,
    ) -> Option<SessionPayload> {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.lock().faults.omit_snapshots {
            None
        } else {
            Some(payload)
        }
    }
}

#[async_trait]
impl RemoteStore for StandaloneStore {
    #[instrument(skip(self))]
    async fn fetch_session(&self, session_id: &str) -> Result<SessionPayload, RemoteError> {
        let mut state = self.lock();
        state.fetches += 1;
        if state.faults.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.faults.transient_fetches > 0 {
            state.faults.transient_fetches -= 1;
            return Err(RemoteError::Timeout);
        }
        state
            .sessions
            .get(session_id)
            .map(Session::to_payload)
            .ok_or_else(|| RemoteError::NotFound(session_id.to_string()))
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id, player_id = %request.player_id))]
    async fn submit_turn(
        &self,
        request: &SubmitTurnRequest,
    ) -> Result<Option<SessionPayload>, RemoteError> {
        let delay = self.write_faults()?;
        let payload = {
            let mut state = self.lock();
            let payload = write_turn(&mut state, request)?;
            notify(&mut state, &request.session_id, ChangeKind::TurnSubmitted);
            payload
        };
        Ok(self.respond(payload, delay).await)
    }

    #[instrument(skip(self, request), fields(status = %request.status))]
    async fn update_status(
        &self,
        session_id: &str,
        request: &StatusUpdateRequest,
    ) -> Result<Option<SessionPayload>, RemoteError> {
        let delay = self.write_faults()?;
        let payload = {
            let mut state = self.lock();
            let payload = write_status(&mut state, session_id, request)?;
            notify(&mut state, session_id, ChangeKind::StatusChanged);
            payload
        };
        Ok(self.respond(payload, delay).await)
    }
}

#[async_trait]
impl PushChannel for StandaloneStore {
    #[instrument(skip(self))]
    async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<ChangeNotification>, RemoteError> {
        let mut state = self.lock();
        if state.faults.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.faults.refuse_subscriptions {
            return Err(RemoteError::Transport("subscription refused (injected)".into()));
        }
        if !state.sessions.contains_key(session_id) {
            return Err(RemoteError::NotFound(session_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        state.subscribers.push((session_id.to_string(), tx));
        debug!(subscribers = state.subscribers.len(), "Subscriber added");
        Ok(rx)
    }
}

fn write_turn(
    state: &mut StoreState,
    request: &SubmitTurnRequest,
) -> Result<SessionPayload, RemoteError> {
    let session = state
        .sessions
        .get_mut(&request.session_id)
        .ok_or_else(|| RemoteError::NotFound(request.session_id.clone()))?;

    if *session.status() != SessionStatus::InProgress {
        return Err(RemoteError::Rejected(format!(
            "session is {}",
            session.status()
        )));
    }
    if request.turn_number != session.turn_number() + 1 {
        return Err(RemoteError::Rejected(format!(
            "expected turn {}, got {}",
            session.turn_number() + 1,
            request.turn_number
        )));
    }
    let active = *session.active_index();
    if session.players().get(active).map(|p| p.id()) != Some(&request.player_id) {
        return Err(RemoteError::Rejected(format!(
            "{} is not the active player",
            request.player_id
        )));
    }

    let delta = score_delta(session.players(), active, &request.throws)
        .map_err(|e| RemoteError::Rejected(e.to_string()))?;
    let event = *delta.event();
    session.set_player_state(active, delta.into_state());
    if event == TurnEvent::Win {
        session
            .transition(SessionStatus::Completed, Some(request.player_id.clone()))
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
    } else {
        session.advance_turn();
    }
    session.bump_revision();
    info!(
        %event,
        revision = *session.revision(),
        turn_number = *session.turn_number(),
        "Turn written"
    );
    Ok(session.to_payload())
}

fn write_status(
    state: &mut StoreState,
    session_id: &str,
    request: &StatusUpdateRequest,
) -> Result<SessionPayload, RemoteError> {
    let session = state
        .sessions
        .get_mut(session_id)
        .ok_or_else(|| RemoteError::NotFound(session_id.to_string()))?;

    let repeat_completion = *session.status() == SessionStatus::Completed
        && request.status == SessionStatus::Completed
        && session.winner() == &request.winner;
    if repeat_completion {
        debug!("Completion already recorded");
        return Ok(session.to_payload());
    }
    if request.status == SessionStatus::Completed {
        match &request.winner {
            Some(winner) if session.player(winner).is_some() => {}
            Some(winner) => {
                return Err(RemoteError::Rejected(format!("{winner} is not seated")));
            }
            None => return Err(RemoteError::Rejected("completion needs a winner".into())),
        }
    }

    session
        .transition(request.status, request.winner.clone())
        .map_err(|e| RemoteError::Rejected(e.to_string()))?;
    session.bump_revision();
    info!(status = %request.status, revision = *session.revision(), "Status written");
    Ok(session.to_payload())
}

fn notify(state: &mut StoreState, session_id: &str, change_kind: ChangeKind) {
    let note = ChangeNotification {
        session_id: session_id.to_string(),
        change_kind,
    };
    state.subscribers.retain(|(id, tx)| {
        if id != session_id {
            return !tx.is_closed();
        }
        match tx.try_send(note.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Subscriber lagging, notification dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use oche_rules::Throw;

    fn started(store: &StandaloneStore) -> SessionId {
        let id = store.create_session(
            Variant::Classic501,
            &[Seat::new("a", "Alice"), Seat::new("b", "Bob")],
        );
        store
            .apply_status(
                &id,
                &StatusUpdateRequest {
                    status: SessionStatus::InProgress,
                    winner: None,
                },
            )
            .expect("start");
        id
    }

    fn turn(id: &str, player: &str, number: u32) -> SubmitTurnRequest {
        SubmitTurnRequest {
            session_id: id.to_string(),
            player_id: player.to_string(),
            turn_number: number,
            throws: vec![Throw::treble(20)].into(),
        }
    }

    #[tokio::test]
    async fn test_write_bumps_revision_and_notifies() {
        let store = StandaloneStore::new();
        let id = started(&store);
        let mut rx = store.subscribe(&id).await.expect("subscribe");

        let payload = store
            .submit_turn(&turn(&id, "a", 1))
            .await
            .expect("write")
            .expect("snapshot");
        assert_eq!(payload.revision, 2);
        assert_eq!(payload.active_index, 1);

        let note = rx.recv().await.expect("notification");
        assert_eq!(note.session_id, id);
        assert_eq!(note.change_kind, ChangeKind::TurnSubmitted);
    }

    #[tokio::test]
    async fn test_rejects_out_of_turn_and_stale_numbers() {
        let store = StandaloneStore::new();
        let id = started(&store);
        assert!(matches!(
            store.submit_turn(&turn(&id, "b", 1)).await,
            Err(RemoteError::Rejected(_))
        ));
        assert!(matches!(
            store.submit_turn(&turn(&id, "a", 3)).await,
            Err(RemoteError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = StandaloneStore::new();
        let id = started(&store);

        store.fail_next_fetches(1);
        assert_eq!(store.fetch_session(&id).await, Err(RemoteError::Timeout));
        assert!(store.fetch_session(&id).await.is_ok());

        store.reject_next_write("nope");
        assert_eq!(
            store.submit_turn(&turn(&id, "a", 1)).await,
            Err(RemoteError::Rejected("nope".into()))
        );

        store.set_unauthorized(true);
        assert_eq!(store.fetch_session(&id).await, Err(RemoteError::Unauthorized));
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let store = StandaloneStore::new();
        let id = started(&store);
        let rx = store.subscribe(&id).await.expect("subscribe");
        assert_eq!(store.subscriber_count(&id), 1);
        drop(rx);
        assert_eq!(store.subscriber_count(&id), 0);
    }
}
