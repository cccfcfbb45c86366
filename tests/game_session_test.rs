//! Tests for the game session facade against the in-process store.

use std::sync::Arc;
use std::time::Duration;

use oche::{
    ConnectionStatus, EngineConfig, GameSession, MarkerStore, Rejection, RemoteError,
    SessionError, SessionSnapshot, SessionStatus, StandaloneStore, StaticCredentials,
    SubmitTurnRequest, SyncConfig, TurnPhase,
};
use oche_rules::{ClassicScore, Seat, Throw, TurnEvent, TurnRecord, Variant, VariantScore};

fn seats() -> Vec<Seat> {
    vec![Seat::new("alice", "Alice"), Seat::new("bob", "Bob")]
}

fn config() -> EngineConfig {
    EngineConfig::default().with_sync(
        SyncConfig::default()
            .with_submit_retry(3, 100)
            .with_reconnect(2, 100),
    )
}

/// Creates a pending session; `alice_remaining` puts Alice close to a finish.
fn table(alice_remaining: Option<u16>) -> (Arc<StandaloneStore>, String) {
    let store = StandaloneStore::new();
    let id = store.create_session(Variant::Classic501, &seats());
    if let Some(remaining) = alice_remaining {
        let mut payload = store.session(&id).expect("Session exists");
        let scored = 501 - remaining;
        let history = vec![
            TurnRecord::new(180, false),
            TurnRecord::new(180, false),
            TurnRecord::new(scored - 360, false),
        ];
        payload.players[0].progress = Some(VariantScore::Classic(ClassicScore::from_parts(
            501, remaining, history,
        )));
        store.insert(payload).expect("Insert failed");
    }
    (Arc::new(store), id)
}

async fn open(store: &Arc<StandaloneStore>, id: &str) -> GameSession {
    open_with(store, id, &config(), Arc::new(StaticCredentials::anonymous())).await
}

async fn open_with(
    store: &Arc<StandaloneStore>,
    id: &str,
    config: &EngineConfig,
    auth: Arc<StaticCredentials>,
) -> GameSession {
    GameSession::open(config, id, store.clone(), store.clone(), auth)
        .await
        .expect("Open failed")
}

fn remaining(snapshot: &SessionSnapshot, player: &str) -> u16 {
    match snapshot.session().player(player).expect("Seated").score() {
        VariantScore::Classic(score) => *score.remaining(),
        other => panic!("Not an X01 score: {:?}", other),
    }
}

fn active(snapshot: &SessionSnapshot) -> Option<String> {
    snapshot.session().active_player().map(|p| p.id().clone())
}

fn other_client_turn(id: &str, player: &str, turn_number: u32) -> SubmitTurnRequest {
    SubmitTurnRequest {
        session_id: id.to_string(),
        player_id: player.to_string(),
        turn_number,
        throws: vec![Throw::single(20)].into(),
    }
}

async fn wait_for(
    game: &GameSession,
    done: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = game.subscribe();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if done(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("Snapshot sender dropped");
        }
    })
    .await
    .expect("Timed out waiting for snapshot")
}

async fn wait_for_connection(game: &GameSession, wanted: ConnectionStatus) {
    let mut rx = game.subscribe_connection();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if *rx.borrow_and_update() == wanted {
                return;
            }
            rx.changed().await.expect("Connection sender dropped");
        }
    })
    .await
    .expect("Timed out waiting for connection state")
}

// ─────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_starts_pending_session() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;

    let state = game.state();
    assert_eq!(*state.session().status(), SessionStatus::InProgress);
    assert_eq!(*state.phase(), TurnPhase::AwaitingThrow);
    assert_eq!(active(&state).as_deref(), Some("alice"));
    assert_eq!(
        store.session(&id).expect("Stored").status,
        SessionStatus::InProgress
    );
}

#[tokio::test]
async fn test_open_unknown_session_fails() {
    let store = Arc::new(StandaloneStore::new());
    let result = GameSession::open(
        &config(),
        "nope",
        store.clone(),
        store,
        Arc::new(StaticCredentials::anonymous()),
    )
    .await;
    assert!(matches!(
        result,
        Err(SessionError::Remote(RemoteError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_state_is_stable_between_changes() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    assert_eq!(game.state(), game.state());
}

#[tokio::test]
async fn test_end_game_completes_with_winner() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;

    let state = game.end_game("bob").await.expect("End failed");
    assert_eq!(*state.session().status(), SessionStatus::Completed);
    assert_eq!(state.session().winner().as_deref(), Some("bob"));
    assert_eq!(*state.phase(), TurnPhase::Resolved);

    // repeating the same completion is accepted
    game.end_game("bob").await.expect("Repeat end failed");
    assert!(matches!(
        game.cancel_game().await,
        Err(SessionError::InvalidTransition {
            from: SessionStatus::Completed,
            to: SessionStatus::Cancelled,
        })
    ));
}

#[tokio::test]
async fn test_end_game_rejects_unseated_winner() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    assert_eq!(
        game.end_game("zed").await,
        Err(SessionError::UnknownPlayer("zed".into()))
    );
    assert_eq!(*game.state().session().status(), SessionStatus::InProgress);
}

#[tokio::test]
async fn test_cancel_blocks_further_turns() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;

    let state = game.cancel_game().await.expect("Cancel failed");
    assert_eq!(*state.session().status(), SessionStatus::Cancelled);
    assert_eq!(
        game.submit_throws_as("alice", vec![Throw::single(1)].into())
            .await,
        Err(SessionError::Rejected(Rejection::GameAlreadyCompleted))
    );
}

// ─────────────────────────────────────────────────────────────
// Turns
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_accepted_turn_passes_to_next_player() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;

    let report = game
        .submit_throws_as("alice", vec![Throw::treble(20); 3].into())
        .await
        .expect("Submit failed");
    assert!(report.accepted());
    assert_eq!(*report.event(), TurnEvent::Accepted);

    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(remaining(&state, "alice"), 321);
    assert_eq!(active(&state).as_deref(), Some("bob"));
    assert_eq!(store.session(&id).expect("Stored").turn_number, 1);
}

#[tokio::test]
async fn test_bust_consumes_turn_without_scoring() {
    let (store, id) = table(Some(40));
    let game = open(&store, &id).await;

    let report = game
        .submit_throws_as("alice", vec![Throw::treble(20)].into())
        .await
        .expect("Submit failed");
    assert!(!report.accepted());
    assert_eq!(report.reason(), Some(Rejection::Bust));

    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(remaining(&state, "alice"), 40);
    assert_eq!(active(&state).as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_double_out_wins() {
    let (store, id) = table(Some(40));
    let game = open(&store, &id).await;

    let report = game
        .submit_throws_as("alice", vec![Throw::double(20)].into())
        .await
        .expect("Submit failed");
    assert_eq!(*report.event(), TurnEvent::Win);

    let state = wait_for(&game, |s| s.session().status().is_terminal()).await;
    assert_eq!(*state.session().status(), SessionStatus::Completed);
    assert_eq!(state.session().winner().as_deref(), Some("alice"));
    assert_eq!(*state.phase(), TurnPhase::Resolved);
    assert_eq!(
        store.session(&id).expect("Stored").winner.as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn test_invalid_turns_never_reach_the_store() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    let writes = store.write_count();

    assert_eq!(
        game.submit_throws_as("bob", vec![Throw::single(1)].into())
            .await,
        Err(SessionError::Rejected(Rejection::NotActivePlayer {
            player: "bob".into(),
            active: Some("alice".into()),
        }))
    );
    assert_eq!(
        game.submit_throws_as("alice", vec![Throw::new(21, 1)].into())
            .await,
        Err(SessionError::Rejected(Rejection::InvalidThrowValue {
            target: 21,
            multiplier: 1,
        }))
    );
    assert_eq!(
        game.submit_throws_as("alice", vec![Throw::single(1); 4].into())
            .await,
        Err(SessionError::Rejected(Rejection::InvalidThrowCount { count: 4 }))
    );
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_submit_without_signed_in_player() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    assert_eq!(
        game.submit_throws(vec![Throw::single(1)].into()).await,
        Err(SessionError::NoActingPlayer)
    );
}

#[tokio::test]
async fn test_submit_as_signed_in_player() {
    let (store, id) = table(None);
    let auth = Arc::new(StaticCredentials::new(Some("alice".into()), None));
    let game = open_with(&store, &id, &config(), auth).await;

    let report = game
        .submit_throws(vec![Throw::single(20)].into())
        .await
        .expect("Submit failed");
    assert!(report.accepted());
}

#[tokio::test(start_paused = true)]
async fn test_second_submit_while_in_flight_is_refused() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    store.delay_writes(Some(Duration::from_millis(500)));

    let first = game.submit_throws_as("alice", vec![Throw::treble(20); 3].into());
    let second = async {
        let optimistic = wait_for(&game, |s| *s.phase() == TurnPhase::Submitting).await;
        assert_eq!(remaining(&optimistic, "alice"), 321);
        game.submit_throws_as("alice", vec![Throw::single(1)].into())
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.expect("First submit failed").accepted());
    assert_eq!(second, Err(SessionError::SubmissionInFlight));

    // the echo of our own write arrived mid-flight; both paths agree
    let state = wait_for(&game, |s| *s.phase() == TurnPhase::AwaitingThrow).await;
    let stored = store.session(&id).expect("Stored");
    assert_eq!(*state.session().revision(), stored.revision);
    assert_eq!(remaining(&state, "alice"), 321);
    assert_eq!(active(&state).as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_refused_turn_rolls_back() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    let before = game.state();
    store.reject_next_write("turn out of order");

    let result = game
        .submit_throws_as("alice", vec![Throw::treble(20)].into())
        .await;
    assert_eq!(
        result,
        Err(SessionError::Remote(RemoteError::Rejected(
            "turn out of order".into()
        )))
    );
    let after = game.state();
    assert_eq!(*after.phase(), TurnPhase::AwaitingThrow);
    assert_eq!(remaining(&after, "alice"), 501);
    assert_eq!(after.session().turn_number(), before.session().turn_number());
}

#[tokio::test(start_paused = true)]
async fn test_transient_write_failures_are_retried() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    store.fail_next_writes(2);

    let report = game
        .submit_throws_as("alice", vec![Throw::single(20)].into())
        .await
        .expect("Submit failed after retries");
    assert!(report.accepted());
    assert_eq!(store.session(&id).expect("Stored").turn_number, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_roll_back() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    store.fail_next_writes(10);

    let err = game
        .submit_throws_as("alice", vec![Throw::single(20)].into())
        .await
        .expect_err("Submit should fail");
    assert!(err.is_connectivity());
    assert!(matches!(
        err,
        SessionError::Remote(RemoteError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(remaining(&game.state(), "alice"), 501);
    assert_eq!(*game.state().phase(), TurnPhase::AwaitingThrow);
}

#[tokio::test]
async fn test_unauthorized_escalates_to_authenticator() {
    let (store, id) = table(None);
    let auth = Arc::new(StaticCredentials::new(
        Some("alice".into()),
        Some("token".into()),
    ));
    let game = open_with(&store, &id, &config(), auth.clone()).await;
    store.set_unauthorized(true);

    let err = game
        .submit_throws(vec![Throw::single(20)].into())
        .await
        .expect_err("Submit should fail");
    assert!(err.is_unauthorized());
    assert!(auth.is_expired());
    assert_eq!(*game.state().phase(), TurnPhase::AwaitingThrow);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_view_discards_in_flight_turn() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    store.delay_writes(Some(Duration::from_millis(500)));

    let submit = game.submit_throws_as("alice", vec![Throw::single(20)].into());
    let leave = async {
        wait_for(&game, |s| *s.phase() == TurnPhase::Submitting).await;
        game.leave_view();
    };
    let (result, ()) = tokio::join!(submit, leave);

    assert_eq!(result, Err(SessionError::ViewClosed));
    assert_eq!(game.connection(), ConnectionStatus::Closed);
    assert_eq!(*game.state().phase(), TurnPhase::AwaitingThrow);
}

// ─────────────────────────────────────────────────────────────
// Synchronization
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_change_is_refetched() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    wait_for_connection(&game, ConnectionStatus::Connected).await;

    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");

    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(remaining(&state, "alice"), 481);
    assert_eq!(active(&state).as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_remote_cancel_resolves_view() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    wait_for_connection(&game, ConnectionStatus::Connected).await;

    store
        .apply_status(
            &id,
            &oche::StatusUpdateRequest {
                status: SessionStatus::Cancelled,
                winner: None,
            },
        )
        .expect("Remote cancel failed");

    let state = wait_for(&game, |s| *s.phase() == TurnPhase::Resolved).await;
    assert_eq!(*state.session().status(), SessionStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_missed_changes_are_picked_up_after_reconnect() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    wait_for_connection(&game, ConnectionStatus::Connected).await;

    store.drop_subscribers();
    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");

    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(active(&state).as_deref(), Some("bob"));
    wait_for_connection(&game, ConnectionStatus::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_push_gives_up_after_reconnect_budget() {
    let (store, id) = table(None);
    store.refuse_subscriptions(true);
    let game = open(&store, &id).await;

    wait_for_connection(&game, ConnectionStatus::Disconnected).await;
    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");

    store.refuse_subscriptions(false);
    game.reconnect();
    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(active(&state).as_deref(), Some("bob"));
    wait_for_connection(&game, ConnectionStatus::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_while_disconnected() {
    let (store, id) = table(None);
    store.refuse_subscriptions(true);
    let game = open(&store, &id).await;
    wait_for_connection(&game, ConnectionStatus::Disconnected).await;

    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");
    let state = game.refresh().await.expect("Refresh failed");
    assert_eq!(*state.session().turn_number(), 1);
    assert_eq!(game.connection(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_reentered_view_catches_up() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    wait_for_connection(&game, ConnectionStatus::Connected).await;

    game.leave_view();
    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");
    game.enter_view();

    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(active(&state).as_deref(), Some("bob"));
    let report = game
        .submit_throws_as("bob", vec![Throw::single(20)].into())
        .await
        .expect("Bob's turn refused");
    assert!(report.accepted());
    assert_eq!(store.session(&id).expect("Stored").turn_number, 2);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_drops_do_not_spend_reconnect_budget() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;

    // budget is two attempts; each drop is followed by a good reconnect
    for _ in 0..4 {
        wait_for_connection(&game, ConnectionStatus::Connected).await;
        store.drop_subscribers();
        wait_for_connection(&game, ConnectionStatus::Reconnecting { attempt: 1 }).await;
    }
    wait_for_connection(&game, ConnectionStatus::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_polling_covers_for_missing_push() {
    let (store, id) = table(None);
    store.refuse_subscriptions(true);
    let config = EngineConfig::default().with_sync(
        SyncConfig::default()
            .with_reconnect(1_000, 1_000)
            .with_poll_interval(Some(200)),
    );
    let game = open_with(&store, &id, &config, Arc::new(StaticCredentials::anonymous())).await;

    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");
    let state = wait_for(&game, |s| *s.session().turn_number() == 1).await;
    assert_eq!(active(&state).as_deref(), Some("bob"));
    assert!(matches!(
        game.connection(),
        ConnectionStatus::Reconnecting { .. }
    ));
}

#[tokio::test]
async fn test_write_without_snapshot_still_converges() {
    let (store, id) = table(None);
    let game = open(&store, &id).await;
    store.omit_snapshots(true);

    game.submit_throws_as("alice", vec![Throw::treble(20)].into())
        .await
        .expect("Submit failed");

    let state = wait_for(&game, |s| {
        *s.session().revision() == 2 && *s.phase() == TurnPhase::AwaitingThrow
    })
    .await;
    assert_eq!(remaining(&state, "alice"), 441);
    assert_eq!(active(&state).as_deref(), Some("bob"));
}

// ─────────────────────────────────────────────────────────────
// Resume
// ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_marker_tracks_session_and_resumes() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let marker_path = dir.path().join("oche").join("marker.json");
    let config = config().with_marker_path(Some(marker_path.clone()));
    let auth = Arc::new(StaticCredentials::new(Some("alice".into()), None));
    let (store, id) = table(None);

    let game = open_with(&store, &id, &config, auth.clone()).await;
    game.submit_throws(vec![Throw::single(20)].into())
        .await
        .expect("Submit failed");

    let marker = MarkerStore::new(&marker_path)
        .load()
        .expect("Marker unreadable")
        .expect("Marker missing");
    assert_eq!(marker.session_id(), &id);
    assert_eq!(marker.player_id().as_deref(), Some("alice"));
    assert_eq!(*marker.turn_number(), 1);
    drop(game);

    let resumed = GameSession::resume(&config, store.clone(), store.clone(), auth.clone())
        .await
        .expect("Resume failed")
        .expect("Nothing resumed");
    assert_eq!(resumed.state().session().id(), &id);
    assert_eq!(*resumed.state().session().turn_number(), 1);

    resumed.end_game("alice").await.expect("End failed");
    assert!(!marker_path.exists());
    let none = GameSession::resume(&config, store.clone(), store, auth)
        .await
        .expect("Resume failed");
    assert!(none.is_none());
}

#[tokio::test]
async fn test_marker_follows_remote_turns() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let marker_path = dir.path().join("marker.json");
    let config = config().with_marker_path(Some(marker_path.clone()));
    let auth = Arc::new(StaticCredentials::new(Some("bob".into()), None));
    let (store, id) = table(None);
    let game = open_with(&store, &id, &config, auth).await;
    wait_for_connection(&game, ConnectionStatus::Connected).await;

    store
        .apply_turn(&other_client_turn(&id, "alice", 1))
        .expect("Remote turn failed");
    wait_for(&game, |s| *s.session().turn_number() == 1).await;

    let marker = MarkerStore::new(&marker_path)
        .load()
        .expect("Marker unreadable")
        .expect("Marker missing");
    assert_eq!(*marker.turn_number(), 1);
    assert_eq!(marker.player_id().as_deref(), Some("bob"));
}
