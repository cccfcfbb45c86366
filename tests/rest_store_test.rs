//! Tests for the REST store and SSE push channel against a local axum server.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use oche::{
    ChangeKind, ChangeNotification, EngineConfig, ErrorBody, GameSession, PushChannel,
    RemoteError, RemoteStore, RestRemoteStore, SessionStatus, SsePushChannel, StandaloneStore,
    StaticCredentials, StatusUpdateRequest, SubmitTurnRequest, WriteResponse,
};
use oche_rules::{Seat, Throw, Variant};

const TOKEN: &str = "secret";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some("Bearer secret")
}

fn error_response(err: RemoteError) -> Response {
    match err {
        RemoteError::Rejected(reason) => (
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: Some("conflict".into()),
                message: Some(reason),
            }),
        )
            .into_response(),
        RemoteError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: Some(format!("no session {}", id)),
                message: None,
            }),
        )
            .into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

async fn get_session(
    State(store): State<StandaloneStore>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match store.session(&id) {
        Some(payload) => Json(payload).into_response(),
        None => error_response(RemoteError::NotFound(id)),
    }
}

async fn post_turn(
    State(store): State<StandaloneStore>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut request): Json<SubmitTurnRequest>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    request.session_id = id;
    match store.apply_turn(&request) {
        Ok(payload) => Json(WriteResponse {
            session: Some(payload),
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

// Answers without a body so clients have to refetch.
async fn post_status(
    State(store): State<StandaloneStore>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StatusUpdateRequest>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match store.apply_status(&id, &request) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

// One event, then the stream ends.
async fn events(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let note = ChangeNotification {
        session_id: id,
        change_kind: ChangeKind::TurnSubmitted,
    };
    let body = format!(
        ": keep-alive\nevent: change\ndata: {}\n\n",
        serde_json::to_string(&note).expect("Serialize failed")
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn serve(store: StandaloneStore) -> String {
    let app = Router::new()
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/turns", post(post_turn))
        .route("/api/sessions/{id}/status", post(post_status))
        .route("/api/sessions/{id}/events", get(events))
        .with_state(store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Bind failed");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });
    format!("http://{}", addr)
}

fn started_store() -> (StandaloneStore, String) {
    let store = StandaloneStore::new();
    let id = store.create_session(
        Variant::Cricket,
        &[Seat::new("alice", "Alice"), Seat::new("bob", "Bob")],
    );
    store
        .apply_status(
            &id,
            &StatusUpdateRequest {
                status: SessionStatus::InProgress,
                winner: None,
            },
        )
        .expect("Start failed");
    (store, id)
}

fn client(base_url: &str, token: Option<&str>) -> RestRemoteStore {
    RestRemoteStore::new(
        base_url,
        Arc::new(StaticCredentials::new(None, token.map(String::from))),
        Duration::from_secs(5),
    )
    .expect("Client build failed")
}

#[tokio::test]
async fn test_fetch_session() {
    let (store, id) = started_store();
    let base = serve(store).await;

    let payload = client(&base, Some(TOKEN))
        .fetch_session(&id)
        .await
        .expect("Fetch failed");
    assert_eq!(payload.id, id);
    assert_eq!(payload.status, SessionStatus::InProgress);
    assert_eq!(payload.players.len(), 2);
    assert_eq!(payload.revision, 1);
}

#[tokio::test]
async fn test_fetch_errors_are_classified() {
    let (store, _) = started_store();
    let base = serve(store).await;

    let missing = client(&base, Some(TOKEN)).fetch_session("nope").await;
    assert!(matches!(missing, Err(RemoteError::NotFound(_))));

    let refused = client(&base, Some("wrong")).fetch_session("nope").await;
    assert_eq!(refused, Err(RemoteError::Unauthorized));
}

#[tokio::test]
async fn test_unreachable_store_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Bind failed");
    let addr = listener.local_addr().expect("No local addr");
    drop(listener);

    let err = client(&format!("http://{}", addr), None)
        .fetch_session("s1")
        .await
        .expect_err("Nothing is listening");
    assert!(err.is_transient(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_submit_turn_returns_fresh_snapshot() {
    let (store, id) = started_store();
    let base = serve(store.clone()).await;

    let fresh = client(&base, Some(TOKEN))
        .submit_turn(&SubmitTurnRequest {
            session_id: id.clone(),
            player_id: "alice".into(),
            turn_number: 1,
            throws: vec![Throw::treble(20), Throw::single(19)].into(),
        })
        .await
        .expect("Submit failed")
        .expect("Snapshot missing");
    assert_eq!(fresh.turn_number, 1);
    assert_eq!(fresh.active_index, 1);
    assert_eq!(store.session(&id).expect("Stored").revision, 2);
}

#[tokio::test]
async fn test_out_of_order_turn_is_rejected_with_reason() {
    let (store, id) = started_store();
    let base = serve(store).await;

    let result = client(&base, Some(TOKEN))
        .submit_turn(&SubmitTurnRequest {
            session_id: id,
            player_id: "alice".into(),
            turn_number: 5,
            throws: vec![Throw::single(20)].into(),
        })
        .await;
    assert_eq!(
        result,
        Err(RemoteError::Rejected("expected turn 1, got 5".into()))
    );
}

#[tokio::test]
async fn test_status_without_body_returns_none() {
    let (store, id) = started_store();
    let base = serve(store.clone()).await;

    let fresh = client(&base, Some(TOKEN))
        .update_status(
            &id,
            &StatusUpdateRequest {
                status: SessionStatus::Cancelled,
                winner: None,
            },
        )
        .await
        .expect("Status failed");
    assert!(fresh.is_none());
    assert_eq!(
        store.session(&id).expect("Stored").status,
        SessionStatus::Cancelled
    );
}

#[tokio::test]
async fn test_event_stream_delivers_notifications() {
    let (store, id) = started_store();
    let base = serve(store).await;
    let push = SsePushChannel::new(
        &base,
        Arc::new(StaticCredentials::new(None, Some(TOKEN.into()))),
        Duration::from_secs(5),
    )
    .expect("Client build failed");

    let mut rx = push.subscribe(&id).await.expect("Subscribe failed");
    let note = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out")
        .expect("Stream closed early");
    assert_eq!(note.session_id, id);
    assert_eq!(note.change_kind, ChangeKind::TurnSubmitted);

    let end = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out");
    assert!(end.is_none());
}

#[tokio::test]
async fn test_event_stream_refused() {
    let (store, id) = started_store();
    let base = serve(store).await;
    let push = SsePushChannel::new(
        &base,
        Arc::new(StaticCredentials::anonymous()),
        Duration::from_secs(5),
    )
    .expect("Client build failed");

    let result = push.subscribe(&id).await;
    assert!(matches!(result, Err(RemoteError::Unauthorized)));
}

#[tokio::test]
async fn test_game_over_http() {
    let store = StandaloneStore::new();
    let id = store.create_session(
        Variant::Classic301,
        &[Seat::new("alice", "Alice"), Seat::new("bob", "Bob")],
    );
    let base = serve(store.clone()).await;

    let config = EngineConfig::default().with_server_url(base.clone());
    let auth = Arc::new(StaticCredentials::new(
        Some("alice".into()),
        Some(TOKEN.into()),
    ));
    let timeout = config.sync().request_timeout();
    let remote = Arc::new(RestRemoteStore::new(&base, auth.clone(), timeout).expect("Client"));
    let push = Arc::new(SsePushChannel::new(&base, auth.clone(), timeout).expect("Client"));

    let game = GameSession::open(&config, &id, remote, push, auth)
        .await
        .expect("Open failed");
    assert_eq!(*game.state().session().status(), SessionStatus::InProgress);

    let report = game
        .submit_throws(vec![Throw::treble(20); 3].into())
        .await
        .expect("Submit failed");
    assert!(report.accepted());

    let stored = store.session(&id).expect("Stored");
    assert_eq!(stored.turn_number, 1);
    assert_eq!(*game.state().session().turn_number(), 1);

    game.cancel_game().await.expect("Cancel failed");
    assert_eq!(
        store.session(&id).expect("Stored").status,
        SessionStatus::Cancelled
    );
}
