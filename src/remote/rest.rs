//! REST client for the session store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::wire::{ErrorBody, SessionPayload, StatusUpdateRequest, SubmitTurnRequest, WriteResponse};
use super::{RemoteError, RemoteStore};
use crate::auth::Authenticator;

/// [`RemoteStore`] over HTTP/JSON.
#[derive(Clone)]
pub struct RestRemoteStore {
    base_url: String,
    client: reqwest::Client,
    auth: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for RestRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    /// Creates a client for the store at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built.
    #[instrument(skip(auth))]
    pub fn new(
        base_url: &str,
        auth: Arc<dyn Authenticator>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        with_token(builder, self.auth.as_ref())
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch_session(&self, session_id: &str) -> Result<SessionPayload, RemoteError> {
        let url = self.url(&format!("/api/sessions/{}", session_id));
        debug!(%url, "Fetching session");
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(classify)?;
        let body = checked_body(response, session_id).await?;
        parse_json(&body)
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id, player_id = %request.player_id, turn_number = request.turn_number))]
    async fn submit_turn(
        &self,
        request: &SubmitTurnRequest,
    ) -> Result<Option<SessionPayload>, RemoteError> {
        let url = self.url(&format!("/api/sessions/{}/turns", request.session_id));
        debug!(%url, throws = %request.throws, "Submitting turn");
        let response = self
            .authorized(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(classify)?;
        write_result(response, &request.session_id).await
    }

    #[instrument(skip(self, request), fields(status = %request.status, winner = ?request.winner))]
    async fn update_status(
        &self,
        session_id: &str,
        request: &StatusUpdateRequest,
    ) -> Result<Option<SessionPayload>, RemoteError> {
        let url = self.url(&format!("/api/sessions/{}/status", session_id));
        debug!(%url, "Updating status");
        let response = self
            .authorized(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(classify)?;
        write_result(response, session_id).await
    }
}

pub(super) fn with_token(builder: RequestBuilder, auth: &dyn Authenticator) -> RequestBuilder {
    match auth.bearer_token() {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Maps a transport-level failure (no HTTP response) to a remote error.
pub(super) fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Protocol(err.to_string())
    } else {
        RemoteError::Transport(err.to_string())
    }
}

/// Maps an error status to a remote error.
pub(super) fn status_error(status: StatusCode, body: &str, session_id: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.text().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::NotFound(session_id.to_string()),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Rejected(message)
        }
        other => RemoteError::Server {
            status: other.as_u16(),
            message,
        },
    }
}

/// Reads the body, turning error statuses into remote errors.
pub(super) async fn checked_body(response: Response, session_id: &str) -> Result<String, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(classify)?;
    if status.is_success() {
        Ok(body)
    } else {
        warn!(%status, body = %body, "Store returned error");
        Err(status_error(status, &body, session_id))
    }
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::Protocol(e.to_string()))
}

async fn write_result(
    response: Response,
    session_id: &str,
) -> Result<Option<SessionPayload>, RemoteError> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    let body = checked_body(response, session_id).await?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    let parsed: WriteResponse = parse_json(&body)?;
    Ok(parsed.session)
}
