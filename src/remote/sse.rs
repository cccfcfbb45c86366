//! Server-sent-events push channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::rest::{classify, status_error, with_token};
use super::wire::ChangeNotification;
use super::{PushChannel, RemoteError};
use crate::auth::Authenticator;

const CHANNEL_CAPACITY: usize = 32;

/// [`PushChannel`] reading `GET /api/sessions/{id}/events`.
#[derive(Clone)]
pub struct SsePushChannel {
    base_url: String,
    client: reqwest::Client,
    auth: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for SsePushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsePushChannel")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SsePushChannel {
    /// Creates a channel for the store at `base_url`.
    ///
    /// The stream is long-lived, so only connecting is bounded by `timeout`.
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
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth,
        })
    }
}

#[async_trait]
impl PushChannel for SsePushChannel {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<ChangeNotification>, RemoteError> {
        let url = format!("{}/api/sessions/{}/events", self.base_url, session_id);
        let response = with_token(self.client.get(&url), self.auth.as_ref())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Event stream refused");
            return Err(status_error(status, &body, session_id));
        }

        info!(%url, "Event stream open");
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump(response, tx));
        Ok(rx)
    }
}

/// Forwards parsed events until the stream ends or the receiver goes away.
async fn pump(mut response: reqwest::Response, tx: mpsc::Sender<ChangeNotification>) {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("Subscriber gone, closing event stream");
                return;
            }
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => {
                buffer.extend_from_slice(&bytes);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    if let Some(note) = parse_event_line(line.trim_end())
                        && tx.send(note).await.is_err()
                    {
                        return;
                    }
                }
            }
            Ok(None) => {
                info!("Event stream ended");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Event stream failed");
                return;
            }
        }
    }
}

/// Parses one SSE line of the form `data: {"session_id":..,"change_kind":..}`.
///
/// Comments, `event:`/`id:` fields and unparseable data return `None`.
pub fn parse_event_line(line: &str) -> Option<ChangeNotification> {
    let data = line.strip_prefix("data:")?.trim_start();
    if !data.starts_with('{') {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(note) => Some(note),
        Err(e) => {
            warn!(error = %e, line, "Ignoring malformed event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ChangeKind;

    #[test]
    fn test_parse_event_line() {
        let note = parse_event_line(r#"data: {"session_id":"s1","change_kind":"turn_submitted"}"#)
            .expect("event");
        assert_eq!(note.session_id, "s1");
        assert_eq!(note.change_kind, ChangeKind::TurnSubmitted);

        assert!(parse_event_line(": keep-alive").is_none());
        assert!(parse_event_line("event: change").is_none());
        assert!(parse_event_line("data: ping").is_none());
        assert!(parse_event_line("data: {broken").is_none());
        assert!(parse_event_line("").is_none());
    }
}
