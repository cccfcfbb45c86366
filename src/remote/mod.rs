//! Boundary to the authoritative session store.
//!
//! The engine talks to the store through two traits: [`RemoteStore`] for
//! request/response calls and [`PushChannel`] for server-initiated change
//! notifications. Notifications carry no payload; the engine always
//! refetches the full snapshot.

mod rest;
mod retry;
mod sse;
mod standalone;
mod wire;

pub use rest::RestRemoteStore;
pub use retry::{RetryPolicy, retry_transient};
pub use sse::{SsePushChannel, parse_event_line};
pub use standalone::StandaloneStore;
pub use wire::{
    ChangeKind, ChangeNotification, ErrorBody, PlayerPayload, SessionPayload, StatusUpdateRequest,
    SubmitTurnRequest, WriteResponse,
};

use async_trait::async_trait;
use derive_more::Display;
use tokio::sync::mpsc;

/// Error talking to the remote store.
///
/// `Transport` and `Timeout` mean no response arrived and are retried;
/// everything else is a definitive answer.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum RemoteError {
    /// Connection failed before a response arrived.
    #[display("Network error: {}", _0)]
    Transport(String),

    /// The request timed out.
    #[display("Request timed out")]
    Timeout,

    /// Credentials were refused.
    #[display("Authorization expired")]
    Unauthorized,

    /// The store refused the write.
    #[display("Rejected by server: {}", _0)]
    Rejected(String),

    /// The session does not exist.
    #[display("Session {} not found", _0)]
    NotFound(String),

    /// The store failed internally.
    #[display("Server error {}: {}", status, message)]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The response could not be understood.
    #[display("Malformed response: {}", _0)]
    Protocol(String),

    /// Transient failures outlasted the retry budget.
    #[display("Gave up after {} attempts: {}", attempts, last)]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last transient failure.
        last: Box<RemoteError>,
    },
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    /// No response arrived; the call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    /// The store is unreachable, with or without retries.
    pub fn is_connectivity(&self) -> bool {
        self.is_transient() || matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Request/response access to the authoritative store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the full session snapshot.
    async fn fetch_session(&self, session_id: &str) -> Result<SessionPayload, RemoteError>;

    /// Writes one turn. The store may answer with the fresh snapshot.
    async fn submit_turn(
        &self,
        request: &SubmitTurnRequest,
    ) -> Result<Option<SessionPayload>, RemoteError>;

    /// Moves the session to a new status (start, end with winner, cancel).
    async fn update_status(
        &self,
        session_id: &str,
        request: &StatusUpdateRequest,
    ) -> Result<Option<SessionPayload>, RemoteError>;
}

/// Server-initiated "session changed" notifications.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Opens a subscription. The receiver closing means the channel dropped.
    async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<ChangeNotification>, RemoteError>;
}
