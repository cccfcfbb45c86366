//! Oche - darts match engine
//!
//! Models an in-progress darts match, enforces the per-variant scoring
//! rules, sequences turns across players and keeps the local view in step
//! with an authoritative remote store.
//!
//! # Architecture
//!
//! - **Rules** (`oche_rules`): pure scoring for X01, Cricket and Around-the-Clock
//! - **Validator**: side-effect free turn checks before anything is sent
//! - **Sequencer**: optimistic apply, then confirm or roll back
//! - **Synchronizer**: refetch-on-notify, bounded retry and reconnect
//! - **Facade**: [`GameSession`], the surface a UI talks to
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oche::{EngineConfig, GameSession, StandaloneStore, StaticCredentials};
//! use oche_rules::{Seat, Throw, Variant};
//!
//! # async fn example() -> Result<(), oche::SessionError> {
//! let store = StandaloneStore::new();
//! let id = store.create_session(
//!     Variant::Classic501,
//!     &[Seat::new("alice", "Alice"), Seat::new("bob", "Bob")],
//! );
//! let store = Arc::new(store);
//! let game = GameSession::open(
//!     &EngineConfig::default(),
//!     &id,
//!     store.clone(),
//!     store,
//!     Arc::new(StaticCredentials::anonymous()),
//! )
//! .await?;
//!
//! let report = game
//!     .submit_throws_as("alice", vec![Throw::treble(20); 3].into())
//!     .await?;
//! assert!(report.accepted());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod auth;
mod config;
mod error;
mod facade;
mod input;
mod marker;
mod remote;
mod scoreboard;
mod sequencer;
mod session;
mod sync;
mod validator;

// Crate-level exports - Authentication boundary
pub use auth::{Authenticator, StaticCredentials};

// Crate-level exports - Configuration
pub use config::{ConfigError, ENV_PLAYER, ENV_SERVER_URL, ENV_TOKEN, EngineConfig, SyncConfig};

// Crate-level exports - Errors
pub use error::{Rejection, SessionError};

// Crate-level exports - Facade
pub use facade::{GameSession, TurnReport};

// Crate-level exports - Console input and display
pub use input::{Command, HELP, InputError, parse_command};
pub use scoreboard::render_scoreboard;

// Crate-level exports - Resumable marker
pub use marker::{ActivePlayerMarker, MarkerError, MarkerStore};

// Crate-level exports - Remote store
pub use remote::{
    ChangeKind, ChangeNotification, ErrorBody, PlayerPayload, PushChannel, RemoteError,
    RemoteStore, RestRemoteStore, RetryPolicy, SessionPayload, SsePushChannel, StandaloneStore,
    StatusUpdateRequest, SubmitTurnRequest, WriteResponse, parse_event_line, retry_transient,
};

// Crate-level exports - Session model
pub use session::{Session, SessionId, SessionSnapshot, SessionStatus, TurnPhase};

// Crate-level exports - Turn handling
pub use sequencer::{Confirmation, Replacement, TurnSequencer, TurnTicket};
pub use sync::{ConnectionStatus, SessionSynchronizer, ViewGuard};
pub use validator::{
    ActivePlayer, AppliedTurn, LegalThrows, LegalTurn, ScoreValidator, SessionInProgress,
    ThrowCount,
};
