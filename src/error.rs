//! Error types for the session engine.

use derive_more::{Display, From};
use oche_rules::{PlayerId, RuleError};
use serde::Serialize;

use crate::marker::MarkerError;
use crate::remote::RemoteError;
use crate::session::SessionStatus;

/// Why a turn was not applied.
///
/// All but [`Rejection::Bust`] are raised before anything is sent to the
/// remote store. A bust is a normal outcome: the turn is consumed with no
/// score change.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    /// A dart is not a legal board value.
    #[display("{}x{} is not a dart value", target, multiplier)]
    InvalidThrowValue {
        /// Segment given.
        target: u8,
        /// Multiplier given.
        multiplier: u8,
    },

    /// A turn holds one to three darts.
    #[display("A turn holds 1 to 3 darts, got {}", count)]
    InvalidThrowCount {
        /// Darts given.
        count: usize,
    },

    /// Someone other than the active player tried to throw.
    #[display("It is not {}'s turn", player)]
    NotActivePlayer {
        /// Who tried.
        player: PlayerId,
        /// Whose turn it is.
        active: Option<PlayerId>,
    },

    /// The session already has a result.
    #[display("Game already completed")]
    GameAlreadyCompleted,

    /// The session has not been started.
    #[display("Game has not started")]
    SessionNotStarted,

    /// The turn overshot; score reverts.
    #[display("Bust! Score stays where it was")]
    Bust,

    /// Local state could not be scored.
    #[display("Cannot score turn: {}", detail)]
    InconsistentState {
        /// Rule table complaint.
        detail: String,
    },
}

impl std::error::Error for Rejection {}

impl Rejection {
    /// Bust is the only rejection that still consumes the turn.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Bust)
    }
}

/// Error raised by the session engine.
#[derive(Debug, Clone, PartialEq, Display, From)]
pub enum SessionError {
    /// The turn was refused locally.
    #[display("Turn rejected: {}", _0)]
    #[from]
    Rejected(Rejection),

    /// Another turn from this client is still being confirmed.
    #[display("A turn is already being submitted")]
    SubmissionInFlight,

    /// The remote store failed or refused.
    #[display("{}", _0)]
    #[from]
    Remote(RemoteError),

    /// A snapshot could not be rebuilt into player state.
    #[display("{}", _0)]
    #[from]
    Rules(RuleError),

    /// A snapshot was internally inconsistent.
    #[display("Invalid snapshot: {}", _0)]
    Snapshot(String),

    /// The named player is not seated in this session.
    #[display("Player {} is not in this session", _0)]
    UnknownPlayer(PlayerId),

    /// Nobody is signed in to throw as.
    #[display("No signed-in player to throw as")]
    NoActingPlayer,

    /// The status change would go backwards.
    #[display("Cannot move session from {} to {}", from, to)]
    InvalidTransition {
        /// Current status.
        from: SessionStatus,
        /// Requested status.
        to: SessionStatus,
    },

    /// A snapshot arrived for a different session.
    #[display("Snapshot is for session {}, expected {}", got, expected)]
    WrongSession {
        /// Session this engine tracks.
        expected: String,
        /// Session in the snapshot.
        got: String,
    },

    /// The view was left while the turn was in flight.
    #[display("Session view closed before the turn was confirmed")]
    ViewClosed,

    /// The active-player marker could not be read or written.
    #[display("{}", _0)]
    #[from]
    Marker(MarkerError),
}

impl std::error::Error for SessionError {}

impl SessionError {
    /// The error is a connectivity problem the UI should show as a banner.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Remote(err) if err.is_connectivity())
    }

    /// Credentials were refused; the caller should re-authenticate.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Unauthorized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_serializes_with_reason_tag() {
        let json = serde_json::to_value(Rejection::NotActivePlayer {
            player: "bob".into(),
            active: Some("alice".into()),
        })
        .expect("serialize");
        assert_eq!(json["reason"], "NOT_ACTIVE_PLAYER");
        assert_eq!(json["active"], "alice");

        let json = serde_json::to_value(Rejection::Bust).expect("serialize");
        assert_eq!(json, serde_json::json!({"reason": "BUST"}));
    }

    #[test]
    fn test_conversions() {
        let err: SessionError = Rejection::GameAlreadyCompleted.into();
        assert!(matches!(err, SessionError::Rejected(_)));

        let err: SessionError = RemoteError::Timeout.into();
        assert!(err.is_connectivity());

        let err: SessionError = RemoteError::Unauthorized.into();
        assert!(err.is_unauthorized());
        assert!(!err.is_connectivity());
    }
}
