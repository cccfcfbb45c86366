//! JSON bodies exchanged with the remote store.

use chrono::{DateTime, Utc};
use oche_rules::{PlayerId, ThrowGroup, Variant, VariantScore};
use serde::{Deserialize, Serialize};

use crate::session::{SessionId, SessionStatus};

/// One seat in a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPayload {
    /// Player id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Variant progress; absent for a player who has not thrown yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<VariantScore>,
}

/// Full session snapshot as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Session id.
    pub id: SessionId,
    /// Game being played.
    pub variant: Variant,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Seats in turn order.
    pub players: Vec<PlayerPayload>,
    /// Whose turn it is.
    #[serde(default)]
    pub active_index: usize,
    /// Confirmed turns so far.
    #[serde(default)]
    pub turn_number: u32,
    /// Winner, once completed.
    #[serde(default)]
    pub winner: Option<PlayerId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Write counter, bumped on every remote write.
    #[serde(default)]
    pub revision: u64,
}

/// Body of a turn submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTurnRequest {
    /// Session the turn belongs to (carried in the URL, not the body).
    #[serde(skip)]
    pub session_id: SessionId,
    /// Thrower.
    pub player_id: PlayerId,
    /// The turn number this turn is expected to become.
    pub turn_number: u32,
    /// Darts thrown.
    pub throws: ThrowGroup,
}

/// Response to a remote write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Fresh snapshot, if the store sends one back.
    #[serde(default)]
    pub session: Option<SessionPayload>,
}

/// Body of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// Target status.
    pub status: SessionStatus,
    /// Winner, when completing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
}

/// What changed in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    /// A turn was written.
    TurnSubmitted,
    /// The status changed.
    StatusChanged,
    /// Anything else the store reports.
    #[serde(other)]
    Other,
}

/// Push message naming a changed session. Carries no state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Changed session.
    pub session_id: SessionId,
    /// Kind of change.
    pub change_kind: ChangeKind,
}

/// Error body returned by the REST store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short error text.
    #[serde(default)]
    pub error: Option<String>,
    /// Longer explanation.
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// The most specific text in the body.
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oche_rules::Throw;

    #[test]
    fn test_submit_body_shape() {
        let request = SubmitTurnRequest {
            session_id: "s1".into(),
            player_id: "alice".into(),
            turn_number: 4,
            throws: vec![Throw::treble(20), Throw::double(16)].into(),
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "player_id": "alice",
                "turn_number": 4,
                "throws": [
                    {"target": 20, "multiplier": 3},
                    {"target": 16, "multiplier": 2}
                ]
            })
        );
    }

    #[test]
    fn test_unknown_change_kind_is_other() {
        let note: ChangeNotification =
            serde_json::from_str(r#"{"session_id":"s1","change_kind":"player_renamed"}"#)
                .expect("parse");
        assert_eq!(note.change_kind, ChangeKind::Other);
    }
}
