//! Boundary to the authentication collaborator.
//!
//! The engine never handles login; it only asks who is throwing, what
//! token to send, and reports when the store refused that token.

use std::sync::atomic::{AtomicBool, Ordering};

use oche_rules::PlayerId;
use tracing::{instrument, warn};

/// Source of the signed-in player's identity.
pub trait Authenticator: Send + Sync {
    /// The player throws are attributed to.
    fn current_player(&self) -> Option<PlayerId>;

    /// Bearer token for remote calls.
    fn bearer_token(&self) -> Option<String>;

    /// The store refused the token; the user has to sign in again.
    fn authorization_expired(&self);
}

/// Fixed credentials, e.g. from the environment.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    player: Option<PlayerId>,
    token: Option<String>,
    expired: AtomicBool,
}

impl StaticCredentials {
    /// Credentials for `player`, optionally with a token.
    pub fn new(player: Option<PlayerId>, token: Option<String>) -> Self {
        Self {
            player,
            token,
            expired: AtomicBool::new(false),
        }
    }

    /// No player, no token.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns true once the store has refused the token.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

impl Authenticator for StaticCredentials {
    fn current_player(&self) -> Option<PlayerId> {
        self.player.clone()
    }

    fn bearer_token(&self) -> Option<String> {
        if self.is_expired() {
            None
        } else {
            self.token.clone()
        }
    }

    #[instrument(skip(self), fields(player = ?self.player))]
    fn authorization_expired(&self) {
        if !self.expired.swap(true, Ordering::SeqCst) {
            warn!("Authorization expired, sign in again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_drops_token() {
        let creds = StaticCredentials::new(Some("alice".into()), Some("secret".into()));
        assert_eq!(creds.bearer_token().as_deref(), Some("secret"));
        creds.authorization_expired();
        assert!(creds.is_expired());
        assert_eq!(creds.bearer_token(), None);
        assert_eq!(creds.current_player().as_deref(), Some("alice"));
    }
}
