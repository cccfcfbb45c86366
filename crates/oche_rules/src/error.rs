//! Errors raised by the rule table.

use crate::types::{Throw, Variant};

/// Error that can occur when evaluating or rebuilding player state.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum RuleError {
    /// A throw is not a legal board value.
    #[display("Illegal throw {}x{}", _0.target, _0.multiplier)]
    IllegalThrow(Throw),

    /// A turn must contain one to three darts.
    #[display("A turn holds 1 to 3 darts, got {}", _0)]
    ThrowCount(usize),

    /// The state does not belong to the variant being played.
    #[display("Player state does not match variant {}", _0)]
    VariantMismatch(Variant),

    /// The active index is outside the player list.
    #[display("No player at index {} (of {})", index, players)]
    NoSuchPlayer {
        /// Requested index.
        index: usize,
        /// Number of players.
        players: usize,
    },

    /// Progress list length differs from the seat list.
    #[display("Expected progress for {} players, got {}", expected, actual)]
    ProgressLength {
        /// Seats in the session.
        expected: usize,
        /// Progress entries supplied.
        actual: usize,
    },

    /// A snapshot payload breaks a scoring invariant.
    #[display("Corrupt snapshot for player {}: {}", player, reason)]
    CorruptSnapshot {
        /// Offending player.
        player: String,
        /// Which invariant failed.
        reason: String,
    },
}

impl std::error::Error for RuleError {}
