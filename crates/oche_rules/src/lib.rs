//! Pure darts scoring rules.
//!
//! Three structurally different games share one shape here: a player's
//! state goes in with a group of up to three darts, and the next state
//! comes out together with a [`TurnEvent`].
//!
//! - **X01** (301/501): count down to exactly zero, finishing on a double.
//! - **Cricket**: close 15-20 and bull, score on targets opponents still have open.
//! - **Around-the-Clock**: hit 1 through 20 in order, then the bull.
//!
//! # Example
//!
//! ```
//! use oche_rules::{Seat, Throw, TurnEvent, Variant, build_initial_state, score_delta};
//!
//! let seats = vec![Seat::new("a", "Alice"), Seat::new("b", "Bob")];
//! let players = build_initial_state(&seats, Variant::Classic501, &[]).unwrap();
//! let delta = score_delta(&players, 0, &vec![Throw::treble(20); 3].into()).unwrap();
//! assert_eq!(*delta.event(), TurnEvent::Accepted);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod contracts;
mod error;
mod rules;
mod state;
mod types;

pub use contracts::{
    ClassicRemainingInvariant, ClockProgressInvariant, CricketMarksInvariant, Invariant,
    InvariantSet, InvariantViolation, ScoreInvariants, check_invariants,
};
pub use error::RuleError;
pub use rules::{
    ScoreDelta, build_initial_state, is_closed, leader, ranking, score_delta, to_progress,
};
pub use rules::{classic, clock, cricket};
pub use state::{
    CLOSED_HITS, CRICKET_TARGETS, ClassicScore, ClockScore, CricketMark, CricketScore,
    PlayerState, Seat, TurnRecord, VariantScore,
};
pub use types::{
    BULL, MAX_DARTS_PER_TURN, MAX_SEGMENT, PlayerId, Throw, ThrowGroup, TurnEvent, Variant,
};
