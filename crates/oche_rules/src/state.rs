//! Per-player scoring state, one payload per variant.
//!
//! The serde form of [`VariantScore`] is the per-variant snapshot exchanged
//! with the remote store.

use std::collections::BTreeSet;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

use crate::types::{BULL, MAX_SEGMENT, PlayerId, Variant};

/// Cricket targets in board order.
pub const CRICKET_TARGETS: [u8; 7] = [15, 16, 17, 18, 19, 20, BULL];

/// Hits needed to close a cricket target.
pub const CLOSED_HITS: u8 = 3;

/// A seat at the table as handed over by session creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seat {
    /// Player's unique ID.
    pub id: PlayerId,
    /// Player's display name.
    pub name: String,
}

impl Seat {
    /// Creates a seat.
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A player's full state within a session.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct PlayerState {
    id: PlayerId,
    name: String,
    /// Turn-order position, fixed at session creation.
    position: usize,
    score: VariantScore,
}

impl PlayerState {
    /// Creates a player state at the given turn-order position.
    pub fn new(seat: &Seat, position: usize, score: VariantScore) -> Self {
        Self {
            id: seat.id.clone(),
            name: seat.name.clone(),
            position,
            score,
        }
    }

    /// Fresh state for the variant.
    pub fn initial(seat: &Seat, position: usize, variant: Variant) -> Self {
        Self::new(seat, position, VariantScore::initial(variant))
    }

    /// Returns a copy carrying a different score.
    pub fn with_score(&self, score: VariantScore) -> Self {
        Self {
            score,
            ..self.clone()
        }
    }

    /// Seat this state belongs to.
    pub fn seat(&self) -> Seat {
        Seat::new(self.id.clone(), self.name.clone())
    }
}

/// Variant-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantScore {
    /// X01 remaining score and turn history.
    Classic(ClassicScore),
    /// Cricket marks and points.
    Cricket(CricketScore),
    /// Around-the-Clock progress.
    AroundTheClock(ClockScore),
}

impl VariantScore {
    /// Starting payload for the variant.
    pub fn initial(variant: Variant) -> Self {
        match variant {
            Variant::Classic301 | Variant::Classic501 => {
                let starting = variant.starting_score().unwrap_or(501);
                VariantScore::Classic(ClassicScore::new(starting))
            }
            Variant::Cricket => VariantScore::Cricket(CricketScore::new()),
            Variant::AroundTheClock => VariantScore::AroundTheClock(ClockScore::new()),
        }
    }

    /// Returns true if this payload can belong to a session of the variant.
    pub fn matches(&self, variant: Variant) -> bool {
        match self {
            VariantScore::Classic(score) => variant.starting_score() == Some(score.starting),
            VariantScore::Cricket(_) => variant == Variant::Cricket,
            VariantScore::AroundTheClock(_) => variant == Variant::AroundTheClock,
        }
    }
}

/// Points scored in one confirmed X01 turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Getters, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Points scored, 0-180.
    points: u16,
    /// True if the turn finished the leg on a double.
    double_out: bool,
}

impl TurnRecord {
    /// Creates a turn record.
    pub fn new(points: u16, double_out: bool) -> Self {
        Self { points, double_out }
    }
}

/// X01 state.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ClassicScore {
    starting: u16,
    remaining: u16,
    history: Vec<TurnRecord>,
}

impl ClassicScore {
    /// A fresh leg from `starting`.
    pub fn new(starting: u16) -> Self {
        Self {
            starting,
            remaining: starting,
            history: Vec::new(),
        }
    }

    /// Rebuilds a score from its parts.
    pub fn from_parts(starting: u16, remaining: u16, history: Vec<TurnRecord>) -> Self {
        Self {
            starting,
            remaining,
            history,
        }
    }

    /// Average points per recorded turn.
    pub fn average(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            let total: u32 = self.history.iter().map(|t| u32::from(t.points)).sum();
            f64::from(total) / self.history.len() as f64
        }
    }

    pub(crate) fn record(&mut self, remaining: u16, record: TurnRecord) {
        self.remaining = remaining;
        self.history.push(record);
    }
}

/// Hits and points on a single cricket target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Getters, Serialize, Deserialize)]
pub struct CricketMark {
    target: u8,
    hits: u8,
    points: u16,
}

impl CricketMark {
    /// Creates a mark.
    pub fn new(target: u8, hits: u8, points: u16) -> Self {
        Self {
            target,
            hits,
            points,
        }
    }

    /// Returns true once the target has three hits.
    pub fn is_closed(&self) -> bool {
        self.hits >= CLOSED_HITS
    }
}

/// Cricket state.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct CricketScore {
    marks: [CricketMark; 7],
    total: u16,
}

impl CricketScore {
    /// No hits on any target.
    pub fn new() -> Self {
        Self {
            marks: CRICKET_TARGETS.map(|target| CricketMark::new(target, 0, 0)),
            total: 0,
        }
    }

    /// Rebuilds a score from its parts.
    pub fn from_parts(marks: [CricketMark; 7], total: u16) -> Self {
        Self { marks, total }
    }

    /// Mark for `target`, if it is a cricket target.
    pub fn mark(&self, target: u8) -> Option<&CricketMark> {
        self.marks.iter().find(|m| m.target == target)
    }

    /// Hits on `target`, 0 for non-cricket numbers.
    pub fn hits(&self, target: u8) -> u8 {
        self.mark(target).map(|m| m.hits).unwrap_or(0)
    }

    /// Returns true once every target has three hits.
    pub fn all_closed(&self) -> bool {
        self.marks.iter().all(CricketMark::is_closed)
    }

    pub(crate) fn mark_mut(&mut self, target: u8) -> Option<&mut CricketMark> {
        self.marks.iter_mut().find(|m| m.target == target)
    }

    pub(crate) fn add_hits(&mut self, target: u8, hits: u8) {
        if let Some(mark) = self.mark_mut(target) {
            mark.hits = (mark.hits + hits).min(CLOSED_HITS);
        }
    }

    pub(crate) fn add_points(&mut self, target: u8, points: u16) {
        if let Some(mark) = self.mark_mut(target) {
            mark.points = mark.points.saturating_add(points);
            self.total = self.total.saturating_add(points);
        }
    }
}

impl Default for CricketScore {
    fn default() -> Self {
        Self::new()
    }
}

/// Around-the-Clock state.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ClockScore {
    /// Number to hit next: 1..=20, then 25 for the bull.
    current_target: u8,
    validated: BTreeSet<u8>,
    throws: u32,
}

impl ClockScore {
    /// Starting on 1.
    pub fn new() -> Self {
        Self {
            current_target: 1,
            validated: BTreeSet::new(),
            throws: 0,
        }
    }

    /// Rebuilds a score from its parts.
    pub fn from_parts(current_target: u8, validated: BTreeSet<u8>, throws: u32) -> Self {
        Self {
            current_target,
            validated,
            throws,
        }
    }

    /// Returns true once the bull has been validated.
    pub fn is_finished(&self) -> bool {
        self.validated.contains(&BULL)
    }

    /// Target following `target` in the sequence, `None` after the bull.
    pub fn next_target(target: u8) -> Option<u8> {
        match target {
            1..MAX_SEGMENT => Some(target + 1),
            MAX_SEGMENT => Some(BULL),
            _ => None,
        }
    }

    pub(crate) fn count_throw(&mut self) {
        self.throws += 1;
    }

    pub(crate) fn validate_current(&mut self) {
        self.validated.insert(self.current_target);
        if let Some(next) = Self::next_target(self.current_target) {
            self.current_target = next;
        }
    }
}

impl Default for ClockScore {
    fn default() -> Self {
        Self::new()
    }
}
