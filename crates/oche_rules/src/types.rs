//! Core domain types shared by every variant.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Unique identifier for a player.
pub type PlayerId = String;

/// Target value of the outer and inner bull.
pub const BULL: u8 = 25;

/// Highest numbered segment on the board.
pub const MAX_SEGMENT: u8 = 20;

/// Most darts a single turn may contain.
pub const MAX_DARTS_PER_TURN: usize = 3;

/// Supported game variants.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Variant {
    /// X01 starting from 301.
    #[serde(rename = "CLASSIC_301")]
    #[strum(to_string = "CLASSIC_301", serialize = "301")]
    Classic301,
    /// X01 starting from 501.
    #[serde(rename = "CLASSIC_501")]
    #[strum(to_string = "CLASSIC_501", serialize = "501")]
    Classic501,
    /// Cricket on 15-20 and bull.
    Cricket,
    /// Hit 1 through 20 in order, then the bull.
    AroundTheClock,
}

impl Variant {
    /// Starting score for X01 variants, `None` otherwise.
    pub fn starting_score(self) -> Option<u16> {
        match self {
            Variant::Classic301 => Some(301),
            Variant::Classic501 => Some(501),
            Variant::Cricket | Variant::AroundTheClock => None,
        }
    }

    /// Returns true for the X01 family.
    pub fn is_classic(self) -> bool {
        self.starting_score().is_some()
    }
}

/// One dart: the segment hit and its ring multiplier.
///
/// A miss is target `0`. The outer bull is `25 × 1`, the bullseye `25 × 2`.
/// Values are not checked on construction so that the validator can
/// report an illegal pair back to the caller; see [`Throw::is_legal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Throw {
    /// Segment value (0, 1..=20 or 25).
    pub target: u8,
    /// Ring multiplier (1, 2 or 3).
    pub multiplier: u8,
}

impl Throw {
    /// Creates a throw without checking legality.
    pub fn new(target: u8, multiplier: u8) -> Self {
        Self { target, multiplier }
    }

    /// Single ring.
    pub fn single(target: u8) -> Self {
        Self::new(target, 1)
    }

    /// Double ring.
    pub fn double(target: u8) -> Self {
        Self::new(target, 2)
    }

    /// Treble ring.
    pub fn treble(target: u8) -> Self {
        Self::new(target, 3)
    }

    /// Outer bull (25).
    pub fn bull() -> Self {
        Self::single(BULL)
    }

    /// Bullseye (50), which counts as a double.
    pub fn bullseye() -> Self {
        Self::double(BULL)
    }

    /// A dart that scored nothing.
    pub fn miss() -> Self {
        Self::single(0)
    }

    /// Points scored by this dart.
    pub fn points(&self) -> u16 {
        u16::from(self.target) * u16::from(self.multiplier)
    }

    /// Returns true if the dart landed in a double ring (bullseye included).
    pub fn is_double(&self) -> bool {
        self.multiplier == 2 && self.target != 0
    }

    /// Returns true if the dart scored nothing.
    pub fn is_miss(&self) -> bool {
        self.target == 0
    }

    /// Returns true if the pair names a real spot on a board.
    pub fn is_legal(&self) -> bool {
        match self.target {
            0 => self.multiplier == 1,
            1..=MAX_SEGMENT => (1..=3).contains(&self.multiplier),
            BULL => (1..=2).contains(&self.multiplier),
            _ => false,
        }
    }

    /// Parses shorthand such as `T20`, `D16`, `S5`, `5`, `25`, `50`, `BULL`, `0`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_uppercase();
        match token.as_str() {
            "" => return None,
            "0" | "M" | "MISS" => return Some(Self::miss()),
            "BULL" | "SB" => return Some(Self::bull()),
            "50" | "DB" | "BULLSEYE" => return Some(Self::bullseye()),
            _ => {}
        }
        let (multiplier, digits) = if let Some(rest) = token.strip_prefix('S') {
            (1, rest)
        } else if let Some(rest) = token.strip_prefix('D') {
            (2, rest)
        } else if let Some(rest) = token.strip_prefix('T') {
            (3, rest)
        } else {
            (1, token.as_str())
        };
        let target = digits.parse::<u8>().ok()?;
        Some(Self::new(target, multiplier))
    }
}

impl std::fmt::Display for Throw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.target, self.multiplier) {
            (0, _) => write!(f, "miss"),
            (BULL, 2) => write!(f, "bullseye"),
            (BULL, _) => write!(f, "bull"),
            (t, 1) => write!(f, "S{}", t),
            (t, 2) => write!(f, "D{}", t),
            (t, 3) => write!(f, "T{}", t),
            (t, m) => write!(f, "{}x{}", t, m),
        }
    }
}

/// The darts of one turn, submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThrowGroup(Vec<Throw>);

impl ThrowGroup {
    /// Wraps the given throws. Length is checked by the validator.
    pub fn new(throws: Vec<Throw>) -> Self {
        Self(throws)
    }

    /// The throws in order.
    pub fn throws(&self) -> &[Throw] {
        &self.0
    }

    /// Number of darts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no darts were thrown.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all dart points.
    pub fn total(&self) -> u16 {
        self.0.iter().map(Throw::points).sum()
    }

    /// First throw that is not a legal board value.
    pub fn first_illegal(&self) -> Option<&Throw> {
        self.0.iter().find(|t| !t.is_legal())
    }
}

impl From<Vec<Throw>> for ThrowGroup {
    fn from(throws: Vec<Throw>) -> Self {
        Self(throws)
    }
}

impl std::fmt::Display for ThrowGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// What a turn did to the throwing player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnEvent {
    /// Score changed, game continues.
    Accepted,
    /// Turn discarded with no score change.
    Bust,
    /// The player met the variant's win condition.
    Win,
    /// Legal turn that changed nothing.
    Noop,
}

impl TurnEvent {
    /// Returns true if the turn ended the game.
    pub fn is_win(self) -> bool {
        matches!(self, TurnEvent::Win)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_legal_values() {
        assert!(Throw::miss().is_legal());
        assert!(Throw::treble(20).is_legal());
        assert!(Throw::bullseye().is_legal());
        assert!(!Throw::treble(BULL).is_legal());
        assert!(!Throw::single(21).is_legal());
        assert!(!Throw::double(0).is_legal());
        assert!(!Throw::new(5, 4).is_legal());
    }

    #[test]
    fn test_bullseye_counts_as_double() {
        assert!(Throw::bullseye().is_double());
        assert_eq!(Throw::bullseye().points(), 50);
        assert!(!Throw::bull().is_double());
    }

    #[test]
    fn test_parse_shorthand() {
        assert_eq!(Throw::parse("t20"), Some(Throw::treble(20)));
        assert_eq!(Throw::parse("D16"), Some(Throw::double(16)));
        assert_eq!(Throw::parse("5"), Some(Throw::single(5)));
        assert_eq!(Throw::parse("50"), Some(Throw::bullseye()));
        assert_eq!(Throw::parse("25"), Some(Throw::bull()));
        assert_eq!(Throw::parse("miss"), Some(Throw::miss()));
        assert_eq!(Throw::parse("Dx"), None);
    }

    #[test]
    fn test_variant_names() {
        assert_eq!(Variant::Classic501.to_string(), "CLASSIC_501");
        assert_eq!(Variant::from_str("around_the_clock").ok(), Some(Variant::AroundTheClock));
        assert_eq!(Variant::from_str("301").ok(), Some(Variant::Classic301));
        let json = serde_json::to_string(&Variant::Classic301).unwrap();
        assert_eq!(json, "\"CLASSIC_301\"");
    }
}
