//! Console command parsing.

use derive_more::Display;
use oche_rules::{ClockScore, PlayerId, Throw, ThrowGroup, clock};

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Darts for the current turn.
    Throws(ThrowGroup),
    /// Declare a winner and complete the session.
    End(PlayerId),
    /// Cancel the session.
    Cancel,
    /// Refetch the session now.
    Refresh,
    /// Reopen the push channel.
    Reconnect,
    /// Show the command list.
    Help,
    /// Leave.
    Quit,
}

/// Input that is not a command.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum InputError {
    /// Nothing was typed.
    #[display("Type some darts, or 'help'")]
    Empty,
    /// A dart token did not parse.
    #[display("'{}' is not a dart (try T20, D16, S5, 25, 50, 0)", _0)]
    BadToken(String),
    /// `hit` outside Around-the-Clock.
    #[display("'hit' only works in Around-the-Clock")]
    HitWithoutTarget,
    /// `end` without a player.
    #[display("Usage: end <player-id>")]
    MissingWinner,
}

impl std::error::Error for InputError {}

/// Command list shown by `help`.
pub const HELP: &str = "\
Darts:    T20 D16 S5 5 25 50 0 (up to three per turn)
Clock:    hit / miss
end <id>  declare the winner
cancel    cancel the game
refresh   fetch the latest state
reconnect reopen live updates
quit      leave (the game stays open)";

/// Parses a console line.
///
/// `clock_score` is the active player's Around-the-Clock score. Each `hit` or
/// `miss` becomes a dart against the current target, and the target moves
/// on after every hit within the same line.
pub fn parse_command(line: &str, clock_score: Option<&ClockScore>) -> Result<Command, InputError> {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Err(InputError::Empty);
    };

    match first.to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => return Ok(Command::Quit),
        "help" | "?" => return Ok(Command::Help),
        "cancel" => return Ok(Command::Cancel),
        "refresh" | "r" => return Ok(Command::Refresh),
        "reconnect" => return Ok(Command::Reconnect),
        "end" => {
            return words
                .next()
                .map(|id| Command::End(id.to_string()))
                .ok_or(InputError::MissingWinner);
        }
        _ => {}
    }

    let mut score = clock_score.cloned();
    let mut throws = Vec::new();
    for token in line.split_whitespace() {
        let flag = match token.to_ascii_lowercase().as_str() {
            "hit" => Some(true),
            "miss" => Some(false),
            _ => None,
        };
        let throw = match (flag, score.as_ref()) {
            (Some(hit), Some(current)) => clock::throw_for_flag(current, hit),
            (Some(true), None) => return Err(InputError::HitWithoutTarget),
            _ => Throw::parse(token).ok_or_else(|| InputError::BadToken(token.to_string()))?,
        };
        if let Some(current) = score.as_mut() {
            *current = clock::score_turn(current, &vec![throw].into()).0;
        }
        throws.push(throw);
    }
    Ok(Command::Throws(throws.into()))
}
