//! Plain-text scoreboard.

use std::fmt::{self, Write};

use oche_rules::{CricketScore, PlayerState, VariantScore, classic, leader};

use crate::session::{SessionSnapshot, SessionStatus, TurnPhase};

/// Renders a snapshot as a few lines of text, one per player.
///
/// The active player is marked with `>`; a pending submission is flagged
/// on the header line.
pub fn render_scoreboard(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    write_scoreboard(&mut out, snapshot).ok();
    out
}

fn write_scoreboard(out: &mut impl Write, snapshot: &SessionSnapshot) -> fmt::Result {
    let session = snapshot.session();

    write!(
        out,
        "{} [{}] {}, turn {}",
        session.id(),
        session.variant(),
        session.status(),
        session.turn_number()
    )?;
    if *snapshot.phase() == TurnPhase::Submitting {
        out.write_str(" (sending...)")?;
    }
    out.write_char('\n')?;

    let active = session.active_player().map(|p| p.id().clone());
    for player in session.players() {
        let cursor = if active.as_deref() == Some(player.id().as_str()) {
            '>'
        } else {
            ' '
        };
        writeln!(out, "{} {:<12} {}", cursor, player.name(), score_line(player))?;
    }

    match (session.status(), session.winner()) {
        (SessionStatus::Completed, Some(winner)) => {
            let name = session
                .player(winner)
                .map(|p| p.name().as_str())
                .unwrap_or(winner.as_str());
            writeln!(out, "Winner: {}", name)?;
        }
        (SessionStatus::InProgress, _) if *session.turn_number() > 0 => {
            if let Some(best) = leader(session.players()) {
                writeln!(out, "Leading: {}", best.name())?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn score_line(player: &PlayerState) -> String {
    match player.score() {
        VariantScore::Classic(score) => {
            let mut line = format!("{:>3} left, avg {:.1}", score.remaining(), score.average());
            if classic::is_one_dart_finish(*score.remaining()) {
                line.push_str(", on a finish");
            }
            line
        }
        VariantScore::Cricket(score) => format!("{} | {} pts", cricket_marks(score), score.total()),
        VariantScore::AroundTheClock(score) if score.is_finished() => {
            format!("done in {} darts", score.throws())
        }
        VariantScore::AroundTheClock(score) => format!(
            "on {}, {} hit, {} darts",
            score.current_target(),
            score.validated().len(),
            score.throws()
        ),
    }
}

fn cricket_marks(score: &CricketScore) -> String {
    score
        .marks()
        .iter()
        .map(|mark| {
            let glyph = match mark.hits() {
                0 => "-",
                1 => "/",
                2 => "X",
                _ => "O",
            };
            let label = if *mark.target() == oche_rules::BULL {
                "B".to_string()
            } else {
                mark.target().to_string()
            };
            format!("{}{}", label, glyph)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use oche_rules::{Seat, Variant};

    fn seats() -> Vec<Seat> {
        vec![Seat::new("a", "Alice"), Seat::new("b", "Bob")]
    }

    #[test]
    fn test_classic_board_marks_active_player() {
        let mut session = Session::new("s1", Variant::Classic501, &seats());
        session
            .transition(SessionStatus::InProgress, None)
            .expect("start");
        let board = render_scoreboard(&SessionSnapshot::new(session, TurnPhase::AwaitingThrow));

        assert!(board.starts_with("s1 [CLASSIC_501] IN_PROGRESS, turn 0"));
        assert!(board.contains("> Alice"));
        assert!(board.contains("  Bob"));
        assert!(board.contains("501 left"));
        assert!(!board.contains("sending"));
    }

    #[test]
    fn test_submitting_is_flagged() {
        let session = Session::new("s1", Variant::Cricket, &seats());
        let board = render_scoreboard(&SessionSnapshot::new(session, TurnPhase::Submitting));
        assert!(board.contains("(sending...)"));
        assert!(board.contains("15- 16- 17- 18- 19- 20- B- | 0 pts"));
    }

    #[test]
    fn test_clock_line() {
        let session = Session::new("s1", Variant::AroundTheClock, &seats());
        let board = render_scoreboard(&SessionSnapshot::new(session, TurnPhase::AwaitingThrow));
        assert!(board.contains("on 1, 0 hit, 0 darts"));
    }
}
