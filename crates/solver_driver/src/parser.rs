//! # Solver Output Classification
//!
//! The solver writes human-readable text. Every line falls into exactly one
//! [`LineKind`]; anything else is an error so that protocol drift is caught
//! instead of silently dropped.
//!
//! A search prints a header, a border, one line per finished depth and a
//! closing border:
//!
//! ```text
//! *** problem # 1 ***
//!   A B C D E F G H
//! 1 - - - - - - - - 1
//!  depth|score|       time   |  nodes (N)  |   N/s    | principal variation
//! ------+-----+--------------+-------------+----------+---------------------
//!  9@73%  -51  0:00.001  6064  6064000 e8 H5 h8 C7 c6 C5 b8
//! 19@73% <-53  0:00.120  812000  6766666 e8
//! ------+-----+--------------+-------------+----------+---------------------
//! ```
//!
//! Evaluation lines have the layout
//! `<depth>[@<confidence>%] <score> <time> <nodes> [<nodes/s>] <move>...`.
//! A missing `@` means the result is exact. A score prefixed by `<` or `>` is
//! only a bound; such lines are classified as [`LineKind::UnresolvedBound`].

use othello_board::{Move, CONFIDENCE_LEVELS, EXACT_CONFIDENCE};

use crate::error::{SolverError, SolverResult};

/// Fields of one evaluation line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLine {
    pub depth: u32,
    pub confidence: u32,
    pub score: i32,
    pub best_moves: Vec<Move>,
}

/// What a single line of solver output is
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// Board diagram rows and column labels
    BoardArt,
    /// Table border; the second one of a job ends it
    Border,
    /// Column titles of the result table
    Header,
    /// `*** problem # N ***`
    ProblemMarker,
    /// Depth line whose score is a bound, not a value
    UnresolvedBound,
    Evaluation(ParsedLine),
}

/// Classify one line of solver output
pub fn classify_line(line: &str) -> SolverResult<LineKind> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Ok(LineKind::Blank);
    }
    if trimmed.starts_with("---") && trimmed.chars().all(|c| c == '-' || c == '+') {
        return Ok(LineKind::Border);
    }
    if trimmed.contains("depth") && trimmed.contains("score") {
        return Ok(LineKind::Header);
    }
    if trimmed.starts_with("*** problem") {
        return Ok(LineKind::ProblemMarker);
    }
    if is_board_art(trimmed) {
        return Ok(LineKind::BoardArt);
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() < 3 || !is_depth_token(tokens[0]) {
        return Err(SolverError::UnexpectedLine {
            line: line.to_string(),
        });
    }
    if tokens[1].starts_with('<') || tokens[1].starts_with('>') {
        return Ok(LineKind::UnresolvedBound);
    }

    parse_evaluation(line, &tokens).map(LineKind::Evaluation)
}

fn is_board_art(trimmed: &str) -> bool {
    if trimmed.starts_with("A B C D E F G H") || trimmed.starts_with('|') {
        return true;
    }
    // Board rows: "4 - - - O X - - - 4", the second token is a single cell
    let mut tokens = trimmed.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(row), Some(cell)) => {
            row.len() == 1
                && matches!(row.as_bytes()[0], b'1'..=b'8')
                && cell.len() == 1
                && matches!(cell.as_bytes()[0], b'-' | b'X' | b'O' | b'*' | b'.')
        }
        _ => false,
    }
}

/// `9`, `24@98%`
fn is_depth_token(token: &str) -> bool {
    let (depth, confidence) = match token.split_once('@') {
        Some((depth, confidence)) => (depth, Some(confidence)),
        None => (token, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(depth)
        && confidence.map_or(true, |c| c.strip_suffix('%').is_some_and(digits))
}

fn parse_evaluation(line: &str, tokens: &[&str]) -> SolverResult<ParsedLine> {
    let parse_error = |message: &str| SolverError::Parse {
        line: line.to_string(),
        message: message.to_string(),
    };

    let (depth, confidence) = match tokens[0].split_once('@') {
        Some((depth, confidence)) => (
            depth,
            confidence
                .trim_end_matches('%')
                .parse::<u32>()
                .map_err(|_| parse_error("bad confidence"))?,
        ),
        None => (tokens[0], EXACT_CONFIDENCE),
    };
    let depth = depth.parse::<u32>().map_err(|_| parse_error("bad depth"))?;
    if !CONFIDENCE_LEVELS.contains(&confidence) {
        return Err(parse_error("unknown confidence tier"));
    }

    let score = tokens[1]
        .trim_start_matches('+')
        .parse::<i32>()
        .map_err(|_| parse_error("bad score"))?;

    if !tokens[2].contains(':') {
        return Err(parse_error("missing time column"));
    }

    // Node count and the optional nodes-per-second column
    let numeric = tokens[3..]
        .iter()
        .take_while(|token| token.bytes().all(|b| b.is_ascii_digit()))
        .count();
    if numeric == 0 {
        return Err(parse_error("missing node count"));
    }

    let best_moves = tokens[3 + numeric..]
        .iter()
        .map(|token| token.parse::<Move>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedLine {
        depth,
        confidence,
        score,
        best_moves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(line: &str) -> Vec<Move> {
        line.split_whitespace().map(|m| m.parse().unwrap()).collect()
    }

    #[test]
    fn test_parses_selective_evaluation_line() {
        let kind = classify_line(" 9@73%  -51  0:00.001  6064  6064000 e8 H5 h8 C7 c6 C5 b8").unwrap();
        assert_eq!(
            kind,
            LineKind::Evaluation(ParsedLine {
                depth: 9,
                confidence: 73,
                score: -51,
                best_moves: moves("e8 h5 h8 c7 c6 c5 b8"),
            })
        );
    }

    #[test]
    fn test_exact_line_without_confidence() {
        match classify_line("24   +2  0:01.250  123456789 e6 f4").unwrap() {
            LineKind::Evaluation(parsed) => {
                assert_eq!(parsed.depth, 24);
                assert_eq!(parsed.confidence, 100);
                assert_eq!(parsed.score, 2);
                assert_eq!(parsed.best_moves, moves("e6 f4"));
            }
            other => panic!("expected evaluation, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_in_principal_variation() {
        match classify_line("12@95%  +10  0:00.010  5000  500000 a1 ps b2").unwrap() {
            LineKind::Evaluation(parsed) => assert_eq!(parsed.best_moves[1], Move::PASS),
            other => panic!("expected evaluation, got {other:?}"),
        }
    }

    #[test]
    fn test_bound_scores_are_unresolved() {
        let lower = "19@73% <-53  0:00.120  812000  6766666 e8";
        let upper = "19@73% >+12  0:00.120  812000  6766666 e8";
        assert_eq!(classify_line(lower).unwrap(), LineKind::UnresolvedBound);
        assert_eq!(classify_line(upper).unwrap(), LineKind::UnresolvedBound);
    }

    #[test]
    fn test_protocol_noise() {
        let border = "------+-----+--------------+-------------+----------+---------------------";
        assert_eq!(classify_line(border).unwrap(), LineKind::Border);
        assert_eq!(classify_line("").unwrap(), LineKind::Blank);
        assert_eq!(classify_line("   ").unwrap(), LineKind::Blank);
        assert_eq!(
            classify_line(" depth|score|       time   |  nodes (N)  |   N/s    | principal variation")
                .unwrap(),
            LineKind::Header
        );
        assert_eq!(classify_line("*** problem # 1 ***").unwrap(), LineKind::ProblemMarker);
        assert_eq!(classify_line("  A B C D E F G H").unwrap(), LineKind::BoardArt);
        assert_eq!(classify_line("4 - - - O X - - - 4").unwrap(), LineKind::BoardArt);
    }

    #[test]
    fn test_unknown_line_is_error() {
        assert!(matches!(
            classify_line("segmentation fault"),
            Err(SolverError::UnexpectedLine { .. })
        ));
    }

    #[test]
    fn test_unknown_confidence_is_parse_error() {
        assert!(matches!(
            classify_line("9@50%  -51  0:00.001  6064 e8"),
            Err(SolverError::Parse { .. })
        ));
    }

    #[test]
    fn test_bad_move_is_error() {
        assert!(matches!(
            classify_line("9@73%  -51  0:00.001  6064 z9"),
            Err(SolverError::Move(_))
        ));
    }
}
