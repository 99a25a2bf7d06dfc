//! Jobs, evaluations and their validity rules
//!
//! An [`Evaluation`] is the result of searching one canonical position. Two
//! different notions of "better" exist and are kept apart on purpose:
//!
//! - [`Evaluation::is_deeper_than`]: more plies proven, used by the in-memory
//!   cache;
//! - [`Evaluation::outranks_level`]: higher requested strength, used by the
//!   persisted book.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::moves::Move;
use crate::normalized::NormalizedPosition;

/// Certainty tiers reported by the solver; 100 means exact
pub const CONFIDENCE_LEVELS: [u32; 6] = [73, 87, 95, 98, 99, 100];

/// Confidence of an exact, fully proven result
pub const EXACT_CONFIDENCE: u32 = 100;

pub const MIN_SCORE: i32 = -64;
pub const MAX_SCORE: i32 = 64;

/// A request to search `position` at strength `level`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub position: NormalizedPosition,
    pub level: u32,
}

/// Search result for one position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub position: NormalizedPosition,
    /// Requested search strength
    pub level: u32,
    /// Plies searched
    pub depth: u32,
    pub confidence: u32,
    /// Disc differential for the side to move
    pub score: i32,
    /// Principal variation starting at `position`
    pub best_moves: Vec<Move>,
}

/// A finished job as reported by a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub evaluation: Evaluation,
    pub computation_time: Duration,
}

impl Evaluation {
    /// Build and validate an evaluation
    pub fn new(
        position: NormalizedPosition,
        level: u32,
        depth: u32,
        confidence: u32,
        score: i32,
        best_moves: Vec<Move>,
    ) -> Result<Evaluation, EvaluationError> {
        let evaluation = Evaluation {
            position,
            level,
            depth,
            confidence,
            score,
            best_moves,
        };
        evaluation.validate()?;
        Ok(evaluation)
    }

    /// Check confidence tier, score range and legality of the best-move line
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if !CONFIDENCE_LEVELS.contains(&self.confidence) {
            return Err(EvaluationError::InvalidConfidence {
                confidence: self.confidence,
            });
        }
        if !(MIN_SCORE..=MAX_SCORE).contains(&self.score) {
            return Err(EvaluationError::ScoreOutOfRange { score: self.score });
        }

        let mut position = self.position.position();
        for (index, &mv) in self.best_moves.iter().enumerate() {
            if !position.is_valid_move(mv) {
                return Err(EvaluationError::IllegalMove { index, mv });
            }
            position = position.do_move(mv);
        }
        Ok(())
    }

    #[inline]
    pub fn is_exact(&self) -> bool {
        self.confidence == EXACT_CONFIDENCE
    }

    /// Cache authority rule: strictly more plies searched
    #[inline]
    pub fn is_deeper_than(&self, other: &Evaluation) -> bool {
        self.depth > other.depth
    }

    /// Persistence authority rule: strictly higher level than what is stored
    #[inline]
    pub fn outranks_level(&self, stored_level: u32) -> bool {
        self.level > stored_level
    }

    /// Occupied squares of the evaluated position, the book's indexing axis
    pub fn disc_count(&self) -> u32 {
        self.position.count_discs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(line: &str) -> Vec<Move> {
        line.split_whitespace().map(|m| m.parse().unwrap()).collect()
    }

    #[test]
    fn test_valid_line_from_start() {
        let evaluation = Evaluation::new(
            NormalizedPosition::start(),
            10,
            10,
            73,
            -2,
            moves("d3 c5 b6"),
        );
        assert!(evaluation.is_ok(), "{evaluation:?}");
    }

    #[test]
    fn test_rejects_illegal_second_move() {
        let result = Evaluation::new(NormalizedPosition::start(), 10, 10, 73, 0, moves("d3 d3"));
        assert_eq!(
            result,
            Err(EvaluationError::IllegalMove {
                index: 1,
                mv: "d3".parse().unwrap()
            })
        );
    }

    #[test]
    fn test_rejects_pass_when_moves_exist() {
        let result = Evaluation::new(NormalizedPosition::start(), 1, 1, 100, 0, vec![Move::PASS]);
        assert!(matches!(result, Err(EvaluationError::IllegalMove { index: 0, .. })));
    }

    #[test]
    fn test_rejects_bad_confidence_and_score() {
        let start = NormalizedPosition::start();
        assert_eq!(
            Evaluation::new(start, 1, 1, 50, 0, vec![]),
            Err(EvaluationError::InvalidConfidence { confidence: 50 })
        );
        assert_eq!(
            Evaluation::new(start, 1, 1, 100, 65, vec![]),
            Err(EvaluationError::ScoreOutOfRange { score: 65 })
        );
    }

    #[test]
    fn test_authority_predicates_differ() {
        let start = NormalizedPosition::start();
        let shallow_high_level = Evaluation::new(start, 30, 12, 73, 0, vec![]).unwrap();
        let deep_low_level = Evaluation::new(start, 20, 20, 73, 0, vec![]).unwrap();
        assert!(deep_low_level.is_deeper_than(&shallow_high_level));
        assert!(!deep_low_level.outranks_level(shallow_high_level.level));
        assert!(shallow_high_level.outranks_level(deep_low_level.level));
    }

    #[test]
    fn test_job_result_json_round_trip() {
        let evaluation = Evaluation::new(NormalizedPosition::start(), 4, 4, 100, 0, moves("f5")).unwrap();
        let result = JobResult {
            evaluation,
            computation_time: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: JobResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
