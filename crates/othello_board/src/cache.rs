//! In-memory evaluation cache
//!
//! Maps canonical positions to the deepest evaluation seen so far. Only
//! positions with a legal placement are stored; positions that must pass and
//! finished games are answered by derivation in [`EvaluationCache::lookup`].

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::board::Position;
use crate::evaluation::{Evaluation, EXACT_CONFIDENCE};
use crate::moves::Move;
use crate::normalized::NormalizedPosition;

/// Thread-safe map from canonical position to its best known evaluation
#[derive(Debug, Default)]
pub struct EvaluationCache {
    entries: RwLock<HashMap<NormalizedPosition, Evaluation>>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `evaluation` if nothing is cached for its position or it is
    /// strictly deeper than the cached one
    ///
    /// # Panics
    ///
    /// Panics if the position has no legal placement. Such positions are
    /// answered through the pass and game-end paths of `lookup`.
    pub fn upsert(&self, evaluation: Evaluation) {
        assert!(
            evaluation.position.has_moves(),
            "cannot cache evaluation for position without moves: {}",
            evaluation.position
        );

        let mut entries = self.entries.write();
        match entries.get(&evaluation.position) {
            Some(stored) if !evaluation.is_deeper_than(stored) => {}
            _ => {
                entries.insert(evaluation.position, evaluation);
            }
        }
    }

    pub fn upsert_many(&self, evaluations: impl IntoIterator<Item = Evaluation>) {
        for evaluation in evaluations {
            self.upsert(evaluation);
        }
    }

    /// Best known evaluation for `position`
    ///
    /// - with legal placements: the stored entry;
    /// - with only a pass: derived from the passed position's entry;
    /// - game over: an exact evaluation built from the final score.
    pub fn lookup(&self, position: NormalizedPosition) -> Option<Evaluation> {
        if position.has_moves() {
            return self.entries.read().get(&position).cloned();
        }

        let passed = position.pass();
        if passed.has_moves() {
            return self.lookup_passed(position, passed);
        }

        Some(game_end_evaluation(position))
    }

    fn lookup_passed(&self, position: NormalizedPosition, passed: Position) -> Option<Evaluation> {
        let (key, rotation) = passed.normalize();
        let stored = self.entries.read().get(&key).cloned()?;

        // Stored moves are in the canonical frame of the passed position
        let best_moves = std::iter::once(Move::PASS)
            .chain(stored.best_moves.iter().map(|mv| mv.unrotate(rotation)))
            .collect();

        Some(Evaluation {
            position,
            level: stored.level,
            depth: stored.depth,
            confidence: stored.confidence,
            score: -stored.score,
            best_moves,
        })
    }

    /// Positions from `positions` that `lookup` cannot answer, in input order
    pub fn get_missing(&self, positions: &[NormalizedPosition]) -> Vec<NormalizedPosition> {
        positions
            .iter()
            .copied()
            .filter(|&position| self.lookup(position).is_none())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn game_end_evaluation(position: NormalizedPosition) -> Evaluation {
    let empties = position.count_empties();
    Evaluation {
        position,
        level: empties + empties % 2,
        depth: empties,
        confidence: EXACT_CONFIDENCE,
        score: position.final_score(),
        best_moves: Vec::new(),
    }
}
