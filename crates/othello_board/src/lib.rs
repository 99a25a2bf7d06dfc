//! Othello board engine for the opening book
//!
//! Bitboard positions, legal-move generation, symmetry normalization, the
//! evaluation model shared by workers and the book server, and the
//! in-memory [`EvaluationCache`].

pub mod bitset;
pub mod board;
pub mod cache;
pub mod error;
pub mod evaluation;
pub mod moves;
pub mod normalized;
pub mod symmetry;

pub use board::Position;
pub use cache::EvaluationCache;
pub use error::{EvaluationError, PositionError, PositionResult};
pub use evaluation::{
    Evaluation, Job, JobResult, CONFIDENCE_LEVELS, EXACT_CONFIDENCE, MAX_SCORE, MIN_SCORE,
};
pub use moves::Move;
pub use normalized::{NormalizedPosition, ENCODED_LEN};
pub use symmetry::ROTATIONS;
