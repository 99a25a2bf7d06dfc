//! Error types for the board crate
//!
//! Validation failures for position encodings, move notation and evaluation
//! contents. Malformed input and non-canonical input are separate variants so
//! callers can tell "garbage" apart from "forgot to normalize".

use thiserror::Error;

use crate::moves::Move;

/// Errors raised while constructing or decoding positions and moves
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    /// Player and opponent masks share at least one square
    #[error("Overlapping discs: player {player:#018x} and opponent {opponent:#018x}")]
    Overlap { player: u64, opponent: u64 },

    /// Encoded input has the wrong size
    #[error("Invalid encoded length: expected {expected}, found {found}")]
    InvalidLength { expected: usize, found: usize },

    /// Hex string contains characters outside `0-9A-F`
    #[error("Invalid hex encoding: {text:?}")]
    InvalidHex { text: String },

    /// Input decoded fine but is not the canonical image of its symmetry class
    #[error("Position is not normalized")]
    NotNormalized,

    /// Move text is not `a1`-`h8` or a pass token
    #[error("Invalid move notation: {text:?}")]
    InvalidMoveNotation { text: String },

    /// Move index outside `0..=64`
    #[error("Invalid move index: {index} (must be 0-63, or 64 for pass)")]
    InvalidMoveIndex { index: u8 },
}

/// Errors raised when an evaluation violates its validity rules
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Confidence is not one of the tiers the solver reports
    #[error("Invalid confidence {confidence}%")]
    InvalidConfidence { confidence: u32 },

    /// Score outside the disc-differential range
    #[error("Score {score} out of range (must be -64..=64)")]
    ScoreOutOfRange { score: i32 },

    /// A best move is illegal in the position reached by the preceding moves
    #[error("Illegal best move {mv} at index {index}")]
    IllegalMove { index: usize, mv: Move },
}

/// Result type alias for position operations
pub type PositionResult<T> = Result<T, PositionError>;
