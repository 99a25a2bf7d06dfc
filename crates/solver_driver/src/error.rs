//! Error types for the solver driver

use othello_board::{EvaluationError, PositionError};
use thiserror::Error;

/// Errors that can occur while driving the solver process
#[derive(Error, Debug)]
pub enum SolverError {
    /// Reading from or writing to the subprocess failed
    #[error("Solver I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The solver binary could not be started
    #[error("Failed to spawn solver {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was started without a piped stdin or stdout
    #[error("Solver process has no {pipe} pipe")]
    MissingPipe { pipe: &'static str },

    /// A line looked like an evaluation but a field did not parse
    #[error("Cannot parse solver line {line:?}: {message}")]
    Parse { line: String, message: String },

    /// A line matched none of the known output shapes
    #[error("Unexpected solver output: {line:?}")]
    UnexpectedLine { line: String },

    /// An evaluation line reported a shallower depth than its predecessor
    #[error("Solver depth went from {previous} down to {depth}")]
    DepthRegression { previous: u32, depth: u32 },

    /// Move notation in a principal variation was malformed
    #[error("Invalid move in solver output: {0}")]
    Move(#[from] PositionError),

    /// A parsed evaluation failed validation against the job position
    #[error("Solver produced an invalid evaluation: {0}")]
    InvalidEvaluation(#[from] EvaluationError),

    /// The driver was killed and accepts no more work
    #[error("Solver driver has been killed")]
    Killed,
}

impl SolverError {
    /// Whether the error belongs to one job's output rather than to the
    /// solver process, so the driver can take the next job
    pub fn is_job_failure(&self) -> bool {
        matches!(
            self,
            SolverError::Parse { .. }
                | SolverError::UnexpectedLine { .. }
                | SolverError::DepthRegression { .. }
                | SolverError::Move(_)
                | SolverError::InvalidEvaluation(_)
        )
    }
}

/// Result type alias for solver operations
pub type SolverResult<T> = Result<T, SolverError>;
