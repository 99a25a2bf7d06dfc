//! Driver for an external Othello endgame solver
//!
//! The solver is a separate executable started with
//! `-solve /dev/stdin -level <level> -verbose 3`. [`SolverDriver`] writes one
//! problem per job and turns the solver's table output into
//! [`othello_board::Evaluation`]s.

pub mod error;
pub mod parser;
pub mod process;

pub use error::{SolverError, SolverResult};
pub use parser::{classify_line, LineKind, ParsedLine};
pub use process::{KillHandle, SolverConfig, SolverDriver, SolverStatus};
