//! Move representation and algebraic notation
//!
//! A move is a square index (`a1` = 0, `h1` = 7, `h8` = 63) or a pass.
//! Pass is stored as index 64 so a move always fits in a byte, which is also
//! the form persisted in best-move arrays.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PositionError;
use crate::symmetry;

/// A square to place a disc on, or a pass
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Move(u8);

impl Move {
    /// The side to move has no legal placement and hands the turn over
    pub const PASS: Move = Move(64);

    /// Move to square `index` (0-63)
    ///
    /// # Panics
    ///
    /// Panics if `index > 63`; use `Move::try_from` for untrusted input.
    pub fn square(index: u8) -> Move {
        assert!(index < 64, "square index {index} out of range");
        Move(index)
    }

    /// Move at column `col` and row `row`, both zero based
    pub fn at(col: u8, row: u8) -> Move {
        Move::square(row * 8 + col)
    }

    #[inline]
    pub fn is_pass(self) -> bool {
        self == Move::PASS
    }

    /// Raw index, 64 for pass
    #[inline]
    pub fn index(self) -> u8 {
        self.0
    }

    /// Single-bit mask of the target square, 0 for pass
    #[inline]
    pub fn mask(self) -> u64 {
        if self.is_pass() {
            0
        } else {
            1u64 << self.0
        }
    }

    /// Map this square through symmetry `rotation` (see [`crate::Position::rotate`])
    pub fn rotate(self, rotation: u8) -> Move {
        if self.is_pass() {
            return self;
        }
        Move(symmetry::rotate_mask(self.mask(), rotation).trailing_zeros() as u8)
    }

    /// Inverse of [`Move::rotate`]
    pub fn unrotate(self, rotation: u8) -> Move {
        if self.is_pass() {
            return self;
        }
        Move(symmetry::unrotate_mask(self.mask(), rotation).trailing_zeros() as u8)
    }
}

impl TryFrom<u8> for Move {
    type Error = PositionError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        if index > 64 {
            return Err(PositionError::InvalidMoveIndex { index });
        }
        Ok(Move(index))
    }
}

impl From<Move> for u8 {
    fn from(mv: Move) -> u8 {
        mv.0
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pass() {
            return f.write_str("ps");
        }
        let col = (b'a' + self.0 % 8) as char;
        let row = (b'1' + self.0 / 8) as char;
        write!(f, "{col}{row}")
    }
}

impl FromStr for Move {
    type Err = PositionError;

    /// Parses `a1`-`h8` in either case, and `--`, `ps` or `pa` as pass
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || PositionError::InvalidMoveNotation {
            text: text.to_string(),
        };

        let lower = text.to_ascii_lowercase();
        if matches!(lower.as_str(), "--" | "ps" | "pa") {
            return Ok(Move::PASS);
        }

        let bytes = lower.as_bytes();
        if bytes.len() != 2 {
            return Err(invalid());
        }
        let (col, row) = (bytes[0], bytes[1]);
        if !(b'a'..=b'h').contains(&col) || !(b'1'..=b'8').contains(&row) {
            return Err(invalid());
        }
        Ok(Move::at(col - b'a', row - b'1'))
    }
}
