//! # Position - Othello Board as Two Bitboards
//!
//! ## Overview
//!
//! A position is a pair of 64-bit masks, one for the side to move (`player`)
//! and one for the other side (`opponent`). Bit `row * 8 + col` is square
//! `(col, row)`, so `a1` is bit 0, `h1` bit 7 and `h8` bit 63. The two masks
//! never share a bit.
//!
//! Positions are `Copy` values: every operation that "changes" the board
//! returns a new position.
//!
//! ## Move Generation
//!
//! [`Position::moves`] computes all legal squares at once. For each of the
//! four axes it flood-fills runs of opponent discs adjacent to player discs,
//! doubling the shift each round so a run of up to six discs is covered in
//! four steps. Opponent masks are pre-cleared on the edge files/ranks that
//! would otherwise wrap around to the next row. [`Position::flipped`] is the
//! straightforward 8-direction ray cast, used to apply moves and as the
//! reference the fast generator is tested against.

use std::fmt;

use crate::bitset;
use crate::error::{PositionError, PositionResult};
use crate::moves::Move;

/// Clears files a and h, used for shifts that move along a row
const NOT_EDGE_FILES: u64 = 0x7E7E_7E7E_7E7E_7E7E;
/// Clears ranks 1 and 8, used for vertical shifts
const NOT_EDGE_RANKS: u64 = 0x00FF_FFFF_FFFF_FF00;
/// Clears the whole border, used for diagonal shifts
const NOT_BORDER: u64 = 0x007E_7E7E_7E7E_7E00;

const DIRECTIONS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Side-to-move relative Othello position
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Position {
    player: u64,
    opponent: u64,
}

/// Legal targets along one axis, in both shift directions
#[inline]
fn axis_moves(player: u64, mask: u64, dir: u32) -> u64 {
    let mut flip_left = mask & (player << dir);
    flip_left |= mask & (flip_left << dir);
    let mask_left = mask & (mask << dir);
    flip_left |= mask_left & (flip_left << (2 * dir));
    flip_left |= mask_left & (flip_left << (2 * dir));

    let mut flip_right = mask & (player >> dir);
    flip_right |= mask & (flip_right >> dir);
    let mask_right = mask & (mask >> dir);
    flip_right |= mask_right & (flip_right >> (2 * dir));
    flip_right |= mask_right & (flip_right >> (2 * dir));

    (flip_left << dir) | (flip_right >> dir)
}

impl Position {
    /// Build a position, rejecting overlapping masks
    pub fn new(player: u64, opponent: u64) -> PositionResult<Position> {
        if player & opponent != 0 {
            return Err(PositionError::Overlap { player, opponent });
        }
        Ok(Position { player, opponent })
    }

    /// Crate-internal constructor for masks already known to be disjoint
    pub(crate) fn from_masks_unchecked(player: u64, opponent: u64) -> Position {
        debug_assert_eq!(player & opponent, 0);
        Position { player, opponent }
    }

    /// Board with no discs at all
    pub fn empty() -> Position {
        Position::default()
    }

    /// Standard starting position, black to move
    pub fn start() -> Position {
        Position {
            player: 0x0000_0008_1000_0000,
            opponent: 0x0000_0010_0800_0000,
        }
    }

    /// Decode from 32 hex characters (player then opponent, big-endian)
    ///
    /// Accepts any position, canonical or not; use
    /// [`crate::NormalizedPosition::from_hex`] for keys.
    pub fn from_hex(text: &str) -> PositionResult<Position> {
        if text.len() != 32 {
            return Err(PositionError::InvalidLength {
                expected: 32,
                found: text.len(),
            });
        }
        if text.bytes().any(|b| b.is_ascii_lowercase()) {
            return Err(PositionError::InvalidHex {
                text: text.to_string(),
            });
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(text, &mut bytes).map_err(|_| PositionError::InvalidHex {
            text: text.to_string(),
        })?;
        let packed = u128::from_be_bytes(bytes);
        Position::new((packed >> 64) as u64, packed as u64)
    }

    /// 32 uppercase hex characters
    pub fn to_hex(&self) -> String {
        format!("{:016X}{:016X}", self.player, self.opponent)
    }

    #[inline]
    pub fn player(&self) -> u64 {
        self.player
    }

    #[inline]
    pub fn opponent(&self) -> u64 {
        self.opponent
    }

    #[inline]
    pub fn occupied(&self) -> u64 {
        self.player | self.opponent
    }

    #[inline]
    pub fn empties(&self) -> u64 {
        !self.occupied()
    }

    /// Bitmask of all legal destination squares for the side to move
    pub fn moves(&self) -> u64 {
        let (p, o) = (self.player, self.opponent);
        let moves = axis_moves(p, o & NOT_EDGE_FILES, 1)
            | axis_moves(p, o & NOT_EDGE_RANKS, 8)
            | axis_moves(p, o & NOT_BORDER, 7)
            | axis_moves(p, o & NOT_BORDER, 9);
        moves & self.empties()
    }

    #[inline]
    pub fn has_moves(&self) -> bool {
        self.moves() != 0
    }

    /// Neither side can move
    pub fn is_game_end(&self) -> bool {
        !self.has_moves() && !self.pass().has_moves()
    }

    /// Opponent discs flipped by placing a disc on `index`
    ///
    /// Returns 0 for occupied squares.
    pub fn flipped(&self, index: u8) -> u64 {
        if self.occupied() & (1u64 << index) != 0 {
            return 0;
        }
        let (row, col) = ((index / 8) as i8, (index % 8) as i8);
        let mut flips = 0;
        for (dr, dc) in DIRECTIONS {
            let mut line = 0u64;
            let (mut r, mut c) = (row + dr, col + dc);
            while (0..8).contains(&r) && (0..8).contains(&c) {
                let bit = 1u64 << (r * 8 + c);
                if self.opponent & bit != 0 {
                    line |= bit;
                } else {
                    if self.player & bit != 0 {
                        flips |= line;
                    }
                    break;
                }
                r += dr;
                c += dc;
            }
        }
        flips
    }

    /// Whether `mv` is legal here; a pass is legal only when no placement is
    /// and the game is not over
    pub fn is_valid_move(&self, mv: Move) -> bool {
        if mv.is_pass() {
            return !self.has_moves() && self.pass().has_moves();
        }
        self.moves() & mv.mask() != 0
    }

    /// Hand the turn to the other side
    #[inline]
    pub fn pass(&self) -> Position {
        Position {
            player: self.opponent,
            opponent: self.player,
        }
    }

    /// Play `mv` and return the position from the new mover's perspective
    ///
    /// A pass always swaps sides. Placing on an occupied square, or on a
    /// square that flips nothing, returns the position unchanged; check
    /// [`Position::is_valid_move`] first when that must be an error.
    pub fn do_move(&self, mv: Move) -> Position {
        if mv.is_pass() {
            return self.pass();
        }
        let flips = self.flipped(mv.index());
        if flips == 0 {
            return *self;
        }
        Position {
            player: self.opponent & !flips,
            opponent: self.player | mv.mask() | flips,
        }
    }

    /// All positions one move away
    ///
    /// When only a pass is possible this is the passed position; when the
    /// game is over it is empty.
    pub fn children(&self) -> Vec<Position> {
        let moves = self.moves();
        if moves == 0 {
            let passed = self.pass();
            return if passed.has_moves() {
                vec![passed]
            } else {
                Vec::new()
            };
        }
        bitset::squares(moves)
            .map(|index| self.do_move(Move::square(index)))
            .collect()
    }

    #[inline]
    pub fn count_discs(&self) -> u32 {
        self.occupied().count_ones()
    }

    #[inline]
    pub fn count_empties(&self) -> u32 {
        64 - self.count_discs()
    }

    /// Final score for the side to move with standard scoring: empty squares
    /// count for the winner
    pub fn final_score(&self) -> i32 {
        let player = self.player.count_ones() as i32;
        let opponent = self.opponent.count_ones() as i32;
        match player.cmp(&opponent) {
            std::cmp::Ordering::Greater => 64 - 2 * opponent,
            std::cmp::Ordering::Less => -64 + 2 * player,
            std::cmp::Ordering::Equal => 0,
        }
    }

    /// 64 characters, `X` player, `O` opponent, `-` empty, a1 first
    pub fn to_board_string(&self) -> String {
        (0..64u8)
            .map(|index| {
                let bit = 1u64 << index;
                if self.player & bit != 0 {
                    'X'
                } else if self.opponent & bit != 0 {
                    'O'
                } else {
                    '-'
                }
            })
            .collect()
    }

    /// Human-readable board; legal moves are marked with `*`
    pub fn ascii_art(&self) -> String {
        let moves = self.moves();
        let mut out = String::from("  a b c d e f g h\n");
        for row in 0..8u8 {
            out.push((b'1' + row) as char);
            for col in 0..8u8 {
                let bit = 1u64 << (row * 8 + col);
                let cell = if self.player & bit != 0 {
                    'X'
                } else if self.opponent & bit != 0 {
                    'O'
                } else if moves & bit != 0 {
                    '*'
                } else {
                    '-'
                };
                out.push(' ');
                out.push(cell);
            }
            out.push('\n');
        }
        out
    }
}

/// Orders by `(player, opponent)`, the same order normalization minimizes
impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.player, self.opponent).cmp(&(other.player, other.opponent))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(text: &str) -> Move {
        text.parse().expect("valid move")
    }

    #[test]
    fn test_start_position_moves() {
        let start = Position::start();
        let expected = mv("d3").mask() | mv("c4").mask() | mv("f5").mask() | mv("e6").mask();
        assert_eq!(start.moves(), expected);
        assert_eq!(start.count_discs(), 4);
    }

    #[test]
    fn test_new_rejects_overlap() {
        assert_eq!(
            Position::new(1, 3),
            Err(PositionError::Overlap {
                player: 1,
                opponent: 3
            })
        );
    }

    #[test]
    fn test_do_move_flips_and_swaps_sides() {
        let start = Position::start();
        let after = start.do_move(mv("d3"));
        // White to move: white lost d4, black gained d3 and d4
        assert_eq!(after.count_discs(), 5);
        assert_eq!(after.player().count_ones(), 1);
        assert_eq!(after.opponent().count_ones(), 4);
        assert_ne!(after.opponent() & mv("d4").mask(), 0);
    }

    #[test]
    fn test_do_move_invalid_is_noop() {
        let start = Position::start();
        assert_eq!(start.do_move(mv("a1")), start, "no flips");
        assert_eq!(start.do_move(mv("d4")), start, "occupied");
    }

    #[test]
    fn test_pass_swaps_without_validation() {
        let start = Position::start();
        let passed = start.do_move(Move::PASS);
        assert_eq!(passed.player(), start.opponent());
        assert_eq!(passed.opponent(), start.player());
        assert!(!start.is_valid_move(Move::PASS), "start has placements");
    }

    #[test]
    fn test_final_score_gives_empties_to_winner() {
        let position = Position::new(0b111, 0b1000).unwrap();
        assert_eq!(position.final_score(), 64 - 2);
        assert_eq!(position.pass().final_score(), -64 + 2);
        assert_eq!(Position::empty().final_score(), 0);
        assert_eq!(Position::new(u64::MAX, 0).unwrap().final_score(), 64);
    }

    #[test]
    fn test_empty_board_has_no_moves() {
        let empty = Position::empty();
        assert_eq!(empty.moves(), 0);
        assert!(empty.is_game_end());
        assert!(empty.children().is_empty());
    }

    #[test]
    fn test_hex_round_trip_and_board_string() {
        let start = Position::start();
        assert_eq!(start.to_hex(), "00000008100000000000001008000000");
        assert_eq!(Position::from_hex(&start.to_hex()), Ok(start));
        let board = start.to_board_string();
        assert_eq!(board.len(), 64);
        assert_eq!(&board[24..40], "---OX------XO---");
    }

    #[test]
    fn test_hex_rejects_lowercase_and_bad_length() {
        assert!(matches!(
            Position::from_hex("00"),
            Err(PositionError::InvalidLength { .. })
        ));
        assert!(matches!(
            Position::from_hex("0000000000000000000000000000000a"),
            Err(PositionError::InvalidHex { .. })
        ));
        assert!(matches!(
            Position::from_hex("000000000000000000000000000000ZZ"),
            Err(PositionError::InvalidHex { .. })
        ));
    }
}
