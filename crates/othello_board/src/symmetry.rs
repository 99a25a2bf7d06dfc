//! # Board Symmetries and Normalization
//!
//! The Othello board has the symmetry group of the square: 8 elements. Every
//! element is written here as a composition of three involutions on a
//! bitboard:
//!
//! | Bit | Transform | Square mapping |
//! |-----|-----------|----------------|
//! | 0 | horizontal mirror | `(row, col) -> (row, 7 - col)` |
//! | 1 | vertical mirror | `(row, col) -> (7 - row, col)` |
//! | 2 | main-diagonal transpose | `(row, col) -> (col, row)` |
//!
//! A rotation index `r` in `0..8` applies the transforms whose bit is set, in
//! bit order. The inverse applies the same transforms in reverse order, since
//! each one is its own inverse.
//!
//! Normalization picks the image that is smallest when `(player, opponent)`
//! is read as one unsigned 128-bit number. Every position of a symmetry class
//! normalizes to the same canonical value, which is what the cache, queue and
//! database key on.
//!
//! ## Further Reading
//!
//! - **Chess Programming Wiki - Flipping Mirroring and Rotating**:
//!   https://www.chessprogramming.org/Flipping_Mirroring_and_Rotating

use crate::board::Position;
use crate::normalized::NormalizedPosition;

pub const ROTATIONS: u8 = 8;

#[inline]
fn mirror_horizontal(mut x: u64) -> u64 {
    const K1: u64 = 0x5555_5555_5555_5555;
    const K2: u64 = 0x3333_3333_3333_3333;
    const K4: u64 = 0x0F0F_0F0F_0F0F_0F0F;
    x = ((x >> 1) & K1) | ((x & K1) << 1);
    x = ((x >> 2) & K2) | ((x & K2) << 2);
    ((x >> 4) & K4) | ((x & K4) << 4)
}

#[inline]
fn mirror_vertical(x: u64) -> u64 {
    x.swap_bytes()
}

#[inline]
fn transpose(mut x: u64) -> u64 {
    const K1: u64 = 0x5500_5500_5500_5500;
    const K2: u64 = 0x3333_0000_3333_0000;
    const K4: u64 = 0x0F0F_0F0F_0000_0000;
    let mut t = K4 & (x ^ (x << 28));
    x ^= t ^ (t >> 28);
    t = K2 & (x ^ (x << 14));
    x ^= t ^ (t >> 14);
    t = K1 & (x ^ (x << 7));
    x ^ t ^ (t >> 7)
}

/// Apply symmetry `rotation` to a single bitboard
pub fn rotate_mask(mut mask: u64, rotation: u8) -> u64 {
    debug_assert!(rotation < ROTATIONS);
    if rotation & 1 != 0 {
        mask = mirror_horizontal(mask);
    }
    if rotation & 2 != 0 {
        mask = mirror_vertical(mask);
    }
    if rotation & 4 != 0 {
        mask = transpose(mask);
    }
    mask
}

/// Exact inverse of [`rotate_mask`]
pub fn unrotate_mask(mut mask: u64, rotation: u8) -> u64 {
    debug_assert!(rotation < ROTATIONS);
    if rotation & 4 != 0 {
        mask = transpose(mask);
    }
    if rotation & 2 != 0 {
        mask = mirror_vertical(mask);
    }
    if rotation & 1 != 0 {
        mask = mirror_horizontal(mask);
    }
    mask
}

#[inline]
fn sort_key(position: &Position) -> u128 {
    ((position.player() as u128) << 64) | position.opponent() as u128
}

impl Position {
    /// Image of this position under symmetry `rotation` (0-7)
    pub fn rotate(&self, rotation: u8) -> Position {
        Position::from_masks_unchecked(
            rotate_mask(self.player(), rotation),
            rotate_mask(self.opponent(), rotation),
        )
    }

    /// Inverse of [`Position::rotate`]
    pub fn unrotate(&self, rotation: u8) -> Position {
        Position::from_masks_unchecked(
            unrotate_mask(self.player(), rotation),
            unrotate_mask(self.opponent(), rotation),
        )
    }

    /// Canonical image and the rotation that produces it
    ///
    /// Symmetric positions have several rotations reaching the minimum; the
    /// lowest index wins, so an already canonical position reports 0.
    pub fn normalize(&self) -> (NormalizedPosition, u8) {
        let mut best = *self;
        let mut best_rotation = 0;
        for rotation in 1..ROTATIONS {
            let image = self.rotate(rotation);
            if sort_key(&image) < sort_key(&best) {
                best = image;
                best_rotation = rotation;
            }
        }
        (NormalizedPosition::new_unchecked(best), best_rotation)
    }

    pub fn is_normalized(&self) -> bool {
        let key = sort_key(self);
        (1..ROTATIONS).all(|rotation| sort_key(&self.rotate(rotation)) >= key)
    }
}
