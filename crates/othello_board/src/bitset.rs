//! Iteration over the set bits of a bitboard
//!
//! Squares come out lowest index first, one `trailing_zeros` plus one
//! "clear lowest bit" per step.

/// Iterator over the square indices set in a mask
#[derive(Copy, Clone, Debug, Default)]
pub struct Squares(u64);

impl Iterator for Squares {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.0.count_ones() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for Squares {}

/// Squares set in `mask`, ascending
#[inline]
pub fn squares(mask: u64) -> Squares {
    Squares(mask)
}
