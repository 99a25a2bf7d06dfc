//! Book seeding
//!
//! Enumerates every canonical position reachable from the start position
//! with at most a given number of discs. Positions without a legal
//! placement are left out; the book reaches them through their passed
//! counterpart.

use std::collections::{HashSet, VecDeque};

use othello_board::{NormalizedPosition, Position};

/// Canonical positions with legal placements and at most `max_discs` discs,
/// in breadth-first order
pub fn explore(max_discs: u32) -> Vec<NormalizedPosition> {
    let (start, _) = Position::start().normalize();
    if start.count_discs() > max_discs {
        return Vec::new();
    }

    let mut seen = HashSet::from([start]);
    let mut frontier = VecDeque::from([start]);
    let mut found = Vec::new();

    while let Some(position) = frontier.pop_front() {
        if position.has_moves() {
            found.push(position);
        }
        for child in position.children() {
            if child.count_discs() > max_discs {
                continue;
            }
            let (child, _) = child.normalize();
            if seen.insert(child) {
                frontier.push_back(child);
            }
        }
    }
    found
}
