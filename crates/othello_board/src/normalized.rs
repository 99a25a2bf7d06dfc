//! Canonical positions
//!
//! [`NormalizedPosition`] can only hold the canonical image of a symmetry
//! class. It is obtained from [`Position::normalize`], or by decoding an
//! encoding that is already canonical; decoders never normalize silently.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::board::Position;
use crate::error::{PositionError, PositionResult};

/// Length of the binary key: 8 bytes player, 8 bytes opponent
pub const ENCODED_LEN: usize = 16;

/// A position guaranteed to be the minimum of its 8 symmetry images
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPosition(Position);

impl NormalizedPosition {
    pub(crate) fn new_unchecked(position: Position) -> NormalizedPosition {
        debug_assert!(position.is_normalized());
        NormalizedPosition(position)
    }

    /// Wrap a position that must already be canonical
    pub fn try_from_position(position: Position) -> PositionResult<NormalizedPosition> {
        if !position.is_normalized() {
            return Err(PositionError::NotNormalized);
        }
        Ok(NormalizedPosition(position))
    }

    /// Validate raw bitboards
    pub fn from_bitboards(player: u64, opponent: u64) -> PositionResult<NormalizedPosition> {
        NormalizedPosition::try_from_position(Position::new(player, opponent)?)
    }

    /// Decode 32 uppercase hex characters
    pub fn from_hex(text: &str) -> PositionResult<NormalizedPosition> {
        NormalizedPosition::try_from_position(Position::from_hex(text)?)
    }

    /// Decode the 16-byte little-endian key
    pub fn from_bytes(bytes: &[u8]) -> PositionResult<NormalizedPosition> {
        let Ok(key) = <[u8; ENCODED_LEN]>::try_from(bytes) else {
            return Err(PositionError::InvalidLength {
                expected: ENCODED_LEN,
                found: bytes.len(),
            });
        };
        let packed = u128::from_le_bytes(key);
        NormalizedPosition::from_bitboards(packed as u64, (packed >> 64) as u64)
    }

    pub fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        let mut bytes = [0u8; ENCODED_LEN];
        bytes[..8].copy_from_slice(&self.0.player().to_le_bytes());
        bytes[8..].copy_from_slice(&self.0.opponent().to_le_bytes());
        bytes
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.0
    }

    /// Canonical start position
    pub fn start() -> NormalizedPosition {
        NormalizedPosition(Position::start())
    }

    pub fn empty() -> NormalizedPosition {
        NormalizedPosition(Position::empty())
    }
}

impl Deref for NormalizedPosition {
    type Target = Position;

    fn deref(&self) -> &Position {
        &self.0
    }
}

impl From<NormalizedPosition> for Position {
    fn from(normalized: NormalizedPosition) -> Position {
        normalized.0
    }
}

impl fmt::Display for NormalizedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NormalizedPosition {
    type Err = PositionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        NormalizedPosition::from_hex(text)
    }
}

impl Serialize for NormalizedPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NormalizedPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NormalizedPosition::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
