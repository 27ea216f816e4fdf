//! Error type for tile coordinate construction and parsing.

use thiserror::Error;

/// Errors raised when a tile coordinate is malformed.
///
/// These are programmer errors in the sense that a coverage computation should
/// never produce them; they surface mostly when parsing keys that crossed a
/// worker boundary or came from a configuration file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TileIdError {
    /// Zoom level exceeds [`MAX_ZOOM`](super::MAX_ZOOM).
    #[error("zoom level {0} is out of range (max {max})", max = super::MAX_ZOOM)]
    ZoomOutOfRange(u8),

    /// `x` or `y` is not within `0..2^z`.
    #[error("tile coordinate {x}/{y} is out of range at zoom {z}")]
    CoordinateOutOfRange { z: u8, x: u32, y: u32 },

    /// `overscaled_z` is below the canonical zoom.
    #[error("overscaled zoom {overscaled_z} is below canonical zoom {z}")]
    InvalidOverscale { overscaled_z: u8, z: u8 },

    /// Requested ancestor zoom is deeper than the tile itself.
    #[error("zoom {target_z} is not an ancestor level of a tile at overscaled zoom {overscaled_z}")]
    NotAnAncestor { target_z: u8, overscaled_z: u8 },

    /// A string key could not be parsed back into a tile id.
    #[error("invalid tile key '{0}'")]
    Parse(String),
}
