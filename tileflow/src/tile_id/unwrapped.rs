//! Tile ids carrying a world-copy offset.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::CanonicalTileId;

/// A canonical tile shifted by `wrap` whole world widths.
///
/// At low zoom a viewport can show the world several times side by side; each
/// copy is addressed by a signed `wrap` offset (`-1` is the copy west of the
/// antimeridian, `1` the copy east of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnwrappedTileId {
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl UnwrappedTileId {
    pub fn new(wrap: i32, canonical: CanonicalTileId) -> Self {
        Self { wrap, canonical }
    }

    /// `wrap/z/x/y` key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.wrap, self.canonical)
    }

    /// Column in the unwrapped (infinite) tile grid.
    pub fn unwrapped_x(&self) -> i64 {
        i64::from(self.wrap) * self.canonical.dim() as i64 + i64::from(self.canonical.x())
    }
}

impl Ord for UnwrappedTileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wrap
            .cmp(&other.wrap)
            .then(self.canonical.z().cmp(&other.canonical.z()))
            .then(self.canonical.x().cmp(&other.canonical.x()))
            .then(self.canonical.y().cmp(&other.canonical.y()))
    }
}

impl PartialOrd for UnwrappedTileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for UnwrappedTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrapped_equality() {
        let c = CanonicalTileId::new(2, 1, 1).unwrap();
        assert_eq!(UnwrappedTileId::new(1, c), UnwrappedTileId::new(1, c));
        assert_ne!(UnwrappedTileId::new(0, c), UnwrappedTileId::new(1, c));
    }

    #[test]
    fn test_unwrapped_x() {
        let c = CanonicalTileId::new(2, 3, 0).unwrap();
        assert_eq!(UnwrappedTileId::new(0, c).unwrapped_x(), 3);
        assert_eq!(UnwrappedTileId::new(-1, c).unwrapped_x(), -1);
        assert_eq!(UnwrappedTileId::new(2, c).unwrapped_x(), 11);
    }

    #[test]
    fn test_ordering_by_wrap_first() {
        let a = UnwrappedTileId::new(-1, CanonicalTileId::new(3, 7, 7).unwrap());
        let b = UnwrappedTileId::new(0, CanonicalTileId::new(0, 0, 0).unwrap());
        assert!(a < b);
    }
}
