//! Overscaled tile ids: the identity used throughout the loading pipeline.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{CanonicalTileId, TileIdError, UnwrappedTileId, MAX_OVERSCALED_ZOOM, MAX_ZOOM};

/// A canonical tile rendered at an effective zoom `overscaled_z >= canonical.z`.
///
/// When a source has no native tiles past its max zoom, the deepest native
/// tile is reused at higher zoom levels ("overscaling"). The pair
/// `(overscaled_z, wrap)` plus the canonical coordinate fully identifies a
/// tile in the retained set and in the tile cache.
///
/// The string [`key`](Self::key) has the form
/// `{overscaled_z}/{wrap}/{z}/{x}/{y}`. Including the canonical zoom keeps the
/// encoding injective for overscaled tiles; it is the only representation of
/// a tile that crosses the worker boundary.
///
/// # Example
///
/// ```
/// use tileflow::tile_id::OverscaledTileId;
///
/// let id = OverscaledTileId::new(4, 1, 3, 2, 5).unwrap();
/// assert_eq!(id.key(), "4/1/3/2/5");
/// assert_eq!(id.key().parse::<OverscaledTileId>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverscaledTileId {
    overscaled_z: u8,
    wrap: i32,
    canonical: CanonicalTileId,
}

impl OverscaledTileId {
    /// Create an id from raw components.
    pub fn new(overscaled_z: u8, wrap: i32, z: u8, x: u32, y: u32) -> Result<Self, TileIdError> {
        Self::from_canonical(overscaled_z, wrap, CanonicalTileId::new(z, x, y)?)
    }

    /// Create an id from an already-valid canonical coordinate.
    pub fn from_canonical(
        overscaled_z: u8,
        wrap: i32,
        canonical: CanonicalTileId,
    ) -> Result<Self, TileIdError> {
        if overscaled_z < canonical.z() || overscaled_z > MAX_OVERSCALED_ZOOM {
            return Err(TileIdError::InvalidOverscale {
                overscaled_z,
                z: canonical.z(),
            });
        }
        Ok(Self {
            overscaled_z,
            wrap,
            canonical,
        })
    }

    /// A non-overscaled id for `canonical` in world copy `wrap`.
    pub fn native(wrap: i32, canonical: CanonicalTileId) -> Self {
        Self {
            overscaled_z: canonical.z(),
            wrap,
            canonical,
        }
    }

    pub fn overscaled_z(&self) -> u8 {
        self.overscaled_z
    }

    pub fn wrap(&self) -> i32 {
        self.wrap
    }

    pub fn canonical(&self) -> &CanonicalTileId {
        &self.canonical
    }

    /// Deterministic string key, injective over `(overscaled_z, wrap, canonical)`.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.overscaled_z,
            self.wrap,
            self.canonical.z(),
            self.canonical.x(),
            self.canonical.y()
        )
    }

    /// Parse a key produced by [`key`](Self::key).
    pub fn from_key(key: &str) -> Result<Self, TileIdError> {
        let parse_err = || TileIdError::Parse(key.to_string());
        let mut parts = key.split('/');
        let mut next = || parts.next().ok_or_else(parse_err);

        let overscaled_z: u8 = next()?.parse().map_err(|_| parse_err())?;
        let wrap: i32 = next()?.parse().map_err(|_| parse_err())?;
        let z: u8 = next()?.parse().map_err(|_| parse_err())?;
        let x: u32 = next()?.parse().map_err(|_| parse_err())?;
        let y: u32 = next()?.parse().map_err(|_| parse_err())?;
        if parts.next().is_some() {
            return Err(parse_err());
        }
        Self::new(overscaled_z, wrap, z, x, y)
    }

    /// True if this id renders canonical data at a deeper zoom.
    pub fn is_overscaled(&self) -> bool {
        self.overscaled_z > self.canonical.z()
    }

    /// `2^(overscaled_z - z)`.
    pub fn overscale_factor(&self) -> u32 {
        1u32 << (self.overscaled_z - self.canonical.z())
    }

    /// Ancestor (or self) at `target_z`.
    ///
    /// Targets between the canonical and overscaled zoom keep the canonical
    /// coordinate and only lower the overscaled zoom. Deeper targets fail with
    /// [`TileIdError::NotAnAncestor`].
    pub fn scaled_to(&self, target_z: u8) -> Result<Self, TileIdError> {
        if target_z > self.overscaled_z {
            return Err(TileIdError::NotAnAncestor {
                target_z,
                overscaled_z: self.overscaled_z,
            });
        }
        if target_z > self.canonical.z() {
            return Ok(Self {
                overscaled_z: target_z,
                wrap: self.wrap,
                canonical: self.canonical,
            });
        }
        let dz = self.canonical.z() - target_z;
        Ok(Self {
            overscaled_z: target_z,
            wrap: self.wrap,
            canonical: CanonicalTileId::from_parts(
                target_z,
                self.canonical.x() >> dz,
                self.canonical.y() >> dz,
            ),
        })
    }

    /// Immediate ancestor, `None` at zoom 0.
    pub fn parent(&self) -> Option<Self> {
        if self.overscaled_z == 0 {
            return None;
        }
        self.scaled_to(self.overscaled_z - 1).ok()
    }

    /// Key of the ancestor at `target_z`, optionally ignoring the world copy.
    pub fn calculate_scaled_key(&self, target_z: u8, with_wrap: bool) -> Result<String, TileIdError> {
        let mut scaled = self.scaled_to(target_z)?;
        if !with_wrap {
            scaled.wrap = 0;
        }
        Ok(scaled.key())
    }

    /// The next zoom level down.
    ///
    /// Below `source_max_zoom` this yields the four quadtree children. At or
    /// past it the source has no deeper native data, so the single child is
    /// the same canonical tile overscaled by one more level. A tile that is
    /// already overscaled only ever has an overscaled child. A tile at
    /// [`MAX_OVERSCALED_ZOOM`] has no children.
    pub fn children(&self, source_max_zoom: u8) -> Vec<Self> {
        if self.overscaled_z >= MAX_OVERSCALED_ZOOM {
            return Vec::new();
        }
        if self.overscaled_z >= source_max_zoom
            || self.is_overscaled()
            || self.canonical.z() >= MAX_ZOOM
        {
            return vec![Self {
                overscaled_z: self.overscaled_z + 1,
                wrap: self.wrap,
                canonical: self.canonical,
            }];
        }

        let z = self.canonical.z() + 1;
        let x = self.canonical.x() * 2;
        let y = self.canonical.y() * 2;
        let overscaled_z = self.overscaled_z + 1;
        [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]
            .into_iter()
            .map(|(cx, cy)| Self {
                overscaled_z,
                wrap: self.wrap,
                canonical: CanonicalTileId::from_parts(z, cx, cy),
            })
            .collect()
    }

    /// True if `parent` is a strict ancestor in the same world copy.
    pub fn is_child_of(&self, parent: &OverscaledTileId) -> bool {
        if parent.wrap != self.wrap || parent.overscaled_z >= self.overscaled_z {
            return false;
        }
        if parent.canonical.z() > self.canonical.z() {
            return false;
        }
        let dz = self.canonical.z() - parent.canonical.z();
        parent.canonical.x() == self.canonical.x() >> dz
            && parent.canonical.y() == self.canonical.y() >> dz
    }

    /// Same tile in the primary world copy. Used as the tile cache bucket key.
    pub fn wrapped(&self) -> Self {
        Self { wrap: 0, ..*self }
    }

    /// Same tile moved to another world copy.
    pub fn unwrap_to(&self, wrap: i32) -> Self {
        Self { wrap, ..*self }
    }

    pub fn to_unwrapped(&self) -> UnwrappedTileId {
        UnwrappedTileId::new(self.wrap, self.canonical)
    }

    /// Total order: overscaled zoom, then wrap, then `x`, then `y`; canonical
    /// zoom breaks the remaining tie so the order agrees with `Eq`.
    pub fn is_less_than(&self, other: &Self) -> bool {
        self < other
    }
}

impl Ord for OverscaledTileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.overscaled_z
            .cmp(&other.overscaled_z)
            .then(self.wrap.cmp(&other.wrap))
            .then(self.canonical.x().cmp(&other.canonical.x()))
            .then(self.canonical.y().cmp(&other.canonical.y()))
            .then(self.canonical.z().cmp(&other.canonical.z()))
    }
}

impl PartialOrd for OverscaledTileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for OverscaledTileId {
    type Err = TileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(oz: u8, wrap: i32, z: u8, x: u32, y: u32) -> OverscaledTileId {
        OverscaledTileId::new(oz, wrap, z, x, y).unwrap()
    }

    #[test]
    fn test_new_rejects_underscale() {
        assert_eq!(
            OverscaledTileId::new(2, 0, 3, 0, 0),
            Err(TileIdError::InvalidOverscale {
                overscaled_z: 2,
                z: 3
            })
        );
    }

    #[test]
    fn test_key_distinguishes_overscaled_tiles() {
        // Same overscaled zoom, wrap, x and y but different canonical zoom.
        let a = id(5, 0, 4, 1, 1);
        let b = id(5, 0, 5, 1, 1);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_from_key_rejects_garbage() {
        for bad in ["", "1/2/3", "1/0/1/0/0/9", "a/0/0/0/0", "0/0/1/5/0", "0/0/1/0/0"] {
            assert!(OverscaledTileId::from_key(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_children_empty_at_overscale_cap() {
        let top = id(MAX_OVERSCALED_ZOOM, 0, 10, 3, 5);
        assert!(top.children(10).is_empty());

        let below = id(MAX_OVERSCALED_ZOOM - 1, 0, 10, 3, 5);
        let children = below.children(10);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].overscaled_z(), MAX_OVERSCALED_ZOOM);
        assert!(OverscaledTileId::from_key(&children[0].key()).is_ok());
    }

    #[test]
    fn test_children_below_max_zoom() {
        let parent = id(1, 0, 1, 1, 0);
        let children = parent.children(10);
        assert_eq!(children.len(), 4);
        for child in &children {
            assert_eq!(child.overscaled_z(), 2);
            assert_eq!(child.canonical().z(), 2);
            assert!(child.is_child_of(&parent));
        }
        let coords: Vec<_> = children
            .iter()
            .map(|c| (c.canonical().x(), c.canonical().y()))
            .collect();
        assert_eq!(coords, vec![(2, 0), (3, 0), (2, 1), (3, 1)]);
    }

    #[test]
    fn test_children_at_max_zoom_overscales() {
        let tile = id(3, 0, 3, 4, 4);
        let children = tile.children(3);
        assert_eq!(children, vec![id(4, 0, 3, 4, 4)]);
        assert!(children[0].is_overscaled());
        assert_eq!(children[0].overscale_factor(), 2);
        assert!(children[0].is_child_of(&tile));
    }

    #[test]
    fn test_scaled_to() {
        let tile = id(6, 2, 4, 13, 6);
        assert_eq!(tile.scaled_to(5).unwrap(), id(5, 2, 4, 13, 6));
        assert_eq!(tile.scaled_to(4).unwrap(), id(4, 2, 4, 13, 6));
        assert_eq!(tile.scaled_to(2).unwrap(), id(2, 2, 2, 3, 1));
        assert_eq!(
            tile.scaled_to(7),
            Err(TileIdError::NotAnAncestor {
                target_z: 7,
                overscaled_z: 6
            })
        );
    }

    #[test]
    fn test_parent_chain_reaches_root() {
        let mut tile = id(5, 0, 5, 17, 9);
        let mut steps = 0;
        while let Some(parent) = tile.parent() {
            assert!(tile.is_child_of(&parent));
            tile = parent;
            steps += 1;
        }
        assert_eq!(steps, 5);
        assert_eq!(tile, id(0, 0, 0, 0, 0));
    }

    #[test]
    fn test_is_child_of_requires_same_wrap() {
        let parent = id(1, 0, 1, 0, 0);
        let child = id(2, 1, 2, 1, 1);
        assert!(!child.is_child_of(&parent));
        assert!(child.is_child_of(&parent.unwrap_to(1)));
    }

    #[test]
    fn test_wrapped() {
        let tile = id(3, -2, 3, 1, 1);
        assert_eq!(tile.wrapped(), id(3, 0, 3, 1, 1));
        assert_eq!(tile.wrapped().unwrap_to(-2), tile);
    }

    #[test]
    fn test_calculate_scaled_key() {
        let tile = id(4, 1, 4, 9, 3);
        assert_eq!(tile.calculate_scaled_key(3, true).unwrap(), "3/1/3/4/1");
        assert_eq!(tile.calculate_scaled_key(3, false).unwrap(), "3/0/3/4/1");
    }

    #[test]
    fn test_ordering() {
        let mut tiles = vec![id(2, 0, 2, 1, 1), id(1, 1, 1, 0, 0), id(1, 0, 1, 1, 0), id(1, 0, 1, 0, 1)];
        tiles.sort();
        assert_eq!(
            tiles,
            vec![id(1, 0, 1, 0, 1), id(1, 0, 1, 1, 0), id(1, 1, 1, 0, 0), id(2, 0, 2, 1, 1)]
        );
        assert!(tiles[0].is_less_than(&tiles[1]));
        assert!(!tiles[1].is_less_than(&tiles[1]));
    }

    fn arb_tile() -> impl Strategy<Value = OverscaledTileId> {
        (0u8..=20, 0u8..4, -3i32..=3)
            .prop_flat_map(|(z, over, wrap)| {
                let dim = 1u32 << z;
                (Just(z), Just(over), Just(wrap), 0..dim, 0..dim)
            })
            .prop_map(|(z, over, wrap, x, y)| {
                OverscaledTileId::new(z + over, wrap, z, x, y).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_key_round_trip(tile in arb_tile()) {
            let parsed: OverscaledTileId = tile.to_string().parse().unwrap();
            prop_assert_eq!(parsed, tile);
        }

        #[test]
        fn prop_children_are_children(tile in arb_tile(), max_zoom in 0u8..24) {
            for child in tile.children(max_zoom) {
                prop_assert!(child.is_child_of(&tile));
                prop_assert_eq!(child.scaled_to(tile.overscaled_z()).unwrap(), tile);
            }
        }

        #[test]
        fn prop_scaled_to_is_ancestor(tile in arb_tile(), dz in 1u8..6) {
            if let Some(target) = tile.overscaled_z().checked_sub(dz) {
                let ancestor = tile.scaled_to(target).unwrap();
                prop_assert!(tile.is_child_of(&ancestor));
            }
        }
    }
}
