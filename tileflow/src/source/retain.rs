//! Retained-set computation.
//!
//! Recomputed from scratch on every update: the ideal tiles plus whichever
//! already-resident ancestors and descendants can stand in for ideal tiles
//! that have no data yet.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::tile_id::OverscaledTileId;

/// Deepest descendant zoom delta searched for loaded substitutes.
pub const DEFAULT_MAX_UNDERZOOM: u8 = 3;

/// Shallowest ancestor zoom delta searched for loaded substitutes.
pub const DEFAULT_MAX_OVERZOOM: u8 = 10;

/// What the retain computation needs to know about a resident tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidentStatus {
    /// Has a renderable payload.
    pub has_data: bool,
    /// Last load failed.
    pub errored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetainParams {
    pub min_zoom: u8,
    /// Deepest native zoom of the source.
    pub max_zoom: u8,
    pub max_underzoom: u8,
    pub max_overzoom: u8,
}

impl RetainParams {
    pub fn new(min_zoom: u8, max_zoom: u8) -> Self {
        Self {
            min_zoom,
            max_zoom,
            max_underzoom: DEFAULT_MAX_UNDERZOOM,
            max_overzoom: DEFAULT_MAX_OVERZOOM,
        }
    }
}

/// Compute the retained set.
///
/// Every ideal tile is retained. For each ideal tile without data:
///
/// - loaded resident descendants up to `max_underzoom` levels deeper are
///   retained
/// - if its immediate children are all retained and loaded, it is fully
///   covered and no ancestor is needed
/// - otherwise resident ancestors are retained walking upwards until one with
///   data is found or `max_overzoom` levels (bounded by `min_zoom`) have been
///   searched
///
/// When an ideal tile has errored, its parent is retained even if not
/// resident so the caller loads it as a fallback. The same holds up the
/// chain while each ancestor in turn has errored.
pub fn compute_retained(
    ideal: &[OverscaledTileId],
    resident: &HashMap<OverscaledTileId, ResidentStatus>,
    params: &RetainParams,
) -> BTreeSet<OverscaledTileId> {
    let mut retain: BTreeSet<OverscaledTileId> = ideal.iter().copied().collect();
    let has_data = |id: &OverscaledTileId| resident.get(id).is_some_and(|s| s.has_data);

    let missing: Vec<&OverscaledTileId> = ideal.iter().filter(|id| !has_data(id)).collect();
    if missing.is_empty() {
        return retain;
    }

    for (id, status) in resident {
        if !status.has_data {
            continue;
        }
        let covers_missing = missing.iter().any(|m| {
            id.overscaled_z() <= m.overscaled_z().saturating_add(params.max_underzoom)
                && id.is_child_of(m)
        });
        if covers_missing {
            retain.insert(*id);
        }
    }

    let mut checked: HashSet<OverscaledTileId> = HashSet::new();
    for missing_id in missing {
        let children = missing_id.children(params.max_zoom);
        if !children.is_empty() && children.iter().all(|c| retain.contains(c) && has_data(c)) {
            continue;
        }

        let mut parent_needed = resident.get(missing_id).is_some_and(|s| s.errored);
        let min_covering = missing_id
            .overscaled_z()
            .saturating_sub(params.max_overzoom)
            .max(params.min_zoom);
        let mut z = missing_id.overscaled_z();
        while z > min_covering {
            z -= 1;
            let Ok(parent) = missing_id.scaled_to(z) else {
                break;
            };
            if !checked.insert(parent) {
                break;
            }
            match resident.get(&parent) {
                Some(status) => {
                    retain.insert(parent);
                    if status.has_data {
                        break;
                    }
                    parent_needed = status.errored;
                }
                None if parent_needed => {
                    retain.insert(parent);
                    parent_needed = false;
                }
                None => {}
            }
        }
    }

    retain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(z: u8, x: u32, y: u32) -> OverscaledTileId {
        OverscaledTileId::new(z, 0, z, x, y).unwrap()
    }

    fn loaded() -> ResidentStatus {
        ResidentStatus {
            has_data: true,
            errored: false,
        }
    }

    fn loading() -> ResidentStatus {
        ResidentStatus::default()
    }

    fn errored() -> ResidentStatus {
        ResidentStatus {
            has_data: false,
            errored: true,
        }
    }

    fn params() -> RetainParams {
        RetainParams::new(0, 14)
    }

    #[test]
    fn test_all_loaded_retains_only_ideal() {
        let ideal = vec![id(3, 1, 1), id(3, 2, 1)];
        let resident = HashMap::from([
            (id(3, 1, 1), loaded()),
            (id(3, 2, 1), loaded()),
            (id(2, 0, 0), loaded()),
        ]);
        let retained = compute_retained(&ideal, &resident, &params());
        assert_eq!(retained, ideal.into_iter().collect());
    }

    #[test]
    fn test_loaded_ancestor_substitutes() {
        let ideal = vec![id(4, 5, 5)];
        let resident = HashMap::from([
            (id(4, 5, 5), loading()),
            (id(3, 2, 2), loading()),
            (id(2, 1, 1), loaded()),
            (id(1, 0, 0), loaded()),
        ]);
        let retained = compute_retained(&ideal, &resident, &params());
        // Walk stops at the first ancestor with data.
        assert!(retained.contains(&id(3, 2, 2)));
        assert!(retained.contains(&id(2, 1, 1)));
        assert!(!retained.contains(&id(1, 0, 0)));
    }

    #[test]
    fn test_loaded_children_cover_missing_tile() {
        let parent = id(2, 1, 1);
        let children = parent.children(14);
        let mut resident: HashMap<_, _> = children.iter().map(|c| (*c, loaded())).collect();
        resident.insert(parent, loading());
        resident.insert(id(1, 0, 0), loaded());

        let retained = compute_retained(&[parent], &resident, &params());
        for child in &children {
            assert!(retained.contains(child));
        }
        assert!(!retained.contains(&id(1, 0, 0)), "fully covered, no ancestor needed");
    }

    #[test]
    fn test_partial_children_also_use_ancestor() {
        let parent = id(2, 1, 1);
        let children = parent.children(14);
        let resident = HashMap::from([
            (parent, loading()),
            (children[0], loaded()),
            (id(1, 0, 0), loaded()),
        ]);
        let retained = compute_retained(&[parent], &resident, &params());
        assert!(retained.contains(&children[0]));
        assert!(retained.contains(&id(1, 0, 0)));
    }

    #[test]
    fn test_descendants_beyond_delta_ignored() {
        let ideal = id(2, 1, 1);
        let deep = OverscaledTileId::new(6, 0, 6, 16, 16).unwrap();
        assert!(deep.is_child_of(&ideal));
        let resident = HashMap::from([(ideal, loading()), (deep, loaded())]);
        let retained = compute_retained(&[ideal], &resident, &params());
        assert!(!retained.contains(&deep));
    }

    #[test]
    fn test_errored_tile_requests_parent() {
        let ideal = id(5, 10, 10);
        let resident = HashMap::from([(ideal, errored())]);
        let retained = compute_retained(&[ideal], &resident, &params());
        assert!(retained.contains(&id(4, 5, 5)));
        assert!(!retained.contains(&id(3, 2, 2)));
    }

    #[test]
    fn test_overzoom_bounded_by_min_zoom() {
        let ideal = id(6, 0, 0);
        let resident = HashMap::from([(ideal, loading()), (id(2, 0, 0), loaded())]);
        let p = RetainParams {
            min_zoom: 4,
            ..params()
        };
        let retained = compute_retained(&[ideal], &resident, &p);
        assert!(!retained.contains(&id(2, 0, 0)));
    }

    #[test]
    fn test_overscaled_child_covers() {
        // Ideal tile at the source max zoom: its only child is overscaled.
        let ideal = id(14, 100, 100);
        let child = ideal.children(14)[0];
        assert!(child.is_overscaled());
        let resident = HashMap::from([(ideal, loading()), (child, loaded())]);
        let retained = compute_retained(&[ideal], &resident, &params());
        assert!(retained.contains(&child));
    }
}
