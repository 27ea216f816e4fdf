//! Canonical `{z, x, y}` tile coordinates.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{TileIdError, MAX_ZOOM};

/// Spherical mercator earth radius in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Row numbering scheme of a tile server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileScheme {
    /// Rows grow southward from the top of the map (OSM/XYZ).
    #[default]
    Xyz,
    /// Rows grow northward from the bottom of the map (OSGeo TMS).
    Tms,
}

impl TileScheme {
    /// Parse a scheme name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "xyz" => Some(Self::Xyz),
            "tms" => Some(Self::Tms),
            _ => None,
        }
    }

    /// Scheme name as written in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Xyz => "xyz",
            Self::Tms => "tms",
        }
    }
}

/// A tile coordinate unique within one world copy at zoom `z`.
///
/// Invariant: `0 <= x, y < 2^z` and `z <= MAX_ZOOM`. The fields are private so
/// the invariant holds for every value in circulation.
///
/// # Example
///
/// ```
/// use tileflow::tile_id::CanonicalTileId;
///
/// let id = CanonicalTileId::new(3, 3, 5).unwrap();
/// assert_eq!(id.quadkey(), "213");
/// assert!(CanonicalTileId::new(1, 2, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalTileId {
    z: u8,
    x: u32,
    y: u32,
}

impl CanonicalTileId {
    /// Create a canonical id, validating the zoom and coordinate ranges.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, TileIdError> {
        if z > MAX_ZOOM {
            return Err(TileIdError::ZoomOutOfRange(z));
        }
        let dim = 1u64 << z;
        if u64::from(x) >= dim || u64::from(y) >= dim {
            return Err(TileIdError::CoordinateOutOfRange { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    /// Construct without validation. Callers derive the values from an
    /// already-valid id (halving or doubling coordinates).
    pub(crate) fn from_parts(z: u8, x: u32, y: u32) -> Self {
        debug_assert!(z <= MAX_ZOOM && u64::from(x) < (1u64 << z) && u64::from(y) < (1u64 << z));
        Self { z, x, y }
    }

    /// Zoom level.
    pub fn z(&self) -> u8 {
        self.z
    }

    /// Column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Row (XYZ numbering).
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Number of tiles along one axis at this zoom.
    pub fn dim(&self) -> u64 {
        1u64 << self.z
    }

    /// `z/x/y` key, unique among canonical ids.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }

    /// True if `parent` is a strict ancestor of this tile in the quadtree.
    pub fn is_child_of(&self, parent: &CanonicalTileId) -> bool {
        if parent.z >= self.z {
            return false;
        }
        let dz = self.z - parent.z;
        parent.x == self.x >> dz && parent.y == self.y >> dz
    }

    /// Ancestor at zoom `z`, or `None` if `z` is deeper than this tile.
    pub fn ancestor_at(&self, z: u8) -> Option<CanonicalTileId> {
        if z > self.z {
            return None;
        }
        let dz = self.z - z;
        Some(Self::from_parts(z, self.x >> dz, self.y >> dz))
    }

    /// Bing-style quadkey. Empty at zoom 0.
    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(self.z as usize);
        for level in (1..=self.z).rev() {
            let mask = 1u32 << (level - 1);
            let mut digit = b'0';
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            key.push(digit as char);
        }
        key
    }

    /// Expand a tile URL template for this coordinate.
    ///
    /// Supported placeholders: `{z}`, `{x}`, `{y}`, `{quadkey}`, `{prefix}`
    /// (hex of `x % 16` and `y % 16`, used for sharded storage) and
    /// `{bbox-epsg-3857}`.
    pub fn url(&self, template: &str, scheme: TileScheme) -> String {
        let y = match scheme {
            TileScheme::Xyz => u64::from(self.y),
            TileScheme::Tms => self.dim() - u64::from(self.y) - 1,
        };
        let prefix = format!("{:x}{:x}", self.x % 16, self.y % 16);

        let mut url = template
            .replace("{prefix}", &prefix)
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &y.to_string());
        if url.contains("{quadkey}") {
            url = url.replace("{quadkey}", &self.quadkey());
        }
        if url.contains("{bbox-epsg-3857}") {
            url = url.replace("{bbox-epsg-3857}", &self.bbox_epsg_3857());
        }
        url
    }

    /// Web mercator bounding box `minx,miny,maxx,maxy` in meters.
    fn bbox_epsg_3857(&self) -> String {
        let flipped_y = self.dim() - u64::from(self.y) - 1;
        let merc = |px: f64, py: f64| {
            let resolution = (2.0 * PI * EARTH_RADIUS / 256.0) / (self.dim() as f64);
            let half = PI * EARTH_RADIUS;
            (px * resolution - half, py * resolution - half)
        };
        let (min_x, min_y) = merc(f64::from(self.x) * 256.0, flipped_y as f64 * 256.0);
        let (max_x, max_y) = merc(
            (f64::from(self.x) + 1.0) * 256.0,
            (flipped_y as f64 + 1.0) * 256.0,
        );
        format!("{},{},{},{}", min_x, min_y, max_x, max_y)
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
