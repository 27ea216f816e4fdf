//! Which tiles a viewport needs.
//!
//! Real coverage math (pitch, rotation, terrain) belongs to the renderer and
//! plugs in through [`Coverage`]. [`GridCoverage`] covers the flat,
//! north-up case.

use serde::{Deserialize, Serialize};

use crate::tile_id::{CanonicalTileId, OverscaledTileId, MAX_OVERSCALED_ZOOM};

/// Pixel size of a tile at the viewport's own zoom scale.
pub const BASE_TILE_SIZE: u32 = 512;

/// Camera state relevant to tile coverage.
///
/// The center is in normalized world coordinates: `x` and `y` run from 0 to
/// 1 across one world copy (web mercator, `y` growing southwards). `x` may
/// leave that range when the camera pans across world copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center_x: f64,
    pub center_y: f64,
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(center_x: f64, center_y: f64, zoom: f64, width: u32, height: u32) -> Self {
        Self {
            center_x,
            center_y,
            zoom,
            width,
            height,
        }
    }

    /// Same viewport moved by a number of screen pixels.
    pub fn panned_by(&self, dx: f64, dy: f64) -> Self {
        let world_px = f64::from(BASE_TILE_SIZE) * self.zoom.exp2();
        Self {
            center_x: self.center_x + dx / world_px,
            center_y: (self.center_y + dy / world_px).clamp(0.0, 1.0),
            ..*self
        }
    }
}

/// Source parameters that shape coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageParams {
    pub tile_size: u32,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub render_world_copies: bool,
}

/// Computes the ideal tile set for a viewport. Must be pure.
pub trait Coverage: Send + Sync {
    fn ideal_tiles(&self, viewport: &Viewport, params: &CoverageParams) -> Vec<OverscaledTileId>;
}

/// Axis-aligned coverage for flat, north-up viewports.
///
/// Picks the zoom level where one source tile spans its nominal pixel size,
/// clamps canonical tiles to the source's zoom range (overscaling past the
/// max) and returns every tile intersecting the viewport, nearest to the
/// center first.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridCoverage;

impl GridCoverage {
    /// Zoom level whose tiles the viewport should request, before clamping
    /// to the source range.
    pub fn covering_zoom(viewport: &Viewport, tile_size: u32) -> i32 {
        let scale = f64::from(BASE_TILE_SIZE) / f64::from(tile_size.max(1));
        (viewport.zoom + scale.log2()).floor() as i32
    }
}

impl Coverage for GridCoverage {
    fn ideal_tiles(&self, viewport: &Viewport, params: &CoverageParams) -> Vec<OverscaledTileId> {
        let actual_z = Self::covering_zoom(viewport, params.tile_size)
            .clamp(0, i32::from(MAX_OVERSCALED_ZOOM)) as u8;
        if actual_z < params.min_zoom {
            return Vec::new();
        }
        let z = actual_z.min(params.max_zoom);
        let dim = 1i64 << z;

        // Viewport extent in world units.
        let world_px = f64::from(BASE_TILE_SIZE) * viewport.zoom.exp2();
        let half_w = f64::from(viewport.width) / 2.0 / world_px;
        let half_h = f64::from(viewport.height) / 2.0 / world_px;
        let scale = dim as f64;

        let tile_range = |low: f64, high: f64| {
            let first = (low * scale).floor() as i64;
            let last = ((high * scale).ceil() as i64 - 1).max(first);
            (first, last)
        };
        let (x0, x1) = tile_range(viewport.center_x - half_w, viewport.center_x + half_w);
        let (y0, y1) = tile_range(viewport.center_y - half_h, viewport.center_y + half_h);
        let (y0, y1) = (y0.max(0), y1.min(dim - 1));
        let (x0, x1) = if params.render_world_copies {
            (x0, x1)
        } else {
            (x0.max(0), x1.min(dim - 1))
        };

        let center = (viewport.center_x * scale, viewport.center_y * scale);
        let mut tiles: Vec<(f64, OverscaledTileId)> = Vec::new();
        for x in x0..=x1 {
            let wrap = x.div_euclid(dim) as i32;
            let cx = x.rem_euclid(dim) as u32;
            for y in y0..=y1 {
                let canonical = CanonicalTileId::from_parts(z, cx, y as u32);
                let Ok(id) = OverscaledTileId::from_canonical(actual_z.max(z), wrap, canonical)
                else {
                    continue;
                };
                let dx = x as f64 + 0.5 - center.0;
                let dy = y as f64 + 0.5 - center.1;
                tiles.push((dx * dx + dy * dy, id));
            }
        }
        tiles.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        tiles.into_iter().map(|(_, id)| id).collect()
    }
}
