//! Source cache configuration.

use std::time::Duration;

use super::backoff::RetryBackoff;
use super::coverage::CoverageParams;
use super::retain::{RetainParams, DEFAULT_MAX_OVERZOOM, DEFAULT_MAX_UNDERZOOM};
use super::SourceError;
use crate::tile_id::{TileScheme, MAX_ZOOM};

/// Default tile cache capacity per visible tile.
pub const DEFAULT_CACHE_MULTIPLIER: usize = 5;

/// Configuration for one [`SourceCache`](super::SourceCache).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCacheConfig {
    /// Identifier reported to workers and in logs.
    pub source_id: String,
    /// Tile URL template (`{z}`, `{x}`, `{y}`, `{quadkey}`, ...).
    pub url_template: String,
    pub scheme: TileScheme,
    pub tile_size: u32,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub render_world_copies: bool,
    /// Fixed tile cache capacity. `None` sizes the cache from the viewport.
    pub max_cache_tiles: Option<usize>,
    /// Cache capacity per ideal tile when no fixed capacity is set.
    pub cache_multiplier: usize,
    /// Upper bound for how long an evicted tile stays in the tile cache.
    pub cache_ttl: Option<Duration>,
    /// Automatic retry schedule for network failures.
    pub retry: RetryBackoff,
    pub max_underzoom: u8,
    pub max_overzoom: u8,
    /// Buffer of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SourceCacheConfig {
    fn default() -> Self {
        Self {
            source_id: "default".to_string(),
            url_template: String::new(),
            scheme: TileScheme::Xyz,
            tile_size: 512,
            min_zoom: 0,
            max_zoom: 14,
            render_world_copies: true,
            max_cache_tiles: None,
            cache_multiplier: DEFAULT_CACHE_MULTIPLIER,
            cache_ttl: None,
            retry: RetryBackoff::default(),
            max_underzoom: DEFAULT_MAX_UNDERZOOM,
            max_overzoom: DEFAULT_MAX_OVERZOOM,
            event_capacity: 256,
        }
    }
}

impl SourceCacheConfig {
    pub fn new(source_id: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url_template: url_template.into(),
            ..Self::default()
        }
    }

    pub fn with_scheme(mut self, scheme: TileScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_world_copies(mut self, render_world_copies: bool) -> Self {
        self.render_world_copies = render_world_copies;
        self
    }

    pub fn with_max_cache_tiles(mut self, max_cache_tiles: Option<usize>) -> Self {
        self.max_cache_tiles = max_cache_tiles;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Option<Duration>) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryBackoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        if self.url_template.trim().is_empty() {
            return Err(SourceError::MissingUrl);
        }
        if self.min_zoom > self.max_zoom {
            return Err(SourceError::InvalidZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(SourceError::MaxZoomTooDeep(self.max_zoom));
        }
        if !self.tile_size.is_power_of_two() || !(64..=4096).contains(&self.tile_size) {
            return Err(SourceError::InvalidTileSize(self.tile_size));
        }
        Ok(())
    }

    pub fn coverage_params(&self) -> CoverageParams {
        CoverageParams {
            tile_size: self.tile_size,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            render_world_copies: self.render_world_copies,
        }
    }

    pub fn retain_params(&self) -> RetainParams {
        RetainParams {
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            max_underzoom: self.max_underzoom,
            max_overzoom: self.max_overzoom,
        }
    }

    /// Tile cache capacity for a view needing `ideal_count` tiles.
    pub fn cache_capacity(&self, ideal_count: usize) -> usize {
        self.max_cache_tiles
            .unwrap_or_else(|| ideal_count.max(1).saturating_mul(self.cache_multiplier))
    }
}
