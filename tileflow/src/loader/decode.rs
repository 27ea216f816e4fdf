//! Raw bytes to parsed tiles.

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;

use super::DecodeError;
use crate::tile::ParsedTile;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Turns raw tile bytes into a [`ParsedTile`].
///
/// Runs on a worker thread. Format-specific parsing (vector tiles, raster
/// images) belongs to the renderer; decoders here only undo transport
/// encodings and validate framing.
pub trait TileDecoder: Send + Sync + 'static {
    fn decode(&self, raw: &Bytes) -> Result<ParsedTile, DecodeError>;
}

/// Returns the bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

impl TileDecoder for PassthroughDecoder {
    fn decode(&self, raw: &Bytes) -> Result<ParsedTile, DecodeError> {
        Ok(ParsedTile::new(raw.clone(), raw.len(), false))
    }
}

/// Inflates gzip payloads and passes everything else through.
#[derive(Debug, Clone, Copy)]
pub struct GzipDecoder {
    max_inflated: usize,
}

impl GzipDecoder {
    /// Largest inflated size accepted by default (32 MiB).
    pub const DEFAULT_MAX_INFLATED: usize = 32 * 1024 * 1024;

    pub fn new() -> Self {
        Self {
            max_inflated: Self::DEFAULT_MAX_INFLATED,
        }
    }

    pub fn with_max_inflated(mut self, max_inflated: usize) -> Self {
        self.max_inflated = max_inflated;
        self
    }

    pub fn is_gzip(raw: &[u8]) -> bool {
        raw.starts_with(&GZIP_MAGIC)
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileDecoder for GzipDecoder {
    fn decode(&self, raw: &Bytes) -> Result<ParsedTile, DecodeError> {
        if !Self::is_gzip(raw) {
            return PassthroughDecoder.decode(raw);
        }
        let mut inflated = Vec::with_capacity(raw.len() * 4);
        GzDecoder::new(raw.as_ref())
            .take(self.max_inflated as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(|e| DecodeError::Gzip(e.to_string()))?;
        if inflated.len() > self.max_inflated {
            return Err(DecodeError::Malformed(format!(
                "inflated size exceeds {} bytes",
                self.max_inflated
            )));
        }
        Ok(ParsedTile::new(Bytes::from(inflated), raw.len(), true))
    }
}
