use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Decoded tile content produced inside a worker.
///
/// The contents are opaque to the loading pipeline; the renderer interprets
/// them. The data stays unchanged for as long as its tile is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTile {
    /// Decoded bytes.
    pub data: Bytes,
    /// Size of the payload as received, before decoding.
    pub raw_size: usize,
    /// True if the payload was transport-compressed.
    pub was_compressed: bool,
}

impl ParsedTile {
    pub fn new(data: Bytes, raw_size: usize, was_compressed: bool) -> Self {
        Self {
            data,
            raw_size,
            was_compressed,
        }
    }

    /// Source had no data for this tile (HTTP 404/204).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
