//! Messages exchanged between the source cache and the tile workers.
//!
//! Tiles cross the boundary only as their string key plus a numeric uid; no
//! object identity is shared.

use serde::{Deserialize, Serialize};

use crate::tile::{ExpiryData, ParsedTile, TileUid};

/// Fetch and decode a tile. Payload: [`LoadTileRequest`]. Response: [`LoadTileResponse`].
pub const LOAD_TILE: &str = "loadTile";

/// Re-decode a tile from the worker's retained raw data, fetching only if
/// none is held. Payload and response as for [`LOAD_TILE`].
pub const RELOAD_TILE: &str = "reloadTile";

/// Abort any in-progress load for a tile. Payload: [`TileRef`].
pub const ABORT_TILE: &str = "abortTile";

/// Drop all worker state for a tile. Payload: [`TileRef`].
pub const REMOVE_TILE: &str = "removeTile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTileRequest {
    pub uid: TileUid,
    pub key: String,
    pub url: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTileResponse {
    pub key: String,
    pub tile: ParsedTile,
    #[serde(default)]
    pub expiry: ExpiryData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRef {
    pub uid: TileUid,
    pub key: String,
}
