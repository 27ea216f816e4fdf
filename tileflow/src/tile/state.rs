//! Tile lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Tile`](super::Tile).
///
/// ```text
/// Idle ──► Loading ──┬──► Loaded ──► Reloading ──┬──► Loaded
///                    └──► Errored ──► Reloading ─┴──► Errored
/// (any) ──► Unloaded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    /// Retained but no load issued yet (source paused).
    Idle,
    /// First load in flight.
    Loading,
    /// Payload available.
    Loaded,
    /// Fresh load in flight; the previous payload (if any) stays renderable.
    Reloading,
    /// Last load failed.
    Errored,
    /// Resources released.
    Unloaded,
}

impl TileState {
    /// A load task is in flight.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TileState::Loading | TileState::Reloading)
    }

    /// No further transition is pending for this tile.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TileState::Loaded | TileState::Errored | TileState::Unloaded
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TileState::Idle => "idle",
            TileState::Loading => "loading",
            TileState::Loaded => "loaded",
            TileState::Reloading => "reloading",
            TileState::Errored => "errored",
            TileState::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_states() {
        assert!(TileState::Loading.is_in_flight());
        assert!(TileState::Reloading.is_in_flight());
        assert!(!TileState::Loaded.is_in_flight());
        assert!(!TileState::Idle.is_in_flight());
    }

    #[test]
    fn test_idle_is_not_settled() {
        assert!(!TileState::Idle.is_settled());
        assert!(TileState::Errored.is_settled());
    }

    #[test]
    fn test_serde_name() {
        assert_eq!(serde_json::to_string(&TileState::Reloading).unwrap(), "\"reloading\"");
        assert_eq!(TileState::Reloading.to_string(), "reloading");
    }
}
