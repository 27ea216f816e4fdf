use thiserror::Error;

/// Invalid source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Invalid zoom range: min {min} > max {max}")]
    InvalidZoomRange { min: u8, max: u8 },

    #[error("Max zoom {0} exceeds the deepest canonical zoom")]
    MaxZoomTooDeep(u8),

    #[error("Tile size must be a power of two between 64 and 4096, got {0}")]
    InvalidTileSize(u32),

    #[error("Source URL template is empty")]
    MissingUrl,
}
