//! Addressable configuration keys (`section.key`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::{invalid, ConfigError, TileflowConfig};
use crate::tile_id::TileScheme;

/// Every setting in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    SourceUrl,
    SourceScheme,
    SourceTileSize,
    SourceMinZoom,
    SourceMaxZoom,
    SourceRenderWorldCopies,
    CacheMaxTiles,
    CacheResponseCacheMb,
    CacheResponseTtlSecs,
    WorkersCount,
    LoggingLevel,
    LoggingFile,
}

const ALL: [ConfigKey; 12] = [
    ConfigKey::SourceUrl,
    ConfigKey::SourceScheme,
    ConfigKey::SourceTileSize,
    ConfigKey::SourceMinZoom,
    ConfigKey::SourceMaxZoom,
    ConfigKey::SourceRenderWorldCopies,
    ConfigKey::CacheMaxTiles,
    ConfigKey::CacheResponseCacheMb,
    ConfigKey::CacheResponseTtlSecs,
    ConfigKey::WorkersCount,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingFile,
];

impl ConfigKey {
    /// All keys in file order.
    pub fn all() -> &'static [ConfigKey] {
        &ALL
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::SourceUrl
            | Self::SourceScheme
            | Self::SourceTileSize
            | Self::SourceMinZoom
            | Self::SourceMaxZoom
            | Self::SourceRenderWorldCopies => "source",
            Self::CacheMaxTiles | Self::CacheResponseCacheMb | Self::CacheResponseTtlSecs => "cache",
            Self::WorkersCount => "workers",
            Self::LoggingLevel | Self::LoggingFile => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::SourceUrl => "url",
            Self::SourceScheme => "scheme",
            Self::SourceTileSize => "tile_size",
            Self::SourceMinZoom => "min_zoom",
            Self::SourceMaxZoom => "max_zoom",
            Self::SourceRenderWorldCopies => "render_world_copies",
            Self::CacheMaxTiles => "max_tiles",
            Self::CacheResponseCacheMb => "response_cache_mb",
            Self::CacheResponseTtlSecs => "response_ttl_secs",
            Self::WorkersCount => "count",
            Self::LoggingLevel => "level",
            Self::LoggingFile => "file",
        }
    }

    /// `section.key`
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as written to the file; empty when unset.
    pub fn get(&self, config: &TileflowConfig) -> String {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        match self {
            Self::SourceUrl => opt(&config.source.url),
            Self::SourceScheme => config.source.scheme.name().to_string(),
            Self::SourceTileSize => config.source.tile_size.to_string(),
            Self::SourceMinZoom => config.source.min_zoom.to_string(),
            Self::SourceMaxZoom => config.source.max_zoom.to_string(),
            Self::SourceRenderWorldCopies => config.source.render_world_copies.to_string(),
            Self::CacheMaxTiles => opt(&config.cache.max_tiles),
            Self::CacheResponseCacheMb => config.cache.response_cache_mb.to_string(),
            Self::CacheResponseTtlSecs => config.cache.response_ttl_secs.to_string(),
            Self::WorkersCount => opt(&config.workers.count),
            Self::LoggingLevel => config.logging.level.clone(),
            Self::LoggingFile => config
                .logging
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Parse `value` and store it. An empty value clears optional keys.
    pub fn set(&self, config: &mut TileflowConfig, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let optional = (!value.is_empty()).then(|| value.to_string());
        match self {
            Self::SourceUrl => config.source.url = optional,
            Self::SourceScheme => {
                config.source.scheme = TileScheme::from_name(value).ok_or_else(|| self.invalid(value))?
            }
            Self::SourceTileSize => config.source.tile_size = self.parse(value)?,
            Self::SourceMinZoom => config.source.min_zoom = self.parse(value)?,
            Self::SourceMaxZoom => config.source.max_zoom = self.parse(value)?,
            Self::SourceRenderWorldCopies => config.source.render_world_copies = self.parse(value)?,
            Self::CacheMaxTiles => config.cache.max_tiles = self.parse_optional(value)?,
            Self::CacheResponseCacheMb => config.cache.response_cache_mb = self.parse(value)?,
            Self::CacheResponseTtlSecs => config.cache.response_ttl_secs = self.parse(value)?,
            Self::WorkersCount => config.workers.count = self.parse_optional(value)?,
            Self::LoggingLevel => {
                if value.is_empty() {
                    return Err(self.invalid(value));
                }
                config.logging.level = value.to_string()
            }
            Self::LoggingFile => config.logging.file = optional.map(PathBuf::from),
        }
        Ok(())
    }

    fn parse<T: FromStr>(&self, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| self.invalid(value))
    }

    fn parse_optional<T: FromStr>(&self, value: &str) -> Result<Option<T>, ConfigError> {
        if value.is_empty() {
            return Ok(None);
        }
        self.parse(value).map(Some)
    }

    fn invalid(&self, value: &str) -> ConfigError {
        invalid(self.section(), self.key_name(), value)
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ALL.iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_names() {
        assert_eq!("source.url".parse::<ConfigKey>().unwrap(), ConfigKey::SourceUrl);
        assert_eq!("Workers.Count".parse::<ConfigKey>().unwrap(), ConfigKey::WorkersCount);
        assert!(matches!(
            "source.colour".parse::<ConfigKey>(),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_every_key_round_trips_through_name() {
        for key in ConfigKey::all() {
            assert_eq!(key.name().parse::<ConfigKey>().unwrap(), *key);
        }
    }

    #[test]
    fn test_set_and_get() {
        let mut config = TileflowConfig::default();
        ConfigKey::SourceMaxZoom.set(&mut config, "16").unwrap();
        ConfigKey::CacheMaxTiles.set(&mut config, "120").unwrap();
        ConfigKey::SourceScheme.set(&mut config, "TMS").unwrap();
        assert_eq!(ConfigKey::SourceMaxZoom.get(&config), "16");
        assert_eq!(ConfigKey::CacheMaxTiles.get(&config), "120");
        assert_eq!(ConfigKey::SourceScheme.get(&config), "tms");

        ConfigKey::CacheMaxTiles.set(&mut config, "").unwrap();
        assert_eq!(config.cache.max_tiles, None);
        assert_eq!(ConfigKey::CacheMaxTiles.get(&config), "");
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = TileflowConfig::default();
        assert!(ConfigKey::SourceMaxZoom.set(&mut config, "deep").is_err());
        assert!(ConfigKey::SourceRenderWorldCopies.set(&mut config, "maybe").is_err());
        assert!(ConfigKey::LoggingLevel.set(&mut config, " ").is_err());
        assert_eq!(config, TileflowConfig::default());
    }
}
