//! Persistent configuration file.
//!
//! Settings live in an INI file (default `~/.config/tileflow/config.ini`):
//!
//! ```ini
//! [source]
//! url = https://tiles.example.com/{z}/{x}/{y}.pbf
//! scheme = xyz
//! tile_size = 512
//! min_zoom = 0
//! max_zoom = 14
//! render_world_copies = true
//!
//! [cache]
//! max_tiles =
//! response_cache_mb = 64
//! response_ttl_secs = 300
//!
//! [workers]
//! count =
//!
//! [logging]
//! level = info
//! file =
//! ```
//!
//! Missing keys fall back to defaults, unknown keys are ignored and empty
//! values mean "not set".

mod error;
mod keys;

pub use error::ConfigError;
pub use keys::ConfigKey;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::dispatcher::WorkerPoolConfig;
use crate::loader::ResponseCacheConfig;
use crate::logging::LoggingConfig;
use crate::source::SourceCacheConfig;
use crate::tile_id::TileScheme;

const SOURCE: &str = "source";
const CACHE: &str = "cache";
const WORKERS: &str = "workers";
const LOGGING: &str = "logging";

/// `[source]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub url: Option<String>,
    pub scheme: TileScheme,
    pub tile_size: u32,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub render_world_copies: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let defaults = SourceCacheConfig::default();
        Self {
            url: None,
            scheme: defaults.scheme,
            tile_size: defaults.tile_size,
            min_zoom: defaults.min_zoom,
            max_zoom: defaults.max_zoom,
            render_world_copies: defaults.render_world_copies,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Fixed tile cache capacity; `None` sizes it from the viewport.
    pub max_tiles: Option<usize>,
    pub response_cache_mb: u64,
    pub response_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = ResponseCacheConfig::default();
        Self {
            max_tiles: None,
            response_cache_mb: defaults.max_bytes / (1024 * 1024),
            response_ttl_secs: defaults.max_ttl.as_secs(),
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Worker unit count; `None` uses the pool default.
    pub count: Option<usize>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileflowConfig {
    pub source: SourceSettings,
    pub cache: CacheSettings,
    pub workers: WorkerSettings,
    pub logging: LoggingConfig,
}

/// Default configuration file location.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("tileflow").join("config.ini"))
        .ok_or(ConfigError::NoConfigDir)
}

impl TileflowConfig {
    /// Same as [`config_file_path`].
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        config_file_path()
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&config_file_path()?)
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.to_ini()
            .write_to_file(path)
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(props) = ini.section(Some(SOURCE)) {
            let source = &mut config.source;
            source.url = text(props, "url");
            if let Some(raw) = text(props, "scheme") {
                source.scheme = TileScheme::from_name(&raw).ok_or_else(|| invalid(SOURCE, "scheme", &raw))?;
            }
            if let Some(v) = parse(props, SOURCE, "tile_size")? {
                source.tile_size = v;
            }
            if let Some(v) = parse(props, SOURCE, "min_zoom")? {
                source.min_zoom = v;
            }
            if let Some(v) = parse(props, SOURCE, "max_zoom")? {
                source.max_zoom = v;
            }
            if let Some(v) = parse(props, SOURCE, "render_world_copies")? {
                source.render_world_copies = v;
            }
        }

        if let Some(props) = ini.section(Some(CACHE)) {
            config.cache.max_tiles = parse(props, CACHE, "max_tiles")?;
            if let Some(v) = parse(props, CACHE, "response_cache_mb")? {
                config.cache.response_cache_mb = v;
            }
            if let Some(v) = parse(props, CACHE, "response_ttl_secs")? {
                config.cache.response_ttl_secs = v;
            }
        }

        if let Some(props) = ini.section(Some(WORKERS)) {
            config.workers.count = parse(props, WORKERS, "count")?;
        }

        if let Some(props) = ini.section(Some(LOGGING)) {
            if let Some(level) = text(props, "level") {
                config.logging.level = level;
            }
            config.logging.file = text(props, "file").map(PathBuf::from);
        }

        Ok(config)
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini
    }

    /// Runtime configuration for a source. `url` overrides the file's URL.
    pub fn source_config(&self, source_id: &str, url: Option<&str>) -> SourceCacheConfig {
        let template = url
            .map(str::to_string)
            .or_else(|| self.source.url.clone())
            .unwrap_or_default();
        SourceCacheConfig::new(source_id, template)
            .with_scheme(self.source.scheme)
            .with_tile_size(self.source.tile_size)
            .with_zoom_range(self.source.min_zoom, self.source.max_zoom)
            .with_world_copies(self.source.render_world_copies)
            .with_max_cache_tiles(self.cache.max_tiles)
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        match self.workers.count {
            Some(count) => WorkerPoolConfig::default().with_size(count),
            None => WorkerPoolConfig::default(),
        }
    }

    pub fn response_cache_config(&self) -> ResponseCacheConfig {
        ResponseCacheConfig::default()
            .with_max_bytes(self.cache.response_cache_mb.saturating_mul(1024 * 1024))
            .with_max_ttl(Duration::from_secs(self.cache.response_ttl_secs))
    }
}

fn text(props: &Properties, key: &str) -> Option<String> {
    props
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse<T: FromStr>(props: &Properties, section: &str, key: &str) -> Result<Option<T>, ConfigError> {
    match text(props, key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| invalid(section, key, &raw)),
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = TileflowConfig::load(&temp.path().join("nope.ini")).unwrap();
        assert_eq!(config, TileflowConfig::default());
        assert_eq!(config.cache.response_cache_mb, 64);
        assert_eq!(config.cache.response_ttl_secs, 300);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = TileflowConfig::default();
        config.source.url = Some("https://t.example/{z}/{x}/{y}.pbf".to_string());
        config.source.scheme = TileScheme::Tms;
        config.source.max_zoom = 16;
        config.cache.max_tiles = Some(300);
        config.workers.count = Some(3);
        config.logging.level = "debug".to_string();
        config.logging.file = Some(PathBuf::from("/tmp/tileflow.log"));

        config.save(&path).unwrap();
        assert_eq!(TileflowConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_and_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(
            &path,
            "[source]\nmax_zoom = 12\ncolor = blue\n\n[cache]\nmax_tiles =\n\n[extra]\nx = 1\n",
        )
        .unwrap();

        let config = TileflowConfig::load(&path).unwrap();
        assert_eq!(config.source.max_zoom, 12);
        assert_eq!(config.source.tile_size, 512);
        assert_eq!(config.cache.max_tiles, None);
    }

    #[test]
    fn test_invalid_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[workers]\ncount = many\n").unwrap();

        match TileflowConfig::load(&path) {
            Err(ConfigError::InvalidValue {
                section,
                key,
                value,
            }) => {
                assert_eq!(section, "workers");
                assert_eq!(key, "count");
                assert_eq!(value, "many");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }

        std::fs::write(&path, "[source]\nscheme = wmts\n").unwrap();
        assert!(matches!(
            TileflowConfig::load(&path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_runtime_conversions() {
        let mut config = TileflowConfig::default();
        config.source.url = Some("https://a/{z}/{x}/{y}".to_string());
        config.source.tile_size = 256;
        config.cache.max_tiles = Some(50);
        config.cache.response_cache_mb = 8;
        config.workers.count = Some(2);

        let source = config.source_config("roads", None);
        assert_eq!(source.source_id, "roads");
        assert_eq!(source.url_template, "https://a/{z}/{x}/{y}");
        assert_eq!(source.tile_size, 256);
        assert_eq!(source.max_cache_tiles, Some(50));
        assert!(source.validate().is_ok());

        let overridden = config.source_config("roads", Some("https://b/{z}/{x}/{y}"));
        assert_eq!(overridden.url_template, "https://b/{z}/{x}/{y}");

        assert_eq!(config.worker_pool_config().size, 2);
        assert_eq!(config.response_cache_config().max_bytes, 8 * 1024 * 1024);
    }
}
