//! Persistent configuration model and defaults.

use std::path::PathBuf;

use log::LevelFilter;

use crate::store_engine::StoreLocation;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Where the library lives and how its connection is set up.
    #[serde(default)]
    pub store: StoreConfig,
    /// In-memory caching of assembled albums.
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreConfig {
    /// Database file. Falls back to the platform data directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            connection_name: default_connection_name(),
            statement_cache_capacity: default_statement_cache_capacity(),
        }
    }
}

impl StoreConfig {
    pub fn location(&self) -> StoreLocation {
        StoreLocation::File(
            self.database_path
                .clone()
                .unwrap_or_else(default_database_path),
        )
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    /// Maximum number of memoized albums; 0 disables the memo.
    #[serde(default = "default_album_memo_capacity")]
    pub album_memo_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            album_memo_capacity: default_album_memo_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    #[serde(alias = "warning")]
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn default_connection_name() -> String {
    "library".to_string()
}

fn default_statement_cache_capacity() -> usize {
    32
}

fn default_album_memo_capacity() -> usize {
    4096
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracklist")
        .join("library.db")
}

#[cfg(test)]
mod tests {
    use super::{default_database_path, Config, LogLevel};
    use crate::store_engine::StoreLocation;
    use log::LevelFilter;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.store.database_path, None);
        assert_eq!(config.store.connection_name, "library");
        assert_eq!(config.store.statement_cache_capacity, 32);
        assert_eq!(config.cache.album_memo_capacity, 4096);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(
            config.store.location(),
            StoreLocation::File(default_database_path())
        );
    }

    #[test]
    fn test_partial_config_deserialization_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[store]
database_path = "/srv/music/library.db"

[logging]
level = "warning"
"#,
        )
        .expect("config should parse");

        assert_eq!(
            config.store.location(),
            StoreLocation::File(PathBuf::from("/srv/music/library.db"))
        );
        assert_eq!(config.store.connection_name, "library");
        assert_eq!(config.cache.album_memo_capacity, 4096);
        assert_eq!(config.logging.level.level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn test_config_serialization_omits_unset_database_path() {
        let text = toml::to_string(&Config::default()).expect("config should serialize");
        assert!(!text.contains("database_path"));
        assert!(text.contains("[cache]"));
        assert!(text.contains("level = \"info\""));
    }
}
