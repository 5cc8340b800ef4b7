use std::path::{Path, PathBuf};

use log::{debug, warn};
use toml_edit::{DocumentMut, Item, Table};

use crate::config::Config;
use crate::error::ConfigError;

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracklist")
        .join("config.toml")
}

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

/// Copies every value of `source` into `destination`, keeping comments and
/// formatting of keys that already exist. Keys missing from `source` are
/// removed so unset options do not linger.
fn merge_table_with_targeted_updates(destination: &mut Table, source: &Table) {
    for (key, source_item) in source.iter() {
        match source_item {
            Item::Table(source_table) => {
                if !destination.get(key).is_some_and(Item::is_table) {
                    destination.insert(key, Item::Table(Table::new()));
                }
                if let Some(destination_table) = destination.get_mut(key).and_then(Item::as_table_mut)
                {
                    merge_table_with_targeted_updates(destination_table, source_table);
                }
            }
            _ => {
                let unchanged = destination
                    .get(key)
                    .and_then(Item::as_value)
                    .zip(source_item.as_value())
                    .is_some_and(|(current, next)| current.to_string().trim() == next.to_string().trim());
                if !unchanged {
                    set_table_value_preserving_decor(destination, key, source_item.clone());
                }
            }
        }
    }

    let stale_keys: Vec<String> = destination
        .iter()
        .filter(|(key, _)| !source.contains_key(key))
        .map(|(key, _)| key.to_string())
        .collect();
    for key in stale_keys {
        destination.remove(&key);
    }
}

pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &Config,
) -> Result<String, ConfigError> {
    let next_document = toml::to_string(config)?.parse::<DocumentMut>()?;
    let mut existing_document = existing_text.parse::<DocumentMut>()?;
    merge_table_with_targeted_updates(existing_document.as_table_mut(), next_document.as_table());
    Ok(existing_document.to_string())
}

/// Writes `config` to `path`, keeping the comments of an existing file when
/// it still parses as TOML.
pub fn persist_config_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = match existing_text {
        Some(existing_text) => match serialize_config_with_preserved_comments(&existing_text, config)
        {
            Ok(updated_text) => updated_text,
            Err(err) => {
                warn!(
                    "Failed to preserve config comments for {} ({}). Falling back to plain serialization.",
                    path.display(),
                    err
                );
                toml::to_string(config)?
            }
        },
        None => toml::to_string(config)?,
    };

    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, config_text).map_err(|err| {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
        io_error(err)
    })
}

pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads `path`, falling back to defaults when it is missing or invalid.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Config::default();
    }
    match read_config_file(path) {
        Ok(config) => config,
        Err(err) => {
            warn!("{}. Using default config.", err);
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_config, persist_config_file, serialize_config_with_preserved_comments};
    use crate::config::{Config, LogLevel};
    use std::path::PathBuf;

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        assert_eq!(load_config(&dir.path().join("config.toml")), Config::default());
    }

    #[test]
    fn test_invalid_config_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store\nconnection_name = ").expect("write should succeed");

        assert_eq!(load_config(&path), Config::default());
    }

    #[test]
    fn test_persisted_config_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.store.database_path = Some(PathBuf::from("/srv/music/library.db"));
        config.cache.album_memo_capacity = 16;
        config.logging.level = LogLevel::Debug;

        persist_config_file(&config, &path).expect("config should persist");
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_persist_preserves_comments_of_existing_keys() {
        let existing = r#"# library settings
[store]
# shared with the tagger
connection_name = "library"
statement_cache_capacity = 32

[cache]
album_memo_capacity = 4096 # plenty

[logging]
level = "info"
"#;
        let mut config = Config::default();
        config.cache.album_memo_capacity = 128;

        let updated = serialize_config_with_preserved_comments(existing, &config)
            .expect("config should serialize");
        assert!(updated.contains("# library settings"));
        assert!(updated.contains("# shared with the tagger"));
        assert!(updated.contains("album_memo_capacity = 128 # plenty"));

        let reparsed: Config = toml::from_str(&updated).expect("updated config should parse");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_persist_drops_cleared_database_path() {
        let existing = r#"[store]
database_path = "/tmp/old.db"
connection_name = "library"
"#;
        let updated = serialize_config_with_preserved_comments(existing, &Config::default())
            .expect("config should serialize");
        assert!(!updated.contains("database_path"));
    }
}
