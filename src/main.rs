use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{debug, info, warn, LevelFilter};
use tracklist::config::Config;
use tracklist::config_persistence::{default_config_path, load_config, persist_config_file};
use tracklist::{LibraryRepository, Track};

/// Batch of tracks grouped by album key, as fed to `insert_tracks`.
#[derive(Debug, Default, serde::Deserialize)]
struct ImportManifest {
    #[serde(default)]
    albums: BTreeMap<String, Vec<Track>>,
    #[serde(default)]
    covers: HashMap<String, String>,
}

fn read_manifest(path: &Path) -> Result<ImportManifest, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, LevelFilter::Trace);
    clog.init();
    log::set_max_level(Config::default().logging.level.level_filter());

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = default_config_path();
    let config_exists = config_path.exists();
    let config = load_config(&config_path);
    log::set_max_level(config.logging.level.level_filter());
    if config_exists {
        debug!("Config loaded from {}", config_path.display());
    } else {
        info!(
            "Config file not found. Creating default config. path={}",
            config_path.display()
        );
        if let Err(err) = persist_config_file(&config, &config_path) {
            warn!("Default config not written: {}", err);
        }
    }

    let location = config.store.location();
    let repository =
        LibraryRepository::open_shared(&config.store.connection_name, &location, &config)?;

    if let Some(manifest_path) = std::env::args_os().nth(1) {
        let manifest_path = Path::new(&manifest_path);
        let manifest = read_manifest(manifest_path)?;
        info!(
            "Importing {} album group(s) from {}",
            manifest.albums.len(),
            manifest_path.display()
        );
        let report = repository
            .borrow_mut()
            .insert_tracks(&manifest.albums, &manifest.covers);
        if report.albums_failed > 0 {
            warn!("{} album(s) could not be imported", report.albums_failed);
        }
    }

    let mut repository = repository.borrow_mut();
    info!(
        "Library `{}` holds {} album(s)",
        repository.connection_name(),
        repository.album_count()
    );
    for position in 0..repository.indexed_album_count() {
        if let Some(album) = repository.album_at_position(position) {
            info!(
                "{:>4}  {} - {} ({} track(s))",
                position, album.artist, album.title, album.track_count
            );
        }
    }
    Ok(())
}
