//! Music library persistence, album indexing, and an ordered playlist queue.

pub mod album_index;
pub mod config;
pub mod config_persistence;
pub mod error;
pub mod event_bus;
pub mod library_repository;
pub mod model;
pub mod player_control;
pub mod playlist;
pub mod playlist_manager;
pub mod protocol;
pub mod store_engine;

pub use error::{ConfigError, PlaylistError, StoreError};
pub use library_repository::{ImportReport, LibraryRepository, SharedRepository};
pub use model::{Album, AlbumField, AlbumFieldValue, AlbumId, SourceId, Track, TrackId};
pub use playlist_manager::{PlaylistManager, SharedPlaylist};
pub use store_engine::StoreLocation;
