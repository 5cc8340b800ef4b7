//! Album/track repository on top of the store engine.
//!
//! Imports upsert by natural key: albums by (title, artist), tracks by
//! (title, album id, artist). Rows that already exist are never modified by
//! an import. Each album is written in its own transaction so one failing
//! album does not block the rest of a batch.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::album_index::AlbumIndex;
use crate::config::Config;
use crate::error::StoreError;
use crate::event_bus::{EventBus, SubscriptionId};
use crate::model::{Album, AlbumField, AlbumFieldValue, AlbumId, SourceId, Track, TrackId};
use crate::protocol::{RepositoryEvent, StoreChanged};
use crate::store_engine::{Statement, StoreEngine, StoreLocation};

/// Repository handle shared between the playlist, views, and other repositories.
pub type SharedRepository = Rc<RefCell<LibraryRepository>>;

/// Outcome of one import batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Albums whose transaction committed.
    pub albums_committed: usize,
    /// Albums whose transaction was rolled back.
    pub albums_failed: usize,
    pub albums_inserted: usize,
    pub tracks_inserted: usize,
    /// Tracks rejected by a uniqueness constraint other than their natural key.
    pub tracks_skipped: usize,
}

pub struct LibraryRepository {
    engine: StoreEngine,
    index: AlbumIndex,
    events: EventBus<RepositoryEvent>,
}

impl LibraryRepository {
    /// Opens the store at `location` under `connection_name` and builds the
    /// position index.
    pub fn open(
        connection_name: &str,
        location: &StoreLocation,
        config: &Config,
    ) -> Result<Self, StoreError> {
        let engine = StoreEngine::open(
            connection_name,
            location,
            config.store.statement_cache_capacity,
        )?;
        let mut repository = Self {
            engine,
            index: AlbumIndex::new(config.cache.album_memo_capacity),
            events: EventBus::new(),
        };
        repository.rebuild_index();
        Ok(repository)
    }

    pub fn open_shared(
        connection_name: &str,
        location: &StoreLocation,
        config: &Config,
    ) -> Result<SharedRepository, StoreError> {
        Self::open(connection_name, location, config)
            .map(|repository| Rc::new(RefCell::new(repository)))
    }

    pub fn connection_name(&self) -> &str {
        self.engine.name()
    }

    pub fn subscribe<F>(&mut self, mut handler: F) -> SubscriptionId
    where
        F: FnMut(&RepositoryEvent) + 'static,
    {
        self.events.subscribe(move |_, event| handler(event))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Forwards every store change committed through `source` to `target`,
    /// which rebuilds its index and relays the change to its own subscribers.
    pub fn connect_changes(source: &SharedRepository, target: &SharedRepository) -> SubscriptionId {
        let target_name = target.borrow().connection_name().to_string();
        let target = Rc::downgrade(target);
        source.borrow_mut().subscribe(move |event| {
            let RepositoryEvent::StoreChanged(change) = event else {
                return;
            };
            if change.origin == target_name {
                return;
            }
            let Some(target) = target.upgrade() else {
                return;
            };
            match target.try_borrow_mut() {
                Ok(mut target) => target.database_has_changed(change),
                Err(_) => warn!(
                    "Repository `{}` is busy, dropping change from `{}`",
                    target_name, change.origin
                ),
            };
        })
    }

    /// Reacts to a batch committed by another repository on the same store.
    pub fn database_has_changed(&mut self, change: &StoreChanged) {
        if change.origin == self.connection_name() {
            return;
        }
        debug!(
            "Repository `{}`: store changed by `{}` ({} album(s))",
            self.connection_name(),
            change.origin,
            change.album_ids.len()
        );
        self.rebuild_index();
        self.events.emit(&(), &RepositoryEvent::StoreChanged(change.clone()));
    }

    /// Rebuilds the position index and announces the reset.
    pub fn rebuild_index(&mut self) {
        match self.index.rebuild(&self.engine) {
            Ok(()) => self.events.emit(&(), &RepositoryEvent::IndexReset),
            Err(err) => error!(
                "Repository `{}`: index rebuild failed: {}",
                self.connection_name(),
                err
            ),
        }
    }

    pub fn album_count(&self) -> usize {
        match self
            .engine
            .query_optional(Statement::CountAlbums, [], |row| row.get::<_, i64>(0))
        {
            Ok(count) => count.unwrap_or(0).max(0) as usize,
            Err(err) => {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                0
            }
        }
    }

    pub fn album_id_at_position(&self, position: usize) -> Option<AlbumId> {
        self.index.album_id_at_position(position)
    }

    /// Position of an album id obtained from this repository's index.
    pub fn position_of_album(&self, id: AlbumId) -> Option<usize> {
        self.index.position_of_album(id)
    }

    /// Number of albums in the position index, as of the last rebuild.
    pub fn indexed_album_count(&self) -> usize {
        self.index.len()
    }

    /// Returns the memoized album, or assembles it from the store.
    ///
    /// Memoized albums are served as-is until the next index rebuild, even if
    /// a later track fetch corrected the stored track count.
    pub fn album_by_id(&mut self, id: AlbumId) -> Option<Album> {
        if let Some(album) = self.index.memoized(id) {
            return Some(album.clone());
        }

        let mut album = match self
            .engine
            .query_optional(Statement::SelectAlbum, [id.0], album_from_row)
        {
            Ok(Some(album)) => album,
            Ok(None) => return None,
            Err(err) => {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                return None;
            }
        };

        let tracks = match self.try_fetch_tracks(id) {
            Ok(tracks) => tracks,
            Err(err) => {
                warn!(
                    "Repository `{}`: cannot assemble album {}: {}",
                    self.connection_name(),
                    id,
                    err
                );
                return None;
            }
        };
        album.track_count = tracks.len() as i32;
        album.set_tracks(tracks);
        self.index.memoize(album.clone());
        Some(album)
    }

    pub fn album_at_position(&mut self, position: usize) -> Option<Album> {
        let id = self.index.album_id_at_position(position)?;
        self.album_by_id(id)
    }

    pub fn album_field(&mut self, id: AlbumId, field: AlbumField) -> Option<AlbumFieldValue> {
        self.album_by_id(id)?.field(field)
    }

    pub fn album_field_at_position(
        &mut self,
        position: usize,
        field: AlbumField,
    ) -> Option<AlbumFieldValue> {
        self.album_at_position(position)?.field(field)
    }

    pub fn album_id_from_title_artist(&self, title: &str, artist: &str) -> Option<AlbumId> {
        self.select_album_id(title, artist).unwrap_or_else(|err| {
            warn!("Repository `{}`: {}", self.connection_name(), err);
            None
        })
    }

    pub fn album_by_title_artist(&mut self, title: &str, artist: &str) -> Option<Album> {
        let id = self.album_id_from_title_artist(title, artist)?;
        self.album_by_id(id)
    }

    /// Tracks of an album keyed by track id. Reconciles the album's stored
    /// track count with the number of rows found.
    pub fn fetch_tracks(&self, album_id: AlbumId) -> BTreeMap<TrackId, Track> {
        self.try_fetch_tracks(album_id).unwrap_or_else(|err| {
            warn!("Repository `{}`: {}", self.connection_name(), err);
            BTreeMap::new()
        })
    }

    fn try_fetch_tracks(&self, album_id: AlbumId) -> Result<BTreeMap<TrackId, Track>, StoreError> {
        let tracks: BTreeMap<TrackId, Track> = self
            .engine
            .query_all(Statement::SelectTracksOfAlbum, [album_id.0], track_from_row)?
            .into_iter()
            .filter_map(|track| track.id.map(|id| (id, track)))
            .collect();
        self.update_track_count(album_id, tracks.len());
        Ok(tracks)
    }

    fn update_track_count(&self, album_id: AlbumId, track_count: usize) {
        let stored = match self.engine.query_optional(
            Statement::SelectAlbumTrackCount,
            [album_id.0],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(err) => {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                return;
            }
        };

        let track_count = track_count as i64;
        if stored == track_count {
            return;
        }
        debug!(
            "Repository `{}`: album {} track count {} -> {}",
            self.connection_name(),
            album_id,
            stored,
            track_count
        );
        if let Err(err) = self.engine.execute(
            Statement::UpdateAlbumTrackCount,
            params![track_count, album_id.0],
        ) {
            warn!("Repository `{}`: {}", self.connection_name(), err);
        }
    }

    pub fn album_id_from_track_id(&self, track_id: TrackId) -> Option<AlbumId> {
        self.engine
            .query_optional(Statement::SelectAlbumIdOfTrack, [track_id.0], |row| {
                row.get::<_, i64>(0).map(AlbumId)
            })
            .unwrap_or_else(|err| {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                None
            })
    }

    pub fn track_by_id(&self, track_id: TrackId) -> Option<Track> {
        self.engine
            .query_optional(Statement::SelectTrack, [track_id.0], track_from_row)
            .unwrap_or_else(|err| {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                None
            })
    }

    pub fn track_id_from_title_album_artist(
        &self,
        title: &str,
        album_title: &str,
        artist: &str,
    ) -> Option<TrackId> {
        let album_id = self.album_id_from_title_artist(album_title, artist)?;
        self.select_track_id(title, album_id, artist)
            .unwrap_or_else(|err| {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                None
            })
    }

    /// Lowest track id matching title and artist across all albums.
    pub fn track_id_from_title_artist(&self, title: &str, artist: &str) -> Option<TrackId> {
        self.engine
            .query_optional(
                Statement::SelectTrackIdByTitleArtist,
                params![title, artist],
                |row| row.get::<_, i64>(0).map(TrackId),
            )
            .unwrap_or_else(|err| {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                None
            })
    }

    /// Inserts albums that are not stored yet. Existing albums are untouched.
    pub fn insert_albums(&mut self, albums: &[Album]) -> ImportReport {
        let mut report = ImportReport::default();
        let mut changed = Vec::new();

        for album in albums {
            match self.insert_album_transaction(album) {
                Ok((album_id, inserted)) => {
                    report.albums_committed += 1;
                    if inserted {
                        report.albums_inserted += 1;
                    }
                    changed.push(album_id);
                }
                Err(err) => {
                    error!(
                        "Repository `{}`: import of album `{}` by `{}` aborted: {}",
                        self.connection_name(),
                        album.title,
                        album.artist,
                        err
                    );
                    report.albums_failed += 1;
                }
            }
        }

        self.finish_batch(changed, &report);
        report
    }

    fn insert_album_transaction(&self, album: &Album) -> Result<(AlbumId, bool), StoreError> {
        let tx = self.engine.begin()?;
        let upserted = self.upsert_album(album)?;
        tx.commit()?;
        Ok(upserted)
    }

    /// Imports tracks grouped by album key. `covers` maps album names (or
    /// album keys) to cover locators.
    pub fn insert_tracks(
        &mut self,
        tracks: &BTreeMap<String, Vec<Track>>,
        covers: &HashMap<String, String>,
    ) -> ImportReport {
        self.import_tracks(None, tracks, covers)
    }

    /// Same as [`insert_tracks`](Self::insert_tracks), also mapping every
    /// imported track to `source`.
    pub fn insert_tracks_from_source(
        &mut self,
        source: SourceId,
        tracks: &BTreeMap<String, Vec<Track>>,
        covers: &HashMap<String, String>,
    ) -> ImportReport {
        self.import_tracks(Some(source), tracks, covers)
    }

    fn import_tracks(
        &mut self,
        source: Option<SourceId>,
        tracks: &BTreeMap<String, Vec<Track>>,
        covers: &HashMap<String, String>,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        let mut changed = Vec::new();

        for (album_key, album_tracks) in tracks {
            let album = derive_album(album_key, album_tracks, covers);
            match self.insert_tracks_transaction(&album, album_tracks, source) {
                Ok(outcome) => {
                    report.albums_committed += 1;
                    if outcome.album_inserted {
                        report.albums_inserted += 1;
                    }
                    report.tracks_inserted += outcome.tracks_inserted;
                    report.tracks_skipped += outcome.tracks_skipped;
                    changed.push(outcome.album_id);
                }
                Err(err) => {
                    error!(
                        "Repository `{}`: import of album `{}` aborted: {}",
                        self.connection_name(),
                        album_key,
                        err
                    );
                    report.albums_failed += 1;
                }
            }
        }

        self.finish_batch(changed, &report);
        report
    }

    fn insert_tracks_transaction(
        &self,
        album: &Album,
        tracks: &[Track],
        source: Option<SourceId>,
    ) -> Result<AlbumImport, StoreError> {
        let tx = self.engine.begin()?;
        let (album_id, album_inserted) = self.upsert_album(album)?;
        let mut outcome = AlbumImport {
            album_id,
            album_inserted,
            tracks_inserted: 0,
            tracks_skipped: 0,
        };

        for track in tracks {
            let artist = if track.artist.is_empty() {
                album.artist.as_str()
            } else {
                track.artist.as_str()
            };
            match self.upsert_track(track, album_id, artist)? {
                Some((track_id, inserted)) => {
                    if inserted {
                        outcome.tracks_inserted += 1;
                    }
                    if let Some(source) = source {
                        self.engine.execute(
                            Statement::InsertTrackMapping,
                            params![track_id.0, source.0],
                        )?;
                    }
                }
                None => outcome.tracks_skipped += 1,
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn finish_batch(&mut self, changed: Vec<AlbumId>, report: &ImportReport) {
        info!(
            "Repository `{}`: import committed {} album(s) ({} new, {} failed), {} new track(s)",
            self.connection_name(),
            report.albums_committed,
            report.albums_inserted,
            report.albums_failed,
            report.tracks_inserted
        );
        self.rebuild_index();
        if report.albums_committed > 0 {
            let change = StoreChanged {
                origin: self.connection_name().to_string(),
                album_ids: changed,
            };
            self.events.emit(&(), &RepositoryEvent::StoreChanged(change));
        }
    }

    fn select_album_id(&self, title: &str, artist: &str) -> Result<Option<AlbumId>, StoreError> {
        self.engine.query_optional(
            Statement::SelectAlbumIdByTitleArtist,
            params![title, artist],
            |row| row.get::<_, i64>(0).map(AlbumId),
        )
    }

    fn select_track_id(
        &self,
        title: &str,
        album_id: AlbumId,
        artist: &str,
    ) -> Result<Option<TrackId>, StoreError> {
        self.engine.query_optional(
            Statement::SelectTrackIdByTitleAlbumArtist,
            params![title, album_id.0, artist],
            |row| row.get::<_, i64>(0).map(TrackId),
        )
    }

    /// Returns the album id and whether the row was created.
    fn upsert_album(&self, album: &Album) -> Result<(AlbumId, bool), StoreError> {
        if let Some(id) = self.select_album_id(&album.title, &album.artist)? {
            return Ok((id, false));
        }

        let inserted = match self.engine.execute(
            Statement::InsertAlbum,
            params![
                album.title,
                album.artist,
                album.cover_uri,
                album.track_count as i64,
                album.internal_id
            ],
        ) {
            Ok(_) => true,
            Err(err) if err.is_constraint_violation() => {
                debug!("Repository `{}`: {}", self.connection_name(), err);
                false
            }
            Err(err) => return Err(err),
        };

        self.select_album_id(&album.title, &album.artist)?
            .map(|id| (id, inserted))
            .ok_or_else(|| {
                StoreError::NotFound(format!("album `{}` by `{}`", album.title, album.artist))
            })
    }

    /// Returns the track id and whether the row was created, or `None` when a
    /// uniqueness constraint other than the natural key rejected the track.
    fn upsert_track(
        &self,
        track: &Track,
        album_id: AlbumId,
        artist: &str,
    ) -> Result<Option<(TrackId, bool)>, StoreError> {
        if let Some(id) = self.select_track_id(&track.title, album_id, artist)? {
            return Ok(Some((id, false)));
        }

        match self.engine.execute(
            Statement::InsertTrack,
            params![
                track.title,
                album_id.0,
                artist,
                track.resource_uri,
                track.track_number,
                track.duration.as_millis() as i64
            ],
        ) {
            Ok(_) => {}
            Err(err) if err.is_constraint_violation() => {
                debug!(
                    "Repository `{}`: track `{}` skipped: {}",
                    self.connection_name(),
                    track.title,
                    err
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        Ok(self
            .select_track_id(&track.title, album_id, artist)?
            .map(|id| (id, true)))
    }

    /// Finds or creates the discover source with this UUID.
    pub fn register_source(&mut self, uuid: &Uuid) -> Option<SourceId> {
        let uuid_text = uuid.to_string();
        let select = |engine: &StoreEngine| {
            engine.query_optional(Statement::SelectSourceIdByUuid, [&uuid_text], |row| {
                row.get::<_, i64>(0).map(SourceId)
            })
        };

        let result = select(&self.engine).and_then(|existing| match existing {
            Some(id) => Ok(Some(id)),
            None => {
                self.engine.execute(Statement::InsertSource, [&uuid_text])?;
                select(&self.engine)
            }
        });

        result.unwrap_or_else(|err| {
            error!(
                "Repository `{}`: cannot register source {}: {}",
                self.connection_name(),
                uuid,
                err
            );
            None
        })
    }

    pub fn track_ids_for_source(&self, source: SourceId) -> Vec<TrackId> {
        self.engine
            .query_all(Statement::SelectTrackIdsOfSource, [source.0], |row| {
                row.get::<_, i64>(0).map(TrackId)
            })
            .unwrap_or_else(|err| {
                warn!("Repository `{}`: {}", self.connection_name(), err);
                Vec::new()
            })
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut StoreEngine {
        &mut self.engine
    }
}

impl std::fmt::Debug for LibraryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryRepository")
            .field("engine", &self.engine)
            .field("indexed_albums", &self.index.len())
            .field("events", &self.events)
            .finish()
    }
}

struct AlbumImport {
    album_id: AlbumId,
    album_inserted: bool,
    tracks_inserted: usize,
    tracks_skipped: usize,
}

/// Album metadata for an import group: each field comes from the first track
/// that carries a non-empty value for it.
fn derive_album(album_key: &str, tracks: &[Track], covers: &HashMap<String, String>) -> Album {
    let mut album = Album::new("", "", "", tracks.len() as i32);

    for track in tracks {
        if album.artist.is_empty() && !track.artist.is_empty() {
            album.artist = track.artist.clone();
        }
        if album.title.is_empty() && !track.album_name.is_empty() {
            album.title = track.album_name.clone();
        }
        if album.cover_uri.is_empty() {
            if let Some(cover) = covers.get(&track.album_name).filter(|cover| !cover.is_empty()) {
                album.cover_uri = cover.clone();
            }
        }
        if !album.artist.is_empty() && !album.title.is_empty() && !album.cover_uri.is_empty() {
            break;
        }
    }

    if album.title.is_empty() {
        album.title = album_key.to_string();
    }
    if album.cover_uri.is_empty() {
        if let Some(cover) = covers.get(album_key) {
            album.cover_uri = cover.clone();
        }
    }
    album
}

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        id: Some(AlbumId(row.get(0)?)),
        title: row.get(1)?,
        internal_id: row.get(2)?,
        artist: row.get(3)?,
        cover_uri: row.get(4)?,
        track_count: row.get(5)?,
        valid: true,
        ..Album::default()
    })
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: Some(TrackId(row.get(0)?)),
        title: row.get(1)?,
        album_id: Some(AlbumId(row.get(2)?)),
        artist: row.get(3)?,
        resource_uri: row.get(4)?,
        track_number: row.get(5)?,
        duration: Duration::from_millis(row.get::<_, i64>(6)?.max(0) as u64),
        album_name: row.get(7)?,
        valid: true,
    })
}
