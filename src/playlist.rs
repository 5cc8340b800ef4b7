//! Playlist entries and their resolution against the library.

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::library_repository::LibraryRepository;
use crate::model::{AlbumField, AlbumFieldValue, AlbumId, Track, TrackId};
use crate::protocol::StoreChanged;

/// How a track was asked for. Kept verbatim for the persisted queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnqueueRequest {
    ById {
        track_id: TrackId,
    },
    TitleArtist {
        title: String,
        artist: String,
    },
    TitleAlbumArtist {
        title: String,
        album: String,
        artist: String,
    },
}

impl EnqueueRequest {
    fn lookup(&self, repository: &LibraryRepository) -> Option<TrackId> {
        match self {
            EnqueueRequest::ById { track_id } => Some(*track_id),
            EnqueueRequest::TitleArtist { title, artist } => {
                repository.track_id_from_title_artist(title, artist)
            }
            EnqueueRequest::TitleAlbumArtist {
                title,
                album,
                artist,
            } => repository.track_id_from_title_album_artist(title, album, artist),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No successful lookup yet.
    Unresolved,
    Resolved,
    /// Resolved once, but the store changed underneath.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayField {
    Title,
    Artist,
    Album,
    Duration,
    Cover,
}

/// A display field value. `Empty` stands for unresolved entries and
/// out-of-range positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayValue {
    Empty,
    Text(String),
    Duration(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DisplayFields {
    title: String,
    artist: String,
    album: String,
    duration: Duration,
    cover_uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    request: EnqueueRequest,
    track_id: Option<TrackId>,
    album_id: Option<AlbumId>,
    state: EntryState,
    display: DisplayFields,
}

impl PlaylistEntry {
    pub fn new(request: EnqueueRequest) -> Self {
        let track_id = match &request {
            EnqueueRequest::ById { track_id } => Some(*track_id),
            _ => None,
        };
        Self {
            request,
            track_id,
            album_id: None,
            state: EntryState::Unresolved,
            display: DisplayFields::default(),
        }
    }

    pub fn request(&self) -> &EnqueueRequest {
        &self.request
    }

    pub fn track_id(&self) -> Option<TrackId> {
        self.track_id
    }

    pub fn album_id(&self) -> Option<AlbumId> {
        self.album_id
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Looks the entry up and refreshes its display fields. On failure the
    /// entry keeps its current state and fields.
    pub fn resolve(&mut self, repository: &mut LibraryRepository) -> bool {
        let Some(track_id) = self.track_id.or_else(|| self.request.lookup(repository)) else {
            debug!("Playlist entry {:?} did not resolve", self.request);
            return false;
        };
        self.track_id = Some(track_id);

        let Some(track) = repository.track_by_id(track_id) else {
            debug!("Playlist entry: track {} is not in the library", track_id);
            return false;
        };
        let cover_uri = track
            .album_id
            .and_then(|album_id| repository.album_field(album_id, AlbumField::Cover))
            .and_then(|value| match value {
                AlbumFieldValue::Cover(cover) => Some(cover),
                _ => None,
            })
            .unwrap_or_default();

        self.apply(&track, cover_uri);
        true
    }

    fn apply(&mut self, track: &Track, cover_uri: String) {
        self.album_id = track.album_id;
        self.display = DisplayFields {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album_name.clone(),
            duration: track.duration,
            cover_uri,
        };
        self.state = EntryState::Resolved;
    }

    /// Marks a resolved entry stale. Returns whether the state changed.
    pub fn invalidate(&mut self) -> bool {
        if self.state == EntryState::Resolved {
            self.state = EntryState::Stale;
            return true;
        }
        false
    }

    pub fn is_affected_by(&self, change: &StoreChanged) -> bool {
        self.album_id
            .is_some_and(|album_id| change.album_ids.contains(&album_id))
    }

    pub fn data(&self, field: DisplayField) -> DisplayValue {
        if self.state == EntryState::Unresolved {
            return DisplayValue::Empty;
        }
        match field {
            DisplayField::Title => DisplayValue::Text(self.display.title.clone()),
            DisplayField::Artist => DisplayValue::Text(self.display.artist.clone()),
            DisplayField::Album => DisplayValue::Text(self.display.album.clone()),
            DisplayField::Duration => DisplayValue::Duration(self.display.duration),
            DisplayField::Cover => DisplayValue::Text(self.display.cover_uri.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DisplayField, DisplayValue, EnqueueRequest, EntryState, PlaylistEntry};
    use crate::library_repository::tests::{open_repository, two_album_library};
    use crate::model::TrackId;
    use crate::protocol::StoreChanged;
    use std::time::Duration;

    #[test]
    fn test_new_entry_is_unresolved_and_empty() {
        let entry = PlaylistEntry::new(EnqueueRequest::TitleArtist {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
        });
        assert_eq!(entry.state(), EntryState::Unresolved);
        assert_eq!(entry.track_id(), None);
        assert_eq!(entry.data(DisplayField::Title), DisplayValue::Empty);

        let by_id = PlaylistEntry::new(EnqueueRequest::ById {
            track_id: TrackId(3),
        });
        assert_eq!(by_id.track_id(), Some(TrackId(3)));
        assert_eq!(by_id.state(), EntryState::Unresolved);
    }

    #[test]
    fn test_resolve_by_title_album_artist_fills_display_fields() {
        let repository = open_repository("content", "playlist-entry-resolve");
        let (tracks, covers) = two_album_library();
        repository.borrow_mut().insert_tracks(&tracks, &covers);

        let mut entry = PlaylistEntry::new(EnqueueRequest::TitleAlbumArtist {
            title: "track2".to_string(),
            album: "album2".to_string(),
            artist: "artist1".to_string(),
        });
        assert!(entry.resolve(&mut repository.borrow_mut()));

        assert_eq!(entry.state(), EntryState::Resolved);
        assert!(entry.track_id().is_some());
        assert_eq!(
            entry.data(DisplayField::Album),
            DisplayValue::Text("album2".to_string())
        );
        assert_eq!(
            entry.data(DisplayField::Cover),
            DisplayValue::Text("file:///covers/album2".to_string())
        );
        assert_eq!(
            entry.data(DisplayField::Duration),
            DisplayValue::Duration(Duration::from_secs(180))
        );
    }

    #[test]
    fn test_failed_resolution_keeps_stale_entry_stale() {
        let repository = open_repository("content", "playlist-entry-stale");
        let (tracks, covers) = two_album_library();
        repository.borrow_mut().insert_tracks(&tracks, &covers);

        let mut entry = PlaylistEntry::new(EnqueueRequest::TitleArtist {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
        });
        assert!(entry.resolve(&mut repository.borrow_mut()));
        let album_id = entry.album_id().expect("resolved entry has an album");

        let change = StoreChanged {
            origin: "other".to_string(),
            album_ids: vec![album_id],
        };
        assert!(entry.is_affected_by(&change));
        assert!(entry.invalidate());
        assert!(!entry.invalidate());
        assert_eq!(entry.state(), EntryState::Stale);

        let empty = open_repository("content", "playlist-entry-stale-empty");
        assert!(!entry.resolve(&mut empty.borrow_mut()));
        assert_eq!(entry.state(), EntryState::Stale);
        assert_eq!(
            entry.data(DisplayField::Title),
            DisplayValue::Text("track1".to_string())
        );
    }

    #[test]
    fn test_enqueue_request_serializes_with_kind_tag() {
        let request = EnqueueRequest::ById {
            track_id: TrackId(7),
        };
        let json = serde_json::to_string(&request).expect("request should serialize");
        assert_eq!(json, r#"{"kind":"by_id","track_id":7}"#);
    }
}
