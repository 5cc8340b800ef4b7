//! Album and track records shared by the repository and the playlist.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Persistent album row id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct AlbumId(pub i64);

/// Persistent track row id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct TrackId(pub i64);

/// Persistent discover-source row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub i64);

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single audio track.
///
/// Records coming from an ingestion collaborator carry no `id` and no
/// `album_id`; both are filled in when the track is read back from the store.
/// `Track::default()` is an invalid record.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Track {
    pub id: Option<TrackId>,
    pub title: String,
    pub artist: String,
    pub album_id: Option<AlbumId>,
    pub album_name: String,
    pub track_number: i32,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub resource_uri: String,
    pub valid: bool,
}

impl Track {
    /// Builds a valid, not yet persisted track.
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album_name: impl Into<String>,
        track_number: i32,
        duration: Duration,
        resource_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            artist: artist.into(),
            album_id: None,
            album_name: album_name.into(),
            track_number,
            duration,
            resource_uri: resource_uri.into(),
            valid: true,
        }
    }
}

/// An album with its tracks ordered by track id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Album {
    pub id: Option<AlbumId>,
    /// Collaborator-side identifier (`AlbumInternalID`), if any.
    pub internal_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub cover_uri: String,
    pub track_count: i32,
    pub tracks: BTreeMap<TrackId, Track>,
    pub track_ids: Vec<TrackId>,
    pub valid: bool,
}

impl Album {
    /// Builds a valid, not yet persisted album without tracks.
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        cover_uri: impl Into<String>,
        track_count: i32,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            cover_uri: cover_uri.into(),
            track_count,
            valid: true,
            ..Self::default()
        }
    }

    /// Replaces the track mapping and keeps `track_ids` in sync with it.
    pub fn set_tracks(&mut self, tracks: BTreeMap<TrackId, Track>) {
        self.track_ids = tracks.keys().copied().collect();
        self.tracks = tracks;
    }
}

/// Album attribute selector for single-field projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumField {
    Id,
    Cover,
    Title,
    Artist,
    TrackCount,
}

/// Value of one projected album attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AlbumFieldValue {
    Id(AlbumId),
    Cover(String),
    Title(String),
    Artist(String),
    TrackCount(i32),
}

impl Album {
    /// Projects one attribute. Albums never read from the store have no id.
    pub fn field(&self, field: AlbumField) -> Option<AlbumFieldValue> {
        match field {
            AlbumField::Id => self.id.map(AlbumFieldValue::Id),
            AlbumField::Cover => Some(AlbumFieldValue::Cover(self.cover_uri.clone())),
            AlbumField::Title => Some(AlbumFieldValue::Title(self.title.clone())),
            AlbumField::Artist => Some(AlbumFieldValue::Artist(self.artist.clone())),
            AlbumField::TrackCount => Some(AlbumFieldValue::TrackCount(self.track_count)),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
