//! Event payloads exchanged between the repository, the playlist, and views.

use crate::model::{AlbumId, TrackId};

/// A committed write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChanged {
    /// Connection name of the repository that committed the batch.
    pub origin: String,
    /// Albums created or touched by the batch, in processing order.
    pub album_ids: Vec<AlbumId>,
}

/// Notifications raised by a library repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryEvent {
    /// Rows were written, either by this repository or by a connected one.
    StoreChanged(StoreChanged),
    /// The position index was rebuilt; positional reads may have shifted.
    IndexReset,
}

/// Structural and scalar notifications raised by the playlist manager.
///
/// Ranges are closed intervals of playlist positions. Move destinations are
/// the position of the first moved entry after the move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistEvent {
    AboutToInsert {
        first: usize,
        last: usize,
    },
    Inserted {
        first: usize,
        last: usize,
    },
    AboutToRemove {
        first: usize,
        last: usize,
    },
    Removed {
        first: usize,
        last: usize,
    },
    AboutToMove {
        first: usize,
        last: usize,
        destination: usize,
    },
    Moved {
        first: usize,
        last: usize,
        destination: usize,
    },
    TrackAdded {
        position: usize,
        track_id: Option<TrackId>,
    },
    RepositoryRebound,
    PersistentStateChanged,
    DisplayDataChanged {
        first: usize,
        last: usize,
    },
}
