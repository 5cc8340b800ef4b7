//! Position index over album ids plus a bounded album memo.
//!
//! The index is rebuilt wholesale from the store after every write batch and
//! never patched in place.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::StoreError;
use crate::model::{Album, AlbumId};
use crate::store_engine::{Statement, StoreEngine};

#[derive(Debug, Default)]
pub struct AlbumIndex {
    ids_by_position: Vec<AlbumId>,
    position_by_id: HashMap<AlbumId, usize>,
    memo: HashMap<AlbumId, Album>,
    memo_capacity: usize,
}

impl AlbumIndex {
    /// An empty index. `memo_capacity` of 0 disables memoization.
    pub fn new(memo_capacity: usize) -> Self {
        Self {
            memo_capacity,
            ..Self::default()
        }
    }

    /// Reloads every album id in insertion order and drops the memo.
    ///
    /// The new containers are built first and swapped in only when the query
    /// succeeded, so a failed rebuild leaves the previous index in place.
    pub fn rebuild(&mut self, engine: &StoreEngine) -> Result<(), StoreError> {
        let ids = engine.query_all(Statement::SelectAllAlbumIds, [], |row| {
            row.get::<_, i64>(0).map(AlbumId)
        })?;

        let position_by_id: HashMap<AlbumId, usize> = ids
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();

        self.ids_by_position = ids;
        self.position_by_id = position_by_id;
        self.memo = HashMap::new();
        debug!(
            "Album index rebuilt with {} album(s)",
            self.ids_by_position.len()
        );
        Ok(())
    }

    pub fn album_id_at_position(&self, position: usize) -> Option<AlbumId> {
        self.ids_by_position.get(position).copied()
    }

    /// Position of a known album. Callers are expected to only ask for ids
    /// they got from this index; anything else yields `None`.
    pub fn position_of_album(&self, id: AlbumId) -> Option<usize> {
        let position = self.position_by_id.get(&id).copied();
        if position.is_none() {
            warn!("Album index: position requested for unknown album {}", id);
        }
        position
    }

    pub fn len(&self) -> usize {
        self.ids_by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids_by_position.is_empty()
    }

    pub fn memoized(&self, id: AlbumId) -> Option<&Album> {
        self.memo.get(&id)
    }

    /// Stores an assembled album until the next rebuild. Once the memo is
    /// full, further albums are served uncached.
    pub fn memoize(&mut self, album: Album) {
        let Some(id) = album.id else {
            return;
        };
        if self.memo.len() >= self.memo_capacity && !self.memo.contains_key(&id) {
            return;
        }
        self.memo.insert(id, album);
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::AlbumIndex;
    use crate::model::{Album, AlbumId};
    use crate::store_engine::{Statement, StoreEngine, StoreLocation};
    use rusqlite::params;

    fn engine_with_albums(name: &str, titles: &[&str]) -> StoreEngine {
        let engine =
            StoreEngine::open(name, &StoreLocation::memory(name), 32).expect("store should open");
        for title in titles {
            engine
                .execute(
                    Statement::InsertAlbum,
                    params![title, "artist1", "", 0_i64, Option::<String>::None],
                )
                .expect("insert should succeed");
        }
        engine
    }

    fn album_with_id(id: i64) -> Album {
        let mut album = Album::new("album", "artist", "", 0);
        album.id = Some(AlbumId(id));
        album
    }

    #[test]
    fn test_new_index_is_empty() {
        let index = AlbumIndex::new(8);
        assert!(index.is_empty());
        assert_eq!(index.album_id_at_position(0), None);
    }

    #[test]
    fn test_rebuild_maps_positions_both_ways() {
        let engine = engine_with_albums("album-index-positions", &["a", "b", "c"]);
        let mut index = AlbumIndex::new(8);
        index.rebuild(&engine).expect("rebuild should succeed");

        assert_eq!(index.len(), 3);
        for position in 0..index.len() {
            let id = index
                .album_id_at_position(position)
                .expect("position should be mapped");
            assert_eq!(index.position_of_album(id), Some(position));
        }
        assert_eq!(index.album_id_at_position(3), None);
        assert_eq!(index.position_of_album(AlbumId(999)), None);
    }

    #[test]
    fn test_rebuild_clears_memo() {
        let engine = engine_with_albums("album-index-memo", &["a"]);
        let mut index = AlbumIndex::new(8);
        index.rebuild(&engine).expect("rebuild should succeed");
        index.memoize(album_with_id(1));
        assert_eq!(index.memo_len(), 1);

        index.rebuild(&engine).expect("rebuild should succeed");
        assert_eq!(index.memo_len(), 0);
    }

    #[test]
    fn test_memo_respects_capacity() {
        let mut index = AlbumIndex::new(2);
        index.memoize(album_with_id(1));
        index.memoize(album_with_id(2));
        index.memoize(album_with_id(3));

        assert_eq!(index.memo_len(), 2);
        assert!(index.memoized(AlbumId(3)).is_none());

        let mut disabled = AlbumIndex::new(0);
        disabled.memoize(album_with_id(1));
        assert_eq!(disabled.memo_len(), 0);
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_index() {
        let mut engine = engine_with_albums("album-index-failed-rebuild", &["a", "b"]);
        let mut index = AlbumIndex::new(8);
        index.rebuild(&engine).expect("rebuild should succeed");

        engine.poison_statement(Statement::SelectAllAlbumIds);
        assert!(index.rebuild(&engine).is_err());
        assert_eq!(index.len(), 2);
    }
}
