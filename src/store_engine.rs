//! SQLite connection, schema, and the fixed statement set used by the library.
//!
//! Statements are prepared once when the engine opens and kept in the
//! connection's statement cache. A statement that failed to prepare stays
//! unusable for the lifetime of the engine.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use log::{debug, error, info};
use rusqlite::{CachedStatement, Connection, OpenFlags, OptionalExtension, Params, Row};

use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS DiscoverSource (
    ID INTEGER PRIMARY KEY NOT NULL,
    UUID TEXT NOT NULL,
    UNIQUE (UUID)
);
CREATE TABLE IF NOT EXISTS Albums (
    ID INTEGER PRIMARY KEY NOT NULL,
    Title TEXT NOT NULL,
    Artist TEXT NOT NULL,
    CoverFileName TEXT NOT NULL,
    TracksCount INTEGER NOT NULL,
    AlbumInternalID TEXT,
    UNIQUE (Title, Artist)
);
CREATE TABLE IF NOT EXISTS Tracks (
    ID INTEGER PRIMARY KEY NOT NULL,
    Title TEXT NOT NULL,
    AlbumID INTEGER NOT NULL,
    Artist TEXT NOT NULL,
    FileName TEXT NOT NULL UNIQUE,
    TrackNumber INTEGER NOT NULL,
    Duration INTEGER NOT NULL,
    UNIQUE (Title, AlbumID, Artist),
    CONSTRAINT fk_album FOREIGN KEY (AlbumID) REFERENCES Albums(ID)
);
CREATE TABLE IF NOT EXISTS TracksMapping (
    TrackID INTEGER NOT NULL,
    DiscoverID INTEGER NOT NULL,
    PRIMARY KEY (TrackID, DiscoverID),
    CONSTRAINT fk_trackID FOREIGN KEY (TrackID) REFERENCES Tracks(ID),
    CONSTRAINT fk_discoverID FOREIGN KEY (DiscoverID) REFERENCES DiscoverSource(ID)
);
CREATE INDEX IF NOT EXISTS TracksAlbumIndex ON Tracks (AlbumID);
";

/// Where a store lives. Engines opened on the same location share rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Shared-cache in-memory database, alive while any connection is open.
    Memory { name: String },
    File(PathBuf),
}

impl StoreLocation {
    pub fn memory(name: impl Into<String>) -> Self {
        Self::Memory { name: name.into() }
    }
}

/// Every statement the library issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    CreateSchema,
    SelectAlbum,
    SelectTracksOfAlbum,
    SelectTrack,
    SelectAlbumIdOfTrack,
    CountAlbums,
    SelectAlbumIdByTitleArtist,
    InsertAlbum,
    SelectTrackIdByTitleAlbumArtist,
    SelectTrackIdByTitleArtist,
    InsertTrack,
    SelectAlbumTrackCount,
    UpdateAlbumTrackCount,
    SelectAllAlbumIds,
    SelectSourceIdByUuid,
    InsertSource,
    InsertTrackMapping,
    SelectTrackIdsOfSource,
}

impl Statement {
    /// Statements kept in the prepared-statement cache.
    pub const PREPARED: [Statement; 17] = [
        Statement::SelectAlbum,
        Statement::SelectTracksOfAlbum,
        Statement::SelectTrack,
        Statement::SelectAlbumIdOfTrack,
        Statement::CountAlbums,
        Statement::SelectAlbumIdByTitleArtist,
        Statement::InsertAlbum,
        Statement::SelectTrackIdByTitleAlbumArtist,
        Statement::SelectTrackIdByTitleArtist,
        Statement::InsertTrack,
        Statement::SelectAlbumTrackCount,
        Statement::UpdateAlbumTrackCount,
        Statement::SelectAllAlbumIds,
        Statement::SelectSourceIdByUuid,
        Statement::InsertSource,
        Statement::InsertTrackMapping,
        Statement::SelectTrackIdsOfSource,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Statement::CreateSchema => "create schema",
            Statement::SelectAlbum => "select album",
            Statement::SelectTracksOfAlbum => "select tracks of album",
            Statement::SelectTrack => "select track",
            Statement::SelectAlbumIdOfTrack => "select album id of track",
            Statement::CountAlbums => "count albums",
            Statement::SelectAlbumIdByTitleArtist => "select album id by title and artist",
            Statement::InsertAlbum => "insert album",
            Statement::SelectTrackIdByTitleAlbumArtist => {
                "select track id by title, album and artist"
            }
            Statement::SelectTrackIdByTitleArtist => "select track id by title and artist",
            Statement::InsertTrack => "insert track",
            Statement::SelectAlbumTrackCount => "select album track count",
            Statement::UpdateAlbumTrackCount => "update album track count",
            Statement::SelectAllAlbumIds => "select all album ids",
            Statement::SelectSourceIdByUuid => "select source id by uuid",
            Statement::InsertSource => "insert source",
            Statement::InsertTrackMapping => "insert track mapping",
            Statement::SelectTrackIdsOfSource => "select track ids of source",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Statement::CreateSchema => SCHEMA,
            Statement::SelectAlbum => {
                "SELECT ID, Title, AlbumInternalID, Artist, CoverFileName, TracksCount
                 FROM Albums WHERE ID = ?1"
            }
            Statement::SelectTracksOfAlbum => {
                "SELECT t.ID, t.Title, t.AlbumID, t.Artist, t.FileName, t.TrackNumber,
                        t.Duration, a.Title
                 FROM Tracks t JOIN Albums a ON a.ID = t.AlbumID
                 WHERE t.AlbumID = ?1 ORDER BY t.ID"
            }
            Statement::SelectTrack => {
                "SELECT t.ID, t.Title, t.AlbumID, t.Artist, t.FileName, t.TrackNumber,
                        t.Duration, a.Title
                 FROM Tracks t JOIN Albums a ON a.ID = t.AlbumID
                 WHERE t.ID = ?1"
            }
            Statement::SelectAlbumIdOfTrack => "SELECT AlbumID FROM Tracks WHERE ID = ?1",
            Statement::CountAlbums => "SELECT count(*) FROM Albums",
            Statement::SelectAlbumIdByTitleArtist => {
                "SELECT ID FROM Albums WHERE Title = ?1 AND Artist = ?2"
            }
            Statement::InsertAlbum => {
                "INSERT INTO Albums (Title, Artist, CoverFileName, TracksCount, AlbumInternalID)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            }
            Statement::SelectTrackIdByTitleAlbumArtist => {
                "SELECT ID FROM Tracks WHERE Title = ?1 AND AlbumID = ?2 AND Artist = ?3"
            }
            Statement::SelectTrackIdByTitleArtist => {
                "SELECT ID FROM Tracks WHERE Title = ?1 AND Artist = ?2 ORDER BY ID LIMIT 1"
            }
            Statement::InsertTrack => {
                "INSERT INTO Tracks (Title, AlbumID, Artist, FileName, TrackNumber, Duration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
            Statement::SelectAlbumTrackCount => "SELECT TracksCount FROM Albums WHERE ID = ?1",
            Statement::UpdateAlbumTrackCount => {
                "UPDATE Albums SET TracksCount = ?1 WHERE ID = ?2"
            }
            Statement::SelectAllAlbumIds => "SELECT ID FROM Albums ORDER BY ID",
            Statement::SelectSourceIdByUuid => "SELECT ID FROM DiscoverSource WHERE UUID = ?1",
            Statement::InsertSource => "INSERT INTO DiscoverSource (UUID) VALUES (?1)",
            Statement::InsertTrackMapping => {
                "INSERT OR IGNORE INTO TracksMapping (TrackID, DiscoverID) VALUES (?1, ?2)"
            }
            Statement::SelectTrackIdsOfSource => {
                "SELECT TrackID FROM TracksMapping WHERE DiscoverID = ?1 ORDER BY TrackID"
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owns the connection and the prepared statements of one repository.
pub struct StoreEngine {
    conn: Connection,
    name: String,
    unprepared: HashSet<Statement>,
}

impl StoreEngine {
    /// Opens `location` under the connection name `name`, creates the schema
    /// if needed, and prepares every statement.
    pub fn open(
        name: &str,
        location: &StoreLocation,
        statement_cache_capacity: usize,
    ) -> Result<Self, StoreError> {
        let open_error = |err: rusqlite::Error| StoreError::Open {
            name: name.to_string(),
            message: err.to_string(),
        };

        let conn = match location {
            StoreLocation::Memory { name: memory_name } => Connection::open_with_flags(
                format!("file:{memory_name}?mode=memory&cache=shared"),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(open_error)?,
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent).map_err(|err| StoreError::Open {
                            name: name.to_string(),
                            message: format!("cannot create {}: {}", parent.display(), err),
                        })?;
                    }
                }
                Connection::open(path).map_err(open_error)?
            }
        };

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(open_error)?;
        conn.set_prepared_statement_cache_capacity(
            statement_cache_capacity.max(Statement::PREPARED.len()),
        );

        let mut engine = Self {
            conn,
            name: name.to_string(),
            unprepared: HashSet::new(),
        };
        engine.initialize_schema()?;
        engine.prepare_statements();
        info!("Store `{}` open at {:?}", engine.name, location);
        Ok(engine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Safe to run repeatedly; existing tables are left alone.
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(Statement::CreateSchema.sql())
            .map_err(|err| {
                error!("Store `{}`: schema creation failed: {}", self.name, err);
                StoreError::StatementExecute {
                    statement: Statement::CreateSchema,
                    message: err.to_string(),
                }
            })
    }

    fn prepare_statements(&mut self) {
        for statement in Statement::PREPARED {
            if let Err(err) = self.conn.prepare_cached(statement.sql()) {
                error!(
                    "Store `{}`: failed to prepare {}: {}",
                    self.name, statement, err
                );
                self.unprepared.insert(statement);
            }
        }
    }

    fn statement(&self, statement: Statement) -> Result<CachedStatement<'_>, StoreError> {
        if self.unprepared.contains(&statement) {
            return Err(StoreError::StatementExecute {
                statement,
                message: "statement is unusable after a failed prepare".to_string(),
            });
        }
        self.conn
            .prepare_cached(statement.sql())
            .map_err(|err| StoreError::StatementPrepare {
                statement,
                message: err.to_string(),
            })
    }

    /// Runs a statement expected to return at most one row.
    pub fn query_optional<T, P, F>(
        &self,
        statement: Statement,
        params: P,
        map: F,
    ) -> Result<Option<T>, StoreError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.statement(statement)?;
        stmt.query_row(params, map)
            .optional()
            .map_err(|err| StoreError::from_execute(statement, err))
    }

    /// Runs a statement and maps every returned row.
    pub fn query_all<T, P, F>(
        &self,
        statement: Statement,
        params: P,
        map: F,
    ) -> Result<Vec<T>, StoreError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.statement(statement)?;
        let rows = stmt
            .query_map(params, map)
            .map_err(|err| StoreError::from_execute(statement, err))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row.map_err(|err| StoreError::from_execute(statement, err))?);
        }
        Ok(values)
    }

    /// Runs a write statement and returns the number of changed rows.
    pub fn execute<P: Params>(&self, statement: Statement, params: P) -> Result<usize, StoreError> {
        let mut stmt = self.statement(statement)?;
        stmt.execute(params)
            .map_err(|err| StoreError::from_execute(statement, err))
    }

    /// Opens a transaction; it rolls back when dropped without `commit`.
    pub fn begin(&self) -> Result<StoreTransaction<'_>, StoreError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|err| StoreError::TransactionBegin(err.to_string()))?;
        debug!("Store `{}`: transaction started", self.name);
        Ok(StoreTransaction { tx })
    }

    #[cfg(test)]
    pub(crate) fn poison_statement(&mut self, statement: Statement) {
        self.unprepared.insert(statement);
    }
}

impl fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEngine")
            .field("name", &self.name)
            .field("unprepared", &self.unprepared)
            .finish()
    }
}

pub struct StoreTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl StoreTransaction<'_> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .map_err(|err| StoreError::TransactionCommit(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Statement, StoreEngine, StoreLocation};
    use crate::error::StoreError;
    use rusqlite::params;

    fn open_memory(name: &str) -> StoreEngine {
        StoreEngine::open(name, &StoreLocation::memory(name), 32).expect("store should open")
    }

    fn insert_album(engine: &StoreEngine, title: &str, artist: &str) -> Result<usize, StoreError> {
        engine.execute(
            Statement::InsertAlbum,
            params![title, artist, "", 0_i64, Option::<String>::None],
        )
    }

    #[test]
    fn test_schema_creation_is_idempotent() {
        let engine = open_memory("store-engine-schema-idempotent");
        engine
            .initialize_schema()
            .expect("second schema creation should be a no-op");
        let count = engine
            .query_optional(Statement::CountAlbums, [], |row| row.get::<_, i64>(0))
            .expect("count should run");
        assert_eq!(count, Some(0));
    }

    #[test]
    fn test_duplicate_album_reports_constraint_violation() {
        let engine = open_memory("store-engine-duplicate-album");
        insert_album(&engine, "album1", "artist1").expect("first insert should succeed");

        let err = insert_album(&engine, "album1", "artist1").expect_err("duplicate should fail");
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let engine = open_memory("store-engine-rollback");
        {
            let _tx = engine.begin().expect("transaction should begin");
            insert_album(&engine, "album1", "artist1").expect("insert should succeed");
        }
        let count = engine
            .query_optional(Statement::CountAlbums, [], |row| row.get::<_, i64>(0))
            .expect("count should run");
        assert_eq!(count, Some(0));

        let tx = engine.begin().expect("transaction should begin");
        insert_album(&engine, "album1", "artist1").expect("insert should succeed");
        tx.commit().expect("commit should succeed");
        let count = engine
            .query_optional(Statement::CountAlbums, [], |row| row.get::<_, i64>(0))
            .expect("count should run");
        assert_eq!(count, Some(1));
    }

    #[test]
    fn test_engines_on_same_memory_location_share_rows() {
        let content = open_memory("store-engine-shared");
        let view = StoreEngine::open("view", &StoreLocation::memory("store-engine-shared"), 32)
            .expect("second connection should open");
        insert_album(&content, "album1", "artist1").expect("insert should succeed");

        let ids = view
            .query_all(Statement::SelectAllAlbumIds, [], |row| row.get::<_, i64>(0))
            .expect("select should run");
        assert_eq!(ids.len(), 1);
        assert_eq!(view.name(), "view");
    }

    #[test]
    fn test_unprepared_statement_fails_fast() {
        let mut engine = open_memory("store-engine-poisoned");
        engine.poison_statement(Statement::CountAlbums);

        let err = engine
            .query_optional(Statement::CountAlbums, [], |row| row.get::<_, i64>(0))
            .expect_err("poisoned statement should fail");
        assert!(matches!(
            err,
            StoreError::StatementExecute {
                statement: Statement::CountAlbums,
                ..
            }
        ));
    }

    #[test]
    fn test_file_store_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("nested").join("library.db");
        let engine = StoreEngine::open("file", &StoreLocation::File(path.clone()), 8)
            .expect("file store should open");
        insert_album(&engine, "album1", "artist1").expect("insert should succeed");

        assert!(path.exists());
    }
}
