//! The SQLite engine behind the vellum session layer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use vellum_core::{
    kinds, Backend, ConnectPurpose, CreateMode, DatabaseError, ErrorKind, NativeHandle, Role,
    SchemaVersionRecord,
};

use crate::config::SqliteConfig;
use crate::pool::{create_pool, open_connection, SqlitePool, SqliteSettings};

/// Opens SQLite connections to one database file.
///
/// Schema setup always uses a dedicated connection. Working connections are
/// opened directly, or drawn from an `r2d2` pool when a pool size is set.
pub struct SqliteBackend {
    path: PathBuf,
    settings: SqliteSettings,
    pool_max_size: Option<u32>,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: SqliteSettings::default(),
            pool_max_size: None,
            pool: Mutex::new(None),
        }
    }

    /// Builds a backend from the `[sqlite]` section of a configuration file.
    pub fn from_config(config: &SqliteConfig) -> Self {
        let backend = Self::new(&config.path).with_settings(config.settings());
        match config.pool_max_size {
            Some(size) => backend.with_pool(size),
            None => backend,
        }
    }

    pub fn with_settings(mut self, settings: SqliteSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Draws working connections from a pool of at most `max_size`
    /// connections. Closing such a connection returns it to the pool.
    pub fn with_pool(mut self, max_size: u32) -> Self {
        self.pool_max_size = Some(max_size);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> SqliteSettings {
        self.settings
    }

    fn pool(&self, max_size: u32) -> Result<SqlitePool, DatabaseError> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pool.as_ref() {
            return Ok(pool.clone());
        }
        let created = create_pool(&self.path, self.settings, max_size).map_err(DatabaseError::io)?;
        tracing::debug!(path = %self.path.display(), max_size, "created working connection pool");
        *pool = Some(created.clone());
        Ok(created)
    }
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("pool_max_size", &self.pool_max_size)
            .finish()
    }
}

impl Backend for SqliteBackend {
    type Handle = SqliteHandle;

    fn kind(&self) -> &'static str {
        kinds::SQLITE
    }

    /// SQLite has no credentials; the role only labels the connection.
    fn connect(&self, role: &Role, purpose: ConnectPurpose) -> Result<SqliteHandle, DatabaseError> {
        let path = self.path.display().to_string();
        let handle = match (purpose, self.pool_max_size) {
            (ConnectPurpose::Setup { create }, _) => {
                let create = create == CreateMode::CreateIfMissing;
                open_connection(&self.path, self.settings, create)
                    .map(SqliteHandle::Direct)
                    .map_err(|e| DatabaseError::io(e).with_attribute("path", &path))?
            }
            (ConnectPurpose::Work, Some(max_size)) => self
                .pool(max_size)?
                .get()
                .map(SqliteHandle::Pooled)
                .map_err(|e| DatabaseError::io(e).with_attribute("path", &path))?,
            (ConnectPurpose::Work, None) => open_connection(&self.path, self.settings, false)
                .map(SqliteHandle::Direct)
                .map_err(|e| DatabaseError::io(e).with_attribute("path", &path))?,
        };
        tracing::debug!(role = %role.name, path = %path, "opened sqlite connection");
        Ok(handle)
    }
}

/// A native SQLite connection, owned or borrowed from a pool.
pub enum SqliteHandle {
    Direct(rusqlite::Connection),
    Pooled(PooledConnection<SqliteConnectionManager>),
}

impl SqliteHandle {
    /// The underlying `rusqlite` connection, for running queries.
    pub fn connection(&self) -> &rusqlite::Connection {
        match self {
            Self::Direct(conn) => conn,
            Self::Pooled(conn) => &**conn,
        }
    }
}

impl fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("SqliteHandle::Direct"),
            Self::Pooled(_) => f.write_str("SqliteHandle::Pooled"),
        }
    }
}

fn version_to_sql(version: u64) -> Result<i64, DatabaseError> {
    i64::try_from(version).map_err(|_| {
        DatabaseError::new(ErrorKind::Io, "Schema version does not fit in an SQLite integer.")
            .with_attribute("version", version)
    })
}

impl NativeHandle for SqliteHandle {
    fn execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.connection()
            .execute_batch(sql)
            .map_err(|e| DatabaseError::io(e).with_attribute("sql", sql))
    }

    fn begin(&self) -> Result<(), DatabaseError> {
        self.connection()
            .execute_batch("BEGIN DEFERRED")
            .map_err(DatabaseError::io)
    }

    /// Takes the write lock up front so that concurrent migrators on the
    /// same file serialize.
    fn begin_migration(&self) -> Result<(), DatabaseError> {
        self.connection()
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DatabaseError::io)
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        self.connection()
            .execute_batch("COMMIT")
            .map_err(DatabaseError::io)
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        let conn = self.connection();
        // SQLite may already have rolled back on its own after an error.
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK").map_err(DatabaseError::io)
    }

    fn read_schema_version(&self) -> Result<Option<SchemaVersionRecord>, DatabaseError> {
        let conn = self.connection();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(DatabaseError::io)?;
        if !exists {
            return Ok(None);
        }

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT version_application_id, version_number FROM schema_version",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(DatabaseError::io)?;

        let Some((application_id, version)) = row else {
            return Err(DatabaseError::new(
                ErrorKind::Io,
                "schema_version table is empty!",
            ));
        };
        let version = u64::try_from(version).map_err(|_| {
            DatabaseError::new(ErrorKind::Io, "schema_version holds a negative version.")
                .with_attribute("version", version)
        })?;

        Ok(Some(SchemaVersionRecord {
            application_id,
            version,
        }))
    }

    fn insert_schema_version(&self, record: &SchemaVersionRecord) -> Result<(), DatabaseError> {
        let conn = self.connection();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version_application_id TEXT NOT NULL,
                version_number INTEGER NOT NULL
            );",
        )
        .map_err(DatabaseError::io)?;
        conn.execute(
            "INSERT INTO schema_version (version_application_id, version_number) VALUES (?1, ?2)",
            params![record.application_id, version_to_sql(record.version)?],
        )
        .map_err(DatabaseError::io)?;
        Ok(())
    }

    fn update_schema_version(&self, version: u64) -> Result<(), DatabaseError> {
        self.connection()
            .execute(
                "UPDATE schema_version SET version_number = ?1",
                params![version_to_sql(version)?],
            )
            .map_err(DatabaseError::io)?;
        Ok(())
    }

    fn close(self) -> Result<(), DatabaseError> {
        match self {
            Self::Direct(conn) => conn.close().map_err(|(_, e)| DatabaseError::io(e)),
            // Dropping a pooled connection returns it to its pool.
            Self::Pooled(conn) => {
                drop(conn);
                Ok(())
            }
        }
    }
}
