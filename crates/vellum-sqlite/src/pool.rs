//! Per-connection SQLite setup and the optional working-connection pool.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

/// Runtime tunables applied to every SQLite connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteSettings {
    /// Busy timeout, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Whether `PRAGMA foreign_keys` is switched on.
    pub foreign_keys: bool,

    /// Whether the database is put into WAL journal mode.
    pub wal: bool,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            foreign_keys: true,
            wal: true,
        }
    }
}

/// A pool of working connections.
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Flags for opening an existing database, plus `SQLITE_OPEN_CREATE` when
/// `create` is set.
pub(crate) fn open_flags(create: bool) -> OpenFlags {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    if create {
        flags | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        flags
    }
}

/// Applies `settings` to a freshly opened connection.
///
/// The busy timeout is set first so that switching the journal mode waits
/// for other connections instead of failing immediately.
pub(crate) fn configure_connection(
    conn: &Connection,
    settings: SqliteSettings,
) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout = {};",
        settings.busy_timeout_ms
    ))?;

    if settings.wal {
        // In-memory databases report "memory", which is acceptable.
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if journal_mode != "wal" && journal_mode != "memory" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!(
                    "failed to set WAL journal mode, got: {}",
                    journal_mode
                )),
            ));
        }
    }

    let foreign_keys = if settings.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))
}

/// Opens one connection to the database at `path`.
pub(crate) fn open_connection(
    path: &Path,
    settings: SqliteSettings,
    create: bool,
) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, open_flags(create))?;
    configure_connection(&conn, settings)?;
    Ok(conn)
}

/// Creates a pool of working connections to an existing database.
///
/// Connections are established lazily, so the database file only has to
/// exist by the time the first connection is requested.
///
/// # Errors
///
/// Returns `r2d2::Error` if the pool cannot be built.
pub fn create_pool(
    path: &Path,
    settings: SqliteSettings,
    max_size: u32,
) -> Result<SqlitePool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(path)
        .with_flags(open_flags(false))
        .with_init(move |conn| configure_connection(conn, settings));

    Pool::builder()
        .max_size(max_size)
        .min_idle(Some(0))
        .build(manager)
}
