//! The interface set each database engine implements.
//!
//! A [`Backend`] knows how to acquire native handles for a role; a
//! [`NativeHandle`] exposes the transaction controls and the schema-version
//! record storage the session layer and the migrator need. Engine-specific
//! behavior (SQLite, PostgreSQL) lives entirely behind these two traits.

use crate::config::CreateMode;
use crate::error::DatabaseError;
use crate::roles::Role;

/// Dotted names identifying database engines.
pub mod kinds {
    /// The SQLite database.
    pub const SQLITE: &str = "org.sqlite";
    /// The PostgreSQL database.
    pub const POSTGRESQL: &str = "org.postgresql";
}

/// The single logical row recording which application owns a database and
/// which schema revision it is at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersionRecord {
    pub application_id: String,
    pub version: u64,
}

/// Why a handle is being acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPurpose {
    /// A setup-scoped handle used to create or upgrade the schema.
    Setup { create: CreateMode },
    /// A working handle for application transactions.
    Work,
}

/// A native database connection.
///
/// Handles never auto-commit from the point of view of the session layer:
/// every statement runs inside a transaction opened with [`begin`].
///
/// [`begin`]: NativeHandle::begin
pub trait NativeHandle: Send + 'static {
    /// Executes one schema statement (which may itself contain several SQL
    /// statements).
    fn execute(&self, sql: &str) -> Result<(), DatabaseError>;

    /// Starts a transaction for application work.
    fn begin(&self) -> Result<(), DatabaseError>;

    /// Starts the transaction a schema migration runs in.
    ///
    /// Engines that can take an exclusive lock up front should do so here so
    /// that concurrent migrators serialize. The default is a plain
    /// [`begin`](NativeHandle::begin).
    fn begin_migration(&self) -> Result<(), DatabaseError> {
        self.begin()
    }

    fn commit(&self) -> Result<(), DatabaseError>;

    fn rollback(&self) -> Result<(), DatabaseError>;

    /// Reads the schema-version record.
    ///
    /// Returns `Ok(None)` only when the record's storage does not exist.
    /// Any other failure to produce a valid record is an error.
    fn read_schema_version(&self) -> Result<Option<SchemaVersionRecord>, DatabaseError>;

    /// Creates the schema-version record, along with its storage if needed.
    fn insert_schema_version(&self, record: &SchemaVersionRecord) -> Result<(), DatabaseError>;

    /// Advances the existing schema-version record.
    fn update_schema_version(&self, version: u64) -> Result<(), DatabaseError>;

    /// Releases the handle.
    fn close(self) -> Result<(), DatabaseError>
    where
        Self: Sized;
}

/// A database engine able to hand out native handles.
pub trait Backend: Send + Sync + 'static {
    type Handle: NativeHandle;

    /// The engine's dotted kind name, e.g. [`kinds::SQLITE`].
    fn kind(&self) -> &'static str;

    /// Acquires a native handle authenticated as `role`.
    ///
    /// # Errors
    ///
    /// Returns `error-io` if the engine refuses or cannot be reached.
    fn connect(&self, role: &Role, purpose: ConnectPurpose) -> Result<Self::Handle, DatabaseError>;
}
