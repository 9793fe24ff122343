//! SQLite engine for the vellum data-access layer.
//!
//! Provides [`SqliteBackend`], the schema-version record storage the
//! migrator needs, deployment configuration loading and tracing setup.
//!
//! # Design decisions
//!
//! - **WAL mode and foreign keys on every connection**: readers never block
//!   the single writer, and referential integrity is always enforced.
//! - **`BEGIN IMMEDIATE` for migrations**: the write lock is taken before the
//!   schema version is read, so two processes opening the same file migrate
//!   one after the other instead of racing.
//! - **Pooling is delegated**: when a pool size is configured, working
//!   connections come from an `r2d2` pool; the session layer only sees a
//!   [`SqliteHandle`].

mod backend;
mod config;
mod logging;
mod pool;

pub use backend::{SqliteBackend, SqliteHandle};
pub use config::{load_config, Config, ConfigError, DatabaseSection, LoggingConfig, SqliteConfig};
pub use logging::init_tracing;
pub use pool::{create_pool, SqlitePool, SqliteSettings};

use vellum_core::{Connection, Database, DatabaseFactory, QueryProvider, Transaction};

pub type SqliteDatabase = Database<SqliteBackend>;
pub type SqliteConnection = Connection<SqliteBackend>;
pub type SqliteTransaction<'c> = Transaction<'c, SqliteBackend>;
pub type SqliteQueryProvider = QueryProvider<SqliteBackend>;
pub type SqliteDatabaseFactory<D> = DatabaseFactory<SqliteBackend, D>;
