//! PostgreSQL engine for the vellum data-access layer.
//!
//! Provides [`PostgresBackend`], built on the synchronous `postgres` client.
//! Setup connects as the configured owner role and working connections as
//! the requested role, each with that role's own credentials.
//!
//! # Design decisions
//!
//! - **Advisory lock for migrations**: the migration transaction takes
//!   `pg_advisory_xact_lock` before the schema version is read, so
//!   concurrent openers migrate one after the other. The lock is released
//!   with the transaction.
//! - **Savepoint around the version read**: a missing `schema_version`
//!   table (SQLSTATE `42P01`) reads as "no record" without aborting the
//!   migration transaction.
//! - **No database creation**: the database named in [`PostgresConfig`]
//!   must exist. Creating it is an administrative task outside the open path.

mod backend;
mod config;

pub use backend::{PostgresBackend, PostgresHandle};
pub use config::PostgresConfig;

use vellum_core::{Connection, Database, DatabaseFactory, QueryProvider, Transaction};

pub type PostgresDatabase = Database<PostgresBackend>;
pub type PostgresConnection = Connection<PostgresBackend>;
pub type PostgresTransaction<'c> = Transaction<'c, PostgresBackend>;
pub type PostgresQueryProvider = QueryProvider<PostgresBackend>;
pub type PostgresDatabaseFactory<D> = DatabaseFactory<PostgresBackend, D>;
