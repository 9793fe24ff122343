//! Engine-independent core of the vellum data-access layer.
//!
//! Wraps a raw database handle in a typed session model and owns the
//! schema-versioning protocol that runs before any session is handed out.
//!
//! # Lifecycle
//!
//! | Stage | Type | Produced by |
//! |-------|------|-------------|
//! | Setup | [`DatabaseFactory`] | application code |
//! | Migrated database | [`Database`] | [`DatabaseFactory::open`] |
//! | Connection | [`Connection`] | [`Database::open_connection`] |
//! | Unit of work | [`Transaction`] | [`Connection::open_transaction`] |
//! | Query | [`BoundQuery`] | [`Transaction::query`] |
//!
//! Connections and transactions close exactly once, either explicitly or
//! when dropped. Resources registered with them close in reverse order, and
//! every close failure is reported in one aggregated error.
//!
//! # Design decisions
//!
//! - **Engines behind two traits**: [`Backend`] acquires handles and
//!   [`NativeHandle`] exposes transaction control and the schema-version
//!   record. The session layer never sees engine types.
//! - **Capabilities as marker types**: a query is requested by type
//!   (`transaction.query::<WordGet>()`), and the registry is keyed by that
//!   type. [`QueryCapability::NAME`] only labels it in diagnostics.
//! - **Telemetry passed in**: spans come from the [`Telemetry`] carried by
//!   [`DatabaseConfiguration`]; there is no global instance.
//!
//! # Usage
//!
//! ```rust,ignore
//! let database = factory.open(configuration, |message| {
//!     println!("{message}");
//!     Ok(())
//! })?;
//!
//! let mut transaction = database.open_transaction()?;
//! transaction.query::<WordPut>()?.execute("Word0".into())?;
//! transaction.commit()?;
//! ```

pub mod backend;
mod config;
mod error;
mod factory;
mod ledger;
mod migrate;
mod query;
mod roles;
mod session;
mod telemetry;
mod values;


pub use backend::{kinds, Backend, ConnectPurpose, NativeHandle, SchemaVersionRecord};
pub use config::{CreateMode, DatabaseConfiguration, UpgradeMode};
pub use error::{BoxError, DatabaseError, ErrorKind};
pub use factory::{DatabaseDefinition, DatabaseFactory};
pub use ledger::{close_fn, CloseFn, Closeable, LedgerSlot, ResourceLedger};
pub use migrate::{MigrationEvent, MigrationOutcome, Revision, RevisionSet, SchemaMigrator};
pub use query::{BoundQuery, Query, QueryCapability, QueryProvider, QueryRegistry};
pub use roles::{Role, RoleSet};
pub use session::{CloseBehavior, Connection, Database, Transaction, TransactionState};
pub use telemetry::{record_span_error, NoOpTelemetry, SpanKind, Telemetry, TracingTelemetry};
pub use values::TransactionValue;
