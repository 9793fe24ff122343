//! The PostgreSQL engine behind the vellum session layer.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::time::Duration;

use postgres::error::SqlState;
use postgres::{Client, Config, NoTls};
use vellum_core::{
    kinds, Backend, ConnectPurpose, DatabaseError, ErrorKind, NativeHandle, Role,
    SchemaVersionRecord,
};

use crate::config::PostgresConfig;

/// Advisory lock held by the migration transaction, so that concurrent
/// openers of one database migrate one after the other.
const MIGRATION_LOCK_KEY: i64 = 0x7665_6c6c_756d;

const VERSION_SAVEPOINT: &str = "vellum_schema_version";

/// Opens PostgreSQL connections to one database.
///
/// Each connection authenticates as the role it is opened for: setup runs
/// as the owner role, working connections as the requested role. The
/// database itself must already exist.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    config: PostgresConfig,
}

impl PostgresBackend {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    /// Connection parameters for `role`. A role without a username logs in
    /// under its own name.
    pub fn client_config(&self, role: &Role) -> Config {
        let user = if role.username.is_empty() {
            role.name.as_str()
        } else {
            role.username.as_str()
        };

        let mut config = Config::new();
        config
            .host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.database)
            .user(user)
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs));
        if !role.password.is_empty() {
            config.password(&role.password);
        }
        if let Some(name) = &self.config.application_name {
            config.application_name(name);
        }
        config
    }
}

impl Backend for PostgresBackend {
    type Handle = PostgresHandle;

    fn kind(&self) -> &'static str {
        kinds::POSTGRESQL
    }

    fn connect(&self, role: &Role, purpose: ConnectPurpose) -> Result<PostgresHandle, DatabaseError> {
        if let ConnectPurpose::Setup { create } = purpose {
            tracing::debug!(?create, "postgres databases are never created on open");
        }
        let client = self.client_config(role).connect(NoTls).map_err(|e| {
            DatabaseError::io(e)
                .with_attribute("host", &self.config.host)
                .with_attribute("port", self.config.port)
                .with_attribute("database", &self.config.database)
                .with_attribute("role", &role.name)
        })?;
        tracing::debug!(
            role = %role.name,
            host = %self.config.host,
            database = %self.config.database,
            "opened postgres connection"
        );
        Ok(PostgresHandle::new(client))
    }
}

/// A native PostgreSQL connection.
pub struct PostgresHandle {
    client: RefCell<Client>,
}

impl PostgresHandle {
    fn new(client: Client) -> Self {
        Self {
            client: RefCell::new(client),
        }
    }

    /// The underlying `postgres` client, for running queries.
    ///
    /// # Panics
    ///
    /// Panics if the client is already borrowed; release each borrow before
    /// requesting the next one.
    pub fn client(&self) -> RefMut<'_, Client> {
        self.client.borrow_mut()
    }

    fn batch(&self, sql: &str) -> Result<(), DatabaseError> {
        self.client().batch_execute(sql).map_err(DatabaseError::io)
    }
}

impl fmt::Debug for PostgresHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresHandle").finish_non_exhaustive()
    }
}

/// Whether `code` reports a table that does not exist.
pub(crate) fn is_undefined_table(code: Option<&SqlState>) -> bool {
    code == Some(&SqlState::UNDEFINED_TABLE)
}

fn version_to_sql(version: u64) -> Result<i64, DatabaseError> {
    i64::try_from(version).map_err(|_| {
        DatabaseError::new(ErrorKind::Io, "Schema version does not fit in a bigint.")
            .with_attribute("version", version)
    })
}

fn version_from_sql(version: i64) -> Result<u64, DatabaseError> {
    u64::try_from(version).map_err(|_| {
        DatabaseError::new(ErrorKind::Io, "schema_version holds a negative version.")
            .with_attribute("version", version)
    })
}

impl NativeHandle for PostgresHandle {
    fn execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.client()
            .batch_execute(sql)
            .map_err(|e| DatabaseError::io(e).with_attribute("sql", sql))
    }

    fn begin(&self) -> Result<(), DatabaseError> {
        self.batch("BEGIN")
    }

    /// Serializes concurrent migrators on a transaction-scoped advisory lock.
    fn begin_migration(&self) -> Result<(), DatabaseError> {
        self.batch(&format!(
            "BEGIN; SELECT pg_advisory_xact_lock({MIGRATION_LOCK_KEY})"
        ))
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        self.batch("COMMIT")
    }

    /// Outside a transaction the server only warns, so this never fails for
    /// lack of one.
    fn rollback(&self) -> Result<(), DatabaseError> {
        self.batch("ROLLBACK")
    }

    /// Must run inside a transaction: a missing table is detected by rolling
    /// back to a savepoint, which keeps the surrounding transaction usable.
    fn read_schema_version(&self) -> Result<Option<SchemaVersionRecord>, DatabaseError> {
        self.batch(&format!("SAVEPOINT {VERSION_SAVEPOINT}"))?;

        let row = self.client().query_opt(
            "SELECT version_application_id, version_number FROM schema_version",
            &[],
        );
        let row = match row {
            Ok(row) => row,
            Err(e) if is_undefined_table(e.code()) => {
                self.batch(&format!("ROLLBACK TO SAVEPOINT {VERSION_SAVEPOINT}"))?;
                return Ok(None);
            }
            Err(e) => return Err(DatabaseError::io(e)),
        };
        self.batch(&format!("RELEASE SAVEPOINT {VERSION_SAVEPOINT}"))?;

        let Some(row) = row else {
            return Err(DatabaseError::new(
                ErrorKind::Io,
                "schema_version table is empty!",
            ));
        };
        let application_id: String = row.try_get(0).map_err(DatabaseError::io)?;
        let version: i64 = row.try_get(1).map_err(DatabaseError::io)?;

        Ok(Some(SchemaVersionRecord {
            application_id,
            version: version_from_sql(version)?,
        }))
    }

    fn insert_schema_version(&self, record: &SchemaVersionRecord) -> Result<(), DatabaseError> {
        self.batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version_application_id TEXT NOT NULL,
                version_number BIGINT NOT NULL
            )",
        )?;
        let version = version_to_sql(record.version)?;
        self.client()
            .execute(
                "INSERT INTO schema_version (version_application_id, version_number) VALUES ($1, $2)",
                &[&record.application_id, &version],
            )
            .map_err(DatabaseError::io)?;
        Ok(())
    }

    fn update_schema_version(&self, version: u64) -> Result<(), DatabaseError> {
        let version = version_to_sql(version)?;
        self.client()
            .execute("UPDATE schema_version SET version_number = $1", &[&version])
            .map_err(DatabaseError::io)?;
        Ok(())
    }

    fn close(self) -> Result<(), DatabaseError> {
        self.client.into_inner().close().map_err(DatabaseError::io)
    }
}
