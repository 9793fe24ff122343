//! Opening databases: migrate under the owner role, then hand out sessions.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::backend::{Backend, ConnectPurpose, NativeHandle};
use crate::config::DatabaseConfiguration;
use crate::error::{BoxError, DatabaseError, ErrorKind};
use crate::ledger::{Closeable, ResourceLedger};
use crate::migrate::{MigrationEvent, MigrationOutcome, RevisionSet, SchemaMigrator};
use crate::query::{QueryProvider, QueryRegistry};
use crate::session::Database;
use crate::telemetry::{record_span_error, SpanKind};

/// Everything an application tells vellum about its database.
pub trait DatabaseDefinition<B: Backend>: Send + Sync + 'static {
    /// Stable identifier stored in the schema-version record.
    fn application_id(&self) -> &str;

    /// The revisions that build this application's schema.
    ///
    /// # Errors
    ///
    /// Returns `error-schema-revisions` if the revision set is malformed.
    fn revisions(&self, configuration: &DatabaseConfiguration) -> Result<RevisionSet, DatabaseError>;

    /// The query providers sessions of this database dispatch to.
    fn query_providers(&self) -> Vec<QueryProvider<B>>;

    /// Receives every migration progress message. Failures are logged and
    /// otherwise ignored.
    fn on_event(&self, _message: &str) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs inside the migration transaction after the last revision and
    /// before the commit. An error here rolls the migration back.
    fn on_post_upgrade(
        &self,
        _handle: &B::Handle,
        _configuration: &DatabaseConfiguration,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Produces [`Database`]s of one backend for one application.
pub struct DatabaseFactory<B: Backend, D> {
    backend: Arc<B>,
    definition: D,
}

struct SetupHandle<H>(Option<H>);

impl<H: NativeHandle> Closeable for SetupHandle<H> {
    fn close(&mut self) -> Result<(), DatabaseError> {
        match self.0.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        }
    }
}

impl<B: Backend, D: DatabaseDefinition<B>> DatabaseFactory<B, D> {
    pub fn new(backend: B, definition: D) -> Self {
        Self {
            backend: Arc::new(backend),
            definition,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    /// Migrates the database to the newest revision and returns a handle for
    /// opening sessions on it.
    ///
    /// `events` receives each progress message as text. Its failures are
    /// logged and never abort the open.
    ///
    /// # Errors
    ///
    /// Configuration errors (such as two providers for one capability) are
    /// reported before any connection is opened. Migration errors are
    /// reported after the setup connection has been closed.
    pub fn open<S>(
        &self,
        configuration: DatabaseConfiguration,
        mut events: S,
    ) -> Result<Database<B>, DatabaseError>
    where
        S: FnMut(&str) -> Result<(), BoxError>,
    {
        let system = self.backend.kind();
        let span = configuration
            .telemetry()
            .span(SpanKind::DatabaseSetup, system, None);

        let result = span.in_scope(|| -> Result<QueryRegistry<B>, DatabaseError> {
            tracing::info!(
                kind = system,
                application_id = self.definition.application_id(),
                "opening database"
            );

            let registry = QueryRegistry::new(self.definition.query_providers())?;
            let revisions = self.definition.revisions(&configuration)?;
            let outcome = self.setup(&configuration, &revisions, &mut events)?;

            tracing::info!(
                kind = system,
                version = outcome.current,
                queries = registry.len(),
                "database ready"
            );
            Ok(registry)
        });

        match result {
            Ok(registry) => Ok(Database::new(Arc::clone(&self.backend), configuration, registry)),
            Err(e) => {
                record_span_error(&span, &e);
                Err(e)
            }
        }
    }

    fn setup<S>(
        &self,
        configuration: &DatabaseConfiguration,
        revisions: &RevisionSet,
        events: &mut S,
    ) -> Result<MigrationOutcome, DatabaseError>
    where
        S: FnMut(&str) -> Result<(), BoxError>,
    {
        let handle = self.backend.connect(
            configuration.owner_role(),
            ConnectPurpose::Setup {
                create: configuration.create(),
            },
        )?;

        let mut resources = ResourceLedger::new();
        let slot = resources.add(SetupHandle(Some(handle)));

        let mut publish = |event: &MigrationEvent| {
            let message = event.to_string();
            observe("database definition", || self.definition.on_event(&message));
            observe("event sink", || events(&message));
        };

        let migrator = SchemaMigrator::new(
            self.definition.application_id(),
            revisions,
            configuration.upgrade(),
        );
        let result = resources
            .get::<SetupHandle<B::Handle>>(slot)
            .and_then(|setup| setup.0.as_ref())
            .ok_or_else(|| DatabaseError::new(ErrorKind::Closed, "Setup connection is closed"))
            .and_then(|handle| {
                migrator.migrate(handle, &mut publish, |handle| {
                    self.definition.on_post_upgrade(handle, configuration)
                })
            });

        let closed = resources.close();
        match (result, closed) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close)) => {
                tracing::error!(error = %close, "failed to close setup connection");
                Err(e)
            }
        }
    }
}

/// Runs one observer of migration progress. Neither an error nor a panic
/// escapes it.
fn observe(observer: &str, notify: impl FnOnce() -> Result<(), BoxError>) {
    match panic::catch_unwind(AssertUnwindSafe(notify)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(observer, error = %e, "observer failed to handle event"),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            tracing::warn!(observer, reason, "observer panicked while handling event");
        }
    }
}

impl<B: Backend, D: fmt::Debug> fmt::Debug for DatabaseFactory<B, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseFactory")
            .field("kind", &self.backend.kind())
            .field("definition", &self.definition)
            .finish()
    }
}
