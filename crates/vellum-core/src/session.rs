//! Database, connection and transaction sessions.
//!
//! A [`Database`] hands out [`Connection`]s; a connection hosts
//! [`Transaction`]s. Both connection and transaction move from OPEN to
//! CLOSED exactly once, either through an explicit `close` or when they are
//! dropped. A transaction that was not committed is rolled back when it
//! closes.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Span;

use crate::backend::{Backend, ConnectPurpose, NativeHandle};
use crate::config::DatabaseConfiguration;
use crate::error::{DatabaseError, ErrorAccumulator, ErrorKind};
use crate::ledger::{Closeable, ResourceLedger};
use crate::query::{BoundQuery, QueryCapability, QueryRegistry};
use crate::telemetry::{record_span_error, SpanKind, Telemetry};
use crate::values::{TransactionValue, ValueStore};

/// Whether closing a transaction also closes its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseBehavior {
    /// Close the owning connection along with the transaction.
    CloseConnection,
    /// Leave the connection open so it can host further transactions.
    #[default]
    DoNothing,
}

/// Observable state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Work since the last commit or rollback may be outstanding.
    Pending,
    /// The last operation was a successful commit.
    Committed,
    /// The last operation was a successful rollback.
    RolledBack,
    Closed,
}

/// A migrated database, ready to hand out connections.
///
/// The database is safe to share between threads; each connection it opens
/// is meant for exclusive use by one thread at a time.
pub struct Database<B: Backend> {
    backend: Arc<B>,
    configuration: DatabaseConfiguration,
    queries: Arc<QueryRegistry<B>>,
    resources: Mutex<ResourceLedger>,
}

impl<B: Backend> Database<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        configuration: DatabaseConfiguration,
        queries: QueryRegistry<B>,
    ) -> Self {
        Self {
            backend,
            configuration,
            queries: Arc::new(queries),
            resources: Mutex::new(ResourceLedger::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn configuration(&self) -> &DatabaseConfiguration {
        &self.configuration
    }

    pub fn queries(&self) -> &QueryRegistry<B> {
        &self.queries
    }

    /// Opens a connection as the configured default role.
    ///
    /// # Errors
    ///
    /// Returns `error-io` if the native handle cannot be acquired.
    pub fn open_connection(&self) -> Result<Connection<B>, DatabaseError> {
        let role = self.configuration.default_role().name.clone();
        self.open_connection_with_role(&role)
    }

    /// Opens a connection as the named role.
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` for an unknown role and `error-io` if
    /// the native handle cannot be acquired.
    pub fn open_connection_with_role(&self, role: &str) -> Result<Connection<B>, DatabaseError> {
        let role = self.configuration.roles().get(role)?;
        let telemetry = Arc::clone(self.configuration.telemetry());
        let system = self.backend.kind();

        let span = telemetry.span(SpanKind::DatabaseConnection, system, None);
        span.record("db.role", role.name.as_str());

        let handle = span.in_scope(|| {
            tracing::debug!(role = %role.name, "requesting connection");
            self.backend.connect(role, ConnectPurpose::Work)
        });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                record_span_error(&span, &e);
                return Err(e);
            }
        };
        span.in_scope(|| tracing::debug!(role = %role.name, "obtained connection"));

        Ok(Connection {
            handle: Some(handle),
            resources: ResourceLedger::new(),
            queries: Arc::clone(&self.queries),
            telemetry,
            system,
            role: role.name.clone(),
            span,
        })
    }

    /// Opens a connection and a transaction on it in one step. Closing the
    /// transaction closes the connection.
    pub fn open_transaction(&self) -> Result<Transaction<'static, B>, DatabaseError> {
        let connection = self.open_connection()?;
        Transaction::open(
            ConnectionSlot::Owned(connection),
            CloseBehavior::CloseConnection,
        )
    }

    /// Like [`open_transaction`](Self::open_transaction), as the named role.
    pub fn open_transaction_with_role(
        &self,
        role: &str,
    ) -> Result<Transaction<'static, B>, DatabaseError> {
        let connection = self.open_connection_with_role(role)?;
        Transaction::open(
            ConnectionSlot::Owned(connection),
            CloseBehavior::CloseConnection,
        )
    }

    /// Registers a resource to be closed with the database.
    pub fn register_resource<R: Closeable>(&self, resource: R) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(resource);
    }

    /// Closes every resource registered with the database.
    ///
    /// # Errors
    ///
    /// Returns `error-resource-close` if any resource failed to close.
    pub fn close(&self) -> Result<(), DatabaseError> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close()
    }
}

impl<B: Backend> fmt::Debug for Database<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("kind", &self.backend.kind())
            .field("configuration", &self.configuration)
            .field("queries", &self.queries)
            .finish()
    }
}

/// An open native connection and the resources tied to it.
pub struct Connection<B: Backend> {
    handle: Option<B::Handle>,
    resources: ResourceLedger,
    queries: Arc<QueryRegistry<B>>,
    telemetry: Arc<dyn Telemetry>,
    system: &'static str,
    role: String,
    span: Span,
}

impl<B: Backend> Connection<B> {
    /// Opens a transaction that leaves this connection open when it closes.
    ///
    /// # Errors
    ///
    /// Returns `error-closed` if the connection has been closed.
    pub fn open_transaction(&mut self) -> Result<Transaction<'_, B>, DatabaseError> {
        self.open_transaction_with(CloseBehavior::default())
    }

    /// Opens a transaction with an explicit close behavior.
    pub fn open_transaction_with(
        &mut self,
        close_behavior: CloseBehavior,
    ) -> Result<Transaction<'_, B>, DatabaseError> {
        self.handle()?;
        Transaction::open(ConnectionSlot::Borrowed(self), close_behavior)
    }

    /// Registers a resource to be closed with this connection.
    pub fn register_resource<R: Closeable>(&mut self, resource: R) {
        self.resources.add(resource);
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// The role this connection authenticated as.
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn kind(&self) -> &'static str {
        self.system
    }

    /// Closes registered resources, then releases the native handle.
    ///
    /// Closing an already-closed connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns the failures of the resources and of the handle; every close
    /// is attempted before reporting.
    pub fn close(&mut self) -> Result<(), DatabaseError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let mut failures = ErrorAccumulator::new();
        failures.record(self.resources.close());
        failures.record(handle.close());

        let result = failures.finish();
        if let Err(e) = &result {
            record_span_error(&self.span, e);
        }
        self.span.in_scope(|| tracing::debug!(role = %self.role, "connection closed"));
        result
    }

    fn handle(&self) -> Result<&B::Handle, DatabaseError> {
        self.handle
            .as_ref()
            .ok_or_else(|| DatabaseError::new(ErrorKind::Closed, "Connection is closed"))
    }
}

impl<B: Backend> Drop for Connection<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close connection on drop");
        }
    }
}

impl<B: Backend> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.system)
            .field("role", &self.role)
            .field("open", &self.is_open())
            .field("resources", &self.resources)
            .finish()
    }
}

enum ConnectionSlot<'c, B: Backend> {
    Borrowed(&'c mut Connection<B>),
    Owned(Connection<B>),
}

impl<B: Backend> Deref for ConnectionSlot<'_, B> {
    type Target = Connection<B>;

    fn deref(&self) -> &Connection<B> {
        match self {
            Self::Borrowed(connection) => &**connection,
            Self::Owned(connection) => connection,
        }
    }
}

impl<B: Backend> DerefMut for ConnectionSlot<'_, B> {
    fn deref_mut(&mut self) -> &mut Connection<B> {
        match self {
            Self::Borrowed(connection) => &mut **connection,
            Self::Owned(connection) => connection,
        }
    }
}

/// One unit of work on a connection.
///
/// The native transaction is started lazily the first time the handle is
/// requested, so a transaction that never touches the database never talks
/// to it.
pub struct Transaction<'c, B: Backend> {
    connection: ConnectionSlot<'c, B>,
    close_behavior: CloseBehavior,
    resources: ResourceLedger,
    values: ValueStore,
    span: Span,
    state: Cell<TransactionState>,
    native_open: Cell<bool>,
}

impl<'c, B: Backend> Transaction<'c, B> {
    fn open(
        connection: ConnectionSlot<'c, B>,
        close_behavior: CloseBehavior,
    ) -> Result<Self, DatabaseError> {
        connection.handle()?;
        let span = connection.telemetry.span(
            SpanKind::DatabaseTransaction,
            connection.system,
            Some(&connection.span),
        );
        Ok(Self {
            connection,
            close_behavior,
            resources: ResourceLedger::new(),
            values: ValueStore::default(),
            span,
            state: Cell::new(TransactionState::Pending),
            native_open: Cell::new(false),
        })
    }

    /// The native handle, with a native transaction begun on it.
    ///
    /// # Errors
    ///
    /// Returns `error-closed` if the transaction has been closed and
    /// `error-io` if the native transaction cannot be started.
    pub fn handle(&self) -> Result<&B::Handle, DatabaseError> {
        if self.state.get() == TransactionState::Closed {
            return Err(DatabaseError::new(ErrorKind::Closed, "Transaction is closed"));
        }
        let handle = self.connection.handle()?;
        if !self.native_open.get() {
            handle.begin().inspect_err(|e| record_span_error(&self.span, e))?;
            self.native_open.set(true);
            self.state.set(TransactionState::Pending);
        }
        Ok(handle)
    }

    /// Looks up the provider for capability `C` and binds a fresh query
    /// instance to this transaction.
    ///
    /// # Errors
    ///
    /// Returns `error-unsupported-query-class` if nobody provides `C`. The
    /// transaction remains usable.
    pub fn query<C: QueryCapability>(&self) -> Result<BoundQuery<'_, 'c, B, C>, DatabaseError> {
        if self.state.get() == TransactionState::Closed {
            return Err(DatabaseError::new(ErrorKind::Closed, "Transaction is closed"));
        }
        let query = self.connection.queries.instantiate::<C>(self)?;
        Ok(BoundQuery::new(self, query))
    }

    /// Commits outstanding work.
    ///
    /// # Errors
    ///
    /// Returns `error-io` on driver failure; the transaction stays open and
    /// can still be closed.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        let handle = self.open_handle()?;
        if self.native_open.get() {
            handle.commit().inspect_err(|e| record_span_error(&self.span, e))?;
            self.native_open.set(false);
        }
        self.state.set(TransactionState::Committed);
        Ok(())
    }

    /// Discards outstanding work.
    ///
    /// # Errors
    ///
    /// Returns `error-io` on driver failure; the transaction stays open and
    /// can still be closed.
    pub fn rollback(&mut self) -> Result<(), DatabaseError> {
        let handle = self.open_handle()?;
        if self.native_open.get() {
            handle.rollback().inspect_err(|e| record_span_error(&self.span, e))?;
            self.native_open.set(false);
        }
        self.state.set(TransactionState::RolledBack);
        Ok(())
    }

    /// Stores a value in the per-transaction side channel, replacing any
    /// earlier value of the same type. A value that is [`Closeable`] is
    /// registered with this transaction's resources and closed when the
    /// transaction closes.
    pub fn put<V: TransactionValue>(&mut self, value: V) {
        self.values.put(&mut self.resources, value);
    }

    /// Fetches a value stored with [`put`](Self::put).
    ///
    /// # Panics
    ///
    /// Panics if no value of type `V` was stored. An absent value is a
    /// wiring defect, not a data condition.
    pub fn get<V: Any>(&self) -> &V {
        self.values.get(&self.resources)
    }

    pub fn try_get<V: Any>(&self) -> Option<&V> {
        self.values.try_get(&self.resources)
    }

    /// Registers a resource to be closed with this transaction.
    pub fn register_resource<R: Closeable>(&mut self, resource: R) {
        self.resources.add(resource);
    }

    /// Opens a caller-named span below this transaction's span.
    pub fn create_sub_span(&self, name: &str) -> Span {
        self.connection
            .telemetry
            .sub_span(name, self.connection.system, &self.span)
    }

    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    pub fn close_behavior(&self) -> CloseBehavior {
        self.close_behavior
    }

    /// Closes the transaction: rolls back anything not committed, closes its
    /// resources and, for [`CloseBehavior::CloseConnection`], the connection.
    ///
    /// # Errors
    ///
    /// Every step runs even if an earlier one fails; the failures are
    /// reported together afterwards.
    pub fn close(mut self) -> Result<(), DatabaseError> {
        self.close_inner()
    }

    fn open_handle(&self) -> Result<&B::Handle, DatabaseError> {
        if self.state.get() == TransactionState::Closed {
            return Err(DatabaseError::new(ErrorKind::Closed, "Transaction is closed"));
        }
        self.connection.handle()
    }

    fn close_inner(&mut self) -> Result<(), DatabaseError> {
        if self.state.get() == TransactionState::Closed {
            return Ok(());
        }

        let mut failures = ErrorAccumulator::new();
        if self.native_open.replace(false) {
            failures.record(self.connection.handle().and_then(|handle| handle.rollback()));
        }
        self.state.set(TransactionState::Closed);
        self.values.clear();
        failures.record(self.resources.close());

        if self.close_behavior == CloseBehavior::CloseConnection {
            failures.record(self.connection.close());
        }

        let result = failures.finish();
        if let Err(e) = &result {
            record_span_error(&self.span, e);
        }
        result
    }
}

impl<B: Backend> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            tracing::error!(error = %e, "failed to close transaction on drop");
        }
    }
}

impl<B: Backend> fmt::Debug for Transaction<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state.get())
            .field("close_behavior", &self.close_behavior)
            .field("resources", &self.resources)
            .finish()
    }
}
