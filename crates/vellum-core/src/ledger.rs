//! Scoped collections of closeable resources.
//!
//! A [`ResourceLedger`] belongs to exactly one owner (a database, connection
//! or transaction). When the owner closes, every registered resource is
//! closed exactly once, most recently registered first, and all failures are
//! reported together.

use std::any::Any;
use std::fmt;

use crate::error::{DatabaseError, ErrorAccumulator};

/// A resource that must be released when its owner closes.
pub trait Closeable: Send + 'static {
    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] if the resource could not be released.
    fn close(&mut self) -> Result<(), DatabaseError>;
}

/// Adapts a one-shot closure into a [`Closeable`].
pub struct CloseFn<F> {
    on_close: Option<F>,
}

/// Wraps `on_close` so it can be registered with a ledger.
pub fn close_fn<F>(on_close: F) -> CloseFn<F>
where
    F: FnOnce() -> Result<(), DatabaseError> + Send + 'static,
{
    CloseFn {
        on_close: Some(on_close),
    }
}

impl<F> Closeable for CloseFn<F>
where
    F: FnOnce() -> Result<(), DatabaseError> + Send + 'static,
{
    fn close(&mut self) -> Result<(), DatabaseError> {
        match self.on_close.take() {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl<F> fmt::Debug for CloseFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseFn")
            .field("pending", &self.on_close.is_some())
            .finish()
    }
}

/// Object-safe view of a registered resource.
trait LedgerEntry: Send {
    fn close(&mut self) -> Result<(), DatabaseError>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Closeable> LedgerEntry for T {
    fn close(&mut self) -> Result<(), DatabaseError> {
        Closeable::close(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Handle to a resource registered in a [`ResourceLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSlot(usize);

/// An ordered, single-owner collection of acquired resources.
#[derive(Default)]
pub struct ResourceLedger {
    entries: Vec<Box<dyn LedgerEntry>>,
    closed: bool,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers ownership of `resource`.
    ///
    /// A resource added after the ledger has closed is closed immediately;
    /// a failure there is logged, since the caller has nobody left to report
    /// it to.
    pub fn add<R: Closeable>(&mut self, resource: R) -> LedgerSlot {
        if self.closed {
            let mut resource = resource;
            if let Err(e) = Closeable::close(&mut resource) {
                tracing::warn!(error = %e, "resource added to a closed ledger failed to close");
            }
            return LedgerSlot(usize::MAX);
        }
        self.entries.push(Box::new(resource));
        LedgerSlot(self.entries.len() - 1)
    }

    /// Borrows a registered resource as its concrete type.
    pub fn get<R: Any>(&self, slot: LedgerSlot) -> Option<&R> {
        self.entries
            .get(slot.0)
            .and_then(|entry| entry.as_any().downcast_ref::<R>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes every registered resource exactly once.
    ///
    /// Resources are closed in reverse registration order. A failing close
    /// never prevents the remaining resources from closing.
    ///
    /// # Errors
    ///
    /// Returns an `error-resource-close` error carrying every individual
    /// failure when at least one resource failed to close.
    pub fn close(&mut self) -> Result<(), DatabaseError> {
        self.closed = true;
        let mut failures = ErrorAccumulator::new();
        while let Some(mut entry) = self.entries.pop() {
            failures.record(entry.close());
        }
        failures.finish_as_resource_close()
    }
}

impl fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLedger")
            .field("resources", &self.entries.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::error!(error = %e, failures = e.suppressed().len(), "failed to close resources on drop");
        }
    }
}
