//! Span production for database setup, connections and transactions.
//!
//! Callers pick an implementation once and thread it through the
//! [`DatabaseConfiguration`](crate::DatabaseConfiguration); nothing in this
//! crate reaches for a process-wide instance.

use std::fmt;

use tracing::Span;

use crate::error::DatabaseError;

/// The fixed spans opened by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    DatabaseSetup,
    DatabaseConnection,
    DatabaseTransaction,
}

impl SpanKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::DatabaseSetup => "DatabaseSetup",
            Self::DatabaseConnection => "DatabaseConnection",
            Self::DatabaseTransaction => "DatabaseTransaction",
        }
    }
}

/// Produces trace spans for database activity.
pub trait Telemetry: Send + Sync + fmt::Debug {
    /// Opens one of the fixed spans, optionally below `parent`.
    fn span(&self, kind: SpanKind, system: &'static str, parent: Option<&Span>) -> Span;

    /// Opens a caller-named span below `parent`, recorded in its `sub_span` field.
    fn sub_span(&self, name: &str, system: &'static str, parent: &Span) -> Span;

    /// Returns `true` if spans produced here are discarded.
    fn is_no_op(&self) -> bool;
}

/// Telemetry that produces disabled spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTelemetry;

impl Telemetry for NoOpTelemetry {
    fn span(&self, _kind: SpanKind, _system: &'static str, _parent: Option<&Span>) -> Span {
        Span::none()
    }

    fn sub_span(&self, _name: &str, _system: &'static str, _parent: &Span) -> Span {
        Span::none()
    }

    fn is_no_op(&self) -> bool {
        true
    }
}

/// Telemetry backed by the `tracing` subscriber installed by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn span(&self, kind: SpanKind, system: &'static str, parent: Option<&Span>) -> Span {
        let parent = parent.and_then(Span::id).or_else(|| Span::current().id());
        match kind {
            SpanKind::DatabaseSetup => tracing::info_span!(
                parent: parent,
                "DatabaseSetup",
                db.system = system,
                error.code = tracing::field::Empty
            ),
            SpanKind::DatabaseConnection => tracing::info_span!(
                parent: parent,
                "DatabaseConnection",
                db.system = system,
                db.role = tracing::field::Empty,
                error.code = tracing::field::Empty
            ),
            SpanKind::DatabaseTransaction => tracing::info_span!(
                parent: parent,
                "DatabaseTransaction",
                db.system = system,
                error.code = tracing::field::Empty
            ),
        }
    }

    fn sub_span(&self, name: &str, system: &'static str, parent: &Span) -> Span {
        tracing::info_span!(
            parent: parent,
            "DatabaseSubSpan",
            sub_span = name,
            db.system = system,
            error.code = tracing::field::Empty
        )
    }

    fn is_no_op(&self) -> bool {
        false
    }
}

/// Marks `span` as failed with the code of `error`.
pub fn record_span_error(span: &Span, error: &DatabaseError) {
    span.record("error.code", error.code());
    span.in_scope(|| tracing::debug!(error = %error, "database operation failed"));
}
