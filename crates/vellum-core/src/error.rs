//! Structured error values shared by every layer of the crate.
//!
//! All recoverable failures surface as a single [`DatabaseError`] carrying a
//! machine-readable code, free-form attributes and an optional remediation
//! hint. Engine errors are wrapped as [`ErrorKind::Io`] with the original
//! error kept as the `source`.

use std::collections::BTreeMap;
use std::fmt;

/// The boxed error type kept as the cause of a [`DatabaseError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Machine-readable classification of a [`DatabaseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Any failure from the native driver or transport.
    Io,
    /// One or more resources in a ledger failed to close.
    ResourceClose,
    /// A transaction was asked for a query capability nobody registered.
    UnsupportedQueryClass,
    /// The stored application identifier differs from the expected one.
    SchemaMismatchApplicationId,
    /// The schema is behind the revision set but upgrades are disabled.
    UpgradeDisallowed,
    /// The stored schema version is newer than any known revision.
    SchemaVersionTooNew,
    /// The revision set is malformed or a statement argument is unresolved.
    SchemaRevisions,
    /// Invalid wiring detected at construction time.
    Configuration,
    /// The connection or transaction has already been closed.
    Closed,
}

impl ErrorKind {
    /// Returns the stable error code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::Io => "error-io",
            Self::ResourceClose => "error-resource-close",
            Self::UnsupportedQueryClass => "error-unsupported-query-class",
            Self::SchemaMismatchApplicationId => "schema-mismatch-application-id",
            Self::UpgradeDisallowed => "upgrade-disallowed",
            Self::SchemaVersionTooNew => "error-schema-version-too-new",
            Self::SchemaRevisions => "error-schema-revisions",
            Self::Configuration => "error-configuration",
            Self::Closed => "error-closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A structured database error.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({kind})")]
pub struct DatabaseError {
    kind: ErrorKind,
    message: String,
    attributes: BTreeMap<String, String>,
    remediation: Option<String>,
    #[source]
    source: Option<BoxError>,
    suppressed: Vec<DatabaseError>,
}

impl DatabaseError {
    /// Creates an error of the given kind with no cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attributes: BTreeMap::new(),
            remediation: None,
            source: None,
            suppressed: Vec::new(),
        }
    }

    /// Wraps a driver error as `error-io`, keeping it as the source.
    pub fn io<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source = error.into();
        Self {
            message: source.to_string(),
            ..Self::new(ErrorKind::Io, String::new())
        }
        .with_source(source)
    }

    /// Attaches a free-form attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(name.into(), value.to_string());
        self
    }

    /// Attaches a remediation hint.
    pub fn with_remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Builds an `error-resource-close` error aggregating every failure.
    pub fn resource_close(failures: Vec<DatabaseError>) -> Self {
        Self {
            suppressed: failures,
            ..Self::new(
                ErrorKind::ResourceClose,
                "One or more resources could not be closed.",
            )
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The machine-readable error code, e.g. `error-io`.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn remediation(&self) -> Option<&str> {
        self.remediation.as_deref()
    }

    /// Failures collected while closing a set of resources.
    pub fn suppressed(&self) -> &[DatabaseError] {
        &self.suppressed
    }
}

/// Collects failures during non-fail-fast teardown.
///
/// Every close is attempted; the collected failures are returned as one
/// error only when at least one failure occurred.
#[derive(Debug, Default)]
pub(crate) struct ErrorAccumulator {
    failures: Vec<DatabaseError>,
}

impl ErrorAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, result: Result<(), DatabaseError>) {
        if let Err(e) = result {
            self.failures.push(e);
        }
    }

    /// Returns the single failure as-is, or an aggregate when several occurred.
    pub(crate) fn finish(mut self) -> Result<(), DatabaseError> {
        match self.failures.len() {
            0 => Ok(()),
            1 => Err(self.failures.remove(0)),
            _ => Err(DatabaseError::resource_close(self.failures)),
        }
    }

    /// Always aggregates into `error-resource-close`, even for one failure.
    pub(crate) fn finish_as_resource_close(self) -> Result<(), DatabaseError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(DatabaseError::resource_close(self.failures))
        }
    }
}
