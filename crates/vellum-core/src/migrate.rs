//! Schema-version detection and upgrade.
//!
//! Every database managed by vellum stores a single schema-version record
//! holding the owning application's identifier and the number of the last
//! applied revision. On open, the [`SchemaMigrator`] compares that record
//! against a [`RevisionSet`] and applies every pending revision, in order,
//! inside one transaction. Either every pending revision (and the
//! post-upgrade hook) commits, or nothing does.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::backend::{NativeHandle, SchemaVersionRecord};
use crate::config::UpgradeMode;
use crate::error::{DatabaseError, ErrorKind};

/// One step of a migration: a target version and the statements that take
/// the schema there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    version: u64,
    statements: Vec<String>,
}

impl Revision {
    pub fn new<S: Into<String>>(version: u64, statements: impl IntoIterator<Item = S>) -> Self {
        Self {
            version,
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

/// An ordered, non-empty sequence of revisions plus the named arguments
/// their statements may reference as `${name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSet {
    revisions: Vec<Revision>,
    arguments: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevisionFile {
    #[serde(default)]
    arguments: BTreeMap<String, String>,
    #[serde(default, rename = "revision")]
    revisions: Vec<RevisionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevisionEntry {
    version: u64,
    statements: Vec<String>,
}

impl RevisionSet {
    /// Builds a revision set.
    ///
    /// # Errors
    ///
    /// Returns `error-schema-revisions` if `revisions` is empty or its
    /// versions are not strictly ascending.
    pub fn new(revisions: Vec<Revision>) -> Result<Self, DatabaseError> {
        if revisions.is_empty() {
            return Err(DatabaseError::new(
                ErrorKind::SchemaRevisions,
                "Revision set contains no revisions.",
            ));
        }
        for pair in revisions.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(DatabaseError::new(
                    ErrorKind::SchemaRevisions,
                    "Revision versions must be strictly ascending.",
                )
                .with_attribute("previous", pair[0].version)
                .with_attribute("next", pair[1].version));
            }
        }
        Ok(Self {
            revisions,
            arguments: BTreeMap::new(),
        })
    }

    /// Parses a revision set from TOML:
    ///
    /// ```toml
    /// [arguments]
    /// table = "words"
    ///
    /// [[revision]]
    /// version = 0
    /// statements = ["CREATE TABLE ${table} (word TEXT NOT NULL)"]
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `error-schema-revisions` if the document is malformed or the
    /// revisions are invalid as for [`RevisionSet::new`].
    pub fn from_toml_str(text: &str) -> Result<Self, DatabaseError> {
        let file: RevisionFile = toml::from_str(text).map_err(|e| {
            DatabaseError::new(ErrorKind::SchemaRevisions, "Malformed revision set.")
                .with_source(e)
        })?;
        let revisions = file
            .revisions
            .into_iter()
            .map(|entry| Revision::new(entry.version, entry.statements))
            .collect();
        let mut set = Self::new(revisions)?;
        set.arguments = file.arguments;
        Ok(set)
    }

    /// Sets the value substituted for `${name}`.
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }

    /// The version the schema is at once every revision has been applied.
    pub fn latest_version(&self) -> u64 {
        self.revisions.last().map_or(0, Revision::version)
    }

    fn resolve(&self, revision: &Revision) -> Result<Vec<String>, DatabaseError> {
        revision
            .statements
            .iter()
            .map(|statement| {
                substitute(statement, &self.arguments)
                    .map_err(|e| e.with_attribute("revision", revision.version))
            })
            .collect()
    }
}

fn substitute(statement: &str, arguments: &BTreeMap<String, String>) -> Result<String, DatabaseError> {
    let mut out = String::with_capacity(statement.len());
    let mut rest = statement;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(DatabaseError::new(
                ErrorKind::SchemaRevisions,
                "Unterminated argument reference in statement.",
            ));
        };
        let name = &after[..end];
        let value = arguments.get(name).ok_or_else(|| {
            DatabaseError::new(ErrorKind::SchemaRevisions, "Unresolved statement argument.")
                .with_attribute("argument", name)
        })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// A progress message published while migrating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// A schema statement is about to run.
    ExecutingSql(String),
    /// The schema is moving to a new revision.
    Upgrading { from: Option<u64>, to: u64 },
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutingSql(sql) => write!(f, "Executing SQL: {sql}"),
            Self::Upgrading { from: Some(from), to } => {
                write!(f, "Upgrading database from version {from} -> {to}")
            }
            Self::Upgrading { from: None, to } => {
                write!(f, "Upgrading database from version (none) -> {to}")
            }
        }
    }
}

/// What a successful migration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// The stored version before migrating; `None` for a fresh database.
    pub previous: Option<u64>,
    /// The stored version after migrating.
    pub current: u64,
    /// Versions applied, in order.
    pub applied: Vec<u64>,
}

impl MigrationOutcome {
    /// Returns `true` if the schema was already current.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Brings one database's schema to the newest revision of a set.
#[derive(Debug)]
pub struct SchemaMigrator<'r> {
    application_id: &'r str,
    revisions: &'r RevisionSet,
    upgrade: UpgradeMode,
}

impl<'r> SchemaMigrator<'r> {
    pub fn new(application_id: &'r str, revisions: &'r RevisionSet, upgrade: UpgradeMode) -> Self {
        Self {
            application_id,
            revisions,
            upgrade,
        }
    }

    /// Runs the migration on `handle` in a single native transaction.
    ///
    /// `events` receives a message for each revision transition and each
    /// statement. `post_upgrade` runs after the last revision, before the
    /// commit; it runs even when nothing was pending.
    ///
    /// # Errors
    ///
    /// - `schema-mismatch-application-id` if the database belongs to another
    ///   application.
    /// - `error-schema-version-too-new` if the stored version is newer than
    ///   any known revision.
    /// - `upgrade-disallowed` if revisions are pending and upgrades are off.
    /// - `error-schema-revisions` if a statement argument cannot be resolved.
    /// - `error-io` for driver failures, and any error of `post_upgrade`.
    ///
    /// On every error the transaction is rolled back.
    pub fn migrate<H, F>(
        &self,
        handle: &H,
        events: &mut dyn FnMut(&MigrationEvent),
        post_upgrade: F,
    ) -> Result<MigrationOutcome, DatabaseError>
    where
        H: NativeHandle,
        F: FnOnce(&H) -> Result<(), DatabaseError>,
    {
        handle.begin_migration()?;

        let outcome = match self.apply(handle, events, post_upgrade) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = handle.rollback() {
                    tracing::warn!(error = %rollback, "failed to roll back migration");
                }
                return Err(e);
            }
        };

        if let Err(e) = handle.commit() {
            if let Err(rollback) = handle.rollback() {
                tracing::debug!(error = %rollback, "rollback after failed commit");
            }
            return Err(e);
        }

        if outcome.is_noop() {
            tracing::debug!(
                application_id = self.application_id,
                version = outcome.current,
                "schema is up to date"
            );
        } else {
            tracing::info!(
                application_id = self.application_id,
                applied = outcome.applied.len(),
                version = outcome.current,
                "schema migrated"
            );
        }
        Ok(outcome)
    }

    fn apply<H, F>(
        &self,
        handle: &H,
        events: &mut dyn FnMut(&MigrationEvent),
        post_upgrade: F,
    ) -> Result<MigrationOutcome, DatabaseError>
    where
        H: NativeHandle,
        F: FnOnce(&H) -> Result<(), DatabaseError>,
    {
        let stored = handle.read_schema_version()?;
        if let Some(record) = &stored {
            if record.application_id != self.application_id {
                return Err(DatabaseError::new(
                    ErrorKind::SchemaMismatchApplicationId,
                    "Database belongs to a different application.",
                )
                .with_attribute("expected", self.application_id)
                .with_attribute("found", &record.application_id)
                .with_remediation("Check that the database path points at this application's database."));
            }
        }

        let previous = stored.map(|record| record.version);
        let latest = self.revisions.latest_version();
        if let Some(version) = previous.filter(|version| *version > latest) {
            return Err(DatabaseError::new(
                ErrorKind::SchemaVersionTooNew,
                "Database schema is newer than this application supports.",
            )
            .with_attribute("stored", version)
            .with_attribute("latest", latest)
            .with_remediation("Upgrade the application before opening this database."));
        }

        let pending: Vec<&Revision> = self
            .revisions
            .revisions()
            .iter()
            .filter(|revision| previous.map_or(true, |current| revision.version > current))
            .collect();

        if !pending.is_empty() && self.upgrade == UpgradeMode::FailInsteadOfUpgrading {
            let mut error = DatabaseError::new(
                ErrorKind::UpgradeDisallowed,
                "Database requires an upgrade, but upgrades are disallowed.",
            )
            .with_attribute("target", latest)
            .with_remediation("Open the database with upgrades enabled.");
            if let Some(current) = previous {
                error = error.with_attribute("current", current);
            }
            return Err(error);
        }

        let resolved = pending
            .iter()
            .map(|revision| Ok((revision.version, self.revisions.resolve(revision)?)))
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        let mut current = previous;
        let mut applied = Vec::with_capacity(resolved.len());
        for (version, statements) in resolved {
            tracing::info!(
                application_id = self.application_id,
                from = ?current,
                to = version,
                "upgrading schema"
            );
            events(&MigrationEvent::Upgrading { from: current, to: version });

            for statement in statements {
                tracing::debug!(sql = %statement, "executing schema statement");
                events(&MigrationEvent::ExecutingSql(statement.clone()));
                handle
                    .execute(&statement)
                    .map_err(|e| e.with_attribute("revision", version))?;
            }

            match current {
                None => handle.insert_schema_version(&SchemaVersionRecord {
                    application_id: self.application_id.to_owned(),
                    version,
                })?,
                Some(_) => handle.update_schema_version(version)?,
            }
            current = Some(version);
            applied.push(version);
        }

        post_upgrade(handle)?;

        Ok(MigrationOutcome {
            previous,
            current: current.unwrap_or(latest),
            applied,
        })
    }
}
