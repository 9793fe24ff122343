//! A word list stored in SQLite, built on vellum.
//!
//! The smallest complete vellum application: an embedded revision set, two
//! query capabilities ([`WordPut`], [`WordGet`]) and a factory.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vellum_wordlist::{wordlist_factory, WordGet, WordPut};
//!
//! let database = wordlist_factory("words.db").open(configuration, |_| Ok(()))?;
//! let mut transaction = database.open_transaction()?;
//! transaction.query::<WordPut>()?.execute("Word0".to_string())?;
//! transaction.commit()?;
//! ```

use std::path::PathBuf;

use vellum_core::{DatabaseConfiguration, DatabaseDefinition, DatabaseError, RevisionSet};
use vellum_sqlite::{SqliteBackend, SqliteDatabaseFactory, SqliteQueryProvider};

mod queries;

pub use queries::{WordGet, WordPut};

/// The identifier written into every word list database.
pub const APPLICATION_ID: &str = "com.example.vellum.wordlist";

const REVISIONS: &str = include_str!("schema/revisions.toml");

/// Definition of the word list database.
#[derive(Debug, Clone)]
pub struct Wordlist {
    application_id: String,
}

impl Wordlist {
    pub fn new() -> Self {
        Self {
            application_id: APPLICATION_ID.to_string(),
        }
    }

    /// A word list that claims a different application identifier.
    pub fn with_application_id(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }
}

impl Default for Wordlist {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseDefinition<SqliteBackend> for Wordlist {
    fn application_id(&self) -> &str {
        &self.application_id
    }

    fn revisions(&self, _: &DatabaseConfiguration) -> Result<RevisionSet, DatabaseError> {
        RevisionSet::from_toml_str(REVISIONS)
    }

    fn query_providers(&self) -> Vec<SqliteQueryProvider> {
        queries::providers()
    }

    fn on_event(&self, message: &str) -> Result<(), vellum_core::BoxError> {
        tracing::info!(application_id = %self.application_id, "{message}");
        Ok(())
    }
}

/// A factory for word list databases stored at `path`.
pub fn wordlist_factory(path: impl Into<PathBuf>) -> SqliteDatabaseFactory<Wordlist> {
    SqliteDatabaseFactory::new(SqliteBackend::new(path), Wordlist::new())
}
