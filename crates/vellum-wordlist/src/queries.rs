//! Word list queries.

use rusqlite::OptionalExtension;
use vellum_core::{DatabaseError, Query, QueryCapability};
use vellum_sqlite::{SqliteBackend, SqliteQueryProvider, SqliteTransaction};

/// Stores one word.
pub struct WordPut;

impl QueryCapability for WordPut {
    const NAME: &'static str = "WordPut";
    type Parameters = String;
    type Output = ();
}

/// Returns a random stored word, or `None` if the list is empty.
pub struct WordGet;

impl QueryCapability for WordGet {
    const NAME: &'static str = "WordGet";
    type Parameters = ();
    type Output = Option<String>;
}

struct InsertWord;

impl Query<SqliteBackend, WordPut> for InsertWord {
    fn execute(&mut self, transaction: &SqliteTransaction<'_>, word: String) -> Result<(), DatabaseError> {
        transaction
            .handle()?
            .connection()
            .execute("INSERT INTO words (word) VALUES (?1)", [&word])
            .map_err(DatabaseError::io)?;
        tracing::debug!(word = %word, "stored word");
        Ok(())
    }
}

struct RandomWord;

impl Query<SqliteBackend, WordGet> for RandomWord {
    fn execute(&mut self, transaction: &SqliteTransaction<'_>, _: ()) -> Result<Option<String>, DatabaseError> {
        transaction
            .handle()?
            .connection()
            .query_row(
                "SELECT word FROM words ORDER BY RANDOM() LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::io)
    }
}

/// Providers for every word list capability.
pub fn providers() -> Vec<SqliteQueryProvider> {
    vec![
        SqliteQueryProvider::new::<WordPut, _, _>(|_| InsertWord),
        SqliteQueryProvider::new::<WordGet, _, _>(|_| RandomWord),
    ]
}
