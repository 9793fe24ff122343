use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vellum_core::{
    close_fn, CloseBehavior, CreateMode, DatabaseConfiguration, DatabaseDefinition, DatabaseError,
    ErrorKind, QueryCapability, RevisionSet, Role, RoleSet, TransactionValue,
};
use vellum_sqlite::{SqliteBackend, SqliteDatabase, SqliteDatabaseFactory, SqliteQueryProvider};
use vellum_wordlist::{wordlist_factory, WordGet, WordPut, Wordlist, APPLICATION_ID};

fn configuration() -> DatabaseConfiguration {
    let roles = RoleSet::from_roles([
        Role::new("owner", "", ""),
        Role::new("worker", "", ""),
    ])
    .expect("roles should be valid");
    DatabaseConfiguration::new(roles, "worker", "owner").expect("configuration should be valid")
}

fn open(path: &Path) -> SqliteDatabase {
    wordlist_factory(path)
        .open(configuration(), |_| Ok(()))
        .expect("database should open")
}

fn stored_version(path: &Path) -> (String, i64) {
    let conn = rusqlite::Connection::open(path).expect("should open database file");
    conn.query_row(
        "SELECT version_application_id, version_number FROM schema_version",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .expect("version record should exist")
}

fn get_word(database: &SqliteDatabase) -> Option<String> {
    let transaction = database.open_transaction().expect("transaction should open");
    let word = transaction
        .query::<WordGet>()
        .expect("WordGet is registered")
        .execute(())
        .expect("get should succeed");
    word
}

#[test]
fn committed_word_is_read_back() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempfile::tempdir().expect("should create temp dir");
    let database = open(&dir.path().join("words.db"));

    let mut transaction = database.open_transaction().expect("transaction should open");
    transaction
        .query::<WordPut>()
        .expect("WordPut is registered")
        .execute("Word0".to_string())
        .expect("put should succeed");
    transaction.commit().expect("commit should succeed");
    transaction.close().expect("close should succeed");

    assert_eq!(get_word(&database).as_deref(), Some("Word0"));
}

#[test]
fn other_application_cannot_open_the_store() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("words.db");

    SqliteDatabaseFactory::new(SqliteBackend::new(&path), Wordlist::with_application_id("app.a"))
        .open(configuration(), |_| Ok(()))
        .expect("app.a should create the store");
    let before = stored_version(&path);

    let err = SqliteDatabaseFactory::new(
        SqliteBackend::new(&path),
        Wordlist::with_application_id("app.b"),
    )
    .open(configuration(), |_| Ok(()))
    .expect_err("app.b must be refused");

    assert_eq!(err.kind(), ErrorKind::SchemaMismatchApplicationId);
    assert_eq!(err.code(), "schema-mismatch-application-id");
    assert_eq!(stored_version(&path), before);
    assert_eq!(before.0, "app.a");
}

#[test]
fn connection_resource_closes_once_after_implicit_transaction_close() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let database = open(&dir.path().join("words.db"));
    let counter = Arc::new(AtomicUsize::new(0));

    let mut connection = database.open_connection().expect("connection should open");
    let c = Arc::clone(&counter);
    connection.register_resource(close_fn(move || {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    {
        let transaction = connection.open_transaction().expect("transaction should open");
        transaction
            .query::<WordPut>()
            .expect("WordPut is registered")
            .execute("unsaved".to_string())
            .expect("put should succeed");
    }

    connection.close().expect("close should succeed");
    drop(connection);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn reopening_applies_no_sql() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("words.db");
    open(&path);
    let before = stored_version(&path);

    let mut messages = Vec::new();
    wordlist_factory(&path)
        .open(configuration(), |message| {
            messages.push(message.to_string());
            Ok(())
        })
        .expect("reopen should succeed");

    assert!(messages.is_empty(), "unexpected migration: {messages:?}");
    assert_eq!(stored_version(&path), before);
    assert_eq!(before, (APPLICATION_ID.to_string(), 1));
}

#[test]
fn uncommitted_word_is_rolled_back() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let database = open(&dir.path().join("words.db"));

    {
        let transaction = database.open_transaction().expect("transaction should open");
        transaction
            .query::<WordPut>()
            .expect("WordPut is registered")
            .execute("lost".to_string())
            .expect("put should succeed");
    }

    assert_eq!(get_word(&database), None);
}

#[test]
fn close_behavior_decides_the_connection_fate() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let database = open(&dir.path().join("words.db"));

    let mut kept = database.open_connection().expect("connection should open");
    kept.open_transaction_with(CloseBehavior::DoNothing)
        .expect("transaction should open")
        .close()
        .expect("close should succeed");
    assert!(kept.is_open());
    let mut transaction = kept.open_transaction().expect("reused connection");
    transaction
        .query::<WordPut>()
        .expect("WordPut is registered")
        .execute("Word1".to_string())
        .expect("put should succeed");
    transaction.commit().expect("commit should succeed");
    transaction.close().expect("close should succeed");

    let mut closed = database.open_connection().expect("connection should open");
    closed
        .open_transaction_with(CloseBehavior::CloseConnection)
        .expect("transaction should open")
        .close()
        .expect("close should succeed");
    assert!(!closed.is_open());

    assert_eq!(get_word(&database).as_deref(), Some("Word1"));
}

struct WordCount;

impl QueryCapability for WordCount {
    const NAME: &'static str = "WordCount";
    type Parameters = ();
    type Output = u64;
}

#[test]
fn unknown_query_does_not_spoil_the_transaction() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let database = open(&dir.path().join("words.db"));
    let mut transaction = database.open_transaction().expect("transaction should open");

    let err = transaction
        .query::<WordCount>()
        .expect_err("WordCount has no provider");
    assert_eq!(err.kind(), ErrorKind::UnsupportedQueryClass);

    transaction
        .query::<WordPut>()
        .expect("WordPut is registered")
        .execute("after".to_string())
        .expect("put should succeed");
    transaction.commit().expect("commit should succeed");
    transaction.close().expect("close should succeed");

    assert_eq!(get_word(&database).as_deref(), Some("after"));
}

struct DuplicatedWordlist(Wordlist);

impl DatabaseDefinition<SqliteBackend> for DuplicatedWordlist {
    fn application_id(&self) -> &str {
        self.0.application_id()
    }

    fn revisions(&self, configuration: &DatabaseConfiguration) -> Result<RevisionSet, DatabaseError> {
        self.0.revisions(configuration)
    }

    fn query_providers(&self) -> Vec<SqliteQueryProvider> {
        let mut providers = self.0.query_providers();
        providers.extend(self.0.query_providers());
        providers
    }
}

#[test]
fn duplicate_providers_are_rejected_before_touching_the_file() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("words.db");

    let err = SqliteDatabaseFactory::new(SqliteBackend::new(&path), DuplicatedWordlist(Wordlist::new()))
        .open(configuration(), |_| Ok(()))
        .expect_err("duplicate providers should fail");

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!path.exists(), "no connection may have been opened");
}

#[test]
fn fail_if_missing_refuses_to_create() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("words.db");

    let err = wordlist_factory(&path)
        .open(configuration().with_create(CreateMode::FailIfMissing), |_| Ok(()))
        .expect_err("missing store should not be created");
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!path.exists());

    open(&path);
    wordlist_factory(&path)
        .open(configuration().with_create(CreateMode::FailIfMissing), |_| Ok(()))
        .expect("existing store should open");
}

#[test]
fn typed_values_ride_along_with_the_transaction() {
    #[derive(Debug, PartialEq)]
    struct RequestId(u32);

    impl TransactionValue for RequestId {}

    let dir = tempfile::tempdir().expect("should create temp dir");
    let database = open(&dir.path().join("words.db"));

    let mut transaction = database.open_transaction().expect("transaction should open");
    transaction.put(RequestId(7));
    assert_eq!(transaction.get::<RequestId>(), &RequestId(7));

    let span = transaction.create_sub_span("import");
    let _entered = span.enter();
    transaction
        .query::<WordPut>()
        .expect("WordPut is registered")
        .execute("traced".to_string())
        .expect("put should succeed");
}
