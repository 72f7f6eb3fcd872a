#![cfg(feature = "sqlite")]

/// Integration tests for the SQLite driver
use txfixture_core::{Connection, DatabaseDriver, Value};
use txfixture_drivers::DriverRegistry;
use txfixture_drivers::sqlite::SqliteDriver;

/// Open two connections to the same fresh database file
async fn setup_two_connections(
    dir: &tempfile::TempDir,
) -> (
    std::sync::Arc<dyn Connection>,
    std::sync::Arc<dyn Connection>,
) {
    let url = format!("sqlite://{}", dir.path().join("shared.db").display());
    let registry = DriverRegistry::with_defaults();
    let (driver, config) = registry.resolve(&url).expect("resolve sqlite url");

    let first = driver.connect(&config).await.expect("first connection");
    first
        .execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            &[],
        )
        .await
        .expect("create users");
    let second = driver.connect(&config).await.expect("second connection");
    (first, second)
}

#[tokio::test]
async fn test_uncommitted_writes_are_invisible_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, reader) = setup_two_connections(&dir).await;

    let tx = writer.begin_transaction().await.unwrap();
    writer
        .execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)",
            &[Value::Int64(1), Value::from("tester")],
        )
        .await
        .unwrap();

    let seen = reader.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(seen.row_count(), 0);

    tx.rollback().await.unwrap();
    let seen = writer.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(seen.row_count(), 0);
}

#[tokio::test]
async fn test_released_savepoints_still_roll_back_with_outer() {
    let dir = tempfile::tempdir().unwrap();
    let (conn, other) = setup_two_connections(&dir).await;

    let outer = conn.begin_transaction().await.unwrap();
    let sp = conn.begin_nested().await.unwrap();
    conn.execute("INSERT INTO users (id, name) VALUES (1, 'tester')", &[])
        .await
        .unwrap();
    sp.commit().await.unwrap();
    assert!(conn.in_transaction());

    outer.rollback().await.unwrap();
    let seen = other.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(seen.row_count(), 0);
}

#[tokio::test]
async fn test_dropped_table_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let (conn, _other) = setup_two_connections(&dir).await;
    let schema_check = |tables: Vec<txfixture_core::TableInfo>| {
        tables.iter().any(|t| t.name == "users")
    };

    let outer = conn.begin_transaction().await.unwrap();
    conn.execute("DROP TABLE users", &[]).await.unwrap();
    let schema = conn.as_schema_introspection().unwrap();
    assert!(!schema_check(schema.list_tables(None).await.unwrap()));

    outer.rollback().await.unwrap();
    assert!(schema_check(schema.list_tables(None).await.unwrap()));
}

#[tokio::test]
async fn test_driver_reports_sqlite_dialect() {
    let driver = SqliteDriver::new();
    let dialect = driver.dialect_info();
    assert_eq!(dialect.id, "sqlite");
    assert!(dialect.supports_savepoints);
    assert!(!dialect.errors_abort_transaction);
    assert!(driver.capabilities().supports_transactional_ddl);
}
