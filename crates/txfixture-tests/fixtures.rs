//! Shared test fixtures.
//!
//! Each [`TestDatabase`] is a fresh SQLite file in its own temporary
//! directory, holding one empty `user` table. Tests open transactional
//! contexts on it through a [`Harness`] and check what was committed through
//! the database's own engine, outside any test transaction.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::fixtures::{TestDatabase, test_db};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn test_insert(#[future(awt)] test_db: TestDatabase) -> anyhow::Result<()> {
//!     let ctx = test_db.open().await?;
//!     ctx.db_session().execute(INSERT_TESTER, &[]).await?;
//!     ctx.teardown().await?;
//!     assert!(test_db.committed_users().await?.is_empty());
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use rstest::fixture;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use txfixture::core::{Database, Model, QueryResult};
use txfixture::{Harness, Settings, TransactionalContext};
use txfixture_orm::SqlDatabase;

pub const CREATE_USER_TABLE: &str =
    "CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT NOT NULL)";

pub const INSERT_TESTER: &str = "INSERT INTO user (id, name) VALUES (1, 'tester')";

static TRACING: Once = Once::new();

/// Install a `RUST_LOG`-driven subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The mapped `user` table
pub fn user_model() -> Model {
    Model::new("user", "id")
}

/// `(id, name)` pairs of a `SELECT id, name FROM user` result
pub fn users_of(result: &QueryResult) -> Result<Vec<(i64, String)>> {
    result
        .rows
        .iter()
        .map(|row| {
            let id = row.get(0).and_then(|v| v.as_i64()).context("missing id")?;
            let name = row
                .get(1)
                .and_then(|v| v.as_str())
                .context("missing name")?;
            Ok((id, name.to_string()))
        })
        .collect()
}

/// A throwaway SQLite database with an empty `user` table
pub struct TestDatabase {
    _dir: TempDir,
    url: String,
    database: Arc<SqlDatabase>,
}

impl TestDatabase {
    pub async fn create() -> Result<Self> {
        init_tracing();
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let url = format!("sqlite://{}", dir.path().join("txfixture.db").display());
        let database = SqlDatabase::connect(&url)?;
        database
            .engine()
            .execute(CREATE_USER_TABLE, &[])
            .await
            .context("Failed to create user table")?;
        tracing::debug!(url = %url, "test database created");
        Ok(Self {
            _dir: dir,
            url,
            database: Arc::new(database),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn database(&self) -> Arc<SqlDatabase> {
        Arc::clone(&self.database)
    }

    pub fn harness(&self) -> Harness {
        self.harness_with(Settings::default())
    }

    pub fn harness_with(&self, settings: Settings) -> Harness {
        Harness::new(settings).with_database(self.database())
    }

    /// Open a transactional context with default settings
    pub async fn open(&self) -> Result<TransactionalContext> {
        self.harness()
            .transaction()
            .await?
            .context("database should be reachable")
    }

    /// Rows of `user` as committed, read outside any test transaction
    pub async fn committed_users(&self) -> Result<Vec<(i64, String)>> {
        let result = self
            .database
            .engine()
            .query("SELECT id, name FROM user ORDER BY id", &[])
            .await?;
        users_of(&result)
    }
}

#[fixture]
pub async fn test_db() -> TestDatabase {
    TestDatabase::create()
        .await
        .expect("Failed to create test database")
}
