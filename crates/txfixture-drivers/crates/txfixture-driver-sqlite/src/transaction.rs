//! SQLite transactions and savepoints
//!
//! Both issue raw SQL so they can share the connection `Arc<Mutex<…>>`
//! without rusqlite's borrow-based transaction lifetimes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection as RusqliteConnection;
use std::sync::Arc;
use txfixture_core::{QueryResult, Result, StatementResult, Transaction, TxFixtureError, Value};

use crate::connection::{run_execute, run_query};

/// SQLite transaction wrapper
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    committed: bool,
    rolled_back: bool,
}

impl SqliteTransaction {
    pub(crate) fn new(conn: Arc<Mutex<RusqliteConnection>>) -> Self {
        Self {
            conn,
            committed: false,
            rolled_back: false,
        }
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!("SQLite transaction dropped without commit or rollback, issuing automatic rollback");
            let conn = self.conn.lock();
            // The driver may already have ended it (e.g. a raw ROLLBACK)
            if !conn.is_autocommit()
                && let Err(e) = conn.execute_batch("ROLLBACK")
            {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        if self.rolled_back {
            return Err(TxFixtureError::Query("Transaction already rolled back".into()));
        }

        let conn = self.conn.lock();
        conn.execute_batch("COMMIT")
            .map_err(|e| TxFixtureError::Query(format!("Failed to commit transaction: {}", e)))?;
        drop(conn);

        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        if self.committed {
            return Err(TxFixtureError::Query("Transaction already committed".into()));
        }

        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK").map_err(|e| {
                TxFixtureError::Query(format!("Failed to rollback transaction: {}", e))
            })?;
        }
        drop(conn);

        self.rolled_back = true;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }
}

/// A savepoint opened with `SAVEPOINT <name>`.
///
/// Rolling back issues `ROLLBACK TO` followed by `RELEASE`, so the savepoint
/// is gone either way. Dropping it unfinished rolls it back.
pub struct SqliteSavepoint {
    conn: Arc<Mutex<RusqliteConnection>>,
    name: String,
    finished: bool,
}

impl SqliteSavepoint {
    pub(crate) fn new(conn: Arc<Mutex<RusqliteConnection>>, name: String) -> Self {
        Self {
            conn,
            name,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn rollback_sql(&self) -> String {
        let dialect = crate::sqlite_dialect();
        format!(
            "{}; {}",
            dialect.rollback_to_savepoint_sql(&self.name),
            dialect.release_savepoint_sql(&self.name)
        )
    }
}

impl Drop for SqliteSavepoint {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(savepoint = %self.name, "SQLite savepoint dropped unfinished, rolling back");
            let conn = self.conn.lock();
            if !conn.is_autocommit()
                && let Err(e) = conn.execute_batch(&self.rollback_sql())
            {
                tracing::error!(error = %e, "automatic savepoint rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteSavepoint {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!(savepoint = %self.name, "releasing SQLite savepoint");
        self.finished = true;
        let sql = crate::sqlite_dialect().release_savepoint_sql(&self.name);
        let conn = self.conn.lock();
        conn.execute_batch(&sql)
            .map_err(|e| TxFixtureError::Query(format!("Failed to release savepoint: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!(savepoint = %self.name, "rolling back SQLite savepoint");
        self.finished = true;
        let sql = self.rollback_sql();
        let conn = self.conn.lock();
        conn.execute_batch(&sql).map_err(|e| {
            TxFixtureError::Query(format!("Failed to roll back to savepoint: {}", e))
        })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    fn is_nested(&self) -> bool {
        true
    }
}
