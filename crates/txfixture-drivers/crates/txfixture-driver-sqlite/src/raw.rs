//! Driver-level view of a SQLite connection

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection as RusqliteConnection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use txfixture_core::{IsolationLevel, QueryResult, RawConnection, Result, TxFixtureError, Value};

use crate::connection::{run_execute, run_query};

/// The rusqlite handle behind a `SqliteConnection`, used directly.
///
/// Shares the handle and the closed flag with the connection it came from.
pub struct SqliteRawConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    closed: Arc<AtomicBool>,
}

impl SqliteRawConnection {
    pub(crate) fn new(conn: Arc<Mutex<RusqliteConnection>>, closed: Arc<AtomicBool>) -> Self {
        Self { conn, closed }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TxFixtureError::Connection(
                "SQLite connection is closed".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RawConnection for SqliteRawConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        Ok(run_execute(&conn, sql, params)?.affected_rows)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("COMMIT")
            .map_err(|e| TxFixtureError::Query(format!("Failed to commit: {}", e)))
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK")
            .map_err(|e| TxFixtureError::Query(format!("Failed to rollback: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("closing raw SQLite connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        let uncommitted = matches!(level, IsolationLevel::ReadUncommitted);
        let conn = self.conn.lock();
        conn.pragma_update(None, "read_uncommitted", uncommitted)
            .map_err(|e| TxFixtureError::Query(format!("Failed to set isolation level: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteConnection;
    use txfixture_core::{Connection, MEMORY_DATABASE};

    #[tokio::test]
    async fn test_raw_rollback_ends_driver_transaction() {
        let conn = SqliteConnection::open(MEMORY_DATABASE).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        let raw = conn.raw_connection().await.unwrap();

        let tx = conn.begin_transaction().await.unwrap();
        raw.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        raw.rollback().await.unwrap();
        assert!(!conn.in_transaction());
        // Already ended by the raw rollback
        tx.rollback().await.unwrap();

        let result = conn.query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(result.rows[0].get(0), Some(&Value::Int64(0)));
    }

    #[tokio::test]
    async fn test_raw_close_closes_owner() {
        let conn = SqliteConnection::open(MEMORY_DATABASE).unwrap();
        let raw = conn.raw_connection().await.unwrap();
        raw.set_isolation_level(IsolationLevel::ReadUncommitted)
            .await
            .unwrap();
        raw.close().await.unwrap();
        assert!(conn.is_closed());
    }
}
