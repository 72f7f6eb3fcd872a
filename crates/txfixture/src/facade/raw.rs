//! The raw driver connection, neutralized for the duration of a test

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use txfixture_core::{DialectInfo, IsolationLevel, QueryResult, RawConnection, Result, Value};

/// The raw driver connection as handed out inside a transactional context.
///
/// While neutralized, `commit`, `close` and `set_isolation_level` do nothing
/// and `rollback` returns to the `raw_conn` savepoint. The `force_*` methods
/// always reach the driver. After `restore` every call goes straight to the
/// driver again.
pub struct SavepointedRawConnection {
    raw: Arc<dyn RawConnection>,
    dialect: DialectInfo,
    neutralized: AtomicBool,
}

impl SavepointedRawConnection {
    pub const SAVEPOINT: &'static str = "raw_conn";

    pub(crate) fn new(raw: Arc<dyn RawConnection>, dialect: DialectInfo) -> Self {
        Self {
            raw,
            dialect,
            neutralized: AtomicBool::new(false),
        }
    }

    pub(crate) fn neutralize(&self) {
        self.neutralized.store(true, Ordering::SeqCst);
    }

    pub(crate) fn restore(&self) {
        if self.neutralized.swap(false, Ordering::SeqCst) {
            tracing::debug!("raw connection restored");
        }
    }

    pub fn is_neutralized(&self) -> bool {
        self.neutralized.load(Ordering::SeqCst)
    }

    pub async fn force_commit(&self) -> Result<()> {
        self.raw.commit().await
    }

    pub async fn force_rollback(&self) -> Result<()> {
        self.raw.rollback().await
    }

    pub async fn force_close(&self) -> Result<()> {
        self.raw.close().await
    }
}

#[async_trait]
impl RawConnection for SavepointedRawConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.raw.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.raw.query(sql, params).await
    }

    async fn commit(&self) -> Result<()> {
        if self.is_neutralized() {
            tracing::trace!("raw commit ignored");
            return Ok(());
        }
        self.raw.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        if self.is_neutralized() {
            tracing::debug!(savepoint = Self::SAVEPOINT, "raw rollback to savepoint");
            let sql = self.dialect.rollback_to_savepoint_sql(Self::SAVEPOINT);
            self.raw.execute(&sql, &[]).await?;
            return Ok(());
        }
        self.raw.rollback().await
    }

    async fn close(&self) -> Result<()> {
        if self.is_neutralized() {
            tracing::trace!("raw close ignored");
            return Ok(());
        }
        self.raw.close().await
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        if self.is_neutralized() {
            tracing::trace!(?level, "raw isolation level change ignored");
            return Ok(());
        }
        self.raw.set_isolation_level(level).await
    }
}
