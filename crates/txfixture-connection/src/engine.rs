//! The pooled engine: connection URL in, pooled connections out

use std::sync::Arc;

use async_trait::async_trait;
use txfixture_core::{
    Connection, ConnectionConfig, DatabaseDriver, DialectInfo, Engine, IsolationLevel,
    QueryResult, RawConnection, Result, StatementResult, Transaction, Value,
};
use txfixture_drivers::DriverRegistry;

use crate::pool::{ConnectionFactory, ConnectionPool, PoolConfig, PooledConnection};

/// Opens driver connections for a pool
pub struct DriverConnectionFactory {
    driver: Arc<dyn DatabaseDriver>,
    config: ConnectionConfig,
}

impl DriverConnectionFactory {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: ConnectionConfig) -> Self {
        Self { driver, config }
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        self.driver.connect(&self.config).await
    }
}

/// Build a pooled engine from a connection URL using the built-in drivers
pub fn create_engine(url: &str) -> Result<Arc<PooledEngine>> {
    create_engine_with(&DriverRegistry::with_defaults(), url, PoolConfig::default())
}

/// Build a pooled engine from a connection URL
#[tracing::instrument(skip(registry, pool_config))]
pub fn create_engine_with(
    registry: &DriverRegistry,
    url: &str,
    pool_config: PoolConfig,
) -> Result<Arc<PooledEngine>> {
    pool_config.validate()?;
    let (driver, config) = registry.resolve(url)?;
    tracing::debug!(url = %config, driver = driver.id(), "creating engine");
    Ok(Arc::new(PooledEngine::new(driver, config, pool_config)))
}

/// An `Engine` backed by a connection pool
pub struct PooledEngine {
    dialect: DialectInfo,
    config: ConnectionConfig,
    pool: Arc<ConnectionPool>,
}

impl PooledEngine {
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        config: ConnectionConfig,
        pool_config: PoolConfig,
    ) -> Self {
        let dialect = driver.dialect_info();
        let factory = DriverConnectionFactory::new(driver, config.clone());
        Self {
            dialect,
            config,
            pool: ConnectionPool::new(pool_config, factory),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    async fn checkout(&self) -> Result<Arc<PooledConnection>> {
        Ok(Arc::new(self.pool.get().await?))
    }
}

#[async_trait]
impl Engine for PooledEngine {
    fn dialect(&self) -> DialectInfo {
        self.dialect.clone()
    }

    fn url(&self) -> String {
        self.config.to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        Ok(self.checkout().await?)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let conn = self.checkout().await?;
        let tx = conn.begin_transaction().await?;
        Ok(Box::new(EngineTransaction { tx, conn }))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.checkout().await?;
        let result = conn.execute(sql, params).await;
        conn.release();
        result
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.checkout().await?;
        let result = conn.query(sql, params).await;
        conn.release();
        result
    }

    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>> {
        let conn = self.checkout().await?;
        let raw = conn.raw_connection().await?;
        Ok(Arc::new(PooledRawConnection { raw, conn }))
    }

    async fn dispose(&self) -> Result<()> {
        self.pool.dispose().await;
        Ok(())
    }
}

/// A transaction that owns its checkout and gives it back when it ends.
///
/// Dropped unfinished, the driver transaction rolls itself back before the
/// checkout is released.
struct EngineTransaction {
    tx: Box<dyn Transaction>,
    conn: Arc<PooledConnection>,
}

#[async_trait]
impl Transaction for EngineTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let EngineTransaction { tx, conn } = *self;
        let result = tx.commit().await;
        conn.release();
        result
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let EngineTransaction { tx, conn } = *self;
        let result = tx.rollback().await;
        conn.release();
        result
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.tx.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.tx.execute(sql, params).await
    }
}

/// A raw driver connection that owns its checkout.
///
/// `close()` gives the checkout back to the pool instead of closing the
/// driver connection.
struct PooledRawConnection {
    raw: Arc<dyn RawConnection>,
    conn: Arc<PooledConnection>,
}

#[async_trait]
impl RawConnection for PooledRawConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.raw.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.raw.query(sql, params).await
    }

    async fn commit(&self) -> Result<()> {
        self.raw.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.raw.rollback().await
    }

    async fn close(&self) -> Result<()> {
        self.raw.rollback().await?;
        self.conn.release();
        Ok(())
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.raw.set_isolation_level(level).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txfixture_core::TxFixtureError;

    fn file_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}", dir.path().join("engine.db").display())
    }

    #[tokio::test]
    async fn test_create_engine_round_trips_through_pool() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(&file_url(&dir)).unwrap();

        engine
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        engine
            .execute("INSERT INTO users VALUES (?, ?)", &[1.into(), "tester".into()])
            .await
            .unwrap();

        let result = engine.query("SELECT name FROM users", &[]).await.unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(engine.pool().stats().active(), 0);
        assert_eq!(engine.pool().stats().opened(), 1);
        assert!(engine.has_table("users").await.unwrap());
    }

    #[tokio::test]
    async fn test_engine_transaction_releases_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_engine(&file_url(&dir)).unwrap();
        engine
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();

        let tx = engine.begin().await.unwrap();
        tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        assert_eq!(engine.pool().stats().active(), 1);
        tx.rollback().await.unwrap();
        assert_eq!(engine.pool().stats().active(), 0);

        let count = engine.query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(count.first().and_then(|r| r.get(0)), Some(&Value::Int64(0)));
    }

    #[tokio::test]
    async fn test_dispose_refuses_new_connections() {
        let engine = create_engine("sqlite::memory:").unwrap();
        engine.query("SELECT 1", &[]).await.unwrap();
        engine.dispose().await.unwrap();
        assert!(matches!(
            engine.connect().await,
            Err(TxFixtureError::Connection(_))
        ));
    }

    #[test]
    fn test_create_engine_rejects_bad_urls() {
        let err = create_engine("blahblahblah").err().unwrap();
        assert!(matches!(err, TxFixtureError::Configuration(_)));
        assert!(err.to_string().contains("blahblahblah"));

        let err = create_engine("nosuchdb://localhost/x").err().unwrap();
        assert!(err.to_string().contains("nosuchdb"));
    }

    #[test]
    fn test_create_engine_validates_pool_config() {
        let registry = DriverRegistry::with_defaults();
        let bad: PoolConfig = toml::from_str("max-size = 0").unwrap();
        assert!(matches!(
            create_engine_with(&registry, "sqlite::memory:", bad),
            Err(TxFixtureError::Configuration(_))
        ));
    }
}
