//! Tests for connection pool functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use txfixture_core::{
    Connection, DialectInfo, QueryResult, Result, StatementResult, Transaction, TxFixtureError,
    Value,
};

use super::config::PoolConfig;
use super::pool::{ConnectionFactory, ConnectionPool};
use super::stats::PoolStats;

/// Mock connection for testing
struct MockConnection {
    closed: AtomicBool,
    in_tx: Arc<AtomicBool>,
}

impl MockConnection {
    fn new(in_tx: Arc<AtomicBool>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            in_tx,
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    fn dialect(&self) -> DialectInfo {
        DialectInfo::default()
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
        Ok(StatementResult::none())
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        Err(TxFixtureError::NotSupported(
            "Transactions not supported in mock".into(),
        ))
    }

    async fn begin_nested(&self) -> Result<Box<dyn Transaction>> {
        Err(TxFixtureError::NotSupported(
            "Transactions not supported in mock".into(),
        ))
    }

    fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock factory that counts connections created
struct MockConnectionFactory {
    counter: AtomicUsize,
    /// Shared "inside a transaction" flag handed to every connection
    in_tx: Arc<AtomicBool>,
}

impl MockConnectionFactory {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            in_tx: Arc::new(AtomicBool::new(false)),
        }
    }

    fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection::new(self.in_tx.clone())))
    }
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.min_size(), 0);
    assert_eq!(config.max_size(), 5);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(10_000));
    assert!(config.max_lifetime().is_none());
}

#[test]
#[should_panic(expected = "min_size (10) cannot exceed max_size (5)")]
fn test_pool_config_min_exceeds_max() {
    PoolConfig::new(10, 5);
}

#[test]
fn test_pool_config_from_toml() {
    let config: PoolConfig = toml::from_str(
        r#"
        max-size = 2
        acquire-timeout-ms = 500
        "#,
    )
    .expect("parse pool config");
    assert_eq!(config.max_size(), 2);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(500));
    assert!(config.validate().is_ok());

    let bad: PoolConfig = toml::from_str("max-size = 0").expect("parse pool config");
    assert!(matches!(
        bad.validate(),
        Err(TxFixtureError::Configuration(_))
    ));
}

#[test]
fn test_pool_stats_totals() {
    let stats = PoolStats::new(6, 4, 2, 12, 2);
    assert_eq!(stats.total(), 10);
    assert_eq!(stats.opened(), 12);
    assert!(!stats.is_quiescent());
    assert!(PoolStats::default().is_quiescent());
}

// =============================================================================
// ConnectionPool tests
// =============================================================================

#[tokio::test]
async fn test_pool_close_returns_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(0, 5), factory.clone());

    let conn = pool.get().await.expect("get connection");
    assert_eq!(pool.stats().active(), 1);

    conn.close().await.unwrap();
    assert_eq!(pool.stats().active(), 0);
    assert_eq!(pool.stats().idle(), 1);
    // The checkout is spent
    assert!(conn.inner().is_err());

    let _again = pool.get().await.expect("get connection");
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn test_pooled_connection_reports_driver_name() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(0, 1), factory);

    let conn = pool.get().await.expect("get connection");
    assert_eq!(conn.driver_name(), "mock");
    conn.close().await.unwrap();
    assert_eq!(conn.driver_name(), "mock");
}

#[tokio::test]
async fn test_pool_drop_returns_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(0, 5), factory.clone());

    {
        let _conn = pool.get().await.expect("get connection");
    }
    assert_eq!(pool.stats().idle(), 1);
}

#[tokio::test]
async fn test_pool_discards_connection_inside_transaction() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(0, 5), factory.clone());

    let conn = pool.get().await.expect("get connection");
    factory.in_tx.store(true, Ordering::SeqCst);
    conn.close().await.unwrap();
    factory.in_tx.store(false, Ordering::SeqCst);

    assert_eq!(pool.stats().idle(), 0);
    assert_eq!(pool.stats().discarded(), 1);
}

#[tokio::test]
async fn test_pool_max_size_limit() {
    let config = PoolConfig::new(0, 2).with_acquire_timeout_ms(100);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let _conn1 = pool.get().await.expect("get connection 1");
    let _conn2 = pool.get().await.expect("get connection 2");
    assert_eq!(pool.stats().active(), 2);

    let err = match pool.get().await {
        Ok(_) => panic!("third checkout should time out"),
        Err(e) => e,
    };
    assert!(matches!(err, TxFixtureError::Timeout(_)));
    assert_eq!(pool.stats().waiting(), 0);
}

#[tokio::test]
async fn test_pool_warm_up_opens_min_size() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(3, 5), factory.clone());

    pool.warm_up().await.unwrap();
    assert_eq!(pool.stats().idle(), 3);
    assert_eq!(factory.count(), 3);
}

#[tokio::test]
async fn test_pool_dispose_refuses_checkouts() {
    let pool = ConnectionPool::new(PoolConfig::new(0, 5), MockConnectionFactory::new());
    let held = pool.get().await.expect("get");

    pool.dispose().await;
    assert!(pool.is_disposed());
    assert!(pool.get().await.is_err());

    // Returned after dispose: discarded, not pooled
    drop(held);
    assert_eq!(pool.stats().idle(), 0);
}
