//! Connection pool implementation

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use txfixture_core::{
    Connection, DialectInfo, QueryResult, RawConnection, Result, SchemaIntrospection,
    StatementResult, Transaction, TxFixtureError, Value,
};

use super::config::PoolConfig;
use super::stats::PoolStats;

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Validate that a connection is still usable
    async fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed()
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn).await
    }
}

struct IdleConnection {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    returned_at: Instant,
}

/// A bounded pool of connections.
///
/// Checkouts are owned `PooledConnection`s, which go back to the pool on
/// `close()` or drop. A connection returned while still inside a transaction
/// is discarded rather than reused.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<VecDeque<IdleConnection>>,
    /// Limits total checkouts
    semaphore: Arc<Semaphore>,
    active_count: AtomicUsize,
    waiting_count: AtomicUsize,
    opened_count: AtomicUsize,
    discarded_count: AtomicUsize,
    disposed: AtomicBool,
}

impl ConnectionPool {
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_size()));
        Arc::new(Self {
            config,
            factory: Arc::new(factory),
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            active_count: AtomicUsize::new(0),
            waiting_count: AtomicUsize::new(0),
            opened_count: AtomicUsize::new(0),
            discarded_count: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    /// Check out a connection.
    ///
    /// Reuses a valid idle connection if there is one, otherwise opens a new
    /// one. Waits up to the acquire timeout when `max_size` are checked out.
    #[tracing::instrument(skip(self), fields(stats = ?self.stats()))]
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TxFixtureError::Connection("Pool has been disposed".into()));
        }
        self.waiting_count.fetch_add(1, Ordering::SeqCst);

        let result = tokio::time::timeout(self.config.acquire_timeout(), async {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| TxFixtureError::Connection("Pool has been disposed".into()))?;

            let (connection, created_at) = match self.try_get_idle().await {
                Some(idle) => (idle.connection, idle.created_at),
                None => {
                    let conn = self.factory.create().await?;
                    self.opened_count.fetch_add(1, Ordering::SeqCst);
                    (conn, Instant::now())
                }
            };

            self.active_count.fetch_add(1, Ordering::SeqCst);
            Ok(PooledConnection {
                driver_name: connection.driver_name().to_string(),
                state: Mutex::new(Some(Checkout {
                    connection,
                    created_at,
                    _permit: permit,
                })),
                pool: Arc::clone(self),
            })
        })
        .await;

        self.waiting_count.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(conn) => conn,
            Err(_) => Err(TxFixtureError::Timeout(format!(
                "Timed out waiting for connection (timeout: {:?})",
                self.config.acquire_timeout()
            ))),
        }
    }

    /// Open connections until `min_size` are idle
    pub async fn warm_up(self: &Arc<Self>) -> Result<()> {
        let mut checkouts = Vec::new();
        while self.stats().idle() + checkouts.len() < self.config.min_size() {
            checkouts.push(self.get().await?);
        }
        for conn in checkouts {
            conn.release();
        }
        Ok(())
    }

    async fn try_get_idle(&self) -> Option<IdleConnection> {
        loop {
            let inner = { self.idle.lock().pop_front() }?;

            let expired = self
                .config
                .max_lifetime()
                .is_some_and(|max| inner.created_at.elapsed() > max)
                || inner.returned_at.elapsed() > self.config.idle_timeout();

            if expired || !self.factory.validate(&*inner.connection).await {
                let _ = inner.connection.close().await;
                self.discarded_count.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            return Some(inner);
        }
    }

    fn return_connection(&self, checkout: Checkout) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        let Checkout {
            connection,
            created_at,
            _permit,
        } = checkout;

        if connection.is_closed() || self.disposed.load(Ordering::SeqCst) {
            self.discarded_count.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if connection.in_transaction() {
            // Dropping the driver connection ends the transaction
            tracing::warn!("connection returned to pool inside a transaction, discarding it");
            self.discarded_count.fetch_add(1, Ordering::SeqCst);
            return;
        }

        self.idle.lock().push_back(IdleConnection {
            connection,
            created_at,
            returned_at: Instant::now(),
        });
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::new(
            self.idle.lock().len(),
            self.active_count.load(Ordering::SeqCst),
            self.waiting_count.load(Ordering::SeqCst),
            self.opened_count.load(Ordering::SeqCst),
            self.discarded_count.load(Ordering::SeqCst),
        )
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Close all idle connections in the pool
    pub async fn close_idle(&self) {
        let connections: Vec<_> = { self.idle.lock().drain(..).collect() };
        for inner in connections {
            let _ = inner.connection.close().await;
        }
    }

    /// Close idle connections and refuse further checkouts.
    ///
    /// Connections still checked out are closed when they come back.
    pub async fn dispose(&self) {
        tracing::debug!(stats = ?self.stats(), "disposing connection pool");
        self.disposed.store(true, Ordering::SeqCst);
        self.semaphore.close();
        self.close_idle().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct Checkout {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    _permit: OwnedSemaphorePermit,
}

/// A connection checked out of a pool.
///
/// `close()` gives it back instead of closing the driver connection, and so
/// does dropping it. Using it after `close()` is a connection error.
pub struct PooledConnection {
    driver_name: String,
    state: Mutex<Option<Checkout>>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    /// The driver connection behind this checkout
    pub fn inner(&self) -> Result<Arc<dyn Connection>> {
        self.state
            .lock()
            .as_ref()
            .map(|c| Arc::clone(&c.connection))
            .ok_or_else(|| TxFixtureError::Connection("connection returned to pool".into()))
    }

    /// Give the connection back to the pool
    pub fn release(&self) {
        if let Some(checkout) = self.state.lock().take() {
            self.pool.return_connection(checkout);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Connection for PooledConnection {
    fn driver_name(&self) -> &str {
        &self.driver_name
    }

    fn dialect(&self) -> DialectInfo {
        self.inner().map(|c| c.dialect()).unwrap_or_default()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.inner()?.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner()?.query(sql, params).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.inner()?.begin_transaction().await
    }

    async fn begin_nested(&self) -> Result<Box<dyn Transaction>> {
        self.inner()?.begin_nested().await
    }

    fn in_transaction(&self) -> bool {
        self.inner().is_ok_and(|c| c.in_transaction())
    }

    async fn close(&self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner().map_or(true, |c| c.is_closed())
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }

    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>> {
        self.inner()?.raw_connection().await
    }
}

#[async_trait]
impl SchemaIntrospection for PooledConnection {
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<txfixture_core::TableInfo>> {
        let conn = self.inner()?;
        match conn.as_schema_introspection() {
            Some(s) => s.list_tables(schema).await,
            None => Err(no_introspection(&*conn)),
        }
    }
}

fn no_introspection(conn: &dyn Connection) -> TxFixtureError {
    TxFixtureError::NotSupported(format!(
        "schema introspection is not supported by the {} driver",
        conn.driver_name()
    ))
}
