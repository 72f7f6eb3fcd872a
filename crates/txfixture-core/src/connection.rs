//! Connection trait and transaction handling

use crate::{DialectInfo, QueryResult, Result, SchemaIntrospection, StatementResult, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite")
    fn driver_name(&self) -> &str;

    /// Dialect of the database behind this connection
    fn dialect(&self) -> DialectInfo;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Begin a nested transaction backed by a savepoint.
    ///
    /// The connection must already be inside a transaction.
    async fn begin_nested(&self) -> Result<Box<dyn Transaction>>;

    /// Whether a transaction is currently open on this connection
    fn in_transaction(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get schema introspection interface if supported
    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        None
    }

    /// The driver-level connection underneath this one.
    ///
    /// Code that bypasses sessions and engines talks to this object directly.
    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>> {
        Err(crate::TxFixtureError::NotSupported(format!(
            "raw connections are not supported by the {} driver",
            self.driver_name()
        )))
    }
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction (RELEASE for savepoints)
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction (ROLLBACK TO for savepoints)
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Whether this transaction is a savepoint inside another one
    fn is_nested(&self) -> bool {
        false
    }
}

/// Transaction isolation levels a raw driver connection can be switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// The lowest-level driver connection, below engines and sessions.
///
/// Mirrors the shape of a classic driver handle: statements run directly and
/// `commit`/`rollback` act on whatever transaction the driver has open.
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Execute a statement, returning the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Commit the driver's current transaction
    async fn commit(&self) -> Result<()>;

    /// Roll back the driver's current transaction
    async fn rollback(&self) -> Result<()>;

    /// Close the driver connection
    async fn close(&self) -> Result<()>;

    /// Change the isolation level of the driver connection
    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()>;
}
