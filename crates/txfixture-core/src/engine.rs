//! Engine trait: a source of connections

use crate::{
    Connection, DialectInfo, QueryResult, RawConnection, Result, StatementResult, Transaction,
    TxFixtureError, Value,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A factory of connections to one database
#[async_trait]
pub trait Engine: Send + Sync {
    /// Dialect of the database this engine talks to
    fn dialect(&self) -> DialectInfo;

    /// Connection URL, password masked
    fn url(&self) -> String;

    /// Check out a connection
    async fn connect(&self) -> Result<Arc<dyn Connection>>;

    /// Check out a connection and begin a transaction on it.
    ///
    /// The connection is given back when the transaction ends.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Run one statement on a fresh connection in autocommit mode
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Run one query on a fresh connection
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// The driver-level connection underneath a checked-out connection
    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>>;

    /// Close every pooled connection
    async fn dispose(&self) -> Result<()>;

    /// Names of the tables visible to this engine
    async fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.connect().await?;
        let result = match conn.as_schema_introspection() {
            Some(schema) => schema
                .list_tables(None)
                .await
                .map(|tables| tables.into_iter().map(|t| t.name).collect()),
            None => Err(TxFixtureError::NotSupported(format!(
                "schema introspection is not supported by the {} dialect",
                self.dialect().id
            ))),
        };
        conn.close().await?;
        result
    }

    async fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.table_names().await?.iter().any(|t| t == name))
    }
}
