//! The engine facade

use std::sync::Arc;

use async_trait::async_trait;
use txfixture_core::{
    Connection, DialectInfo, Engine, QueryResult, RawConnection, Result, StatementResult,
    Transaction, Value,
};

use super::connection::ConnectionFacade;

/// An engine with no pool: every path leads to the one transactional
/// connection
pub struct EngineFacade {
    connection: Arc<ConnectionFacade>,
}

impl EngineFacade {
    pub fn new(connection: Arc<ConnectionFacade>) -> Arc<Self> {
        Arc::new(Self { connection })
    }

    pub fn connection(&self) -> &Arc<ConnectionFacade> {
        &self.connection
    }
}

#[async_trait]
impl Engine for EngineFacade {
    fn dialect(&self) -> DialectInfo {
        self.connection.dialect()
    }

    fn url(&self) -> String {
        format!("txfixture+{}://transaction", self.connection.driver_name())
    }

    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        Ok(self.connection.clone())
    }

    /// A savepoint that releases on commit and rolls back on rollback or drop
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.connection.begin_nested().await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.connection.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.connection.query(sql, params).await
    }

    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>> {
        Ok(self.connection.savepointed_raw().await?)
    }

    async fn dispose(&self) -> Result<()> {
        tracing::trace!("dispose() on the transactional engine ignored");
        Ok(())
    }
}
