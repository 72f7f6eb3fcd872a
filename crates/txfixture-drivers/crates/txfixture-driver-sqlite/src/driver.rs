//! SQLite driver implementation

use async_trait::async_trait;
use std::sync::Arc;
use txfixture_core::{
    Connection, ConnectionConfig, DatabaseDriver, DialectInfo, DriverCapabilities,
    MEMORY_DATABASE, Result, TxFixtureError,
};

use crate::SqliteConnection;

/// SQLite database driver
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_transactions: true,
            supports_savepoints: true,
            supports_transactional_ddl: true,
            supports_schemas: false,
            supports_raw_connections: true,
            supports_foreign_keys: true,
        }
    }

    fn dialect_info(&self) -> DialectInfo {
        crate::sqlite_dialect()
    }

    #[tracing::instrument(skip(self, config), fields(path = config.get_string("path").as_deref()))]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = config.get_string("path").ok_or_else(|| {
            TxFixtureError::Configuration(
                "SQLite requires a database path. Example: sqlite:///path/to/database.db".into(),
            )
        })?;

        let conn = SqliteConnection::open(&path).map_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
            match e {
                TxFixtureError::Configuration(_) => e,
                other => TxFixtureError::Connection(format!(
                    "Failed to connect to SQLite database: {}",
                    other
                )),
            }
        })?;

        tracing::info!(path = %path, "SQLite connection created");
        Ok(Arc::new(conn))
    }

    #[tracing::instrument(skip(self, config))]
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        tracing::debug!("testing SQLite connection");
        let conn = self.connect(config).await?;
        conn.query("SELECT 1", &[]).await?;
        conn.close().await
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        match config.get_string("path") {
            Some(path) if path != MEMORY_DATABASE => format!("sqlite://{}", path),
            _ => "sqlite::memory:".to_string(),
        }
    }
}
