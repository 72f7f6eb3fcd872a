//! Schema reflection behind `Engine::table_names` and `Engine::has_table`

use crate::Result;
use async_trait::async_trait;

/// Reads the schema as the connection currently sees it, so tables created
/// or dropped inside an open transaction show up immediately
#[async_trait]
pub trait SchemaIntrospection: Send + Sync {
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>>;

    async fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool> {
        let tables = self.list_tables(schema).await?;
        Ok(tables.iter().any(|t| t.name == table))
    }
}

/// A table visible to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Schema (or attached database) the table lives in
    pub schema: Option<String>,
    pub name: String,
}
