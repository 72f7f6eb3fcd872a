//! Named savepoints inside an open transaction

use crate::Result;
use async_trait::async_trait;

/// A savepoint opened on a connection.
///
/// `depth` is 1 for a savepoint whose parent is the outer transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
    depth: usize,
}

impl Savepoint {
    pub fn new(name: impl Into<String>, depth: usize) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the savepoint sits directly on the outer transaction
    pub fn is_top_level(&self) -> bool {
        self.depth == 1
    }
}

/// Named savepoints on a connection or transaction.
///
/// ```ignore
/// conn.savepoint("before_bob").await?;
/// conn.execute("INSERT INTO users VALUES (2, 'bob')", &[]).await?;
/// conn.rollback_to_savepoint("before_bob").await?;
/// ```
#[async_trait]
pub trait SavepointSupport: Send + Sync {
    /// Create a savepoint with the given name.
    async fn savepoint(&self, name: &str) -> Result<Savepoint>;

    /// Undo everything since the savepoint. The savepoint stays open.
    async fn rollback_to_savepoint(&self, name: &str) -> Result<()>;

    /// Release a savepoint, keeping its changes in the enclosing transaction.
    async fn release_savepoint(&self, name: &str) -> Result<()>;

    fn supports_savepoints(&self) -> bool {
        true
    }
}
