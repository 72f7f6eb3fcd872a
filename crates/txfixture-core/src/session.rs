//! Session, session factory and database collaborator traits

use crate::{
    Connection, Engine, EntityRef, Model, QueryResult, Result, StatementResult,
    TransactionObserver, Value,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Options a session is created with
#[derive(Clone)]
pub struct SessionOptions {
    /// Connection every statement goes through
    pub bind: Arc<dyn Connection>,
    /// Per-table binds that override `bind`
    pub binds: HashMap<String, Arc<dyn Connection>>,
}

impl SessionOptions {
    /// Bind to one connection with no per-table overrides
    pub fn bound_to(bind: Arc<dyn Connection>) -> Self {
        Self {
            bind,
            binds: HashMap::new(),
        }
    }
}

/// A unit-of-work session
#[async_trait]
pub trait Session: Send + Sync {
    /// Start tracking an entity. It is inserted on the next flush.
    async fn add(&self, entity: EntityRef) -> Result<()>;

    /// Mark a tracked entity for deletion on the next flush
    async fn delete(&self, entity: &EntityRef) -> Result<()>;

    /// Stop tracking an entity
    async fn expunge(&self, entity: &EntityRef) -> Result<()>;

    /// Whether the entity is tracked by this session
    fn contains(&self, entity: &EntityRef) -> bool;

    /// Load an entity by primary key, reusing the tracked instance if any
    async fn get(&self, model: &Model, pk: Value) -> Result<Option<EntityRef>>;

    /// Load every row of a model
    async fn all(&self, model: &Model) -> Result<Vec<EntityRef>>;

    /// Run a query after flushing pending changes
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Run a statement after flushing pending changes
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Write pending changes to the database
    async fn flush(&self) -> Result<()>;

    /// Flush and commit the innermost transaction
    async fn commit(&self) -> Result<()>;

    /// Roll back the innermost transaction
    async fn rollback(&self) -> Result<()>;

    /// Open a nested transaction (savepoint)
    async fn begin_nested(&self) -> Result<()>;

    /// Mark every tracked entity stale so the next access reloads it
    fn expire_all(&self);

    /// Roll back whatever is open and release tracked entities
    async fn close(&self) -> Result<()>;

    /// Close and discard the session
    async fn remove(&self) -> Result<()> {
        self.close().await
    }

    /// Number of transactions this session has open
    fn transaction_depth(&self) -> usize;

    /// Connection the session runs statements on
    fn bind(&self) -> Arc<dyn Connection>;

    fn add_observer(&self, observer: Arc<dyn TransactionObserver>);
}

/// Creates sessions bound to an engine
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Session>>;

    /// Rebind future sessions to another engine
    fn configure(&self, bind: Arc<dyn Engine>);
}

/// The database collaborator the harness is driven by
pub trait Database: Send + Sync {
    fn engine(&self) -> Arc<dyn Engine>;

    /// Create a session scoped to one test
    fn create_scoped_session(&self, options: SessionOptions) -> Result<Arc<dyn Session>>;
}
