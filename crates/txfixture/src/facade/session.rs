//! The session facade and the fake session factory

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use txfixture_core::{
    Connection, Engine, EntityRef, Model, QueryResult, Result, Session, SessionFactory,
    StatementResult, TransactionEvent, TransactionObserver, Value,
};

/// Adds entities back to the session whenever they become detached
pub struct Rehydrator {
    session: Weak<dyn Session>,
}

impl Rehydrator {
    pub fn new(session: &Arc<dyn Session>) -> Self {
        Self {
            session: Arc::downgrade(session),
        }
    }
}

#[async_trait]
impl TransactionObserver for Rehydrator {
    async fn on_event(&self, event: &TransactionEvent) -> Result<()> {
        let TransactionEvent::EntityDetached { entity, previous } = event else {
            return Ok(());
        };
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        tracing::trace!(?entity, ?previous, "re-attaching detached entity");
        session.add(Arc::clone(entity)).await
    }
}

/// The session tests and application code see inside a transactional
/// context.
///
/// Everything is delegated to the scoped session, except `close` and
/// `remove`, which do nothing. `force_remove` is the teardown path.
pub struct SessionFacade {
    inner: Arc<dyn Session>,
}

impl SessionFacade {
    pub fn new(inner: Arc<dyn Session>) -> Arc<Self> {
        inner.add_observer(Arc::new(Rehydrator::new(&inner)));
        Arc::new(Self { inner })
    }

    pub fn inner(&self) -> &Arc<dyn Session> {
        &self.inner
    }

    /// Close and discard the scoped session. Teardown only.
    #[tracing::instrument(skip(self))]
    pub async fn force_remove(&self) -> Result<()> {
        self.inner.remove().await
    }
}

#[async_trait]
impl Session for SessionFacade {
    async fn add(&self, entity: EntityRef) -> Result<()> {
        self.inner.add(entity).await
    }

    async fn delete(&self, entity: &EntityRef) -> Result<()> {
        self.inner.delete(entity).await
    }

    async fn expunge(&self, entity: &EntityRef) -> Result<()> {
        self.inner.expunge(entity).await
    }

    fn contains(&self, entity: &EntityRef) -> bool {
        self.inner.contains(entity)
    }

    async fn get(&self, model: &Model, pk: Value) -> Result<Option<EntityRef>> {
        self.inner.get(model, pk).await
    }

    async fn all(&self, model: &Model) -> Result<Vec<EntityRef>> {
        self.inner.all(model).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.inner.execute(sql, params).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    async fn commit(&self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.inner.rollback().await
    }

    async fn begin_nested(&self) -> Result<()> {
        self.inner.begin_nested().await
    }

    fn expire_all(&self) {
        self.inner.expire_all()
    }

    async fn close(&self) -> Result<()> {
        tracing::trace!("close() on the transactional session ignored");
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        tracing::trace!("remove() on the transactional session ignored");
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.inner.transaction_depth()
    }

    fn bind(&self) -> Arc<dyn Connection> {
        self.inner.bind()
    }

    fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.inner.add_observer(observer)
    }
}

/// A session factory whose every session is the transactional one
pub struct FakeSessionFactory {
    session: Arc<SessionFacade>,
}

impl FakeSessionFactory {
    pub fn new(session: Arc<SessionFacade>) -> Arc<Self> {
        Arc::new(Self { session })
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn create(&self) -> Result<Arc<dyn Session>> {
        Ok(self.session.clone())
    }

    fn configure(&self, _bind: Arc<dyn Engine>) {
        tracing::trace!("configure() on the transactional session factory ignored");
    }
}
