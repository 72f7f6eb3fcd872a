//! The connection facade and its savepoint stack

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use txfixture_core::{
    Connection, DialectInfo, ObserverList, QueryResult, RawConnection, Result, Savepoint,
    SavepointSupport, SchemaIntrospection, StatementResult, Transaction, TransactionEvent,
    TransactionObserver, TxFixtureError, Value,
};
use txfixture_drivers::block_on_detached;

use super::raw::SavepointedRawConnection;

const SAVEPOINT_PREFIX: &str = "txfixture_sp_";

/// Savepoints open on the facade, outermost first
#[derive(Debug, Default)]
struct SavepointStack {
    open: Vec<Savepoint>,
}

impl SavepointStack {
    fn push(&mut self, name: String) -> Savepoint {
        let savepoint = Savepoint::new(name, self.open.len() + 1);
        self.open.push(savepoint.clone());
        savepoint
    }

    fn find(&self, name: &str) -> Option<&Savepoint> {
        self.open.iter().find(|sp| sp.name() == name)
    }

    fn innermost(&self) -> Option<&Savepoint> {
        self.open.last()
    }

    /// Drop every savepoint above `name`, keeping `name` itself
    fn truncate_above(&mut self, name: &str) {
        if let Some(pos) = self.open.iter().position(|sp| sp.name() == name) {
            self.open.truncate(pos + 1);
        }
    }

    /// Remove `name` and every savepoint above it
    fn end(&mut self, name: &str) -> Option<Savepoint> {
        let pos = self.open.iter().position(|sp| sp.name() == name)?;
        self.open.drain(pos..).next()
    }
}

/// The connection tests and application code see inside a transactional
/// context.
///
/// It wraps the real connection while an outer transaction is open on it.
/// `begin_transaction` opens a savepoint instead, and `close` does nothing.
/// Only `force_rollback` and `force_close` reach the outer transaction and
/// the real connection.
pub struct ConnectionFacade {
    real: Arc<dyn Connection>,
    dialect: DialectInfo,
    outer: Mutex<Option<Box<dyn Transaction>>>,
    stack: Mutex<SavepointStack>,
    seq: AtomicUsize,
    observers: ObserverList,
    raw_view: Mutex<Option<Arc<SavepointedRawConnection>>>,
    closed: AtomicBool,
    this: Weak<ConnectionFacade>,
}

impl ConnectionFacade {
    /// Wrap `real`, which must already be inside `outer`
    pub fn new(real: Arc<dyn Connection>, outer: Box<dyn Transaction>) -> Arc<Self> {
        let dialect = real.dialect();
        Arc::new_cyclic(|this| Self {
            real,
            dialect,
            outer: Mutex::new(Some(outer)),
            stack: Mutex::new(SavepointStack::default()),
            seq: AtomicUsize::new(0),
            observers: ObserverList::new(),
            raw_view: Mutex::new(None),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Receive `SavepointEnded` events
    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.register(observer);
    }

    /// Number of savepoints currently open
    pub fn savepoint_depth(&self) -> usize {
        self.stack.lock().open.len()
    }

    /// Name of the innermost open savepoint
    pub fn current_savepoint(&self) -> Option<String> {
        self.stack.lock().innermost().map(|sp| sp.name().to_string())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TxFixtureError::Connection(
                "the transactional connection has been closed".into(),
            ));
        }
        Ok(())
    }

    async fn open_savepoint(&self, name: String) -> Result<Savepoint> {
        self.ensure_open()?;
        self.real
            .execute(&self.dialect.savepoint_sql(&name), &[])
            .await?;
        let savepoint = self.stack.lock().push(name);
        tracing::debug!(
            savepoint = savepoint.name(),
            depth = savepoint.depth(),
            "savepoint opened"
        );
        Ok(savepoint)
    }

    /// Release or roll back `name` and everything above it, then notify
    /// observers. A savepoint that already ended is left alone.
    pub(crate) async fn end_savepoint(&self, name: &str, commit: bool) -> Result<()> {
        if self.stack.lock().find(name).is_none() {
            tracing::trace!(savepoint = name, "savepoint already ended");
            return Ok(());
        }
        if !commit {
            self.real
                .execute(&self.dialect.rollback_to_savepoint_sql(name), &[])
                .await?;
        }
        self.real
            .execute(&self.dialect.release_savepoint_sql(name), &[])
            .await?;

        let Some(ended) = self.stack.lock().end(name) else {
            return Ok(());
        };
        tracing::debug!(
            savepoint = ended.name(),
            depth = ended.depth(),
            committed = commit,
            "savepoint ended"
        );
        self.observers
            .emit(&TransactionEvent::SavepointEnded {
                name: ended.name().to_string(),
                depth: ended.depth(),
                top_level: ended.is_top_level(),
                committed: commit,
            })
            .await
    }

    /// On dialects where a failed statement aborts the transaction, roll the
    /// innermost savepoint back so the chain stays usable
    async fn recover_from_error(&self, error: &TxFixtureError) {
        if !self.dialect.errors_abort_transaction {
            return;
        }
        let Some(name) = self.current_savepoint() else {
            return;
        };
        tracing::debug!(savepoint = %name, %error, "statement failed, rolling back savepoint");
        if let Err(e) = self.end_savepoint(&name, false).await {
            tracing::warn!(savepoint = %name, error = %e, "could not recover savepoint after failed statement");
        }
    }

    /// Open `SAVEPOINT raw_conn` and hand out the neutralized raw connection
    pub(crate) async fn savepointed_raw(&self) -> Result<Arc<SavepointedRawConnection>> {
        self.ensure_open()?;
        self.real
            .execute(&self.dialect.savepoint_sql(SavepointedRawConnection::SAVEPOINT), &[])
            .await?;

        let existing = self.raw_view.lock().clone();
        let view = match existing {
            Some(view) => view,
            None => {
                let raw = self.real.raw_connection().await?;
                let view = Arc::new(SavepointedRawConnection::new(raw, self.dialect.clone()));
                *self.raw_view.lock() = Some(Arc::clone(&view));
                view
            }
        };
        view.neutralize();
        Ok(view)
    }

    /// Give the raw driver connection its own commit, rollback and close back
    pub fn restore_raw(&self) {
        if let Some(view) = self.raw_view.lock().take() {
            view.restore();
        }
    }

    /// Roll back the outer transaction. Teardown only.
    #[tracing::instrument(skip(self))]
    pub async fn force_rollback(&self) -> Result<()> {
        self.observers.clear();
        self.stack.lock().open.clear();
        let outer = self.outer.lock().take();
        match outer {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }

    /// Close the real connection, returning it to its pool. Teardown only.
    #[tracing::instrument(skip(self))]
    pub async fn force_close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.real.close().await
    }
}

#[async_trait]
impl Connection for ConnectionFacade {
    fn driver_name(&self) -> &str {
        self.real.driver_name()
    }

    fn dialect(&self) -> DialectInfo {
        self.dialect.clone()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_open()?;
        match self.real.execute(sql, params).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.recover_from_error(&e).await;
                Err(e)
            }
        }
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        match self.real.query(sql, params).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.recover_from_error(&e).await;
                Err(e)
            }
        }
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.begin_nested().await
    }

    async fn begin_nested(&self) -> Result<Box<dyn Transaction>> {
        let facade = self.this.upgrade().ok_or_else(|| {
            TxFixtureError::Connection("the transactional connection was dropped".into())
        })?;
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let savepoint = self.open_savepoint(format!("{}{}", SAVEPOINT_PREFIX, n)).await?;
        Ok(Box::new(NestedTransaction {
            facade,
            name: savepoint.name().to_string(),
            finished: false,
        }))
    }

    fn in_transaction(&self) -> bool {
        self.outer.lock().is_some()
    }

    async fn close(&self) -> Result<()> {
        tracing::trace!("close() on the transactional connection ignored");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.real.is_closed()
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        self.real.as_schema_introspection()
    }

    async fn raw_connection(&self) -> Result<Arc<dyn RawConnection>> {
        let view = self.raw_view.lock().clone();
        match view {
            Some(view) => Ok(view),
            None => self.real.raw_connection().await,
        }
    }
}

#[async_trait]
impl SavepointSupport for ConnectionFacade {
    async fn savepoint(&self, name: &str) -> Result<Savepoint> {
        self.open_savepoint(name.to_string()).await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        if self.stack.lock().find(name).is_none() {
            return Err(TxFixtureError::NotFound(format!(
                "no open savepoint named '{}'",
                name
            )));
        }
        self.real
            .execute(&self.dialect.rollback_to_savepoint_sql(name), &[])
            .await?;
        self.stack.lock().truncate_above(name);
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.end_savepoint(name, true).await
    }

    fn supports_savepoints(&self) -> bool {
        self.dialect.supports_savepoints
    }
}

/// A savepoint handed out in place of a transaction.
///
/// `commit` releases it and `rollback` rolls back to it. Dropped without
/// either, it is released, or rolled back if the thread is panicking.
pub struct NestedTransaction {
    facade: Arc<ConnectionFacade>,
    name: String,
    finished: bool,
}

impl NestedTransaction {
    pub fn savepoint_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transaction for NestedTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.facade.end_savepoint(&self.name, true).await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.facade.end_savepoint(&self.name, false).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.facade.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.facade.execute(sql, params).await
    }

    fn is_nested(&self) -> bool {
        true
    }
}

impl Drop for NestedTransaction {
    fn drop(&mut self) {
        if self.finished || self.facade.closed.load(Ordering::SeqCst) {
            return;
        }
        // Leaving the scope keeps its writes; unwinding out of it does not
        let commit = !std::thread::panicking();
        tracing::debug!(savepoint = %self.name, commit, "nested transaction left its scope");
        let facade = Arc::clone(&self.facade);
        let name = std::mem::take(&mut self.name);
        let outcome = block_on_detached(async move { facade.end_savepoint(&name, commit).await });
        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::error!(error = %e, "ending dropped nested transaction failed"),
            None => tracing::error!("ending dropped nested transaction panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records every statement; statements containing `FAIL` error out
    struct ScriptedConnection {
        log: Mutex<Vec<String>>,
        dialect: DialectInfo,
        closed: AtomicBool,
    }

    impl ScriptedConnection {
        pub fn new(errors_abort_transaction: bool) -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                dialect: DialectInfo {
                    errors_abort_transaction,
                    ..DialectInfo::default()
                },
                closed: AtomicBool::new(false),
            })
        }

        fn record(&self, sql: &str) -> Result<()> {
            self.log.lock().push(sql.to_string());
            if sql.contains("FAIL") {
                return Err(TxFixtureError::Query(format!("syntax error near '{}'", sql)));
            }
            Ok(())
        }
    }

    struct ScriptedTransaction(Arc<ScriptedConnection>);

    #[async_trait]
    impl Transaction for ScriptedTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            self.0.record("COMMIT")
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.0.record("ROLLBACK")
        }

        async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            self.0.record(sql).map(|_| QueryResult::empty())
        }

        async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
            self.0.record(sql).map(|_| StatementResult::none())
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        fn driver_name(&self) -> &str {
            "scripted"
        }

        fn dialect(&self) -> DialectInfo {
            self.dialect.clone()
        }

        async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
            self.record(sql).map(|_| StatementResult::none())
        }

        async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            self.record(sql).map(|_| QueryResult::empty())
        }

        async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
            Err(TxFixtureError::NotSupported("use begin_outer".into()))
        }

        async fn begin_nested(&self) -> Result<Box<dyn Transaction>> {
            Err(TxFixtureError::NotSupported("scripted".into()))
        }

        fn in_transaction(&self) -> bool {
            true
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.record("CLOSE")
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn facade(errors_abort_transaction: bool) -> (Arc<ScriptedConnection>, Arc<ConnectionFacade>) {
        let real = ScriptedConnection::new(errors_abort_transaction);
        let outer = Box::new(ScriptedTransaction(Arc::clone(&real)));
        let facade = ConnectionFacade::new(real.clone(), outer);
        (real, facade)
    }

    struct TopLevelCounter(AtomicUsize);

    #[async_trait]
    impl TransactionObserver for TopLevelCounter {
        async fn on_event(&self, event: &TransactionEvent) -> Result<()> {
            if let TransactionEvent::SavepointEnded { top_level: true, .. } = event {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_begin_transaction_opens_savepoint() {
        let (real, facade) = facade(false);
        let tx = facade.begin_transaction().await.unwrap();
        assert!(tx.is_nested());
        assert_eq!(facade.savepoint_depth(), 1);
        tx.commit().await.unwrap();

        assert_eq!(
            *real.log.lock(),
            vec![
                "SAVEPOINT \"txfixture_sp_1\"".to_string(),
                "RELEASE SAVEPOINT \"txfixture_sp_1\"".to_string(),
            ]
        );
        assert_eq!(facade.savepoint_depth(), 0);
    }

    #[tokio::test]
    async fn test_dropped_nested_transaction_is_released() {
        let (real, facade) = facade(false);
        let base = facade.begin_nested().await.unwrap();
        {
            let scoped = facade.begin_nested().await.unwrap();
            scoped.execute("INSERT kept", &[]).await.unwrap();
        }
        assert_eq!(facade.savepoint_depth(), 1);
        assert_eq!(
            real.log.lock()[1..],
            [
                "SAVEPOINT \"txfixture_sp_2\"".to_string(),
                "INSERT kept".to_string(),
                "RELEASE SAVEPOINT \"txfixture_sp_2\"".to_string(),
            ]
        );
        base.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_only_depth_one_is_top_level() {
        let (_real, facade) = facade(false);
        let counter = Arc::new(TopLevelCounter(AtomicUsize::new(0)));
        facade.add_observer(counter.clone());

        let base = facade.begin_nested().await.unwrap();
        let inner = facade.begin_nested().await.unwrap();
        inner.rollback().await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        base.commit().await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ending_outer_savepoint_ends_inner_ones() {
        let (real, facade) = facade(false);
        let base = facade.begin_nested().await.unwrap();
        let inner = facade.begin_nested().await.unwrap();

        base.rollback().await.unwrap();
        assert_eq!(facade.savepoint_depth(), 0);

        // Already gone on the database side too
        real.log.lock().clear();
        inner.commit().await.unwrap();
        assert!(real.log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_ignored_until_forced() {
        let (real, facade) = facade(false);
        facade.close().await.unwrap();
        assert!(!facade.is_closed());
        assert!(facade.execute("SELECT 1", &[]).await.is_ok());

        facade.force_rollback().await.unwrap();
        assert!(!facade.in_transaction());
        facade.force_close().await.unwrap();
        assert!(facade.is_closed());
        assert!(matches!(
            facade.execute("SELECT 1", &[]).await,
            Err(TxFixtureError::Connection(_))
        ));

        let log = real.log.lock();
        assert_eq!(log[log.len() - 2..], ["ROLLBACK".to_string(), "CLOSE".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_innermost_when_errors_abort() {
        let (real, facade) = facade(true);
        let _base = facade.begin_nested().await.unwrap();

        let err = facade.execute("SELECT FAIL", &[]).await.unwrap_err();
        assert!(matches!(err, TxFixtureError::Query(_)));
        assert_eq!(facade.savepoint_depth(), 0);
        assert!(
            real.log
                .lock()
                .contains(&"ROLLBACK TO SAVEPOINT \"txfixture_sp_1\"".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_statement_keeps_savepoint_otherwise() {
        let (_real, facade) = facade(false);
        let _base = facade.begin_nested().await.unwrap();
        assert!(facade.query("SELECT FAIL", &[]).await.is_err());
        assert_eq!(facade.savepoint_depth(), 1);
    }

    #[tokio::test]
    async fn test_named_savepoints() {
        let (_real, facade) = facade(false);
        let outer = facade.savepoint("before_bob").await.unwrap();
        assert_eq!(outer.depth(), 1);
        facade.savepoint("inner").await.unwrap();

        facade.rollback_to_savepoint("before_bob").await.unwrap();
        assert_eq!(facade.savepoint_depth(), 1);
        assert!(matches!(
            facade.rollback_to_savepoint("inner").await,
            Err(TxFixtureError::NotFound(_))
        ));
        facade.release_savepoint("before_bob").await.unwrap();
        assert_eq!(facade.savepoint_depth(), 0);
    }
}
