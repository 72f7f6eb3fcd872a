//! The self-restarting savepoint chain

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use txfixture_core::{
    Connection, Database, Result, Session, SessionOptions, TransactionEvent, TransactionObserver,
};

use crate::facade::{ConnectionFacade, SessionFacade};
use crate::teardown::TeardownLog;

/// Reopens the base savepoint each time it ends.
///
/// The session is expired first so reads after a commit see the database
/// rather than cached state.
pub struct SavepointRestarter {
    session: Weak<dyn Session>,
    armed: AtomicBool,
}

impl SavepointRestarter {
    pub fn new(session: &Arc<dyn Session>) -> Self {
        Self {
            session: Arc::downgrade(session),
            armed: AtomicBool::new(true),
        }
    }

    /// Stop restarting; teardown is about to end the chain for good
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionObserver for SavepointRestarter {
    async fn on_event(&self, event: &TransactionEvent) -> Result<()> {
        let TransactionEvent::SavepointEnded {
            name,
            top_level: true,
            ..
        } = event
        else {
            return Ok(());
        };
        if !self.armed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        tracing::debug!(ended = %name, "restarting savepoint chain");
        session.expire_all();
        session.begin_nested().await
    }
}

/// Owns the outer transaction, the scoped session and the restart hook of
/// one transactional context
pub struct SavepointController {
    connection: Arc<ConnectionFacade>,
    session: Arc<SessionFacade>,
    restarter: Arc<SavepointRestarter>,
}

impl SavepointController {
    /// Open the outer transaction on `real` and start the savepoint chain
    #[tracing::instrument(skip_all, fields(driver = real.driver_name()))]
    pub async fn begin(real: Arc<dyn Connection>, database: &dyn Database) -> Result<Self> {
        let outer = real.begin_transaction().await?;
        let connection = ConnectionFacade::new(real, outer);

        let scoped = database.create_scoped_session(SessionOptions::bound_to(connection.clone()))?;
        scoped.begin_nested().await?;

        let restarter = Arc::new(SavepointRestarter::new(&scoped));
        connection.add_observer(restarter.clone());
        tracing::debug!(
            savepoint = connection.current_savepoint().as_deref(),
            "savepoint chain started"
        );

        Ok(Self {
            connection,
            session: SessionFacade::new(scoped),
            restarter,
        })
    }

    pub fn connection(&self) -> &Arc<ConnectionFacade> {
        &self.connection
    }

    pub fn session(&self) -> &Arc<SessionFacade> {
        &self.session
    }

    /// Remove the session, roll back the outer transaction and give the
    /// connection back to its pool.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    #[tracing::instrument(skip(self))]
    pub async fn teardown(&self) -> Result<()> {
        self.restarter.disarm();
        let mut log = TeardownLog::default();
        log.step("remove session", self.session.force_remove().await);
        log.step("roll back outer transaction", self.connection.force_rollback().await);
        log.step("close connection", self.connection.force_close().await);
        log.finish()
    }
}
