//! Per-test transactional contexts and the process-wide harness

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use txfixture_connection::{PooledEngine, create_engine_with};
use txfixture_core::{Database, Engine, Result, TxFixtureError};
use txfixture_drivers::{DriverRegistry, block_on_detached};

use crate::facade::{ConnectionFacade, EngineFacade, FakeSessionFactory, SessionFacade};
use crate::savepoint::SavepointController;
use crate::settings::Settings;
use crate::substitution::{SubstitutionBindings, SubstitutionGuard, SubstitutionPolicy};
use crate::teardown::TeardownLog;

const MISSING_DATABASE: &str = "no `Database` provider is installed. The harness needs one to \
     open connections and scoped sessions: pass it to `Harness::with_database`, or call \
     `txfixture::install_database` before the first test. See the `Harness` documentation.";

const MISSING_CONNECTION_STRING: &str = "The configuration option 'db-connection-string' is \
     required to use the `module_engine` fixture. Set it in txfixture.toml or through \
     $TXFIXTURE_DB_CONNECTION_STRING.";

static INSTALLED_DATABASE: LazyLock<RwLock<Option<Arc<dyn Database>>>> =
    LazyLock::new(|| RwLock::new(None));

static GLOBAL_SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Install the database `Harness::global` hands to every context
pub fn install_database(database: Arc<dyn Database>) {
    let previous = INSTALLED_DATABASE.write().replace(database);
    tracing::debug!(replaced = previous.is_some(), "database installed");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    TransactionOpen,
    FacadesBound,
    TestRunning,
    Teardown,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::TransactionOpen => "transaction_open",
            LifecycleState::FacadesBound => "facades_bound",
            LifecycleState::TestRunning => "test_running",
            LifecycleState::Teardown => "teardown",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn enter(state: LifecycleState) -> LifecycleState {
    tracing::debug!(%state, "transactional context");
    state
}

/// Opens transactional contexts against one database.
///
/// A harness needs a [`Database`] provider before it can open a context,
/// either passed with [`Harness::with_database`] or, for
/// [`Harness::global`], installed once per process with
/// [`install_database`]:
///
/// ```ignore
/// let database = SqlDatabase::connect("sqlite:///tmp/app.db")?;
/// let harness = Harness::new(Settings::discover()?).with_database(Arc::new(database));
/// ```
#[derive(Clone)]
pub struct Harness {
    settings: Settings,
    policy: SubstitutionPolicy,
    database: Option<Arc<dyn Database>>,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        Self {
            policy: SubstitutionPolicy::from_settings(&settings),
            settings,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// The harness built from discovered settings and the installed database.
    ///
    /// Settings are read once per process.
    pub fn global() -> Result<Self> {
        let settings = match GLOBAL_SETTINGS.get() {
            Some(settings) => settings.clone(),
            None => {
                let discovered = Settings::discover()?;
                GLOBAL_SETTINGS.get_or_init(|| discovered).clone()
            }
        };
        let mut harness = Self::new(settings);
        harness.database = INSTALLED_DATABASE.read().clone();
        Ok(harness)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn policy(&self) -> &SubstitutionPolicy {
        &self.policy
    }

    /// Open a transactional context.
    ///
    /// Returns `Ok(None)` when the database is unreachable and
    /// `degrade-on-connect-failure` is set.
    #[tracing::instrument(skip(self))]
    pub async fn transaction(&self) -> Result<Option<TransactionalContext>> {
        let database = self
            .database
            .clone()
            .ok_or_else(|| TxFixtureError::Configuration(MISSING_DATABASE.to_string()))?;

        match self.open(database).await {
            Ok(context) => Ok(Some(context)),
            Err(error) if self.settings.degrade_on_connect_failure && error.is_connectivity() => {
                tracing::warn!(%error, "database unreachable, running without a transactional context");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    async fn open(&self, database: Arc<dyn Database>) -> Result<TransactionalContext> {
        enter(LifecycleState::Uninitialized);
        let real = database.engine().connect().await?;
        let controller = SavepointController::begin(real, database.as_ref()).await?;
        enter(LifecycleState::TransactionOpen);

        let engine = EngineFacade::new(controller.connection().clone());
        let session = controller.session().clone();
        let session_factory = FakeSessionFactory::new(session.clone());
        enter(LifecycleState::FacadesBound);

        let bindings = SubstitutionBindings {
            engine: engine.clone(),
            session: session.clone(),
            session_factory,
        };
        let guard = match self.policy.apply(&bindings).await {
            Ok(guard) => guard,
            Err(error) => {
                if let Err(teardown_error) = controller.teardown().await {
                    tracing::warn!(%teardown_error, "teardown after failed substitution");
                }
                return Err(error);
            }
        };

        Ok(TransactionalContext {
            state: enter(LifecycleState::TestRunning),
            engine,
            session,
            parts: Some(ContextParts { controller, guard }),
        })
    }

    /// A pooled engine on `db-connection-string`, outside any test transaction
    #[tracing::instrument(skip(self))]
    pub fn module_engine(&self) -> Result<ModuleEngine> {
        let url = self
            .settings
            .db_connection_string
            .as_deref()
            .ok_or_else(|| TxFixtureError::Configuration(MISSING_CONNECTION_STRING.to_string()))?;
        let engine = create_engine_with(
            &DriverRegistry::with_defaults(),
            url,
            self.settings.pool.clone(),
        )?;
        Ok(ModuleEngine {
            engine,
            disposed: AtomicBool::new(false),
        })
    }
}

struct ContextParts {
    controller: SavepointController,
    guard: SubstitutionGuard,
}

/// One test's view of the database: everything written through it is rolled
/// back at teardown
pub struct TransactionalContext {
    state: LifecycleState,
    engine: Arc<EngineFacade>,
    session: Arc<SessionFacade>,
    parts: Option<ContextParts>,
}

impl TransactionalContext {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn db_session(&self) -> Arc<SessionFacade> {
        self.session.clone()
    }

    pub fn db_engine(&self) -> Arc<EngineFacade> {
        self.engine.clone()
    }

    pub fn connection(&self) -> Arc<ConnectionFacade> {
        self.engine.connection().clone()
    }

    /// Roll everything back and revert substitutions.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    #[tracing::instrument(skip(self))]
    pub async fn teardown(mut self) -> Result<()> {
        match self.begin_teardown() {
            Some(teardown) => teardown.await,
            None => Ok(()),
        }
    }

    fn begin_teardown(&mut self) -> Option<BoxFuture<'static, Result<()>>> {
        let ContextParts { controller, guard } = self.parts.take()?;
        self.state = enter(LifecycleState::Teardown);
        Some(
            async move {
                let mut log = TeardownLog::default();
                log.step("savepoint chain", controller.teardown().await);
                controller.connection().restore_raw();
                guard.restore();
                enter(LifecycleState::Closed);
                log.finish()
            }
            .boxed(),
        )
    }
}

impl Drop for TransactionalContext {
    fn drop(&mut self) {
        let Some(teardown) = self.begin_teardown() else {
            return;
        };
        tracing::warn!("transactional context dropped without teardown, cleaning up");
        match block_on_detached(teardown) {
            Some(Ok(())) => {}
            Some(Err(error)) => tracing::error!(%error, "teardown on drop failed"),
            None => tracing::error!("teardown on drop panicked"),
        }
    }
}

/// A pooled engine for setup shared across tests, disposed when dropped
pub struct ModuleEngine {
    engine: Arc<PooledEngine>,
    disposed: AtomicBool,
}

impl ModuleEngine {
    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.dispose().await
    }
}

impl Deref for ModuleEngine {
    type Target = PooledEngine;

    fn deref(&self) -> &PooledEngine {
        &self.engine
    }
}

impl Drop for ModuleEngine {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.engine.clone();
        if let Some(Err(error)) = block_on_detached(async move { engine.dispose().await }) {
            tracing::warn!(%error, "disposing module engine failed");
        }
    }
}

/// Entry point of a `#[transactional]` test.
///
/// # Panics
///
/// Panics when settings cannot be loaded or the context cannot be opened,
/// failing the test before its body runs.
pub async fn enter_marked(test: &'static str) -> Option<TransactionalContext> {
    let harness = Harness::global()
        .unwrap_or_else(|e| panic!("`{test}`: could not load txfixture settings: {e}"));
    match harness.transaction().await {
        Ok(Some(context)) => Some(context),
        Ok(None) => {
            tracing::warn!(test, "running without transactional isolation");
            None
        }
        Err(e) => panic!("`{test}`: could not open a transactional context: {e}"),
    }
}

/// Exit point of a `#[transactional]` test.
///
/// # Panics
///
/// Panics when teardown fails.
pub async fn exit_marked(test: &'static str, context: Option<TransactionalContext>) {
    if let Some(context) = context
        && let Err(e) = context.teardown().await
    {
        panic!("`{test}`: transactional teardown failed: {e}");
    }
}
