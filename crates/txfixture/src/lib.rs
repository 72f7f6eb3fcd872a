//! txfixture - transactional isolation for tests that talk to a real database
//!
//! Every test runs inside one outer transaction that is always rolled back.
//! Sessions, engines and raw driver connections handed to the test (and to
//! the application code it calls) are facades that turn commits and
//! rollbacks into savepoints on that transaction.
//!
//! ```ignore
//! let harness = Harness::new(Settings::discover()?).with_database(database);
//! let ctx = harness.transaction().await?.expect("database reachable");
//! ctx.db_session().execute("DELETE FROM users", &[]).await?;
//! ctx.teardown().await?; // nothing was deleted
//! ```

pub mod facade;
mod fixtures;
mod savepoint;
pub mod settings;
pub mod substitution;
mod teardown;

pub use facade::{
    ConnectionFacade, EngineFacade, FakeSessionFactory, NestedTransaction, SavepointedRawConnection,
    SessionFacade,
};
pub use fixtures::{Harness, LifecycleState, ModuleEngine, TransactionalContext, install_database};
pub use savepoint::{SavepointController, SavepointRestarter};
pub use settings::Settings;
pub use substitution::{
    SubstitutionBindings, SubstitutionGuard, SubstitutionPolicy, SubstitutionTarget, TargetKind,
};
pub use txfixture_macros::transactional;

pub use txfixture_core as core;

#[doc(hidden)]
pub mod __private {
    pub use crate::fixtures::{enter_marked, exit_marked};
}
