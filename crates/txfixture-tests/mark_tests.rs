//! Marker Tests
//!
//! `#[transactional]` tests get their context from `Harness::global()`, which
//! reads `txfixture.toml` next to this crate and uses the database installed
//! below, before any test runs.

use crate::fixtures::{CREATE_USER_TABLE, INSERT_TESTER, init_tracing};
use anyhow::Result;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use txfixture::core::registry::{self, GlobalObject};
use txfixture::core::{Database, SessionOptions};
use txfixture::{Harness, install_database, transactional};
use txfixture_orm::{OrmSession, SqlDatabase};

/// Registry name listed under `mocked-sessions` in txfixture.toml
const MARKER_SESSION: &str = "marker.session";

#[ctor::ctor]
fn install_marker_database() {
    init_tracing();
    let installed = txfixture_drivers::block_on_detached(async {
        let path = tempfile::Builder::new()
            .prefix("txfixture-marker-")
            .suffix(".db")
            .tempfile()?
            .into_temp_path()
            .keep()?;
        let database = SqlDatabase::connect(&format!("sqlite://{}", path.display()))?;
        database.engine().execute(CREATE_USER_TABLE, &[]).await?;

        let session = OrmSession::new(SessionOptions::bound_to(
            database.engine().connect().await?,
        ));
        registry::register(MARKER_SESSION, GlobalObject::Session(Arc::new(session)));
        install_database(Arc::new(database));
        anyhow::Ok(())
    });
    match installed {
        Some(Ok(())) => {}
        Some(Err(e)) => panic!("Failed to install the marker database: {e:#}"),
        None => panic!("Installing the marker database panicked"),
    }
}

/// Insert the same row and commit it; run twice, this only passes if each
/// run starts from an empty table
async fn insert_and_commit_tester() -> Result<()> {
    let session = registry::session(MARKER_SESSION)?;
    session.execute(INSERT_TESTER, &[]).await?;
    session.commit().await?;

    let result = session.query("SELECT id FROM user", &[]).await?;
    assert_eq!(result.row_count(), 1);
    Ok(())
}

#[transactional]
#[tokio::test]
async fn test_marked_insert_first() -> Result<()> {
    insert_and_commit_tester().await
}

#[transactional]
#[tokio::test]
async fn test_marked_insert_second() -> Result<()> {
    insert_and_commit_tester().await
}

#[transactional]
#[tokio::test]
async fn test_marked_early_return() -> Result<()> {
    let session = registry::session(MARKER_SESSION)?;
    session.execute(INSERT_TESTER, &[]).await?;
    if session.transaction_depth() > 0 {
        return Ok(());
    }
    unreachable!("the transactional session always has a savepoint open");
}

/// Test that the global harness picks up the settings file and the
/// installed database
#[tokio::test]
async fn test_global_harness_uses_settings_file() -> Result<()> {
    let harness = Harness::global()?;
    assert_eq!(harness.settings().mocked_sessions, vec![MARKER_SESSION]);
    assert!(matches!(
        registry::lookup(MARKER_SESSION),
        Some(GlobalObject::Session(_))
    ));
    Ok(())
}
