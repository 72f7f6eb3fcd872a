//! Transactional Context Tests
//!
//! Writes made through the session, engine and raw connection facades are
//! visible inside their context and gone once it is torn down, however the
//! test tried to commit them.

use crate::fixtures::{INSERT_TESTER, TestDatabase, test_db, users_of};
use anyhow::{Context, Result};
use pretty_assertions::assert_eq;
use rstest::rstest;
use txfixture::LifecycleState;
use txfixture::core::{Connection, Engine, Session, TxFixtureError};

#[derive(Debug, Clone, Copy)]
enum Through {
    Session,
    Engine,
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

/// Test that neither commits nor rollbacks outlive the context
#[rstest]
#[case::session_commit(Through::Session, Finish::Commit)]
#[case::session_rollback(Through::Session, Finish::Rollback)]
#[case::engine_commit(Through::Engine, Finish::Commit)]
#[case::engine_rollback(Through::Engine, Finish::Rollback)]
#[tokio::test]
async fn test_changes_do_not_outlive_context(
    #[future(awt)] test_db: TestDatabase,
    #[case] through: Through,
    #[case] finish: Finish,
) -> Result<()> {
    let ctx = test_db.open().await?;
    assert_eq!(ctx.state(), LifecycleState::TestRunning);

    match through {
        Through::Session => {
            let session = ctx.db_session();
            session.execute(INSERT_TESTER, &[]).await?;
            match finish {
                Finish::Commit => session.commit().await?,
                Finish::Rollback => session.rollback().await?,
            }
        }
        Through::Engine => {
            let tx = ctx.db_engine().begin().await?;
            tx.execute(INSERT_TESTER, &[]).await?;
            match finish {
                Finish::Commit => tx.commit().await?,
                Finish::Rollback => tx.rollback().await?,
            }
        }
    }
    assert_eq!(
        ctx.connection().savepoint_depth(),
        1,
        "Savepoint chain should be restarted"
    );
    ctx.teardown().await?;

    assert!(test_db.committed_users().await?.is_empty());

    let next = test_db.open().await?;
    let result = next
        .db_session()
        .query("SELECT id, name FROM user WHERE id = 1", &[])
        .await?;
    assert!(result.rows.is_empty(), "Row should not reach the next context");
    next.teardown().await?;
    Ok(())
}

/// Test that a test's own commit is visible for the rest of the test
#[rstest]
#[tokio::test]
async fn test_commit_visible_inside_context(#[future(awt)] test_db: TestDatabase) -> Result<()> {
    let ctx = test_db.open().await?;
    let session = ctx.db_session();

    session.execute(INSERT_TESTER, &[]).await?;
    session.commit().await?;

    let result = ctx
        .db_engine()
        .query("SELECT id, name FROM user", &[])
        .await?;
    assert_eq!(users_of(&result)?, vec![(1, "tester".to_string())]);

    ctx.teardown().await?;
    assert!(test_db.committed_users().await?.is_empty());
    Ok(())
}

/// Test that a failing statement leaves the context usable
#[rstest]
#[tokio::test]
async fn test_failed_statement_keeps_context_usable(
    #[future(awt)] test_db: TestDatabase,
) -> Result<()> {
    let ctx = test_db.open().await?;
    let engine = ctx.db_engine();

    let err = engine
        .execute("INSERT INTO no_such_table (id) VALUES (1)", &[])
        .await
        .expect_err("insert into a missing table should fail");
    assert!(matches!(err, TxFixtureError::Query(_)), "got {err:?}");

    engine.execute(INSERT_TESTER, &[]).await?;
    let result = engine.query("SELECT id, name FROM user", &[]).await?;
    assert_eq!(result.row_count(), 1);

    ctx.teardown().await?;
    assert!(test_db.committed_users().await?.is_empty());
    Ok(())
}

/// Test that a raw connection rollback discards only what the raw
/// connection wrote
#[rstest]
#[tokio::test]
async fn test_raw_rollback_discards_only_raw_writes(
    #[future(awt)] test_db: TestDatabase,
) -> Result<()> {
    let ctx = test_db.open().await?;
    ctx.db_session().execute(INSERT_TESTER, &[]).await?;

    let raw = ctx.db_engine().raw_connection().await?;
    raw.execute("INSERT INTO user (id, name) VALUES (2, 'raw')", &[])
        .await?;
    raw.rollback().await?;
    raw.commit().await?;
    raw.close().await?;

    let result = ctx
        .db_session()
        .query("SELECT id, name FROM user ORDER BY id", &[])
        .await?;
    assert_eq!(users_of(&result)?, vec![(1, "tester".to_string())]);

    ctx.teardown().await?;
    assert!(test_db.committed_users().await?.is_empty());
    Ok(())
}

/// Test that a dropped table stays dropped for the test and is back for the
/// next one
#[rstest]
#[tokio::test]
async fn test_dropped_table_returns_in_next_context(
    #[future(awt)] test_db: TestDatabase,
) -> Result<()> {
    let ctx = test_db.open().await?;
    let engine = ctx.db_engine();
    assert!(engine.has_table("user").await?);

    engine.execute("DROP TABLE user", &[]).await?;
    assert!(!engine.has_table("user").await?);
    assert!(engine.query("SELECT * FROM user", &[]).await.is_err());
    ctx.teardown().await?;

    let next = test_db.open().await?;
    assert!(next.db_engine().has_table("user").await?);
    next.teardown().await?;
    Ok(())
}

/// Test that closing or disposing through the facades does not end the
/// context
#[rstest]
#[tokio::test]
async fn test_close_and_dispose_are_ignored(#[future(awt)] test_db: TestDatabase) -> Result<()> {
    let ctx = test_db.open().await?;

    let conn = ctx.db_engine().connect().await?;
    conn.execute(INSERT_TESTER, &[]).await?;
    conn.close().await?;
    ctx.db_engine().dispose().await?;
    ctx.db_session().close().await?;

    let result = ctx.db_session().query("SELECT id, name FROM user", &[]).await?;
    assert_eq!(result.row_count(), 1);
    assert!(ctx.db_engine().url().starts_with("txfixture+sqlite://"));

    ctx.teardown().await?;
    assert!(test_db.committed_users().await?.is_empty());
    Ok(())
}

/// Test that a context dropped without teardown still rolls back and gives
/// its connection back
#[rstest]
#[tokio::test]
async fn test_drop_without_teardown_rolls_back(
    #[future(awt)] test_db: TestDatabase,
) -> Result<()> {
    {
        let ctx = test_db.open().await?;
        ctx.db_session().execute(INSERT_TESTER, &[]).await?;
        ctx.db_session().commit().await?;
    }

    assert!(test_db.committed_users().await?.is_empty());
    let next = test_db.open().await?;
    next.db_session().execute(INSERT_TESTER, &[]).await?;
    next.teardown().await?;
    Ok(())
}

/// Test that a nested transaction inside the test keeps its own semantics
#[rstest]
#[tokio::test]
async fn test_nested_rollback_keeps_outer_writes(
    #[future(awt)] test_db: TestDatabase,
) -> Result<()> {
    let ctx = test_db.open().await?;
    let engine = ctx.db_engine();
    engine.execute(INSERT_TESTER, &[]).await?;

    let outer = engine.begin().await?;
    outer
        .execute("INSERT INTO user (id, name) VALUES (2, 'outer')", &[])
        .await?;
    let inner = ctx.connection().begin_nested().await?;
    inner
        .execute("INSERT INTO user (id, name) VALUES (3, 'inner')", &[])
        .await?;
    assert_eq!(ctx.connection().savepoint_depth(), 3);
    inner.rollback().await?;
    outer.commit().await?;
    assert_eq!(ctx.connection().savepoint_depth(), 1);

    let result = engine.query("SELECT id, name FROM user ORDER BY id", &[]).await?;
    let ids: Vec<i64> = users_of(&result)?.into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![1, 2]);

    ctx.teardown().await.context("teardown")?;
    assert!(test_db.committed_users().await?.is_empty());
    Ok(())
}
