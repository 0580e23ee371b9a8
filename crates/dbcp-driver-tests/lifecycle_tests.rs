//! Handle lifecycle scenarios
//!
//! Idempotent and cascading close, attribute reset between uses, abandoned
//! handles and termination while connections are still taken.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use dbcp_core::{TransactionIsolation, Value};
use dbcp_pool::{DbcpError, Hook, Wait};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::fixtures::{ConnectionAttributes, ScriptedDriver, test_config, test_data_source};

const FILMS: &str = "select title from film";

fn scripted() -> ScriptedDriver {
    ScriptedDriver::new().with_result(
        FILMS,
        vec![
            vec![Value::from("ACADEMY DINOSAUR")],
            vec![Value::from("ACE GOLDFINGER")],
        ],
    )
}

/// Racing closes from many tasks return the connection exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_runs_once() -> Result<()> {
    let (ds, driver) = test_data_source(test_config(0, 2), scripted())?;
    let close_hook_calls = Arc::new(AtomicUsize::new(0));
    {
        let close_hook_calls = close_hook_calls.clone();
        ds.register_hook(Hook::close_connection_fn(move |_raw, _taken| {
            close_hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    }

    let conn = ds.acquire_connection().await?;
    let mut closers = Vec::new();
    for _ in 0..8 {
        let conn = conn.clone();
        closers.push(tokio::spawn(async move { conn.close().await }));
    }
    for closer in closers {
        closer.await.context("closer panicked")??;
    }

    assert!(conn.is_closed());
    assert_eq!(close_hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ds.stats().taken(), 0);
    assert_eq!(ds.stats().idle(), 1);
    assert_eq!(driver.stats().closes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_close_cascades_to_statements_and_cursors() -> Result<()> {
    let (ds, driver) = test_data_source(test_config(0, 1), scripted())?;
    let conn = ds.acquire_connection().await?;

    let first = conn.create_statement().await?;
    let second = conn.prepare_statement(FILMS).await?;
    let plain_cursor = first.execute_query_sql(FILMS).await?;
    let prepared_cursor = second.execute_query().await?;
    plain_cursor.next().await?;
    assert_eq!(conn.open_statements(), 2);

    conn.close().await?;

    assert!(first.is_closed() && second.is_closed());
    assert!(plain_cursor.is_closed() && prepared_cursor.is_closed());
    assert_eq!(driver.stats().cursor_closes(), 2);
    assert_eq!(driver.stats().statement_closes(), 2);

    let err = plain_cursor.next().await.expect_err("cursor is closed");
    assert!(matches!(err, DbcpError::Closed("result cursor")));
    let err = second.execute_query().await.expect_err("statement is closed");
    assert!(matches!(err, DbcpError::Closed("statement")));
    Ok(())
}

/// Attributes changed by the application are put back before the next use
#[rstest]
#[case::reset(true, ConnectionAttributes {
    auto_commit: Some(true),
    isolation: Some(TransactionIsolation::ReadCommitted),
    ..Default::default()
})]
#[case::kept(false, ConnectionAttributes {
    auto_commit: Some(false),
    isolation: Some(TransactionIsolation::Serializable),
    ..Default::default()
})]
#[tokio::test]
async fn test_attributes_after_close(
    #[case] reset_defaults_after_use: bool,
    #[case] expected: ConnectionAttributes,
) -> Result<()> {
    let mut config = test_config(0, 1);
    config.reset_defaults_after_use = reset_defaults_after_use;
    config.default_auto_commit = Some(true);
    config.default_transaction_isolation = Some(TransactionIsolation::ReadCommitted);
    let (ds, driver) = test_data_source(config, scripted())?;

    let conn = ds.acquire_connection().await?;
    let physical = driver
        .connections()
        .first()
        .cloned()
        .context("a connection was opened")?;
    assert_eq!(physical.attributes().auto_commit, Some(true), "applied on creation");

    conn.set_auto_commit(false).await?;
    conn.set_transaction_isolation(TransactionIsolation::Serializable)
        .await?;
    conn.close().await?;

    let again = ds.acquire_connection().await?;
    assert_eq!(driver.stats().connects(), 1, "same physical connection");
    assert_eq!(physical.attributes(), expected);
    again.close().await?;
    Ok(())
}

/// Terminating leaves taken connections alone until they are closed
#[tokio::test]
async fn test_terminate_with_taken_connection() -> Result<()> {
    let (ds, driver) = test_data_source(test_config(2, 2), scripted())?;
    ds.start().await?;
    let held = ds.acquire_connection().await?;

    ds.terminate().await;
    assert!(ds.is_terminated());
    assert_eq!(driver.open_connections(), 1, "only the idle one was closed");

    let rows = held
        .create_statement()
        .await?
        .execute_query_sql(FILMS)
        .await?
        .fetch_all()
        .await?;
    assert_eq!(rows.len(), 2, "a taken connection stays usable");
    assert_eq!(rows[0].get(0), Some(&Value::from("ACADEMY DINOSAUR")));

    held.close().await?;
    assert_eq!(driver.open_connections(), 0);

    let err = ds
        .acquire_connection_with(Wait::NoWait)
        .await
        .expect_err("pool is terminated");
    assert!(matches!(err, DbcpError::Closed(_)));
    Ok(())
}

#[tokio::test]
async fn test_abandoned_connection_is_released() -> Result<()> {
    let (ds, driver) = test_data_source(test_config(0, 1), scripted())?;

    {
        let abandoned = ds.acquire_connection().await?;
        abandoned.commit().await?;
    }

    assert_eq!(ds.stats().taken(), 0);
    let conn = ds.acquire_connection_with(Wait::NoWait).await?;
    assert_eq!(driver.stats().connects(), 1, "released back to the idle set");
    conn.close().await?;
    Ok(())
}

/// With attribute reset configured an abandoned connection cannot be reset,
/// so it is closed instead of reused
#[tokio::test]
async fn test_abandoned_connection_with_reset_is_destroyed() -> Result<()> {
    let mut config = test_config(0, 1);
    config.reset_defaults_after_use = true;
    config.default_auto_commit = Some(true);
    let (ds, driver) = test_data_source(config, scripted())?;

    drop(ds.acquire_connection().await?);

    let conn = ds
        .acquire_connection_with(Wait::For(Duration::from_secs(1)))
        .await?;
    assert_eq!(driver.stats().connects(), 2);
    assert_eq!(driver.stats().closes(), 1);
    conn.close().await?;
    Ok(())
}

/// A fatal error on one connection does not affect the next acquire
#[tokio::test]
async fn test_fatal_error_replaces_connection() -> Result<()> {
    let (ds, driver) = test_data_source(test_config(0, 1), scripted())?;

    let conn = ds.acquire_connection().await?;
    let err = conn
        .create_statement()
        .await?
        .execute_update_sql("delete from rental -- disconnect")
        .await
        .expect_err("server went away");
    assert!(err.is_connection_fatal());
    assert!(conn.is_invalidated());
    conn.close().await?;
    assert_eq!(driver.open_connections(), 0);

    let conn = ds.acquire_connection_with(Wait::NoWait).await?;
    assert_eq!(driver.stats().connects(), 2);
    let updated = conn
        .create_statement()
        .await?
        .execute_update_sql("delete from rental where id = 1")
        .await?;
    assert_eq!(updated, 1);
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_close_reports_every_failure() -> Result<()> {
    let (ds, _driver) = test_data_source(test_config(0, 1), scripted())?;
    ds.register_hook(Hook::close_connection_fn(|_raw, _taken| {
        Err(DbcpError::Hook("audit log unavailable".into()))
    }));

    let conn = ds.acquire_connection().await?;
    let cursor = conn
        .create_statement()
        .await?
        .execute_query_sql(FILMS)
        .await?;

    let err = conn.close().await.expect_err("close hook fails");
    let causes: Vec<String> = err.into_causes().iter().map(ToString::to_string).collect();
    assert_eq!(causes, vec!["Hook error: audit log unavailable"]);
    assert!(cursor.is_closed());

    // The connection still went back to the pool
    assert_eq!(ds.stats().idle(), 1);
    ds.acquire_connection_with(Wait::NoWait).await?.close().await?;
    Ok(())
}
