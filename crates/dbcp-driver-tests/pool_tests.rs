//! Connection pool scenarios
//!
//! Acquire timeouts, capacity limits under concurrency, fairness, creation
//! retries, idle validation, the reducer and connection tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dbcp_pool::{DbcpError, Hook, Wait};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::fixtures::{Fairness, ScriptedDriver, test_config, test_data_source};

/// An exhausted pool fails a bounded acquire after the requested wait
#[rstest]
#[case::fair(Fairness::Fair)]
#[case::unfair(Fairness::Unfair)]
#[tokio::test]
async fn test_acquire_times_out_when_exhausted(#[case] fairness: Fairness) -> Result<()> {
    let config = test_config(2, 2).with_fair(fairness.is_fair());
    let (ds, driver) = test_data_source(config, ScriptedDriver::new())?;
    assert_eq!(ds.start().await?, 2);

    let first = ds.acquire_connection().await?;
    let second = ds.acquire_connection().await?;

    let started = Instant::now();
    let err = ds
        .acquire_connection_with(Wait::For(Duration::from_millis(100)))
        .await
        .expect_err("pool is exhausted");
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected a timeout, got {err}");
    assert!(
        elapsed >= Duration::from_millis(95),
        "gave up too early: {elapsed:?}"
    );
    assert!(elapsed < Duration::from_secs(1), "waited too long: {elapsed:?}");
    assert_eq!(driver.stats().connects(), 2, "no connection beyond max");

    first.close().await?;
    second.close().await?;
    ds.acquire_connection_with(Wait::NoWait).await?.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_no_wait_fails_immediately() -> Result<()> {
    let (ds, _driver) = test_data_source(test_config(0, 1), ScriptedDriver::new())?;
    let held = ds.acquire_connection().await?;

    let started = Instant::now();
    let err = ds
        .acquire_connection_with(Wait::NoWait)
        .await
        .expect_err("pool is exhausted");
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(50));

    held.close().await?;
    Ok(())
}

/// Many concurrent callers never hold more than `poolMaxSize` connections
#[rstest]
#[case::fair(Fairness::Fair)]
#[case::unfair(Fairness::Unfair)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_taken_connections_never_exceed_max(#[case] fairness: Fairness) -> Result<()> {
    let config = test_config(0, 3)
        .with_fair(fairness.is_fair())
        .with_create_timeout_ms(0);
    let (ds, driver) = test_data_source(config, ScriptedDriver::new())?;
    let ds = Arc::new(ds);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..30 {
        let ds = ds.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let conn = ds.acquire_connection().await?;
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            conn.close().await?;
            Ok::<_, anyhow::Error>(())
        }));
    }
    for task in tasks {
        task.await.context("worker panicked")??;
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(driver.stats().connects() <= 3);
    assert!(driver.open_connections() <= 3);
    assert_eq!(ds.stats().taken(), 0);
    assert_eq!(ds.stats().waiting(), 0);
    Ok(())
}

/// A fair pool hands released connections to waiters in arrival order
#[tokio::test]
async fn test_fair_pool_serves_waiters_in_order() -> Result<()> {
    let config = test_config(0, 1).with_fair(true).with_create_timeout_ms(0);
    let (ds, _driver) = test_data_source(config, ScriptedDriver::new())?;
    let ds = Arc::new(ds);
    let held = ds.acquire_connection().await?;
    let served = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for id in 0..3 {
        let ds = ds.clone();
        let served = served.clone();
        waiters.push(tokio::spawn(async move {
            let conn = ds.acquire_connection().await?;
            served.lock().push(id);
            conn.close().await?;
            Ok::<_, anyhow::Error>(())
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(ds.stats().waiting(), 3);

    held.close().await?;
    for waiter in waiters {
        waiter.await.context("waiter panicked")??;
    }
    assert_eq!(*served.lock(), vec![0, 1, 2]);
    Ok(())
}

/// Two refused connects followed by a success, with three retries allowed
#[tokio::test]
async fn test_creation_retries_then_succeeds() -> Result<()> {
    let config = test_config(0, 1).with_retry(3, 20);
    let driver = ScriptedDriver::new().with_failing_connects(2);
    let (ds, driver) = test_data_source(config, driver)?;

    let reported = Arc::new(Mutex::new(None));
    {
        let reported = reported.clone();
        ds.register_hook(Hook::init_connection_fn(move |_raw, taken| {
            *reported.lock() = Some(taken);
            Ok(())
        }));
    }

    let conn = ds
        .acquire_connection()
        .await
        .context("third attempt should succeed")?;
    assert_eq!(driver.stats().connects(), 3);

    // The init hook sees the time spent across every attempt
    let taken = (*reported.lock()).context("init hook did not run")?;
    assert!(taken >= Duration::from_millis(40), "took only {taken:?}");

    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_creation_gives_up_after_retries() -> Result<()> {
    let config = test_config(0, 1).with_retry(2, 5);
    let driver = ScriptedDriver::new().with_failing_connects(10);
    let (ds, driver) = test_data_source(config, driver)?;

    let err = ds
        .acquire_connection()
        .await
        .expect_err("every attempt is refused");
    match err {
        DbcpError::CreationFailure { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, DbcpError::Connection(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.stats().connects(), 3);
    assert_eq!(ds.stats().created(), 0);

    // The failed creation released its capacity
    driver.fail_next_connects(0);
    ds.acquire_connection_with(Wait::NoWait).await?.close().await?;
    Ok(())
}

/// With an idle limit of zero every take from the idle set validates once
#[tokio::test]
async fn test_idle_limit_zero_validates_each_take_once() -> Result<()> {
    let config = test_config(0, 1).with_idle_limit_secs(0);
    let (ds, driver) = test_data_source(config, ScriptedDriver::new())?;
    let hook_calls = Arc::new(AtomicUsize::new(0));
    {
        let hook_calls = hook_calls.clone();
        ds.register_hook(Hook::validate_connection_fn(move |_raw, _idle| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    }

    // Freshly created: nothing to validate
    ds.acquire_connection().await?.close().await?;
    assert_eq!(driver.stats().validations(), 0);

    ds.acquire_connection().await?.close().await?;
    assert_eq!(driver.stats().validations(), 1);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

    ds.acquire_connection().await?.close().await?;
    assert_eq!(driver.stats().validations(), 2);
    assert_eq!(driver.stats().connects(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_idle_connection_is_replaced() -> Result<()> {
    let config = test_config(0, 1).with_idle_limit_secs(0);
    let (ds, driver) = test_data_source(config, ScriptedDriver::new())?;

    ds.acquire_connection().await?.close().await?;
    driver
        .connections()
        .first()
        .context("a connection was opened")?
        .invalidate();

    let conn = ds.acquire_connection().await?;
    assert_eq!(driver.stats().connects(), 2);
    assert_eq!(driver.stats().closes(), 1);
    assert_eq!(driver.open_connections(), 1);
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_negative_idle_limit_never_validates() -> Result<()> {
    let config = test_config(0, 1).with_idle_limit_secs(-1);
    let (ds, driver) = test_data_source(config, ScriptedDriver::new())?;
    for _ in 0..3 {
        ds.acquire_connection().await?.close().await?;
    }
    assert_eq!(driver.stats().validations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reduce_shrinks_to_initial_size() -> Result<()> {
    let (ds, driver) = test_data_source(test_config(1, 4), ScriptedDriver::new())?;
    ds.start().await?;

    let mut taken = Vec::new();
    for _ in 0..4 {
        taken.push(ds.acquire_connection().await?);
    }
    for conn in taken {
        conn.close().await?;
    }
    assert_eq!(driver.open_connections(), 4);

    assert_eq!(ds.pool().reduce(0).await, 3);
    assert_eq!(driver.open_connections(), 1);
    assert_eq!(ds.stats().created(), 1);
    Ok(())
}

#[tokio::test]
async fn test_background_reducer_releases_unused_connections() -> Result<()> {
    let config = test_config(0, 4).with_reducer(1, 4);
    let (ds, driver) = test_data_source(config, ScriptedDriver::new())?;
    ds.start().await?;

    let a = ds.acquire_connection().await?;
    let b = ds.acquire_connection().await?;
    a.close().await?;
    b.close().await?;
    assert_eq!(driver.open_connections(), 2);

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(driver.open_connections(), 0);
    ds.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_connection_tracking_records_takers() -> Result<()> {
    let mut config = test_config(0, 2);
    config.pool_enable_connection_tracking = true;
    let (ds, _driver) = test_data_source(config, ScriptedDriver::new())?;

    let first = ds.acquire_connection().await?;
    let second = ds.acquire_connection().await?;
    let taken = ds.taken_connections();
    assert_eq!(
        taken.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![first.id(), second.id()]
    );
    assert!(taken.iter().all(|t| !t.backtrace.is_empty()));

    first.close().await?;
    second.close().await?;
    assert!(ds.taken_connections().is_empty());
    Ok(())
}
