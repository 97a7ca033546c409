//! Cancellation Semantics Tests
//!
//! A producer deadline is the producer's problem, not the batch's: an op
//! whose caller gave up may still commit, and the store stays consistent
//! either way. Shutdown abandons buffered work with cancellation.

mod common;

use std::time::Duration;

use pointsdb::{Config, Error, PointsDb};

/// The caller's deadline expires before the flush; the op commits anyway
/// and both invariants hold (scenario: submit, cancel, verify).
#[tokio::test]
async fn expired_deadline_op_still_commits() {
    let (_dir, path) = common::create_temp_db_file("cancel_commit.db");
    let config = Config {
        // Flush long after the caller's 20 ms deadline.
        flush_interval: Duration::from_millis(300),
        ..Config::default()
    };
    let db = PointsDb::open_with_config(&path, config).await.unwrap();

    let result = db
        .submit_with_deadline("u1", 42, Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));

    // The abandoned completion is dropped silently; the op itself lands
    // with its batch.
    let conn = common::open_read_only(&path);
    common::eventually(
        Duration::from_secs(5),
        Duration::from_millis(20),
        || (common::balance_of(&conn, "u1") == Some(42)).then_some(()),
    )
    .await;

    common::assert_ledger_consistent(&conn);

    db.shutdown().await;
}

/// A deadline generous enough for the flush sees a normal completion.
#[tokio::test]
async fn deadline_met_returns_outcome() {
    let (_dir, path) = common::create_temp_db_file("cancel_met.db");
    let db = common::open_fast(&path).await;

    db.submit_with_deadline("u1", 5, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(db.balance("u1").await.unwrap(), 5);

    db.shutdown().await;
}

/// Explicit shutdown abandons buffered ops: the producer observes
/// cancellation and nothing reaches the store.
#[tokio::test]
async fn shutdown_abandons_buffer() {
    let (_dir, path) = common::create_temp_db_file("cancel_shutdown.db");
    let config = Config {
        // No timer flush within the test.
        flush_interval: Duration::from_secs(30),
        ..Config::default()
    };
    let db = PointsDb::open_with_config(&path, config).await.unwrap();

    let handle = db.accumulator();
    let producer = tokio::spawn(async move { handle.submit("u1", 7).await });

    // Let the op reach the buffer, then shut down before any flush.
    tokio::time::sleep(Duration::from_millis(50)).await;
    db.shutdown().await;

    let result = producer.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    let conn = common::open_read_only(&path);
    assert_eq!(common::balance_of(&conn, "u1"), None);
    assert_eq!(common::total_tx_count(&conn), 0);
}

/// Submitting after shutdown fails with cancellation rather than hanging.
#[tokio::test]
async fn submit_after_shutdown_is_cancelled() {
    let (_dir, path) = common::create_temp_db_file("cancel_after.db");
    let db = common::open_fast(&path).await;

    let handle = db.accumulator();
    db.shutdown().await;

    let result = handle.submit("u1", 1).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}
