#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use pointsdb::{Config, Database, PointsDb};

/// Creates an initialized database file in a fresh temp directory.
///
/// The `TempDir` must be kept alive for the duration of the test; the
/// initializing connection is dropped before returning.
pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join(name);
    Database::open(&path).expect("initialize schema");
    (dir, path)
}

/// A verification connection, opened the same way the read pool opens its
/// connections.
pub fn open_read_only(path: &Path) -> Connection {
    pointsdb::schema::open_read_only(path).expect("read-only connection")
}

/// A second writer, for tests that sabotage tables between flushes.
pub fn open_read_write(path: &Path) -> Connection {
    Connection::open(path).expect("read-write connection")
}

/// A config with a short flush interval so tests are not dominated by the
/// 100 ms production default.
pub fn fast_config() -> Config {
    Config {
        flush_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

pub async fn open_fast(path: &Path) -> PointsDb {
    PointsDb::open_with_config(path, fast_config())
        .await
        .expect("open database")
}

/// Polls `check` until it returns `Some`, panicking once `timeout` is
/// spent. Used where a flush or refresh lands on its own schedule.
pub async fn eventually<T>(
    timeout: Duration,
    poll_every: Duration,
    mut check: impl FnMut() -> Option<T>,
) -> T {
    let give_up = std::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return value;
        }
        assert!(
            std::time::Instant::now() < give_up,
            "gave up waiting after {timeout:?}"
        );
        tokio::time::sleep(poll_every).await;
    }
}

// =============================================================================
// Store Inspection
// =============================================================================

pub fn balance_of(conn: &Connection, user: &str) -> Option<i64> {
    conn.query_row(
        "SELECT balance FROM user_points WHERE user_id = ?",
        [user],
        |row| row.get(0),
    )
    .ok()
}

pub fn ledger_sum(conn: &Connection, user: &str) -> i64 {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM point_txs WHERE user_id = ?",
        [user],
        |row| row.get(0),
    )
    .expect("sum ledger")
}

pub fn tx_count(conn: &Connection, user: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM point_txs WHERE user_id = ?",
        [user],
        |row| row.get(0),
    )
    .expect("count ledger rows")
}

pub fn total_tx_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM point_txs", [], |row| row.get(0))
        .expect("count all ledger rows")
}

/// Asserts the two global invariants: no negative balance, and the ledger
/// sums to the balances, per user and in total.
pub fn assert_ledger_consistent(conn: &Connection) {
    let negative: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM user_points WHERE balance < 0",
            [],
            |row| row.get(0),
        )
        .expect("count negative balances");
    assert_eq!(negative, 0, "found negative balances");

    let inconsistent: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM user_points u
             WHERE u.balance != (SELECT COALESCE(SUM(amount), 0)
                                 FROM point_txs t WHERE t.user_id = u.user_id)",
            [],
            |row| row.get(0),
        )
        .expect("check per-user consistency");
    assert_eq!(inconsistent, 0, "ledger does not replay to balances");
}
