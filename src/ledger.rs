//! # Flush Engine
//!
//! Turns a buffer of point operations into exactly one store transaction.
//! This is where the throughput win lives: thousands of logical operations
//! that would each contend on a per-user row become three bulk statements.
//!
//! ## Flush Anatomy
//!
//! ```text
//! BEGIN IMMEDIATE
//!   1. SELECT balances for every distinct user in the batch   (one query)
//!   2. apply ops in arrival order against the in-memory map
//!        debit below zero  → record InsufficientBalance, skip
//!        otherwise         → update map, mark dirty, stage ledger row
//!   3. INSERT all staged point_txs rows                       (one statement)
//!   4. UPSERT all dirty user_points rows                      (one statement)
//! COMMIT
//! ```
//!
//! On any failure the transaction rolls back, the per-op outcomes computed
//! in step 2 are discarded, and the caller receives a single batch-level
//! error to fan out.
//!
//! ## Invariants
//!
//! - Ops are applied in arrival order; the second op on a user sees the
//!   first op's effect through the in-memory map before either is written.
//! - Every accepted op stages exactly one ledger row and moves exactly one
//!   balance by its amount, atomically with the rest of the batch.
//! - The state map, dirty set, and staged rows live only for the duration
//!   of one call; nothing is shared across flushes or threads.

use std::collections::{HashMap, HashSet};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::error::{Error, Result};
use crate::types::{current_time_ms, FlushStats, PointOp, TxId};

// =============================================================================
// Ledger
// =============================================================================

/// The flush engine. Owns the sole write connection.
///
/// # Single Writer
///
/// Constructing a `Ledger` consumes the connection, and the accumulator
/// thread consumes the `Ledger`; no other execution context can reach the
/// write path. None of the per-flush state needs locking for that reason.
pub struct Ledger {
    conn: Connection,
}

/// One staged ledger row, waiting for the bulk insert.
struct StagedTx {
    id: TxId,
    user_id: String,
    amount: i64,
}

impl Ledger {
    /// Wraps an initialized write connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Applies a batch of operations in one transaction.
    ///
    /// Returns one outcome per operation, in input order, plus flush
    /// statistics. Per-op rejections (insufficient balance, overflow) are
    /// outcomes, not errors; the `Err` arm of the outer `Result` means the
    /// whole transaction failed and rolled back.
    pub fn apply_batch(&mut self, ops: &[PointOp]) -> Result<(Vec<Result<()>>, FlushStats)> {
        if ops.is_empty() {
            return Ok((Vec::new(), FlushStats::default()));
        }

        // Raw BEGIN/COMMIT instead of rusqlite's Transaction type: the
        // borrow it holds on the connection would pin `self` for the whole
        // flush body.
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        match self.apply_batch_inner(ops) {
            Ok(result) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(result),
                Err(e) => {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// The transaction body: read, apply, stage, write back.
    fn apply_batch_inner(&mut self, ops: &[PointOp]) -> Result<(Vec<Result<()>>, FlushStats)> {
        let mut state = self.read_balances(ops)?;

        let mut dirty: HashSet<String> = HashSet::new();
        let mut staged: Vec<StagedTx> = Vec::with_capacity(ops.len());
        let mut outcomes: Vec<Result<()>> = Vec::with_capacity(ops.len());
        let mut stats = FlushStats {
            ops: ops.len(),
            ..FlushStats::default()
        };

        for op in ops {
            let user = op.user_id.as_str();
            let balance = state.get(user).copied().unwrap_or(0);

            let new_balance = match balance.checked_add(op.amount) {
                Some(v) => v,
                None => {
                    stats.rejected += 1;
                    outcomes.push(Err(Error::BalanceOverflow {
                        user_id: user.to_string(),
                    }));
                    continue;
                }
            };

            if new_balance < 0 {
                stats.rejected += 1;
                outcomes.push(Err(Error::InsufficientBalance {
                    user_id: user.to_string(),
                    balance,
                    amount: op.amount,
                }));
                continue;
            }

            state.insert(user.to_string(), new_balance);
            dirty.insert(user.to_string());
            staged.push(StagedTx {
                id: TxId::generate(),
                user_id: user.to_string(),
                amount: op.amount,
            });
            stats.accepted += 1;
            outcomes.push(Ok(()));
        }

        stats.dirty_users = dirty.len();

        self.insert_tx_logs(&staged)?;
        self.upsert_balances(&state, &dirty)?;

        Ok((outcomes, stats))
    }

    /// Batched keyed read of every distinct user's balance.
    ///
    /// Users with no stored row are simply absent from the map; callers
    /// default them to 0.
    fn read_balances(&self, ops: &[PointOp]) -> Result<HashMap<String, i64>> {
        let users: Vec<&str> = {
            let mut seen = HashSet::new();
            ops.iter()
                .map(|op| op.user_id.as_str())
                .filter(|u| seen.insert(*u))
                .collect()
        };

        let mut map = HashMap::with_capacity(users.len());
        if users.is_empty() {
            return Ok(map);
        }

        // One placeholder per user. max_batch stays far below SQLite's
        // host-parameter limit, so a single IN list always fits.
        let placeholders = vec!["?"; users.len()].join(", ");
        let sql =
            format!("SELECT user_id, balance FROM user_points WHERE user_id IN ({placeholders})");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(users.iter()), |row| {
            let user_id: String = row.get(0)?;
            let balance: i64 = row.get(1)?;
            Ok((user_id, balance))
        })?;

        for row in rows {
            let (user_id, balance) = row?;
            map.insert(user_id, balance);
        }

        Ok(map)
    }

    /// Bulk-inserts all staged ledger rows in a single statement.
    fn insert_tx_logs(&self, staged: &[StagedTx]) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }

        let created_ms = current_time_ms() as i64;

        let values = vec!["(?, ?, ?, ?)"; staged.len()].join(", ");
        let sql =
            format!("INSERT INTO point_txs (id, user_id, amount, created_ms) VALUES {values}");

        let mut args: Vec<Value> = Vec::with_capacity(staged.len() * 4);
        for tx in staged {
            args.push(Value::Text(tx.id.to_text()));
            args.push(Value::Text(tx.user_id.clone()));
            args.push(Value::Integer(tx.amount));
            args.push(Value::Integer(created_ms));
        }

        self.conn.execute(&sql, params_from_iter(args))?;
        Ok(())
    }

    /// Bulk-upserts every dirty balance in a single statement.
    ///
    /// Untouched users (present in the state map only because they were
    /// read) are not written back.
    fn upsert_balances(&self, state: &HashMap<String, i64>, dirty: &HashSet<String>) -> Result<()> {
        if dirty.is_empty() {
            return Ok(());
        }

        let values = vec!["(?, ?)"; dirty.len()].join(", ");
        let sql = format!(
            "INSERT INTO user_points (user_id, balance) VALUES {values} \
             ON CONFLICT(user_id) DO UPDATE SET balance = excluded.balance"
        );

        let mut args: Vec<Value> = Vec::with_capacity(dirty.len() * 2);
        for user_id in dirty {
            args.push(Value::Text(user_id.clone()));
            args.push(Value::Integer(state[user_id]));
        }

        self.conn.execute(&sql, params_from_iter(args))?;
        Ok(())
    }

    /// Immediately upserts one feature registry row.
    ///
    /// Not batched: registry writes are rare administrative actions, and
    /// running them on the write connection keeps the single-writer
    /// invariant intact.
    pub fn set_feature(&mut self, name: &str, active: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO features (name, active) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET active = excluded.active",
            params![name, active],
        )?;
        Ok(())
    }

    /// Direct access to the write connection, for tests.
    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
