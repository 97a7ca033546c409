//! # Error Handling for PointsDB
//!
//! A single error enum ([`Error`]) represents every failure mode, which keeps
//! function signatures simple and lets callers match uniformly.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Per-operation | Insufficient balance, overflow | Caller decides; other ops unaffected |
//! | Batch-level | Flush transaction failed | Every op in the batch fails; retry |
//! | Cancellation | Deadline elapsed, accumulator gone | Op may or may not have applied |
//! | Startup | Bad config, initial snapshot failed | Fatal, fix and restart |
//! | Internal | SQLite error | Log and investigate |
//!
//! Per-operation errors are *recorded* by the flush engine and delivered
//! through each operation's completion handle; they never abort the batch.
//! Batch-level errors roll the whole transaction back and surface the same
//! failure to every operation in it.

use std::sync::Arc;

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in PointsDB operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Per-Operation Errors (other ops in the batch are unaffected)
    // =========================================================================

    /// Applying the operation would drive the user's balance below zero.
    ///
    /// # When This Happens
    ///
    /// The flush engine applies buffered operations in arrival order against
    /// an in-memory state map. A debit is checked against the balance *as of
    /// the preceding operations in the same batch*, not just the stored row.
    ///
    /// # Recovery
    ///
    /// Per-operation and recoverable: the ledger and balance are untouched by
    /// the rejected op. The caller may retry after crediting the account.
    #[error("insufficient balance for user '{user_id}': balance {balance}, requested {amount}")]
    InsufficientBalance {
        /// The user whose balance was insufficient
        user_id: String,
        /// The balance visible to this operation (including prior batch ops)
        balance: i64,
        /// The (negative) amount that was requested
        amount: i64,
    },

    /// Applying the operation would overflow the 64-bit balance.
    ///
    /// Treated exactly like [`Error::InsufficientBalance`]: the op is skipped,
    /// state and ledger are untouched, and the rest of the batch proceeds.
    #[error("balance overflow for user '{user_id}'")]
    BalanceOverflow {
        /// The user whose balance would have overflowed
        user_id: String,
    },

    /// The submitted user identifier was empty.
    ///
    /// Rejected before the operation is enqueued; nothing reaches the store.
    #[error("user id must not be empty")]
    EmptyUserId,

    // =========================================================================
    // Batch-Level Errors (every op in the batch fails identically)
    // =========================================================================

    /// The flush transaction failed and was rolled back.
    ///
    /// # When This Happens
    ///
    /// Any read, insert, upsert, or the commit itself failed inside the flush
    /// engine's transaction. All state changes for the batch belong to that
    /// one transaction, so partial failure is impossible by construction:
    /// every operation in the batch receives this error with the same text.
    ///
    /// # Recovery
    ///
    /// The accumulator clears its buffer and keeps running. Producers retry
    /// at their own discretion.
    #[error("flush failed: {0}")]
    Flush(String),

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// The caller's deadline elapsed, or the accumulator shut down, before a
    /// completion was delivered.
    ///
    /// # Important
    ///
    /// The operation may still have been applied (or may yet be applied) by
    /// its batch. Producers must tolerate this ambiguity; the ledger remains
    /// consistent either way.
    #[error("operation cancelled before completion")]
    Cancelled,

    // =========================================================================
    // Coalesced Reads
    // =========================================================================

    /// A store failure observed through a coalesced read.
    ///
    /// Every waiter that joined the same in-flight query receives a clone of
    /// this variant wrapping the one underlying error, mirroring how
    /// successes are shared.
    #[error("coalesced read failed: {0}")]
    Coalesced(Arc<Error>),

    // =========================================================================
    // Startup Errors (fatal)
    // =========================================================================

    /// Startup-only failure: the store is unreachable, the schema is
    /// incompatible, or the initial feature snapshot could not be built.
    #[error("configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// The `#[from]` conversion lets `?` propagate `rusqlite` errors
    /// anywhere inside the flush engine or the read pool.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
