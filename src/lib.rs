//! # PointsDB - Batching Point Ledger
//!
//! PointsDB is a small concurrency runtime in front of a relational store.
//! It demonstrates one idea twice: absorb many concurrent logical
//! operations into far fewer store operations, without giving up
//! correctness.
//!
//! - **Write side (accumulator)**: thousands of producers submit per-user
//!   credit/debit operations; a single-writer actor batches them into bulk
//!   transactional flushes and answers every producer individually. A
//!   workload that would contend on per-user rows becomes three bulk
//!   statements per batch.
//! - **Read side (feature cache)**: a boolean feature registry served
//!   three ways (direct queries, request-coalesced queries, and a
//!   periodically refreshed immutable snapshot), trading consistency for
//!   throughput in measured steps.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │            (submit, balance, feature readers)                   │
//! └──────────────┬────────────────────────────────┬─────────────────┘
//!                │                                │
//!                ▼                                ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │         Accumulator          │   │          ReadPool            │
//! │ (single thread, write conn)  │   │ (N threads, read-only conns) │
//! │                              │   │                              │
//! │  ┌────────┐  ┌────────────┐  │   │  direct / coalescing /       │
//! │  │ Buffer │  │   Ledger   │  │   │  snapshot feature readers    │
//! │  │ + timer│  │ (flush tx) │  │   │                              │
//! │  └────────┘  └────────────┘  │   │                              │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                │                                  │
//!                └────────────────┬─────────────────┘
//!                                 ▼
//!                          ┌─────────────┐
//!                          │   SQLite    │
//!                          │   (WAL)     │
//!                          └─────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Non-negative balances**: every committed `user_points.balance` is
//!    ≥ 0.
//! 2. **Ledger consistency**: per user, `SUM(point_txs.amount)` equals the
//!    stored balance; both are written in the same transaction.
//! 3. **Exactly one completion** per submitted operation: success or a
//!    named failure, never both, never zero (a caller that stops waiting
//!    simply discards it).
//! 4. **Single writer**: the accumulator thread owns the only write
//!    connection; its buffer and per-flush state are never shared.
//! 5. **Batch atomicity**: one batch is one transaction; a store failure
//!    fails every operation in the batch identically.

/// Error types for PointsDB operations.
pub mod error;

/// Tuning configuration and environment resolution.
pub mod config;

/// SQLite schema, pragmas, and connection helpers.
pub mod schema;

/// Domain types: user ids, transaction ids, operations, features.
pub mod types;

/// The flush engine: one transaction per batch over the write connection.
pub mod ledger;

/// The write side: the batching accumulator and its producer API.
///
/// Key pieces:
/// - Bounded submission queue with back-pressure
/// - Single-threaded loop selecting among arrivals, the flush deadline,
///   and shutdown
/// - Per-operation one-shot completion handles
pub mod accumulator;

/// Generic single-flight request coalescing.
pub mod singleflight;

/// The read side: direct, coalescing, and snapshot feature readers.
pub mod features;

/// Pooled read-only connections servicing feature and balance reads.
pub mod reader;

/// The public async handle wiring the write and read paths over one store.
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::PointsDb;
pub use config::Config;
pub use error::{Error, Result};
pub use schema::{Database, StoreLocation};

pub use accumulator::{Accumulator, AccumulatorHandle};
pub use features::{CoalescingFeatureReader, DirectFeatureReader, FeatureSnapshot};
pub use ledger::Ledger;
pub use reader::{ReadHandle, ReadPool};
pub use singleflight::SingleFlight;
pub use types::{Feature, FlushStats, PointOp, PointTx, TxId, UserId};
