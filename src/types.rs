//! # Domain Types for PointsDB
//!
//! Core types for the point ledger and the feature registry. Primitive keys
//! and ids are wrapped in newtypes so a transaction id can never be passed
//! where a user id is expected, and so validation lives in one place.
//!
//! ## The Data Model
//!
//! - [`UserId`] keys the `user_points` balance table.
//! - [`TxId`] identifies one append-only ledger row in `point_txs`.
//! - [`PointOp`] is a single credit/debit as submitted by a producer.
//! - [`PointTx`] is one committed ledger row.
//! - [`Feature`] is one row of the boolean feature registry.
//!
//! ## Invariants
//!
//! - A committed `user_points.balance` is never negative.
//! - The sum of `point_txs.amount` for a user equals that user's balance:
//!   every accepted operation writes exactly one ledger row and moves the
//!   balance by exactly that row's amount, in the same transaction.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

// =============================================================================
// User Identification
// =============================================================================

/// A user identifier, the primary key of the balance table.
///
/// Any non-empty string works; shorter is better for index size. Emptiness
/// is checked at the submission boundary, not here, so the type stays a
/// zero-cost wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Creates a new user id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this user id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty (and therefore rejected by
    /// the producer API).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Transaction Identification
// =============================================================================

/// A unique 128-bit identifier for one ledger row.
///
/// Generated as a random UUID (v4) by the flush engine when an operation is
/// accepted, and stored in hyphenated text form. The id is opaque: nothing
/// orders or groups by it; `created_ms` carries the temporal ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId(Uuid);

impl TxId {
    /// Generates a fresh random transaction id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a transaction id from its stored text form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Returns the hyphenated text form used for storage.
    pub fn to_text(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Operations and Ledger Rows
// =============================================================================

/// A single credit (positive) or debit (negative) operation, as submitted.
///
/// This is the payload half of what travels through the submission queue;
/// the completion handle is paired with it by the accumulator and never
/// reaches the flush engine.
#[derive(Debug, Clone)]
pub struct PointOp {
    /// The user whose balance the operation moves.
    pub user_id: UserId,
    /// Signed amount: positive credit, negative debit. Zero is legal and
    /// still produces a ledger row.
    pub amount: i64,
}

impl PointOp {
    /// Creates a new operation.
    pub fn new(user_id: impl Into<UserId>, amount: i64) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
        }
    }
}

/// One committed row of the append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointTx {
    /// Unique id of this ledger row.
    pub id: TxId,
    /// The user the row belongs to.
    pub user_id: UserId,
    /// The applied amount.
    pub amount: i64,
    /// Commit-side creation timestamp, Unix milliseconds.
    pub created_ms: u64,
}

// =============================================================================
// Feature Registry
// =============================================================================

/// One row of the boolean feature registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Feature name, the registry's primary key.
    pub name: String,
    /// Whether the feature is active.
    pub active: bool,
}

// =============================================================================
// Flush Statistics
// =============================================================================

/// Summary of one committed flush, for logging and benchmarks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushStats {
    /// Operations in the batch.
    pub ops: usize,
    /// Operations that were accepted (one ledger row each).
    pub accepted: usize,
    /// Operations rejected per-op (insufficient balance or overflow).
    pub rejected: usize,
    /// Distinct users whose balance was written back.
    pub dirty_users: usize,
}

// =============================================================================
// Time
// =============================================================================

/// Current wall-clock time in Unix milliseconds.
///
/// One clock read per flush stamps every ledger row in that batch, so rows
/// committed together carry identical timestamps.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
