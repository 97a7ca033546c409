//! # PointsDB Handle
//!
//! The public entry point. [`PointsDb`] wires the write and read paths together over
//! one store:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Async Tasks                            │
//! └──────────────┬────────────────────────────────┬─────────────────┘
//!                │ submit / set_feature           │ feature & balance reads
//!                ▼                                ▼
//!     ┌─────────────────────┐          ┌─────────────────────┐
//!     │    Accumulator      │          │      ReadPool       │
//!     │    (1 thread,       │          │    (N threads,      │
//!     │   write conn)       │          │  read-only conns)   │
//!     └──────────┬──────────┘          └──────────┬──────────┘
//!                │                                │
//!                └──────────────┬─────────────────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │   SQLite    │
//!                        │   (WAL)     │
//!                        └─────────────┘
//! ```
//!
//! ## The SQLite Challenge
//!
//! SQLite connections are `!Sync`, so none of them is ever shared: the
//! accumulator thread owns the sole write connection, and each reader
//! thread owns its own read-only connection. Async tasks talk to both
//! sides over channels.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pointsdb::PointsDb;
//!
//! #[tokio::main]
//! async fn main() -> pointsdb::Result<()> {
//!     let db = PointsDb::open("points.db").await?;
//!
//!     db.submit("user-1", 50).await?;
//!     db.submit("user-1", -20).await?;
//!     assert_eq!(db.balance("user-1").await?, 30);
//!
//!     db.set_feature("beta", true).await?;
//!     let features = db.features_snapshot().await?;
//!     assert!(features.is_active("beta"));
//!
//!     db.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use uuid::Uuid;

use crate::accumulator::{Accumulator, AccumulatorHandle};
use crate::config::Config;
use crate::error::Result;
use crate::features::{CoalescingFeatureReader, DirectFeatureReader, FeatureSnapshot};
use crate::reader::{ReadHandle, ReadPool};
use crate::schema::StoreLocation;

// =============================================================================
// PointsDb
// =============================================================================

/// The main handle: one accumulator, one read pool, one store.
///
/// Cheap clonable sub-handles ([`accumulator`](Self::accumulator),
/// [`reads`](Self::reads)) can be moved into producer and reader tasks;
/// `PointsDb` itself stays with the owner and is consumed by
/// [`shutdown`](Self::shutdown).
///
/// Dropping `PointsDb` without calling `shutdown` is safe: the accumulator
/// flushes whatever it still buffers once the last producer handle is gone,
/// then exits.
pub struct PointsDb {
    config: Config,
    accumulator: Accumulator,
    handle: AccumulatorHandle,
    pool: ReadPool,
    reads: ReadHandle,
}

impl PointsDb {
    /// Opens or creates a database file with the default configuration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, Config::default()).await
    }

    /// Opens or creates a database file with an explicit configuration.
    pub async fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open_at(StoreLocation::File(path.as_ref().to_path_buf()), config)
    }

    /// Creates a fresh in-memory instance (shared-cache, so the read pool
    /// sees the writer's commits). Primarily for tests and benchmarks; the
    /// data vanishes when the instance is gone.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(Config::default()).await
    }

    /// In-memory instance with an explicit configuration.
    pub async fn open_in_memory_with_config(config: Config) -> Result<Self> {
        let name = format!("pointsdb-{}", Uuid::new_v4());
        Self::open_at(StoreLocation::Memory(name), config)
    }

    /// Shared open path: initialize the store, spawn readers, then hand the
    /// write connection to the accumulator.
    fn open_at(location: StoreLocation, config: Config) -> Result<Self> {
        let db = location.open()?;
        let pool = ReadPool::open(&location, &config)?;
        let reads = pool.handle();
        let (accumulator, handle) = Accumulator::spawn(db.into_connection(), &config)?;

        Ok(Self {
            config,
            accumulator,
            handle,
            pool,
            reads,
        })
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    /// Submits one credit (positive) or debit (negative) and waits for its
    /// outcome. See [`AccumulatorHandle::submit`].
    pub async fn submit(&self, user_id: impl Into<crate::UserId>, amount: i64) -> Result<()> {
        self.handle.submit(user_id, amount).await
    }

    /// Like [`submit`](Self::submit), but the caller gives up after
    /// `deadline`. The operation may still commit; see
    /// [`AccumulatorHandle::submit_with_deadline`].
    pub async fn submit_with_deadline(
        &self,
        user_id: impl Into<crate::UserId>,
        amount: i64,
        deadline: Duration,
    ) -> Result<()> {
        self.handle
            .submit_with_deadline(user_id, amount, deadline)
            .await
    }

    /// Returns a clonable producer handle for moving into tasks.
    pub fn accumulator(&self) -> AccumulatorHandle {
        self.handle.clone()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current balance for a user; users without a stored row read as 0.
    pub async fn balance(&self, user_id: &str) -> Result<i64> {
        Ok(self.reads.balance(user_id).await?.unwrap_or(0))
    }

    /// Sum of the user's ledger rows. Equals
    /// [`balance`](Self::balance); the two are written in one transaction
    /// and cannot diverge.
    pub async fn ledger_total(&self, user_id: &str) -> Result<i64> {
        self.reads.ledger_total(user_id).await
    }

    /// Returns a clonable read handle for moving into tasks.
    pub fn reads(&self) -> ReadHandle {
        self.reads.clone()
    }

    // =========================================================================
    // Feature registry
    // =========================================================================

    /// Upserts one feature flag through the write path.
    pub async fn set_feature(&self, name: impl Into<String>, active: bool) -> Result<()> {
        self.handle.set_feature(name, active).await
    }

    /// A reader that queries the store on every call.
    pub fn features_direct(&self) -> DirectFeatureReader {
        DirectFeatureReader::new(self.reads.clone())
    }

    /// A reader that coalesces concurrent lookups per feature name.
    pub fn features_coalescing(&self) -> CoalescingFeatureReader {
        CoalescingFeatureReader::new(self.reads.clone())
    }

    /// Starts a snapshot cache refreshed every `config.refresh_interval`.
    ///
    /// Performs one synchronous refresh first and fails if it cannot, so a
    /// returned snapshot is always valid.
    pub async fn features_snapshot(&self) -> Result<FeatureSnapshot> {
        FeatureSnapshot::start(self.reads.clone(), self.config.refresh_interval).await
    }

    /// The configuration this instance runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Shuts down the accumulator (abandoning any buffered operations) and
    /// the read pool, joining all threads.
    pub async fn shutdown(self) {
        self.accumulator.shutdown();
        self.pool.shutdown().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
