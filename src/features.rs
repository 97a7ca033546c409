//! # Feature Readers
//!
//! Three read strategies for the boolean feature registry, with
//! progressively weaker consistency and progressively higher throughput.
//!
//! | Reader | Store queries | Consistency |
//! |--------|---------------|-------------|
//! | [`DirectFeatureReader`] | one per call | reads committed store state |
//! | [`CoalescingFeatureReader`] | ≤ one in flight per key | each wave reads fresh |
//! | [`FeatureSnapshot`] | one full scan per refresh | eventual, bounded by the refresh interval |
//!
//! All three resolve a missing feature row to `false`.
//!
//! ## Choosing
//!
//! Direct is the baseline. Coalescing keeps read-your-writes per wave (a
//! call arriving after the previous query finished always triggers a fresh
//! one) while collapsing stampedes. The snapshot never blocks a reader on
//! the store at all, at the price of staleness up to one refresh interval
//! plus one scan latency.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::reader::ReadHandle;
use crate::singleflight::SingleFlight;

// =============================================================================
// Direct Reader
// =============================================================================

/// Queries the store on every call. Fully consistent with committed state.
#[derive(Clone)]
pub struct DirectFeatureReader {
    reads: ReadHandle,
}

impl DirectFeatureReader {
    /// Creates a direct reader over the given read pool handle.
    pub fn new(reads: ReadHandle) -> Self {
        Self { reads }
    }

    /// Returns whether the feature is active; unknown features are inactive.
    pub async fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.reads.feature(name).await?.unwrap_or(false))
    }
}

// =============================================================================
// Coalescing Reader
// =============================================================================

/// Collapses concurrent lookups of the same feature onto one store query.
///
/// At most one underlying query runs per key at a time; every caller that
/// joined while it was in flight observes the identical outcome, errors
/// included (surfaced as [`Error::Coalesced`]). The coalescing identity is
/// the feature name alone.
#[derive(Clone)]
pub struct CoalescingFeatureReader {
    reads: ReadHandle,
    flights: Arc<SingleFlight<String, bool>>,
}

impl CoalescingFeatureReader {
    /// Creates a coalescing reader over the given read pool handle.
    pub fn new(reads: ReadHandle) -> Self {
        Self {
            reads,
            flights: Arc::new(SingleFlight::new()),
        }
    }

    /// Returns whether the feature is active; unknown features are inactive.
    pub async fn is_active(&self, name: &str) -> Result<bool> {
        let reads = self.reads.clone();
        let key = name.to_string();
        let query_key = key.clone();

        self.flights
            .run(key, move || async move {
                Ok(reads.feature(&query_key).await?.unwrap_or(false))
            })
            .await
            .map_err(Error::Coalesced)
    }
}

// =============================================================================
// Snapshot Cache
// =============================================================================

/// A periodically refreshed, process-wide immutable view of the registry.
///
/// A background task rebuilds the whole map every `refresh_interval` and
/// swaps it in atomically; readers clone the current `Arc` under a brief
/// shared lock and then look up without any further coordination. Readers
/// never block the refresher beyond the pointer swap, and vice versa.
///
/// # Consistency
///
/// Eventual: a registry change becomes visible within one refresh interval
/// plus one scan latency. Within one interval, every reader sees the same
/// snapshot. A failed refresh is logged and the previous snapshot stays in
/// service.
///
/// # Startup
///
/// [`start`](FeatureSnapshot::start) performs one synchronous refresh and
/// fails with [`Error::Config`] if it cannot; the reader is never exposed
/// without a valid snapshot.
pub struct FeatureSnapshot {
    snapshot: Arc<RwLock<Arc<HashMap<String, bool>>>>,
    refresher: Option<JoinHandle<()>>,
}

impl FeatureSnapshot {
    /// Builds the initial snapshot and spawns the background refresher.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn start(reads: ReadHandle, refresh_interval: Duration) -> Result<Self> {
        let initial = fetch_snapshot(&reads)
            .await
            .map_err(|e| Error::Config(format!("initial feature snapshot failed: {e}")))?;

        let snapshot = Arc::new(RwLock::new(Arc::new(initial)));

        let cell = Arc::clone(&snapshot);
        let refresher = tokio::spawn(async move {
            let mut ticker = time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial snapshot
            // already covers it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match fetch_snapshot(&reads).await {
                    Ok(map) => {
                        debug!(features = map.len(), "feature snapshot refreshed");
                        // The map was built outside the lock; only the
                        // pointer swap happens inside it.
                        *cell.write().expect("snapshot lock poisoned") = Arc::new(map);
                    }
                    Err(e) => {
                        warn!(error = %e, "feature snapshot refresh failed, keeping previous snapshot");
                    }
                }
            }
        });

        Ok(Self {
            snapshot,
            refresher: Some(refresher),
        })
    }

    /// Returns whether the feature is active in the current snapshot;
    /// unknown features are inactive.
    ///
    /// Never touches the store and never blocks beyond the shared lock.
    pub fn is_active(&self, name: &str) -> bool {
        let snap = self
            .snapshot
            .read()
            .expect("snapshot lock poisoned")
            .clone();
        snap.get(name).copied().unwrap_or(false)
    }

    /// Stops the background refresher. The last snapshot remains readable.
    pub fn stop(mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}

impl Drop for FeatureSnapshot {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}

/// One full registry scan, shaped into the snapshot map.
async fn fetch_snapshot(reads: &ReadHandle) -> Result<HashMap<String, bool>> {
    let features = reads.all_features().await?;
    Ok(features.into_iter().map(|f| (f.name, f.active)).collect())
}

// =============================================================================
// Tests
// =============================================================================
