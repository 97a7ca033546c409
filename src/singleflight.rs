//! # Single-Flight Request Coalescing
//!
//! Collapses concurrent requests for the same key onto one underlying
//! computation. The first caller for a key becomes the *leader* and runs
//! the query; everyone arriving while it is in flight becomes a *waiter*
//! and receives a clone of the leader's result, success or error alike.
//!
//! ```text
//!  caller A ──┐
//!  caller B ──┼── same key ──► one query ──► result cloned to A, B, C
//!  caller C ──┘
//!  caller D ───── (arrives after the leader departed) ──► fresh query
//! ```
//!
//! ## Locking Discipline
//!
//! A plain `std::sync::Mutex` guards only the in-flight map; it is held for
//! map operations and never across the query itself. The query runs on the
//! leader's own task, outside any lock.
//!
//! ## Leader Obligations
//!
//! A leader must always publish a result before departing the map;
//! otherwise waiters would park forever. Publication is enforced by a drop
//! guard: if the leader's future is dropped mid-flight (task cancellation),
//! the guard removes the map entry and the orphaned waiters observe
//! [`Error::Cancelled`] instead of hanging.
//!
//! ## Sharing Errors
//!
//! Results are cloned to every waiter. Successes require `V: Clone`;
//! errors are wrapped in `Arc<Error>` because the underlying store error
//! is not `Clone`. All callers of one flight therefore see the *same*
//! error value, mirroring how successes are shared.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// The result type shared among all callers of one flight.
pub type SharedResult<V> = std::result::Result<V, Arc<Error>>;

// =============================================================================
// SingleFlight
// =============================================================================

/// A coalescing group keyed by `K`.
///
/// The coalescing identity is the key alone: callers must not attach
/// key-dependent request context that could differ between waiters, because
/// only the leader's context reaches the underlying query.
pub struct SingleFlight<K, V> {
    /// In-flight queries: key → the waiters attached so far.
    ///
    /// Presence of a key means a leader is running; the leader itself is
    /// not in the waiter list.
    inflight: Mutex<HashMap<K, Vec<oneshot::Sender<SharedResult<V>>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty group.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `query` for `key`, coalescing with any in-flight call.
    ///
    /// If no query for `key` is in flight, the caller leads: it executes
    /// `query`, publishes the result to every waiter that joined meanwhile,
    /// and removes the key. Otherwise the caller waits and receives the
    /// leader's result.
    ///
    /// At most one `query` runs per key at any time. A second wave of
    /// callers arriving after the leader departed starts a fresh query.
    pub async fn run<F, Fut>(&self, key: K, query: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // Join as a waiter, or install ourselves as the leader.
        let waiter_rx = {
            let mut inflight = self.inflight.lock().expect("inflight mutex poisoned");
            match inflight.get_mut(&key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    inflight.insert(key.clone(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter_rx {
            // The leader publishes before departing; a dropped sender means
            // the leader itself was cancelled mid-flight.
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(Arc::new(Error::Cancelled)),
            };
        }

        // Leader path. The guard removes the map entry even if this future
        // is dropped before completing.
        let mut guard = LeaderGuard {
            inflight: &self.inflight,
            key: Some(key),
        };

        let result: SharedResult<V> = match query().await {
            Ok(value) => Ok(value),
            Err(e) => Err(Arc::new(e)),
        };

        for waiter in guard.depart() {
            let _ = waiter.send(result.clone());
        }

        result
    }

    /// Number of keys currently in flight (for tests).
    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().expect("inflight mutex poisoned").len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Leader Guard
// =============================================================================

/// Removes the leader's map entry exactly once: on publication or, if the
/// leader's future is dropped first, on drop (waking waiters with a closed
/// channel).
struct LeaderGuard<'a, K: Eq + Hash, V> {
    inflight: &'a Mutex<HashMap<K, Vec<oneshot::Sender<SharedResult<V>>>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> LeaderGuard<'_, K, V> {
    /// Removes the entry and returns the waiters to publish to.
    fn depart(&mut self) -> Vec<oneshot::Sender<SharedResult<V>>> {
        let key = self.key.take().expect("leader departed twice");
        let mut inflight = self.inflight.lock().expect("inflight mutex poisoned");
        inflight.remove(&key).unwrap_or_default()
    }
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Ok(mut inflight) = self.inflight.lock() {
                // Dropping the waiters' senders wakes them with Cancelled.
                inflight.remove(&key);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
