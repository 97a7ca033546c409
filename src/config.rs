//! # Configuration for PointsDB
//!
//! Centralized tuning knobs with the reference defaults. Everything here is
//! plain data: construction is infallible, and the store location is the
//! only value resolved from the environment.
//!
//! ## Sizing Relationships
//!
//! - `queue_capacity` is deliberately much larger than `max_batch` so
//!   producer bursts are absorbed while the accumulator is mid-flush.
//! - `max_batch` must stay below SQLite's host-parameter limit divided by
//!   the widest statement (4 columns per ledger row); the default of 7000
//!   leaves ample headroom under the bundled limit of 32766.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Defaults
// =============================================================================

/// Flush when this many operations are buffered.
pub const DEFAULT_MAX_BATCH: usize = 7000;

/// Submission queue capacity; producers block when it is full.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20_000;

/// Flush this long after the first buffered op if the size threshold was
/// never reached. Bounds tail latency under light load.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot cache refresh cadence.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum number of reader threads.
pub const MIN_READ_THREADS: usize = 1;

/// Maximum number of reader threads.
pub const MAX_READ_THREADS: usize = 16;

/// Environment variable naming the store location.
pub const DB_URL_ENV: &str = "DB_URL";

/// Fallback store location when `DB_URL` is unset.
pub const DEFAULT_DB_PATH: &str = "points.db";

// =============================================================================
// Config
// =============================================================================

/// Tuning configuration for a [`PointsDb`](crate::PointsDb) instance.
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Accumulator (write side)
    // -------------------------------------------------------------------------
    /// Flush size threshold: a batch flushes as soon as it holds this many ops.
    pub max_batch: usize,

    /// Capacity of the bounded submission queue.
    pub queue_capacity: usize,

    /// Idle flush period: a non-empty buffer flushes this long after its
    /// first operation arrived.
    pub flush_interval: Duration,

    // -------------------------------------------------------------------------
    // Feature Readers (read side)
    // -------------------------------------------------------------------------
    /// Snapshot cache refresh cadence.
    pub refresh_interval: Duration,

    /// Reader thread count. `None` auto-detects from `available_parallelism()`,
    /// clamped to `[MIN_READ_THREADS, MAX_READ_THREADS]`. The write path holds
    /// exactly one additional connection regardless of this setting.
    pub read_threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            read_threads: None,
        }
    }
}

impl Config {
    /// Resolves the configured reader thread count.
    pub fn resolved_read_threads(&self) -> usize {
        self.read_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(MIN_READ_THREADS)
            })
            .clamp(MIN_READ_THREADS, MAX_READ_THREADS)
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Resolves the store location from `DB_URL`, falling back to `points.db`
/// in the working directory.
pub fn db_path_from_env() -> PathBuf {
    env::var(DB_URL_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let config = Config::default();
        assert_eq!(config.max_batch, 7000);
        assert_eq!(config.queue_capacity, 20_000);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.refresh_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_queue_dwarfs_batch() {
        let config = Config::default();
        assert!(config.queue_capacity > 2 * config.max_batch);
    }

    #[test]
    fn test_read_threads_clamped() {
        let mut config = Config::default();

        config.read_threads = Some(0);
        assert_eq!(config.resolved_read_threads(), MIN_READ_THREADS);

        config.read_threads = Some(1000);
        assert_eq!(config.resolved_read_threads(), MAX_READ_THREADS);

        config.read_threads = None;
        let auto = config.resolved_read_threads();
        assert!((MIN_READ_THREADS..=MAX_READ_THREADS).contains(&auto));
    }
}
