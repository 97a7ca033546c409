//! # Read Pool
//!
//! A pool of reader threads, each owning its own read-only SQLite
//! connection, servicing read requests from async tasks.
//!
//! ## Why Dedicated Threads?
//!
//! SQLite connections are `!Sync` and queries are blocking, so the async
//! side never touches a connection directly. Reader threads compete to
//! receive from one shared request channel (whichever thread is free picks
//! up the next request) and reply over per-request oneshot channels.
//!
//! ```text
//!  async tasks ── mpsc ──► ┌───┐ ┌───┐ ┌───┐
//!                          │ R │ │ R │ │ R │   N reader threads,
//!                          └───┘ └───┘ └───┘   one read-only conn each
//! ```
//!
//! With WAL mode, readers run concurrently with the single writer and
//! always see the latest committed data; there is no reader-side cache to
//! go stale.
//!
//! ## Capacity
//!
//! The pool is the process's read-connection ceiling: `read_threads`
//! connections here plus the accumulator's single write connection.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use rusqlite::{Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::StoreLocation;
use crate::types::Feature;

/// Size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

// =============================================================================
// Requests
// =============================================================================

/// Request types serviced by the pool.
enum ReadRequest {
    /// Single-key feature lookup. `None` means the row does not exist.
    Feature {
        name: String,
        response: oneshot::Sender<Result<Option<bool>>>,
    },

    /// Full scan of the feature registry (snapshot refresh).
    AllFeatures {
        response: oneshot::Sender<Result<Vec<Feature>>>,
    },

    /// Current balance for one user. `None` means no stored row (reads as 0).
    Balance {
        user_id: String,
        response: oneshot::Sender<Result<Option<i64>>>,
    },

    /// Sum of all ledger amounts for one user.
    LedgerTotal {
        user_id: String,
        response: oneshot::Sender<Result<i64>>,
    },

    /// Shut down one reader thread.
    Shutdown,
}

// =============================================================================
// Read Handle
// =============================================================================

/// Clonable async handle for issuing reads against the pool.
#[derive(Clone)]
pub struct ReadHandle {
    request_tx: mpsc::Sender<ReadRequest>,
}

impl ReadHandle {
    /// Looks up one feature row. `Ok(None)` means the feature is unknown.
    pub async fn feature(&self, name: &str) -> Result<Option<bool>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(ReadRequest::Feature {
                name: name.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        response_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Reads the whole feature registry.
    pub async fn all_features(&self) -> Result<Vec<Feature>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(ReadRequest::AllFeatures {
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        response_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Reads one user's stored balance. `Ok(None)` means no row yet.
    pub async fn balance(&self, user_id: &str) -> Result<Option<i64>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(ReadRequest::Balance {
                user_id: user_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        response_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Sums the ledger for one user (0 if the user has no rows).
    pub async fn ledger_total(&self, user_id: &str) -> Result<i64> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(ReadRequest::LedgerTotal {
                user_id: user_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        response_rx.await.map_err(|_| Error::Cancelled)?
    }
}

// =============================================================================
// Read Pool
// =============================================================================

/// The pool itself: spawned threads plus the channel they serve.
pub struct ReadPool {
    request_tx: mpsc::Sender<ReadRequest>,
    thread_handles: Vec<JoinHandle<()>>,
}

impl ReadPool {
    /// Spawns the pool against a store location.
    ///
    /// Each thread opens its own read-only connection up front; a location
    /// that cannot be opened fails here, at startup, rather than on first
    /// query.
    pub fn open(location: &StoreLocation, config: &Config) -> Result<Self> {
        let count = config.resolved_read_threads();

        let (request_tx, request_rx) = mpsc::channel(READ_CHANNEL_SIZE);

        // Threads compete to receive from the shared channel; the mutex
        // hands the receiver to whichever thread is free.
        let request_rx = Arc::new(Mutex::new(request_rx));

        let mut thread_handles = Vec::with_capacity(count);
        for i in 0..count {
            let conn = location.open_read_only()?;
            let rx = Arc::clone(&request_rx);

            let handle = thread::Builder::new()
                .name(format!("pointsdb-reader-{i}"))
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to create reader runtime");

                    rt.block_on(run_reader(conn, rx));
                })
                .map_err(|e| Error::Config(format!("failed to spawn reader thread: {e}")))?;

            thread_handles.push(handle);
        }

        Ok(Self {
            request_tx,
            thread_handles,
        })
    }

    /// Returns a clonable query handle.
    pub fn handle(&self) -> ReadHandle {
        ReadHandle {
            request_tx: self.request_tx.clone(),
        }
    }

    /// Number of reader threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.thread_handles.len()
    }

    /// Shuts down all reader threads and joins them.
    pub async fn shutdown(self) {
        for _ in 0..self.thread_handles.len() {
            let _ = self.request_tx.send(ReadRequest::Shutdown).await;
        }
        for handle in self.thread_handles {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// One reader thread's loop.
async fn run_reader(conn: Connection, rx: Arc<Mutex<mpsc::Receiver<ReadRequest>>>) {
    loop {
        // Hold the receiver only long enough to take one request.
        let request = {
            let mut guard = rx.lock().expect("receiver mutex poisoned");
            guard.recv().await
        };

        match request {
            Some(ReadRequest::Feature { name, response }) => {
                let _ = response.send(read_feature(&conn, &name));
            }
            Some(ReadRequest::AllFeatures { response }) => {
                let _ = response.send(read_all_features(&conn));
            }
            Some(ReadRequest::Balance { user_id, response }) => {
                let _ = response.send(read_balance(&conn, &user_id));
            }
            Some(ReadRequest::LedgerTotal { user_id, response }) => {
                let _ = response.send(read_ledger_total(&conn, &user_id));
            }
            Some(ReadRequest::Shutdown) | None => break,
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

fn read_feature(conn: &Connection, name: &str) -> Result<Option<bool>> {
    let active = conn
        .query_row("SELECT active FROM features WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(active)
}

fn read_all_features(conn: &Connection) -> Result<Vec<Feature>> {
    let mut stmt = conn.prepare("SELECT name, active FROM features")?;
    let rows = stmt.query_map([], |row| {
        Ok(Feature {
            name: row.get(0)?,
            active: row.get(1)?,
        })
    })?;

    let mut features = Vec::new();
    for row in rows {
        features.push(row?);
    }
    Ok(features)
}

fn read_balance(conn: &Connection, user_id: &str) -> Result<Option<i64>> {
    let balance = conn
        .query_row(
            "SELECT balance FROM user_points WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance)
}

fn read_ledger_total(conn: &Connection, user_id: &str) -> Result<i64> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM point_txs WHERE user_id = ?",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

// =============================================================================
// Tests
// =============================================================================
