//! # Batching Accumulator
//!
//! A single-writer actor that absorbs a high-contention stream of
//! per-user point operations and turns it into a low-contention stream of
//! bulk flushes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Producer Tasks                           │
//! │   submit() ─┐                                                   │
//! │   submit() ─┼── bounded mpsc (queue_capacity) ──┐               │
//! │   submit() ─┘                                   │               │
//! └─────────────────────────────────────────────────┼───────────────┘
//!                                                   ▼
//!                                   ┌───────────────────────────────┐
//!                                   │   Accumulator (1 OS thread)   │
//!                                   │                               │
//!                                   │  select! {                    │
//!                                   │    op arrived   → buffer      │
//!                                   │    deadline hit → flush       │
//!                                   │    shutdown     → exit        │
//!                                   │  }                            │
//!                                   │                               │
//!                                   │  ┌─────────────────────────┐  │
//!                                   │  │ Ledger (write conn)     │  │
//!                                   │  └─────────────────────────┘  │
//!                                   └───────────────┬───────────────┘
//!                                                   │ oneshot per op
//!                                                   ▼
//!                                            producer completions
//! ```
//!
//! ## Single-Writer Discipline
//!
//! The buffer, the pending-completion list, and the [`Ledger`] (with its
//! write connection) are owned by the accumulator thread and never shared;
//! no locks guard them because no other execution context can reach them.
//! Producers share only the submission queue and their own one-shot
//! completion handles.
//!
//! While a flush is executing, the loop does not receive from the queue;
//! producers back up against the bounded channel. That back-pressure is the
//! design, not an accident: it preserves one writer, one transaction at a
//! time.
//!
//! ## Flush Triggers
//!
//! - **Size**: the buffer reached `max_batch`; bounds memory and
//!   transaction size.
//! - **Time**: `flush_interval` elapsed since the first op of the current
//!   batch; bounds tail latency under light load.
//!
//! ## Shutdown
//!
//! The explicit shutdown signal exits the loop *without* a final flush;
//! buffered operations are abandoned and their producers observe
//! [`Error::Cancelled`] through the dropped completion handles. If instead
//! every producer handle is dropped (the channel closes naturally), the
//! loop flushes what it still holds and then exits, so letting a whole
//! [`PointsDb`](crate::PointsDb) go out of scope does not discard
//! already-enqueued work.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::types::{PointOp, UserId};

/// Park duration for the timer branch while the buffer is empty.
///
/// The deadline branch is disabled while nothing is buffered; this value
/// only exists because the select arm needs *some* instant to sleep until.
const IDLE_PARK: Duration = Duration::from_secs(3600);

// =============================================================================
// Requests
// =============================================================================

/// A request sent to the accumulator.
enum Request {
    /// A point operation to batch into the next flush.
    Point {
        op: PointOp,
        done: oneshot::Sender<Result<()>>,
    },

    /// A feature-registry upsert, executed immediately between batches.
    ///
    /// Registry writes are rare administrative actions; routing them
    /// through the accumulator keeps the write connection on one thread.
    SetFeature {
        name: String,
        active: bool,
        done: oneshot::Sender<Result<()>>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Clonable producer handle to the accumulator.
///
/// All clones share the same bounded queue; `submit` blocks (asynchronously)
/// when the queue is full. When the last clone drops, the accumulator
/// flushes its remaining buffer and exits.
#[derive(Clone)]
pub struct AccumulatorHandle {
    tx: mpsc::Sender<Request>,
}

impl AccumulatorHandle {
    /// Submits one credit (positive) or debit (negative) and waits for its
    /// outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyUserId`]: rejected before enqueue
    /// - [`Error::InsufficientBalance`] / [`Error::BalanceOverflow`]:
    ///   per-op rejection by the flush engine
    /// - [`Error::Flush`]: the whole batch's transaction failed
    /// - [`Error::Cancelled`]: the accumulator shut down first
    pub async fn submit(&self, user_id: impl Into<UserId>, amount: i64) -> Result<()> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(Error::EmptyUserId);
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Request::Point {
                op: PointOp { user_id, amount },
                done: done_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;

        done_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Like [`submit`](Self::submit), but gives up after `deadline`.
    ///
    /// On expiry the caller observes [`Error::Cancelled`], yet the operation
    /// may still be applied by its batch: the completion is then sent into a
    /// dropped handle, which is silently discarded. Callers must tolerate
    /// this ambiguity.
    pub async fn submit_with_deadline(
        &self,
        user_id: impl Into<UserId>,
        amount: i64,
        deadline: Duration,
    ) -> Result<()> {
        match time::timeout(deadline, self.submit(user_id, amount)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Upserts one feature registry row through the write path.
    pub async fn set_feature(&self, name: impl Into<String>, active: bool) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Request::SetFeature {
                name: name.into(),
                active,
                done: done_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;

        done_rx.await.map_err(|_| Error::Cancelled)?
    }
}

// =============================================================================
// Accumulator
// =============================================================================

/// Control side of the accumulator: the spawned thread plus its shutdown
/// signal.
///
/// There is exactly one `Accumulator` per database; [`spawn`](Self::spawn)
/// consumes the write connection, which is what enforces the single-writer
/// invariant. Dropping the control without calling
/// [`shutdown`](Self::shutdown) merely disarms the shutdown branch; the
/// loop keeps serving until the last producer handle is gone.
pub struct Accumulator {
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Accumulator {
    /// Spawns the accumulator on a dedicated OS thread and returns the
    /// control together with the first producer handle.
    ///
    /// The thread runs a current-thread Tokio runtime: the loop needs async
    /// channel receives and timers, while the SQLite connection it owns is
    /// `!Sync` and must never migrate across threads.
    pub fn spawn(conn: Connection, config: &Config) -> Result<(Self, AccumulatorHandle)> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let ledger = Ledger::new(conn);
        let max_batch = config.max_batch;
        let flush_interval = config.flush_interval;

        let thread = thread::Builder::new()
            .name("pointsdb-accumulator".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to create accumulator runtime");

                rt.block_on(run_accumulator(
                    ledger,
                    rx,
                    shutdown_rx,
                    max_batch,
                    flush_interval,
                ));
            })
            .map_err(|e| Error::Config(format!("failed to spawn accumulator thread: {e}")))?;

        let control = Self {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        };

        Ok((control, AccumulatorHandle { tx }))
    }

    /// Signals shutdown and joins the accumulator thread.
    ///
    /// Buffered operations are abandoned; their producers observe
    /// [`Error::Cancelled`].
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// =============================================================================
// The Loop
// =============================================================================

/// The accumulator's event loop.
///
/// Selects among three events: a queued request, the flush deadline, and
/// the shutdown signal. The deadline is armed when the first op of a batch
/// arrives and cleared by every flush, so an idle accumulator parks on the
/// queue alone.
async fn run_accumulator(
    mut ledger: Ledger,
    mut rx: mpsc::Receiver<Request>,
    mut shutdown_rx: oneshot::Receiver<()>,
    max_batch: usize,
    flush_interval: Duration,
) {
    let mut buffer: Vec<PointOp> = Vec::with_capacity(max_batch);
    let mut pending: Vec<oneshot::Sender<Result<()>>> = Vec::with_capacity(max_batch);
    let mut deadline: Option<Instant> = None;
    let mut shutdown_armed = true;

    info!(max_batch, ?flush_interval, "accumulator started");

    loop {
        // The select arm evaluates its sleep expression even when the
        // branch is disabled, so an empty buffer parks far in the future.
        let wake = deadline.unwrap_or_else(|| Instant::now() + IDLE_PARK);

        tokio::select! {
            // Explicit shutdown: exit without a final flush. Dropping
            // `pending` (and the queue receiver) delivers cancellation to
            // every producer still waiting. A dropped-but-unsignalled
            // control only disarms this branch.
            signal = &mut shutdown_rx, if shutdown_armed => {
                match signal {
                    Ok(()) => {
                        info!(abandoned = buffer.len(), "accumulator shutting down");
                        break;
                    }
                    Err(_) => shutdown_armed = false,
                }
            }

            request = rx.recv() => match request {
                Some(Request::Point { op, done }) => {
                    if buffer.is_empty() {
                        deadline = Some(Instant::now() + flush_interval);
                    }
                    buffer.push(op);
                    pending.push(done);

                    if buffer.len() >= max_batch {
                        flush(&mut ledger, &mut buffer, &mut pending);
                        deadline = None;
                    }
                }
                Some(Request::SetFeature { name, active, done }) => {
                    let _ = done.send(ledger.set_feature(&name, active));
                }
                None => {
                    // Every producer handle dropped: flush what we hold,
                    // then exit.
                    flush(&mut ledger, &mut buffer, &mut pending);
                    break;
                }
            },

            _ = time::sleep_until(wake), if deadline.is_some() => {
                flush(&mut ledger, &mut buffer, &mut pending);
                deadline = None;
            }
        }
    }
}

/// Flushes the buffer through the ledger and dispatches completions.
///
/// On success each operation's own outcome is sent to its handle in buffer
/// order; on a transaction failure every operation receives the same
/// [`Error::Flush`] and the accumulator keeps running. Sends never block:
/// each handle has capacity one and exactly one receiver, and a receiver
/// that gave up waiting just discards the send.
fn flush(
    ledger: &mut Ledger,
    buffer: &mut Vec<PointOp>,
    pending: &mut Vec<oneshot::Sender<Result<()>>>,
) {
    if buffer.is_empty() {
        return;
    }

    match ledger.apply_batch(buffer) {
        Ok((outcomes, stats)) => {
            debug!(
                ops = stats.ops,
                accepted = stats.accepted,
                rejected = stats.rejected,
                dirty_users = stats.dirty_users,
                "flush committed"
            );
            for (done, outcome) in pending.drain(..).zip(outcomes) {
                let _ = done.send(outcome);
            }
        }
        Err(e) => {
            warn!(error = %e, ops = buffer.len(), "flush failed, failing whole batch");
            let message = e.to_string();
            for done in pending.drain(..) {
                let _ = done.send(Err(Error::Flush(message.clone())));
            }
        }
    }

    // Truncate for reuse; capacity is retained across flushes.
    buffer.clear();
}

// =============================================================================
// Tests
// =============================================================================
