//! # SQLite Schema for PointsDB
//!
//! The store of record is three small relational tables plus a metadata
//! table for schema versioning:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                         Schema Overview                            │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                    │
//! │  user_points              point_txs              features          │
//! │  ┌──────────────┐         ┌──────────────┐       ┌──────────────┐  │
//! │  │ user_id (PK) │◄───────┐│ id (PK)      │       │ name (PK)    │  │
//! │  │ balance      │        └│ user_id      │       │ active       │  │
//! │  └──────────────┘         │ amount       │       └──────────────┘  │
//! │   current state           │ created_ms   │        read registry    │
//! │                           └──────────────┘                         │
//! │                            append-only ledger                      │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - `user_points.balance >= 0` in every committed transaction.
//! - For every user, `SUM(point_txs.amount)` equals `user_points.balance`:
//!   the flush engine inserts ledger rows and writes back balances inside
//!   one transaction, so the two can never diverge.
//! - `point_txs` is append-only; rows are never updated or deleted.

use rusqlite::{Connection, OpenFlags};

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment on breaking schema changes.
///
/// There is no migration support: a version mismatch is an error.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The `user_points` table holds each user's current balance.
///
/// A row exists from the user's first accepted credit onward; absent rows
/// read as balance 0. The flush engine writes this table exclusively via
/// bulk upserts of its dirty set.
const CREATE_USER_POINTS: &str = r#"
CREATE TABLE IF NOT EXISTS user_points (
    user_id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL
)
"#;

/// The `point_txs` table is the append-only ledger.
///
/// # Columns
///
/// - `id`: UUID v4 in hyphenated text form, generated per accepted op
/// - `user_id`: the balance row the amount was applied to
/// - `amount`: signed; negative rows are debits, zero rows are legal
/// - `created_ms`: Unix milliseconds, stamped once per flush so rows
///   committed together carry identical timestamps
///
/// Replaying the ledger in `created_ms` order reproduces every balance.
const CREATE_POINT_TXS: &str = r#"
CREATE TABLE IF NOT EXISTS point_txs (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    amount     INTEGER NOT NULL,
    created_ms INTEGER NOT NULL
)
"#;

/// Index for per-user ledger queries (`SUM(amount)`, audit listings).
const CREATE_POINT_TXS_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS point_txs_user
ON point_txs(user_id)
"#;

/// Index for replaying the ledger in commit order.
const CREATE_POINT_TXS_CREATED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS point_txs_created
ON point_txs(created_ms)
"#;

/// The `features` table is the boolean feature registry served by the read-side caches.
///
/// `active` is stored as INTEGER 0/1 (SQLite has no BOOLEAN affinity);
/// rusqlite converts to and from `bool` transparently.
const CREATE_FEATURES: &str = r#"
CREATE TABLE IF NOT EXISTS features (
    name   TEXT PRIMARY KEY,
    active INTEGER NOT NULL
)
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS pointsdb_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A wrapper around a SQLite connection with the PointsDB schema applied.
///
/// `Database` owns its `Connection`; dropping it closes the connection.
/// The write path extracts the connection with [`into_connection`] and
/// hands it to the accumulator thread, which becomes the sole writer.
///
/// [`into_connection`]: Database::into_connection
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Config` if the schema version doesn't match
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates a private in-memory database.
    ///
    /// Only this connection sees the data; suitable for unit tests of the
    /// flush engine, not for the full handle (which needs reader
    /// connections; see [`open_shared_memory`](Database::open_shared_memory)).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Opens a named shared-cache in-memory database.
    ///
    /// All connections opening the same `file:NAME?mode=memory&cache=shared`
    /// URI share one database, which lets the read pool see the writer's
    /// commits without touching disk. The database lives until the last
    /// connection closes.
    pub fn open_shared_memory(name: &str) -> Result<Self> {
        let conn = Connection::open(shared_memory_uri(name))?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Consumes the wrapper and returns the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Initializes pragmas, tables, and the schema version.
    ///
    /// Idempotent: every statement is `IF NOT EXISTS`, so reopening an
    /// existing database is safe.
    fn initialize(&mut self) -> Result<()> {
        // WAL mode: readers see a consistent snapshot while the single
        // writer commits. In-memory databases silently keep journal_mode
        // "memory", which is fine: there are no concurrent file readers.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;

        // Sync the WAL on commit, not on every write. The flush engine
        // already trades single-op durability for batch throughput.
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_USER_POINTS)?;
        self.conn.execute_batch(CREATE_POINT_TXS)?;
        self.conn.execute_batch(CREATE_POINT_TXS_USER_INDEX)?;
        self.conn.execute_batch(CREATE_POINT_TXS_CREATED_INDEX)?;
        self.conn.execute_batch(CREATE_FEATURES)?;

        self.verify_or_set_version()?;

        Ok(())
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<i32> = self
            .conn
            .query_row(
                "SELECT value FROM pointsdb_metadata WHERE key = 'schema_version'",
                [],
                |row| {
                    let s: String = row.get(0)?;
                    Ok(s.parse().unwrap_or(0))
                },
            )
            .ok();

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO pointsdb_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::Config(format!(
                    "schema version mismatch: database has version {v}, this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Direct access to the underlying connection, for tests.
    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Store Location
// =============================================================================

/// Where a database lives: a file on disk, or a named shared-cache
/// in-memory database.
///
/// Both the write path and every reader connection are opened from the same
/// location, so readers always observe the writer's commits.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    /// A database file (WAL mode: concurrent readers, one writer).
    File(std::path::PathBuf),
    /// A named shared-cache in-memory database; lives until the last
    /// connection closes.
    Memory(String),
}

impl StoreLocation {
    /// Opens and initializes the read-write database at this location.
    pub fn open(&self) -> Result<Database> {
        match self {
            StoreLocation::File(path) => Database::open(path),
            StoreLocation::Memory(name) => Database::open_shared_memory(name),
        }
    }

    /// Opens a read-only connection to this location.
    pub fn open_read_only(&self) -> Result<Connection> {
        match self {
            StoreLocation::File(path) => open_read_only(path),
            StoreLocation::Memory(name) => open_read_only_shared_memory(name),
        }
    }
}

// =============================================================================
// Connection Helpers
// =============================================================================

/// The URI addressing a named shared-cache in-memory database.
pub fn shared_memory_uri(name: &str) -> String {
    format!("file:{name}?mode=memory&cache=shared")
}

/// Opens a read-only connection to a database file.
///
/// Reader threads each own one of these; WAL mode lets them run
/// concurrently with the writer.
pub fn open_read_only(path: impl AsRef<std::path::Path>) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

/// Opens a read-only connection to a named shared-cache in-memory database.
pub fn open_read_only_shared_memory(name: &str) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        shared_memory_uri(name),
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

// =============================================================================
// Tests
// =============================================================================
