//! # mk-db
//!
//! SQLite persistence layer. All writes go through parameterized
//! statements; upserts are transaction-guarded so the single-device
//! uniqueness invariant survives concurrent readers.
//!
//! The pipeline's write path is the correlation actor plus a small
//! worker pool, so the connection pool is a fixed set of connections in
//! WAL mode handed out round-robin.

pub mod alerts;
pub mod audit;
pub mod connections;
pub mod devices;
pub mod error;
pub mod risk;
pub mod schema;
pub mod snapshots;
pub mod telemetry;
pub mod zones;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::DbError;

/// Fixed-size pool of SQLite connections.
pub struct Database {
    conns: Vec<Arc<Mutex<Connection>>>,
    next: AtomicUsize,
}

impl Database {
    /// Open (creating if needed) the database at `path` with a pool of
    /// `pool_size` connections. The schema is applied once.
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, DbError> {
        let pool_size = pool_size.clamp(1, 200);
        let mut conns = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let conn = Connection::open(path)?;
            configure(&conn)?;
            if i == 0 {
                schema::initialize(&conn)?;
            }
            conns.push(Arc::new(Mutex::new(conn)));
        }
        log::info!(
            "database open at {} with {} pooled connections",
            path.display(),
            pool_size
        );
        Ok(Database {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    /// A single-connection in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        schema::initialize(&conn)?;
        Ok(Database {
            conns: vec![Arc::new(Mutex::new(conn))],
            next: AtomicUsize::new(0),
        })
    }

    /// Check out a connection (round-robin). The guard blocks writers on
    /// the same slot; SQLite serializes cross-connection writers itself.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        self.conns[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pool_size(&self) -> usize {
        self.conns.len()
    }
}

fn configure(conn: &Connection) -> Result<(), DbError> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(())
}

/// Serialize an enum with string representation to its serde name.
pub(crate) fn enum_str<T: Serialize>(value: &T) -> Result<String, DbError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(DbError::Corrupt(format!(
            "expected string-serialized enum, got {other}"
        ))),
    }
}

/// Parse an enum back from its serde name.
pub(crate) fn enum_from<T: DeserializeOwned>(s: &str) -> Result<T, DbError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| DbError::Corrupt(format!("bad enum value {s:?}: {e}")))
}

pub(crate) fn parse_time(s: &str) -> Result<chrono::DateTime<chrono::Utc>, DbError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<uuid::Uuid, DbError> {
    uuid::Uuid::parse_str(s).map_err(|e| DbError::Corrupt(format!("bad uuid {s:?}: {e}")))
}
