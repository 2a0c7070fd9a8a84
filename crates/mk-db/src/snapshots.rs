//! Topology snapshot repository.
//!
//! `capture` reads devices, connections and zones inside one
//! transaction, so the snapshot is a consistent view at a single
//! logical instant, then writes it in the same transaction. Snapshots
//! are immutable once written — there is no update path.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use uuid::Uuid;

use mk_model::{
    Connection, Device, SnapshotSummary, TelemetrySource, TopologySnapshot, ZoneDefinition,
};

use crate::error::DbError;
use crate::{connections, devices, parse_time, parse_uuid, zones};

/// Capture a consistent snapshot of the current topology and persist it.
pub fn capture(
    conn: &SqlConnection,
    collection_duration_ms: u64,
    sources: Vec<TelemetrySource>,
    timestamp: DateTime<Utc>,
) -> Result<TopologySnapshot, DbError> {
    let tx = conn.unchecked_transaction()?;
    let devices = devices::list(&tx)?;
    let connections = connections::list(&tx)?;
    let zones = zones::list(&tx)?;

    let snapshot = TopologySnapshot::new(
        devices,
        connections,
        zones,
        collection_duration_ms,
        sources,
        timestamp,
    );
    insert(&tx, &snapshot)?;
    tx.commit()?;
    Ok(snapshot)
}

/// Persist an already-built snapshot.
pub fn insert(conn: &SqlConnection, snapshot: &TopologySnapshot) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO topology_snapshots (id, timestamp, devices, connections, zones, summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            snapshot.id.to_string(),
            snapshot.timestamp.to_rfc3339(),
            serde_json::to_string(&snapshot.devices)?,
            serde_json::to_string(&snapshot.connections)?,
            serde_json::to_string(&snapshot.zones)?,
            serde_json::to_string(&snapshot.summary)?,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &SqlConnection, id: Uuid) -> Result<Option<TopologySnapshot>, DbError> {
    conn.query_row(
        "SELECT id, timestamp, devices, connections, zones, summary
         FROM topology_snapshots WHERE id = ?1",
        params![id.to_string()],
        row_to_snapshot,
    )
    .optional()?
    .transpose()
}

/// The most recent snapshot, if any.
pub fn latest(conn: &SqlConnection) -> Result<Option<TopologySnapshot>, DbError> {
    conn.query_row(
        "SELECT id, timestamp, devices, connections, zones, summary
         FROM topology_snapshots ORDER BY timestamp DESC LIMIT 1",
        [],
        row_to_snapshot,
    )
    .optional()?
    .transpose()
}

pub fn count(conn: &SqlConnection) -> Result<usize, DbError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM topology_snapshots", [], |row| {
        row.get(0)
    })?;
    Ok(n as usize)
}

fn row_to_snapshot(
    row: &rusqlite::Row,
) -> rusqlite::Result<Result<TopologySnapshot, DbError>> {
    let id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let devices: String = row.get(2)?;
    let connections: String = row.get(3)?;
    let zones: String = row.get(4)?;
    let summary: String = row.get(5)?;

    Ok((|| {
        let devices: Vec<Device> = serde_json::from_str(&devices)?;
        let connections: Vec<Connection> = serde_json::from_str(&connections)?;
        let zones: Vec<ZoneDefinition> = serde_json::from_str(&zones)?;
        let summary: SnapshotSummary = serde_json::from_str(&summary)?;
        Ok(TopologySnapshot {
            id: parse_uuid(&id)?,
            timestamp: parse_time(&timestamp)?,
            devices,
            connections,
            zones,
            summary,
        })
    })())
}
