//! Telemetry record repository.
//!
//! Records are written in batches as they clear correlation, marked
//! processed afterwards, and read-only from then on.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use mk_model::{TelemetryPayload, TelemetryRecord};

use crate::error::DbError;
use crate::{enum_from, enum_str, parse_time, parse_uuid};

/// Insert a batch of records in one transaction.
pub fn insert_batch(conn: &Connection, records: &[TelemetryRecord]) -> Result<(), DbError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO telemetry (id, source, timestamp, data, raw, processed, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for record in records {
            stmt.execute(params![
                record.id.to_string(),
                enum_str(&record.source)?,
                record.timestamp.to_rfc3339(),
                serde_json::to_string(&record.data)?,
                record.raw,
                record.processed,
                serde_json::to_string(&record.metadata)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Mark records processed. Returns how many rows actually flipped.
pub fn mark_processed(conn: &Connection, ids: &[Uuid]) -> Result<usize, DbError> {
    let tx = conn.unchecked_transaction()?;
    let mut flipped = 0;
    {
        let mut stmt =
            tx.prepare("UPDATE telemetry SET processed = 1 WHERE id = ?1 AND processed = 0")?;
        for id in ids {
            flipped += stmt.execute(params![id.to_string()])?;
        }
    }
    tx.commit()?;
    Ok(flipped)
}

pub fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<TelemetryRecord>, DbError> {
    conn.query_row(
        "SELECT id, source, timestamp, data, raw, processed, metadata
         FROM telemetry WHERE id = ?1",
        params![id.to_string()],
        row_to_record,
    )
    .optional()?
    .transpose()
}

pub fn count_unprocessed(conn: &Connection) -> Result<usize, DbError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM telemetry WHERE processed = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

/// Delete processed records older than the cutoff. Returns the real
/// removed-row count.
pub fn delete_processed_before(
    conn: &Connection,
    cutoff: chrono::DateTime<chrono::Utc>,
) -> Result<usize, DbError> {
    let removed = conn.execute(
        "DELETE FROM telemetry WHERE processed = 1 AND timestamp < ?1",
        params![cutoff.to_rfc3339()],
    )?;
    Ok(removed)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Result<TelemetryRecord, DbError>> {
    let id: String = row.get(0)?;
    let source: String = row.get(1)?;
    let timestamp: String = row.get(2)?;
    let data: String = row.get(3)?;
    let raw: Option<String> = row.get(4)?;
    let processed: bool = row.get(5)?;
    let metadata: String = row.get(6)?;

    Ok((|| {
        let payload: TelemetryPayload = serde_json::from_str(&data)?;
        let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;
        Ok(TelemetryRecord {
            id: parse_uuid(&id)?,
            source: enum_from(&source)?,
            timestamp: parse_time(&timestamp)?,
            data: payload,
            raw,
            processed,
            metadata,
        })
    })())
}
