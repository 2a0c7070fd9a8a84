//! Connection repository.
//!
//! Edges are unique on (source, target, protocol, port); the upsert
//! accumulates byte/packet counters and extends the seen range.

use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use uuid::Uuid;

use mk_model::{Connection, ConnectionMetadata, Port, VlanId};

use crate::error::DbError;
use crate::{enum_from, enum_str, parse_time, parse_uuid};

/// Insert or fold into the unique edge. Returns the stored connection's
/// id and whether a new row was created.
pub fn upsert(conn: &SqlConnection, edge: &Connection) -> Result<(Uuid, bool), DbError> {
    let tx = conn.unchecked_transaction()?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM connections
             WHERE source_device_id = ?1 AND target_device_id = ?2
               AND protocol IS ?3 AND port IS ?4",
            params![
                edge.source_device_id.to_string(),
                edge.target_device_id.to_string(),
                edge.protocol,
                edge.port.map(|p| p.get()),
            ],
            |row| row.get(0),
        )
        .optional()?;

    let result = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE connections SET
                    bytes = bytes + ?2,
                    packets = packets + ?3,
                    last_seen_at = MAX(last_seen_at, ?4),
                    first_seen_at = MIN(first_seen_at, ?5),
                    is_secure = ?6,
                    is_industrial = is_industrial OR ?7,
                    industrial_protocol = COALESCE(industrial_protocol, ?8)
                 WHERE id = ?1",
                params![
                    id,
                    edge.metadata.bytes,
                    edge.metadata.packets,
                    edge.last_seen_at.to_rfc3339(),
                    edge.first_seen_at.to_rfc3339(),
                    edge.is_secure,
                    edge.metadata.is_industrial,
                    edge.metadata.industrial_protocol,
                ],
            )?;
            (parse_uuid(&id)?, false)
        }
        None => {
            tx.execute(
                "INSERT INTO connections (
                    id, source_device_id, target_device_id, connection_type,
                    protocol, port, vlan, bandwidth_bps, latency_ms, is_secure,
                    encryption, first_seen_at, last_seen_at, bytes, packets,
                    is_industrial, industrial_protocol
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    edge.id.to_string(),
                    edge.source_device_id.to_string(),
                    edge.target_device_id.to_string(),
                    enum_str(&edge.connection_type)?,
                    edge.protocol,
                    edge.port.map(|p| p.get()),
                    edge.vlan.map(|v| v.get()),
                    edge.bandwidth_bps,
                    edge.latency_ms,
                    edge.is_secure,
                    edge.encryption,
                    edge.first_seen_at.to_rfc3339(),
                    edge.last_seen_at.to_rfc3339(),
                    edge.metadata.bytes,
                    edge.metadata.packets,
                    edge.metadata.is_industrial,
                    edge.metadata.industrial_protocol,
                ],
            )?;
            (edge.id, true)
        }
    };
    tx.commit()?;
    Ok(result)
}

pub fn find_by_id(conn: &SqlConnection, id: Uuid) -> Result<Option<Connection>, DbError> {
    conn.query_row(
        &format!("{SELECT_SQL} WHERE id = ?1"),
        params![id.to_string()],
        row_to_connection,
    )
    .optional()?
    .transpose()
}

/// All connections touching a device, in either direction.
pub fn find_by_device(conn: &SqlConnection, device_id: Uuid) -> Result<Vec<Connection>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_SQL} WHERE source_device_id = ?1 OR target_device_id = ?1
         ORDER BY last_seen_at DESC"
    ))?;
    let rows: Vec<Result<Connection, DbError>> = stmt
        .query_map(params![device_id.to_string()], row_to_connection)?
        .collect::<Result<_, _>>()?;
    rows.into_iter().collect()
}

pub fn list(conn: &SqlConnection) -> Result<Vec<Connection>, DbError> {
    let mut stmt = conn.prepare(&format!("{SELECT_SQL} ORDER BY first_seen_at"))?;
    let rows: Vec<Result<Connection, DbError>> =
        stmt.query_map([], row_to_connection)?.collect::<Result<_, _>>()?;
    rows.into_iter().collect()
}

/// Delete a connection. Returns the rows actually removed.
pub fn delete(conn: &SqlConnection, id: Uuid) -> Result<usize, DbError> {
    let removed = conn.execute(
        "DELETE FROM connections WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(removed)
}

pub fn count(conn: &SqlConnection) -> Result<usize, DbError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM connections", [], |row| row.get(0))?;
    Ok(n as usize)
}

const SELECT_SQL: &str = "SELECT id, source_device_id, target_device_id, connection_type,
        protocol, port, vlan, bandwidth_bps, latency_ms, is_secure, encryption,
        first_seen_at, last_seen_at, bytes, packets, is_industrial,
        industrial_protocol
 FROM connections";

fn row_to_connection(row: &rusqlite::Row) -> rusqlite::Result<Result<Connection, DbError>> {
    let id: String = row.get(0)?;
    let source: String = row.get(1)?;
    let target: String = row.get(2)?;
    let connection_type: String = row.get(3)?;
    let protocol: Option<String> = row.get(4)?;
    let port: Option<u32> = row.get(5)?;
    let vlan: Option<u16> = row.get(6)?;
    let bandwidth_bps: Option<u64> = row.get(7)?;
    let latency_ms: Option<f64> = row.get(8)?;
    let is_secure: bool = row.get(9)?;
    let encryption: Option<String> = row.get(10)?;
    let first_seen: String = row.get(11)?;
    let last_seen: String = row.get(12)?;
    let bytes: u64 = row.get(13)?;
    let packets: u64 = row.get(14)?;
    let is_industrial: bool = row.get(15)?;
    let industrial_protocol: Option<String> = row.get(16)?;

    Ok((|| {
        Ok(Connection {
            id: parse_uuid(&id)?,
            source_device_id: parse_uuid(&source)?,
            target_device_id: parse_uuid(&target)?,
            connection_type: enum_from(&connection_type)?,
            protocol,
            port: port
                .map(|p| Port::new(p).map_err(|e| DbError::Corrupt(e.to_string())))
                .transpose()?,
            vlan: vlan
                .map(|v| VlanId::new(v).map_err(|e| DbError::Corrupt(e.to_string())))
                .transpose()?,
            bandwidth_bps,
            latency_ms,
            is_secure,
            encryption,
            first_seen_at: parse_time(&first_seen)?,
            last_seen_at: parse_time(&last_seen)?,
            metadata: ConnectionMetadata {
                bytes,
                packets,
                is_industrial,
                industrial_protocol,
            },
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{devices, Database};
    use chrono::Utc;
    use mk_model::{ConnectionType, Device};

    fn two_devices(conn: &SqlConnection) -> (Uuid, Uuid) {
        let a = Device::new("a", Utc::now());
        let b = Device::new("b", Utc::now());
        devices::insert(conn, &a).unwrap();
        devices::insert(conn, &b).unwrap();
        (a.id, b.id)
    }

    fn edge(a: Uuid, b: Uuid) -> Connection {
        let mut edge = Connection::new(a, b, ConnectionType::Ethernet, Utc::now());
        edge.protocol = Some("TCP".to_string());
        edge.port = Some(Port::new(502).unwrap());
        edge.metadata.bytes = 1200;
        edge.metadata.packets = 10;
        edge.metadata.is_industrial = true;
        edge.metadata.industrial_protocol = Some("Modbus".to_string());
        edge
    }

    #[test]
    fn test_upsert_creates_then_accumulates() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let (a, b) = two_devices(&conn);

        let first = edge(a, b);
        let (id1, created1) = upsert(&conn, &first).unwrap();
        assert!(created1);

        let second = edge(a, b);
        let (id2, created2) = upsert(&conn, &second).unwrap();
        assert!(!created2);
        assert_eq!(id1, id2);
        assert_eq!(count(&conn).unwrap(), 1);

        let stored = find_by_id(&conn, id1).unwrap().unwrap();
        assert_eq!(stored.metadata.bytes, 2400);
        assert_eq!(stored.metadata.packets, 20);
        assert!(stored.metadata.is_industrial);
    }

    #[test]
    fn test_distinct_ports_are_distinct_edges() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let (a, b) = two_devices(&conn);

        upsert(&conn, &edge(a, b)).unwrap();
        let mut other = edge(a, b);
        other.port = Some(Port::new(80).unwrap());
        other.metadata.industrial_protocol = None;
        other.metadata.is_industrial = false;
        let (_, created) = upsert(&conn, &other).unwrap();
        assert!(created);
        assert_eq!(count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_find_by_device_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let (a, b) = two_devices(&conn);
        upsert(&conn, &edge(a, b)).unwrap();

        assert_eq!(find_by_device(&conn, a).unwrap().len(), 1);
        assert_eq!(find_by_device(&conn, b).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_count_accurate() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let (a, b) = two_devices(&conn);
        let (id, _) = upsert(&conn, &edge(a, b)).unwrap();

        assert_eq!(delete(&conn, id).unwrap(), 1);
        assert_eq!(delete(&conn, id).unwrap(), 0);
    }

    #[test]
    fn test_round_trip_equality() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let (a, b) = two_devices(&conn);
        let edge = edge(a, b);
        upsert(&conn, &edge).unwrap();

        let stored = find_by_id(&conn, edge.id).unwrap().unwrap();
        // RFC 3339 storage keeps sub-second precision, so the round trip
        // is exact.
        assert_eq!(stored, edge);
    }
}
