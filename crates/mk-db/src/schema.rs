//! Database schema initialization.

use rusqlite::Connection;

use crate::error::DbError;

/// All CREATE TABLE statements for the topology database.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    hostname         TEXT,
    device_type      TEXT NOT NULL DEFAULT 'unknown',
    vendor           TEXT,
    model            TEXT,
    firmware_version TEXT,
    serial_number    TEXT,
    purdue_level     TEXT NOT NULL,
    security_zone    TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'unknown',
    location         TEXT,
    metadata         TEXT NOT NULL DEFAULT '{}',
    discovered_at    TEXT NOT NULL,
    last_seen_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devices_hostname ON devices(hostname);

CREATE TABLE IF NOT EXISTS interfaces (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id    TEXT NOT NULL,
    name         TEXT NOT NULL,
    mac          TEXT NOT NULL,
    ip           TEXT,
    netmask      TEXT,
    gateway      TEXT,
    vlan         INTEGER,
    speed_bps    INTEGER,
    duplex       TEXT,
    admin_status TEXT,
    oper_status  TEXT,
    FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE,
    UNIQUE (device_id, mac)
);

CREATE INDEX IF NOT EXISTS idx_interfaces_mac ON interfaces(mac);
CREATE INDEX IF NOT EXISTS idx_interfaces_ip ON interfaces(ip);

CREATE TABLE IF NOT EXISTS connections (
    id                  TEXT PRIMARY KEY,
    source_device_id    TEXT NOT NULL,
    target_device_id    TEXT NOT NULL,
    connection_type     TEXT NOT NULL DEFAULT 'unknown',
    protocol            TEXT,
    port                INTEGER,
    vlan                INTEGER,
    bandwidth_bps       INTEGER,
    latency_ms          REAL,
    is_secure           INTEGER NOT NULL DEFAULT 0,
    encryption          TEXT,
    first_seen_at       TEXT NOT NULL,
    last_seen_at        TEXT NOT NULL,
    bytes               INTEGER NOT NULL DEFAULT 0,
    packets             INTEGER NOT NULL DEFAULT 0,
    is_industrial       INTEGER NOT NULL DEFAULT 0,
    industrial_protocol TEXT,
    FOREIGN KEY (source_device_id) REFERENCES devices(id) ON DELETE CASCADE,
    FOREIGN KEY (target_device_id) REFERENCES devices(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_connections_edge
    ON connections(source_device_id, target_device_id, IFNULL(protocol, ''), IFNULL(port, 0));

CREATE TABLE IF NOT EXISTS alerts (
    id              TEXT PRIMARY KEY,
    alert_type      TEXT NOT NULL,
    severity        TEXT NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    device_id       TEXT,
    connection_id   TEXT,
    details         TEXT NOT NULL DEFAULT '{}',
    remediation     TEXT,
    acknowledged    INTEGER NOT NULL DEFAULT 0,
    acknowledged_by TEXT,
    acknowledged_at TEXT,
    resolved        INTEGER NOT NULL DEFAULT 0,
    resolved_by     TEXT,
    resolved_at     TEXT,
    created_at      TEXT NOT NULL,
    FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_device ON alerts(device_id);
CREATE INDEX IF NOT EXISTS idx_alerts_unresolved ON alerts(resolved) WHERE resolved = 0;

CREATE TABLE IF NOT EXISTS telemetry (
    id        TEXT PRIMARY KEY,
    source    TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    data      TEXT NOT NULL,
    raw       TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    metadata  TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_telemetry_unprocessed ON telemetry(processed) WHERE processed = 0;

CREATE TABLE IF NOT EXISTS zones (
    name           TEXT PRIMARY KEY,
    purdue_level   TEXT NOT NULL,
    security_zone  TEXT NOT NULL,
    subnets        TEXT NOT NULL DEFAULT '[]',
    firewall_rules TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS topology_snapshots (
    id          TEXT PRIMARY KEY,
    timestamp   TEXT NOT NULL,
    devices     TEXT NOT NULL,
    connections TEXT NOT NULL,
    zones       TEXT NOT NULL,
    summary     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS risk_assessments (
    device_id        TEXT PRIMARY KEY,
    overall_score    INTEGER NOT NULL,
    factors          TEXT NOT NULL DEFAULT '[]',
    recommendations  TEXT NOT NULL DEFAULT '[]',
    last_assessed_at TEXT NOT NULL,
    FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    action      TEXT NOT NULL,
    old_value   TEXT,
    new_value   TEXT,
    origin      TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type, entity_id);
"#;

/// Initialize the database schema (creates tables if they don't exist).
pub fn initialize(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(SCHEMA_SQL)?;
    log::info!("database schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "devices",
            "interfaces",
            "connections",
            "alerts",
            "telemetry",
            "zones",
            "topology_snapshots",
            "risk_assessments",
            "audit_logs",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
    }
}
