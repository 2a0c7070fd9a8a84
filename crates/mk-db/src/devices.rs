//! Device repository.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use mk_model::{Device, MacAddr, NetworkInterface, VlanId};

use crate::error::DbError;
use crate::{enum_from, enum_str, parse_time, parse_uuid};

/// Insert a new device with its interfaces, atomically.
pub fn insert(conn: &Connection, device: &Device) -> Result<(), DbError> {
    let tx = conn.unchecked_transaction()?;
    insert_device_row(&tx, device)?;
    replace_interfaces(&tx, device)?;
    tx.commit()?;
    Ok(())
}

/// Update an existing device and replace its interface set, atomically.
pub fn update(conn: &Connection, device: &Device) -> Result<(), DbError> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE devices SET
            name = ?2, hostname = ?3, device_type = ?4, vendor = ?5, model = ?6,
            firmware_version = ?7, serial_number = ?8, purdue_level = ?9,
            security_zone = ?10, status = ?11, location = ?12, metadata = ?13,
            discovered_at = ?14, last_seen_at = ?15
         WHERE id = ?1",
        params![
            device.id.to_string(),
            device.name,
            device.hostname,
            enum_str(&device.device_type)?,
            device.vendor,
            device.model,
            device.firmware_version,
            device.serial_number,
            enum_str(&device.purdue_level)?,
            enum_str(&device.security_zone)?,
            enum_str(&device.status)?,
            device.location,
            serde_json::to_string(&device.metadata)?,
            device.discovered_at.to_rfc3339(),
            device.last_seen_at.to_rfc3339(),
        ],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("device {}", device.id)));
    }
    replace_interfaces(&tx, device)?;
    tx.commit()?;
    Ok(())
}

/// Insert-or-update keyed on the device id.
pub fn upsert(conn: &Connection, device: &Device) -> Result<(), DbError> {
    let tx = conn.unchecked_transaction()?;
    insert_device_row(&tx, device)?;
    replace_interfaces(&tx, device)?;
    tx.commit()?;
    Ok(())
}

fn insert_device_row(conn: &Connection, device: &Device) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO devices (
            id, name, hostname, device_type, vendor, model, firmware_version,
            serial_number, purdue_level, security_zone, status, location,
            metadata, discovered_at, last_seen_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name, hostname = excluded.hostname,
            device_type = excluded.device_type, vendor = excluded.vendor,
            model = excluded.model, firmware_version = excluded.firmware_version,
            serial_number = excluded.serial_number, purdue_level = excluded.purdue_level,
            security_zone = excluded.security_zone, status = excluded.status,
            location = excluded.location, metadata = excluded.metadata,
            discovered_at = excluded.discovered_at, last_seen_at = excluded.last_seen_at",
        params![
            device.id.to_string(),
            device.name,
            device.hostname,
            enum_str(&device.device_type)?,
            device.vendor,
            device.model,
            device.firmware_version,
            device.serial_number,
            enum_str(&device.purdue_level)?,
            enum_str(&device.security_zone)?,
            enum_str(&device.status)?,
            device.location,
            serde_json::to_string(&device.metadata)?,
            device.discovered_at.to_rfc3339(),
            device.last_seen_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn replace_interfaces(conn: &Connection, device: &Device) -> Result<(), DbError> {
    conn.execute(
        "DELETE FROM interfaces WHERE device_id = ?1",
        params![device.id.to_string()],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO interfaces (
            device_id, name, mac, ip, netmask, gateway, vlan, speed_bps,
            duplex, admin_status, oper_status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for iface in &device.interfaces {
        stmt.execute(params![
            device.id.to_string(),
            iface.name,
            iface.mac.to_string(),
            iface.ip.map(|ip| ip.to_string()),
            iface.netmask.map(|m| m.to_string()),
            iface.gateway.map(|g| g.to_string()),
            iface.vlan.map(|v| v.get()),
            iface.speed_bps,
            iface.duplex.map(|d| enum_str(&d)).transpose()?,
            iface.admin_status.map(|s| enum_str(&s)).transpose()?,
            iface.oper_status.map(|s| enum_str(&s)).transpose()?,
        ])?;
    }
    Ok(())
}

/// Fetch a device by id with its interfaces.
pub fn get(conn: &Connection, id: Uuid) -> Result<Device, DbError> {
    find_by_id(conn, id)?.ok_or_else(|| DbError::NotFound(format!("device {id}")))
}

pub fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<Device>, DbError> {
    let row = conn
        .query_row(
            "SELECT id, name, hostname, device_type, vendor, model, firmware_version,
                    serial_number, purdue_level, security_zone, status, location,
                    metadata, discovered_at, last_seen_at
             FROM devices WHERE id = ?1",
            params![id.to_string()],
            scalar_row,
        )
        .optional()?;
    match row {
        Some(row) => Ok(Some(hydrate(conn, row)?)),
        None => Ok(None),
    }
}

/// Find the device owning an interface with this IP.
pub fn find_by_ip(conn: &Connection, ip: Ipv4Addr) -> Result<Option<Device>, DbError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT device_id FROM interfaces WHERE ip = ?1 LIMIT 1",
            params![ip.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match id {
        Some(id) => find_by_id(conn, parse_uuid(&id)?),
        None => Ok(None),
    }
}

/// Find the device owning an interface with this MAC.
pub fn find_by_mac(conn: &Connection, mac: &MacAddr) -> Result<Option<Device>, DbError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT device_id FROM interfaces WHERE mac = ?1 LIMIT 1",
            params![mac.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match id {
        Some(id) => find_by_id(conn, parse_uuid(&id)?),
        None => Ok(None),
    }
}

/// Case-insensitive substring search over name, hostname and vendor.
pub fn search(conn: &Connection, query: &str) -> Result<Vec<Device>, DbError> {
    let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
    let mut stmt = conn.prepare(
        "SELECT id, name, hostname, device_type, vendor, model, firmware_version,
                serial_number, purdue_level, security_zone, status, location,
                metadata, discovered_at, last_seen_at
         FROM devices
         WHERE name LIKE ?1 ESCAPE '\\'
            OR hostname LIKE ?1 ESCAPE '\\'
            OR vendor LIKE ?1 ESCAPE '\\'
         ORDER BY name",
    )?;
    let rows: Vec<ScalarRow> = stmt
        .query_map(params![pattern], scalar_row)?
        .collect::<Result<_, _>>()?;
    rows.into_iter().map(|row| hydrate(conn, row)).collect()
}

/// All devices, interfaces included.
pub fn list(conn: &Connection) -> Result<Vec<Device>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, hostname, device_type, vendor, model, firmware_version,
                serial_number, purdue_level, security_zone, status, location,
                metadata, discovered_at, last_seen_at
         FROM devices ORDER BY discovered_at",
    )?;
    let rows: Vec<ScalarRow> = stmt
        .query_map([], scalar_row)?
        .collect::<Result<_, _>>()?;
    rows.into_iter().map(|row| hydrate(conn, row)).collect()
}

/// Advance a device's last-seen timestamp.
pub fn update_last_seen(
    conn: &Connection,
    id: Uuid,
    seen_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE devices SET last_seen_at = ?2 WHERE id = ?1 AND last_seen_at < ?2",
        params![id.to_string(), seen_at.to_rfc3339()],
    )?;
    if changed == 0 {
        // Either missing or already newer; missing is the error case.
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM devices WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(DbError::NotFound(format!("device {id}")));
        }
    }
    Ok(())
}

/// Delete a device. Returns the number of rows actually removed —
/// exactly once, exactly the real effect.
pub fn delete(conn: &Connection, id: Uuid) -> Result<usize, DbError> {
    let removed = conn.execute(
        "DELETE FROM devices WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(removed)
}

pub fn count(conn: &Connection) -> Result<usize, DbError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
    Ok(n as usize)
}

struct ScalarRow {
    id: String,
    name: String,
    hostname: Option<String>,
    device_type: String,
    vendor: Option<String>,
    model: Option<String>,
    firmware_version: Option<String>,
    serial_number: Option<String>,
    purdue_level: String,
    security_zone: String,
    status: String,
    location: Option<String>,
    metadata: String,
    discovered_at: String,
    last_seen_at: String,
}

fn scalar_row(row: &rusqlite::Row) -> rusqlite::Result<ScalarRow> {
    Ok(ScalarRow {
        id: row.get(0)?,
        name: row.get(1)?,
        hostname: row.get(2)?,
        device_type: row.get(3)?,
        vendor: row.get(4)?,
        model: row.get(5)?,
        firmware_version: row.get(6)?,
        serial_number: row.get(7)?,
        purdue_level: row.get(8)?,
        security_zone: row.get(9)?,
        status: row.get(10)?,
        location: row.get(11)?,
        metadata: row.get(12)?,
        discovered_at: row.get(13)?,
        last_seen_at: row.get(14)?,
    })
}

fn hydrate(conn: &Connection, row: ScalarRow) -> Result<Device, DbError> {
    let metadata: BTreeMap<String, String> = serde_json::from_str(&row.metadata)?;
    let id = parse_uuid(&row.id)?;
    Ok(Device {
        id,
        name: row.name,
        hostname: row.hostname,
        device_type: enum_from(&row.device_type)?,
        vendor: row.vendor,
        model: row.model,
        firmware_version: row.firmware_version,
        serial_number: row.serial_number,
        purdue_level: enum_from(&row.purdue_level)?,
        security_zone: enum_from(&row.security_zone)?,
        status: enum_from(&row.status)?,
        interfaces: interfaces_for(conn, id)?,
        location: row.location,
        metadata,
        discovered_at: parse_time(&row.discovered_at)?,
        last_seen_at: parse_time(&row.last_seen_at)?,
    })
}

fn interfaces_for(conn: &Connection, device_id: Uuid) -> Result<Vec<NetworkInterface>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name, mac, ip, netmask, gateway, vlan, speed_bps, duplex,
                admin_status, oper_status
         FROM interfaces WHERE device_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![device_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<u16>>(5)?,
            row.get::<_, Option<u64>>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<String>>(9)?,
        ))
    })?;

    let mut interfaces = Vec::new();
    for row in rows {
        let (name, mac, ip, netmask, gateway, vlan, speed_bps, duplex, admin, oper) = row?;
        let mac: MacAddr = mac
            .parse()
            .map_err(|e| DbError::Corrupt(format!("stored MAC: {e}")))?;
        let parse_ip = |s: Option<String>| -> Result<Option<Ipv4Addr>, DbError> {
            s.map(|s| {
                s.parse()
                    .map_err(|_| DbError::Corrupt(format!("stored IP {s:?}")))
            })
            .transpose()
        };
        interfaces.push(NetworkInterface {
            name,
            mac,
            ip: parse_ip(ip)?,
            netmask: parse_ip(netmask)?,
            gateway: parse_ip(gateway)?,
            vlan: vlan
                .map(|v| VlanId::new(v).map_err(|e| DbError::Corrupt(e.to_string())))
                .transpose()?,
            speed_bps,
            duplex: duplex.as_deref().map(enum_from).transpose()?,
            admin_status: admin.as_deref().map(enum_from).transpose()?,
            oper_status: oper.as_deref().map(enum_from).transpose()?,
        });
    }
    Ok(interfaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use mk_model::{DeviceType, PurdueLevel};

    fn sample_device() -> Device {
        let mut device = Device::new("plc-line1", Utc::now());
        device.hostname = Some("plc-line1".to_string());
        device.device_type = DeviceType::Plc;
        device.vendor = Some("Siemens".to_string());
        device.set_purdue_level(PurdueLevel::Level1);
        let mut iface =
            NetworkInterface::new("X1", "28:63:36:aa:bb:cc".parse().unwrap());
        iface.ip = Some("10.0.1.50".parse().unwrap());
        device.interfaces.push(iface);
        device
    }

    #[test]
    fn test_create_then_find_by_id_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let device = sample_device();
        insert(&conn, &device).unwrap();

        let fetched = get(&conn, device.id).unwrap();
        assert_eq!(fetched, device);
    }

    #[test]
    fn test_find_by_ip_and_mac() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let device = sample_device();
        insert(&conn, &device).unwrap();

        let by_ip = find_by_ip(&conn, "10.0.1.50".parse().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(by_ip.id, device.id);

        let mac: MacAddr = "28:63:36:AA:BB:CC".parse().unwrap();
        let by_mac = find_by_mac(&conn, &mac).unwrap().unwrap();
        assert_eq!(by_mac.id, device.id);

        assert!(find_by_ip(&conn, "10.9.9.9".parse().unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let device = sample_device();
        upsert(&conn, &device).unwrap();
        upsert(&conn, &device).unwrap();
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_update_last_seen_advances_only() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let device = sample_device();
        insert(&conn, &device).unwrap();

        let later = device.last_seen_at + chrono::Duration::seconds(60);
        update_last_seen(&conn, device.id, later).unwrap();
        let fetched = get(&conn, device.id).unwrap();
        assert_eq!(fetched.last_seen_at, later);

        // An older stamp is a no-op, not a rollback.
        update_last_seen(&conn, device.id, later - chrono::Duration::hours(1)).unwrap();
        assert_eq!(get(&conn, device.id).unwrap().last_seen_at, later);
    }

    #[test]
    fn test_update_missing_device_fails() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        assert!(matches!(
            update_last_seen(&conn, Uuid::new_v4(), Utc::now()),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_returns_true_count() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let device = sample_device();
        insert(&conn, &device).unwrap();

        assert_eq!(delete(&conn, device.id).unwrap(), 1);
        assert_eq!(delete(&conn, device.id).unwrap(), 0);
    }

    #[test]
    fn test_search() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        insert(&conn, &sample_device()).unwrap();

        assert_eq!(search(&conn, "plc").unwrap().len(), 1);
        assert_eq!(search(&conn, "Siemens").unwrap().len(), 1);
        assert_eq!(search(&conn, "rockwell").unwrap().len(), 0);
    }
}
