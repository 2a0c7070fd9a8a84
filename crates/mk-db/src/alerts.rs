//! Alert repository. Alerts are append-only from the pipeline side;
//! acknowledge/resolve land here from external user actions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use mk_model::Alert;

use crate::error::DbError;
use crate::{enum_from, enum_str, parse_time, parse_uuid};

pub fn create(conn: &Connection, alert: &Alert) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO alerts (
            id, alert_type, severity, title, description, device_id,
            connection_id, details, remediation, acknowledged, acknowledged_by,
            acknowledged_at, resolved, resolved_by, resolved_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            alert.id.to_string(),
            enum_str(&alert.alert_type)?,
            enum_str(&alert.severity)?,
            alert.title,
            alert.description,
            alert.device_id.map(|id| id.to_string()),
            alert.connection_id.map(|id| id.to_string()),
            serde_json::to_string(&alert.details)?,
            alert.remediation,
            alert.acknowledged,
            alert.acknowledged_by,
            alert.acknowledged_at.map(|t| t.to_rfc3339()),
            alert.resolved,
            alert.resolved_by,
            alert.resolved_at.map(|t| t.to_rfc3339()),
            alert.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Acknowledge an alert. Returns false if it was already acknowledged
/// or does not exist.
pub fn acknowledge(
    conn: &Connection,
    id: Uuid,
    by: &str,
    at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let changed = conn.execute(
        "UPDATE alerts SET acknowledged = 1, acknowledged_by = ?2, acknowledged_at = ?3
         WHERE id = ?1 AND acknowledged = 0",
        params![id.to_string(), by, at.to_rfc3339()],
    )?;
    Ok(changed == 1)
}

/// Resolve an alert. Returns false if already resolved or missing.
pub fn resolve(
    conn: &Connection,
    id: Uuid,
    by: &str,
    at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let changed = conn.execute(
        "UPDATE alerts SET resolved = 1, resolved_by = ?2, resolved_at = ?3
         WHERE id = ?1 AND resolved = 0",
        params![id.to_string(), by, at.to_rfc3339()],
    )?;
    Ok(changed == 1)
}

/// Unresolved alerts, oldest first (creation order per device).
pub fn find_unresolved(conn: &Connection) -> Result<Vec<Alert>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_SQL} WHERE resolved = 0 ORDER BY created_at"
    ))?;
    let rows: Vec<Result<Alert, DbError>> =
        stmt.query_map([], row_to_alert)?.collect::<Result<_, _>>()?;
    rows.into_iter().collect()
}

pub fn find_by_device(conn: &Connection, device_id: Uuid) -> Result<Vec<Alert>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_SQL} WHERE device_id = ?1 ORDER BY created_at"
    ))?;
    let rows: Vec<Result<Alert, DbError>> = stmt
        .query_map(params![device_id.to_string()], row_to_alert)?
        .collect::<Result<_, _>>()?;
    rows.into_iter().collect()
}

pub fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<Alert>, DbError> {
    conn.query_row(
        &format!("{SELECT_SQL} WHERE id = ?1"),
        params![id.to_string()],
        row_to_alert,
    )
    .optional()?
    .transpose()
}

pub fn count(conn: &Connection) -> Result<usize, DbError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
    Ok(n as usize)
}

const SELECT_SQL: &str = "SELECT id, alert_type, severity, title, description, device_id,
        connection_id, details, remediation, acknowledged, acknowledged_by,
        acknowledged_at, resolved, resolved_by, resolved_at, created_at
 FROM alerts";

fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Result<Alert, DbError>> {
    let id: String = row.get(0)?;
    let alert_type: String = row.get(1)?;
    let severity: String = row.get(2)?;
    let title: String = row.get(3)?;
    let description: String = row.get(4)?;
    let device_id: Option<String> = row.get(5)?;
    let connection_id: Option<String> = row.get(6)?;
    let details: String = row.get(7)?;
    let remediation: Option<String> = row.get(8)?;
    let acknowledged: bool = row.get(9)?;
    let acknowledged_by: Option<String> = row.get(10)?;
    let acknowledged_at: Option<String> = row.get(11)?;
    let resolved: bool = row.get(12)?;
    let resolved_by: Option<String> = row.get(13)?;
    let resolved_at: Option<String> = row.get(14)?;
    let created_at: String = row.get(15)?;

    Ok((|| {
        let details: BTreeMap<String, String> = serde_json::from_str(&details)?;
        Ok(Alert {
            id: parse_uuid(&id)?,
            alert_type: enum_from(&alert_type)?,
            severity: enum_from(&severity)?,
            title,
            description,
            device_id: device_id.as_deref().map(parse_uuid).transpose()?,
            connection_id: connection_id.as_deref().map(parse_uuid).transpose()?,
            details,
            remediation,
            acknowledged,
            acknowledged_by,
            acknowledged_at: acknowledged_at.as_deref().map(parse_time).transpose()?,
            resolved,
            resolved_by,
            resolved_at: resolved_at.as_deref().map(parse_time).transpose()?,
            created_at: parse_time(&created_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use mk_model::{AlertSeverity, AlertType};

    fn sample_alert() -> Alert {
        Alert::new(
            AlertType::CrossZoneConnection,
            AlertSeverity::High,
            "Cross-zone connection",
            "control zone device talking to enterprise",
            Utc::now(),
        )
        .with_detail("port", "80")
    }

    #[test]
    fn test_create_and_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let alert = sample_alert();
        create(&conn, &alert).unwrap();

        let stored = find_by_id(&conn, alert.id).unwrap().unwrap();
        assert_eq!(stored, alert);
    }

    #[test]
    fn test_acknowledge_once() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let alert = sample_alert();
        create(&conn, &alert).unwrap();

        assert!(acknowledge(&conn, alert.id, "operator", Utc::now()).unwrap());
        assert!(!acknowledge(&conn, alert.id, "operator", Utc::now()).unwrap());

        let stored = find_by_id(&conn, alert.id).unwrap().unwrap();
        assert!(stored.acknowledged);
        assert_eq!(stored.acknowledged_by.as_deref(), Some("operator"));
    }

    #[test]
    fn test_resolve_removes_from_unresolved() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let alert = sample_alert();
        create(&conn, &alert).unwrap();

        assert_eq!(find_unresolved(&conn).unwrap().len(), 1);
        assert!(resolve(&conn, alert.id, "operator", Utc::now()).unwrap());
        assert!(find_unresolved(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_in_creation_order() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let now = Utc::now();
        for i in 0..3 {
            let mut alert = sample_alert();
            alert.created_at = now + chrono::Duration::seconds(i);
            alert.title = format!("alert-{i}");
            create(&conn, &alert).unwrap();
        }
        let unresolved = find_unresolved(&conn).unwrap();
        let titles: Vec<&str> = unresolved.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["alert-0", "alert-1", "alert-2"]);
    }
}
