//! Append-only audit log for identity-affecting changes (device merges,
//! classification changes, attribute overwrites).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::DbError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub origin: String,
    pub created_at: String,
}

#[allow(clippy::too_many_arguments)]
pub fn append(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    action: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    origin: &str,
    at: DateTime<Utc>,
) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO audit_logs (entity_type, entity_id, action, old_value, new_value, origin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entity_type,
            entity_id,
            action,
            old_value,
            new_value,
            origin,
            at.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, action, old_value, new_value, origin, created_at
         FROM audit_logs WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                action: row.get(3)?,
                old_value: row.get(4)?,
                new_value: row.get(5)?,
                origin: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn test_append_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        append(
            &conn,
            "device",
            "abc",
            "merge",
            Some("old-id"),
            Some("new-id"),
            "correlation",
            Utc::now(),
        )
        .unwrap();

        let entries = for_entity(&conn, "device", "abc").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "merge");
        assert_eq!(entries[0].old_value.as_deref(), Some("old-id"));
    }
}
