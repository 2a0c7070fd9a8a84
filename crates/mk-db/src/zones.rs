//! Zone definition repository.

use rusqlite::{params, Connection, OptionalExtension};

use mk_model::{Cidr, FirewallRule, ZoneDefinition};

use crate::error::DbError;
use crate::{enum_from, enum_str};

pub fn upsert(conn: &Connection, zone: &ZoneDefinition) -> Result<(), DbError> {
    let subnets: Vec<String> = zone.subnets.iter().map(|s| s.to_string()).collect();
    conn.execute(
        "INSERT INTO zones (name, purdue_level, security_zone, subnets, firewall_rules)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
            purdue_level = excluded.purdue_level,
            security_zone = excluded.security_zone,
            subnets = excluded.subnets,
            firewall_rules = excluded.firewall_rules",
        params![
            zone.name,
            enum_str(&zone.purdue_level)?,
            enum_str(&zone.security_zone)?,
            serde_json::to_string(&subnets)?,
            serde_json::to_string(&zone.firewall_rules)?,
        ],
    )?;
    Ok(())
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<ZoneDefinition>, DbError> {
    conn.query_row(
        "SELECT name, purdue_level, security_zone, subnets, firewall_rules
         FROM zones WHERE name = ?1",
        params![name],
        row_to_zone,
    )
    .optional()?
    .transpose()
}

pub fn list(conn: &Connection) -> Result<Vec<ZoneDefinition>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name, purdue_level, security_zone, subnets, firewall_rules
         FROM zones ORDER BY name",
    )?;
    let rows: Vec<Result<ZoneDefinition, DbError>> =
        stmt.query_map([], row_to_zone)?.collect::<Result<_, _>>()?;
    rows.into_iter().collect()
}

fn row_to_zone(row: &rusqlite::Row) -> rusqlite::Result<Result<ZoneDefinition, DbError>> {
    let name: String = row.get(0)?;
    let purdue_level: String = row.get(1)?;
    let security_zone: String = row.get(2)?;
    let subnets: String = row.get(3)?;
    let firewall_rules: String = row.get(4)?;

    Ok((|| {
        let subnets: Vec<String> = serde_json::from_str(&subnets)?;
        let subnets: Result<Vec<Cidr>, DbError> = subnets
            .iter()
            .map(|s| {
                s.parse()
                    .map_err(|e| DbError::Corrupt(format!("stored CIDR {s:?}: {e}")))
            })
            .collect();
        let firewall_rules: Vec<FirewallRule> = serde_json::from_str(&firewall_rules)?;
        Ok(ZoneDefinition {
            name,
            purdue_level: enum_from(&purdue_level)?,
            security_zone: enum_from(&security_zone)?,
            subnets: subnets?,
            firewall_rules,
        })
    })())
}
