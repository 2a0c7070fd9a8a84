//! Risk assessment repository. One row per device, replaced on each
//! recomputation.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use mk_model::{RiskAssessment, RiskFactor};

use crate::error::DbError;
use crate::{parse_time, parse_uuid};

pub fn upsert(conn: &Connection, assessment: &RiskAssessment) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO risk_assessments (
            device_id, overall_score, factors, recommendations, last_assessed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(device_id) DO UPDATE SET
            overall_score = excluded.overall_score,
            factors = excluded.factors,
            recommendations = excluded.recommendations,
            last_assessed_at = excluded.last_assessed_at",
        params![
            assessment.device_id.to_string(),
            assessment.overall_score,
            serde_json::to_string(&assessment.factors)?,
            serde_json::to_string(&assessment.recommendations)?,
            assessment.last_assessed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn find_by_device(
    conn: &Connection,
    device_id: Uuid,
) -> Result<Option<RiskAssessment>, DbError> {
    conn.query_row(
        "SELECT device_id, overall_score, factors, recommendations, last_assessed_at
         FROM risk_assessments WHERE device_id = ?1",
        params![device_id.to_string()],
        row_to_assessment,
    )
    .optional()?
    .transpose()
}

fn row_to_assessment(
    row: &rusqlite::Row,
) -> rusqlite::Result<Result<RiskAssessment, DbError>> {
    let device_id: String = row.get(0)?;
    let overall_score: u8 = row.get(1)?;
    let factors: String = row.get(2)?;
    let recommendations: String = row.get(3)?;
    let last_assessed_at: String = row.get(4)?;

    Ok((|| {
        let factors: Vec<RiskFactor> = serde_json::from_str(&factors)?;
        let recommendations: Vec<String> = serde_json::from_str(&recommendations)?;
        Ok(RiskAssessment {
            device_id: parse_uuid(&device_id)?,
            overall_score,
            factors,
            recommendations,
            last_assessed_at: parse_time(&last_assessed_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{devices, Database};
    use chrono::Utc;
    use mk_model::{Device, RiskCategory};

    #[test]
    fn test_upsert_replaces() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let device = Device::new("plc", Utc::now());
        devices::insert(&conn, &device).unwrap();

        let factors = vec![
            RiskFactor {
                name: "vulnerability".to_string(),
                category: RiskCategory::Vulnerability,
                score: 80,
                weight: 0.35,
                description: String::new(),
            },
            RiskFactor {
                name: "configuration".to_string(),
                category: RiskCategory::Configuration,
                score: 60,
                weight: 0.25,
                description: String::new(),
            },
            RiskFactor {
                name: "exposure".to_string(),
                category: RiskCategory::Exposure,
                score: 40,
                weight: 0.25,
                description: String::new(),
            },
            RiskFactor {
                name: "compliance".to_string(),
                category: RiskCategory::Compliance,
                score: 20,
                weight: 0.15,
                description: String::new(),
            },
        ];
        let assessment =
            RiskAssessment::from_factors(device.id, factors, vec![], Utc::now());
        assert_eq!(assessment.overall_score, 56);

        upsert(&conn, &assessment).unwrap();
        upsert(&conn, &assessment).unwrap();

        let stored = find_by_device(&conn, device.id).unwrap().unwrap();
        assert_eq!(stored, assessment);
    }
}
