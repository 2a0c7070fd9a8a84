//! Risk assessment results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Factor categories contributing to the overall risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Vulnerability,
    Configuration,
    Exposure,
    Compliance,
}

/// A single weighted risk factor with a 0-100 subscore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub category: RiskCategory,
    pub score: u8,
    pub weight: f64,
    pub description: String,
}

/// The risk assessment for one device.
///
/// Invariant: `overall_score == round(Σ factor.score × factor.weight)`
/// and the weights sum to 1.0 ± 0.01.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub device_id: Uuid,
    pub overall_score: u8,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub last_assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Build an assessment, computing the overall score from the factors.
    pub fn from_factors(
        device_id: Uuid,
        factors: Vec<RiskFactor>,
        recommendations: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let overall_score = weighted_score(&factors);
        RiskAssessment {
            device_id,
            overall_score,
            factors,
            recommendations,
            last_assessed_at: now,
        }
    }

    pub fn weights_valid(&self) -> bool {
        let sum: f64 = self.factors.iter().map(|f| f.weight).sum();
        (sum - 1.0).abs() <= 0.01
    }
}

/// `round(Σ score × weight)`, clamped to 0-100.
pub fn weighted_score(factors: &[RiskFactor]) -> u8 {
    let total: f64 = factors
        .iter()
        .map(|f| f.score as f64 * f.weight)
        .sum();
    total.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(category: RiskCategory, score: u8, weight: f64) -> RiskFactor {
        RiskFactor {
            name: format!("{:?}", category),
            category,
            score,
            weight,
            description: String::new(),
        }
    }

    #[test]
    fn test_weighted_score_example() {
        // 80*0.35 + 60*0.25 + 40*0.25 + 20*0.15 = 28 + 15 + 10 + 3 = 56
        let factors = vec![
            factor(RiskCategory::Vulnerability, 80, 0.35),
            factor(RiskCategory::Configuration, 60, 0.25),
            factor(RiskCategory::Exposure, 40, 0.25),
            factor(RiskCategory::Compliance, 20, 0.15),
        ];
        assert_eq!(weighted_score(&factors), 56);
    }

    #[test]
    fn test_overall_matches_weighted_sum() {
        let factors = vec![
            factor(RiskCategory::Vulnerability, 90, 0.35),
            factor(RiskCategory::Configuration, 45, 0.25),
            factor(RiskCategory::Exposure, 77, 0.25),
            factor(RiskCategory::Compliance, 12, 0.15),
        ];
        let assessment =
            RiskAssessment::from_factors(Uuid::new_v4(), factors.clone(), vec![], Utc::now());
        let exact: f64 = factors.iter().map(|f| f.score as f64 * f.weight).sum();
        assert!((exact - assessment.overall_score as f64).abs() <= 0.5);
        assert!(assessment.weights_valid());
    }

    #[test]
    fn test_weights_out_of_tolerance_detected() {
        let factors = vec![
            factor(RiskCategory::Vulnerability, 50, 0.5),
            factor(RiskCategory::Exposure, 50, 0.3),
        ];
        let assessment = RiskAssessment::from_factors(Uuid::new_v4(), factors, vec![], Utc::now());
        assert!(!assessment.weights_valid());
    }
}
