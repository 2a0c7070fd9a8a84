//! Per-device risk scoring.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mk_model::{
    Alert, AlertSeverity, AlertType, Connection, Device, DeviceType, PurdueLevel, RiskAssessment,
    RiskCategory, RiskFactor, SecurityZone, ZoneDefinition,
};

use crate::compliance;
use crate::exposure;
use crate::{WEIGHT_COMPLIANCE, WEIGHT_CONFIGURATION, WEIGHT_EXPOSURE, WEIGHT_VULNERABILITY};

/// Metadata keys the analyzer reads when present.
const META_FIRMWARE_AGE_YEARS: &str = "firmware_age_years";
const META_SNMP_VERSION: &str = "snmp_version";
const META_SNMP_COMMUNITY: &str = "snmp_community";

/// Vendor/model pairs with well-known published vulnerabilities; a
/// match pushes the vulnerability subscore to at least 90.
const KNOWN_VULNERABLE: &[(&str, &str)] = &[
    ("siemens", "s7-300"),
    ("siemens", "s7-400"),
    ("schneider", "modicon quantum"),
    ("schneider", "modicon m340"),
    ("rockwell", "micrologix 1400"),
    ("ge", "90-30"),
];

/// The topology slice an assessment runs over.
pub struct AnalysisInput<'a> {
    pub devices: &'a [Device],
    pub connections: &'a [Connection],
    pub zones: &'a [ZoneDefinition],
}

pub struct RiskAnalyzer;

impl RiskAnalyzer {
    pub fn new() -> Self {
        RiskAnalyzer
    }

    /// Assess every device, reusing one exposure sweep.
    pub fn assess_all(&self, input: &AnalysisInput<'_>, now: DateTime<Utc>) -> Vec<RiskAssessment> {
        let reachable = exposure::enterprise_reachable(input.devices, input.connections);
        input
            .devices
            .iter()
            .map(|device| self.assess_with(device, input, &reachable, now))
            .collect()
    }

    /// Assess one device.
    pub fn assess(
        &self,
        device: &Device,
        input: &AnalysisInput<'_>,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let reachable = exposure::enterprise_reachable(input.devices, input.connections);
        self.assess_with(device, input, &reachable, now)
    }

    fn assess_with(
        &self,
        device: &Device,
        input: &AnalysisInput<'_>,
        enterprise_reachable: &HashSet<Uuid>,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let mut recommendations = Vec::new();

        let vulnerability = vulnerability_score(device, &mut recommendations);
        let configuration = configuration_score(device, input.connections, &mut recommendations);
        let exposure = exposure_score(device, input, enterprise_reachable, &mut recommendations);
        let compliance_findings =
            compliance::check_device(device, input.devices, input.connections, input.zones);
        let compliance = compliance::score(&compliance_findings);
        for finding in &compliance_findings {
            recommendations.push(finding.detail.clone());
        }

        let factors = vec![
            RiskFactor {
                name: "vulnerability".to_string(),
                category: RiskCategory::Vulnerability,
                score: vulnerability,
                weight: WEIGHT_VULNERABILITY,
                description: "Device class, firmware age, and known CVE matches".to_string(),
            },
            RiskFactor {
                name: "configuration".to_string(),
                category: RiskCategory::Configuration,
                score: configuration,
                weight: WEIGHT_CONFIGURATION,
                description: "Protocol security and management-plane hygiene".to_string(),
            },
            RiskFactor {
                name: "exposure".to_string(),
                category: RiskCategory::Exposure,
                score: exposure,
                weight: WEIGHT_EXPOSURE,
                description: "Cross-zone connectivity and enterprise reachability".to_string(),
            },
            RiskFactor {
                name: "compliance".to_string(),
                category: RiskCategory::Compliance,
                score: compliance,
                weight: WEIGHT_COMPLIANCE,
                description: "Documented zones and conduit rules".to_string(),
            },
        ];

        RiskAssessment::from_factors(device.id, factors, recommendations, now)
    }
}

impl Default for RiskAnalyzer {
    fn default() -> Self {
        RiskAnalyzer::new()
    }
}

fn vulnerability_score(device: &Device, recommendations: &mut Vec<String>) -> u8 {
    let mut score: u32 = match device.device_type {
        DeviceType::Plc | DeviceType::Rtu | DeviceType::Dcs | DeviceType::Controller => 60,
        DeviceType::ScadaServer | DeviceType::Hmi => 50,
        DeviceType::Sensor | DeviceType::Actuator | DeviceType::Drive | DeviceType::Instrument => {
            45
        }
        DeviceType::Historian | DeviceType::Mes | DeviceType::EngineeringWorkstation => 40,
        DeviceType::Switch | DeviceType::Router => 35,
        DeviceType::Unknown => 45,
        _ => 30,
    };

    match device.metadata.get(META_FIRMWARE_AGE_YEARS).and_then(|v| v.parse::<u32>().ok()) {
        Some(age) if age > 3 => {
            score += (age - 3) * 10;
            recommendations.push(format!(
                "Firmware on {} is {age} years old; schedule an update window",
                device.name
            ));
        }
        Some(_) => {}
        None => {
            if device.firmware_version.is_none() {
                score += 10;
            }
        }
    }

    let vendor = device.vendor.as_deref().unwrap_or("").to_lowercase();
    let model = device.model.as_deref().unwrap_or("").to_lowercase();
    if KNOWN_VULNERABLE
        .iter()
        .any(|(v, m)| vendor.contains(v) && model.contains(m))
    {
        score = score.max(90);
        recommendations.push(format!(
            "{} ({} {}) matches a known-vulnerable platform; isolate and patch",
            device.name,
            device.vendor.as_deref().unwrap_or("?"),
            device.model.as_deref().unwrap_or("?"),
        ));
    }

    score.min(100) as u8
}

fn configuration_score(
    device: &Device,
    connections: &[Connection],
    recommendations: &mut Vec<String>,
) -> u8 {
    let mut score: u32 = 20;

    let mine = connections
        .iter()
        .filter(|c| c.source_device_id == device.id || c.target_device_id == device.id);
    let mut insecure_industrial = 0usize;
    let mut secured_industrial = 0usize;
    for connection in mine {
        if connection.metadata.is_industrial {
            if connection.is_secure {
                secured_industrial += 1;
            } else {
                insecure_industrial += 1;
            }
        }
    }
    if insecure_industrial > 0 {
        score += 40;
        recommendations.push(format!(
            "{} carries {insecure_industrial} unencrypted industrial protocol connection(s); wrap in TLS or a VPN conduit",
            device.name
        ));
    } else if secured_industrial > 0 {
        score = score.saturating_sub(10);
    }

    match device.metadata.get(META_SNMP_VERSION).map(String::as_str) {
        Some("v1") | Some("v2c") => {
            score += 30;
            recommendations.push(format!(
                "{} still answers SNMP {} ; migrate to SNMPv3 authPriv",
                device.name,
                device.metadata.get(META_SNMP_VERSION).map(String::as_str).unwrap_or("v2c")
            ));
        }
        _ => {}
    }
    if let Some(community) = device.metadata.get(META_SNMP_COMMUNITY) {
        if community == "public" || community == "private" {
            score += 30;
            recommendations.push(format!(
                "{} uses a default SNMP community string",
                device.name
            ));
        }
    }

    score.min(100) as u8
}

fn exposure_score(
    device: &Device,
    input: &AnalysisInput<'_>,
    enterprise_reachable: &HashSet<Uuid>,
    recommendations: &mut Vec<String>,
) -> u8 {
    let zone_of = |id: Uuid| -> Option<SecurityZone> {
        input
            .devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.security_zone)
    };

    let cross_zone = input
        .connections
        .iter()
        .filter(|c| c.source_device_id == device.id || c.target_device_id == device.id)
        .filter(|c| {
            let (Some(src), Some(dst)) = (zone_of(c.source_device_id), zone_of(c.target_device_id))
            else {
                return false;
            };
            (src.trust_level() as i16 - dst.trust_level() as i16).unsigned_abs() > 1
        })
        .count();

    let ingress = exposure::higher_trust_ingress(device, input.devices, input.connections);

    let mut score = (cross_zone as u32) * 25 + (ingress as u32) * 10;
    if cross_zone > 0 {
        recommendations.push(format!(
            "{} has {cross_zone} cross-zone connection(s); review segmentation",
            device.name
        ));
    }

    let low_level = matches!(device.purdue_level, PurdueLevel::Level0 | PurdueLevel::Level1);
    if low_level
        && device.security_zone != SecurityZone::Enterprise
        && enterprise_reachable.contains(&device.id)
    {
        score += 30;
        recommendations.push(format!(
            "{} ({}) has a conduit-free path to the enterprise zone",
            device.name,
            device.purdue_level.label()
        ));
    }

    score.min(100) as u8
}

/// Security alert for an assessment, per the severity ladder:
/// ≥90 critical, ≥70 high, ≥40 medium, ≥20 low, below 20 none.
pub fn alert_for_assessment(
    device: &Device,
    assessment: &RiskAssessment,
    now: DateTime<Utc>,
) -> Option<Alert> {
    let severity = match assessment.overall_score {
        90..=100 => AlertSeverity::Critical,
        70..=89 => AlertSeverity::High,
        40..=69 => AlertSeverity::Medium,
        20..=39 => AlertSeverity::Low,
        _ => return None,
    };
    let mut alert = Alert::new(
        AlertType::Security,
        severity,
        format!("Risk score {} for {}", assessment.overall_score, device.name),
        assessment
            .factors
            .iter()
            .map(|f| format!("{}={}", f.name, f.score))
            .collect::<Vec<_>>()
            .join(", "),
        now,
    )
    .for_device(device.id)
    .with_detail("overall_score", assessment.overall_score.to_string());
    if let Some(recommendation) = assessment.recommendations.first() {
        alert = alert.with_remediation(recommendation.clone());
    }
    Some(alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mk_model::{ConnectionType, MacAddr, NetworkInterface};

    fn plc(name: &str, ip: &str) -> Device {
        let mut device = Device::new(name, Utc::now());
        device.device_type = DeviceType::Plc;
        let mac: MacAddr = "02:00:00:00:00:10".parse().unwrap();
        let mut iface = NetworkInterface::new("eth0", mac);
        iface.ip = Some(ip.parse().unwrap());
        device.interfaces.push(iface);
        device.set_purdue_level(PurdueLevel::Level1);
        device
    }

    #[test]
    fn test_scenario_weighted_score() {
        // The documented worked example: {80, 60, 40, 20} → 56, medium.
        let factors = vec![
            RiskFactor {
                name: "vulnerability".to_string(),
                category: RiskCategory::Vulnerability,
                score: 80,
                weight: WEIGHT_VULNERABILITY,
                description: String::new(),
            },
            RiskFactor {
                name: "configuration".to_string(),
                category: RiskCategory::Configuration,
                score: 60,
                weight: WEIGHT_CONFIGURATION,
                description: String::new(),
            },
            RiskFactor {
                name: "exposure".to_string(),
                category: RiskCategory::Exposure,
                score: 40,
                weight: WEIGHT_EXPOSURE,
                description: String::new(),
            },
            RiskFactor {
                name: "compliance".to_string(),
                category: RiskCategory::Compliance,
                score: 20,
                weight: WEIGHT_COMPLIANCE,
                description: String::new(),
            },
        ];
        let device = plc("plc-line1", "10.0.1.50");
        let assessment =
            RiskAssessment::from_factors(device.id, factors, vec![], Utc::now());
        assert_eq!(assessment.overall_score, 56);
        assert!(assessment.weights_valid());

        let alert = alert_for_assessment(&device, &assessment, Utc::now()).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert_eq!(alert.alert_type, AlertType::Security);
    }

    #[test]
    fn test_severity_ladder() {
        let device = plc("p", "10.0.1.1");
        let mk = |score: u8| {
            let mut assessment =
                RiskAssessment::from_factors(device.id, vec![], vec![], Utc::now());
            assessment.overall_score = score;
            assessment
        };
        assert_eq!(
            alert_for_assessment(&device, &mk(95), Utc::now()).unwrap().severity,
            AlertSeverity::Critical
        );
        assert_eq!(
            alert_for_assessment(&device, &mk(90), Utc::now()).unwrap().severity,
            AlertSeverity::Critical
        );
        assert_eq!(
            alert_for_assessment(&device, &mk(70), Utc::now()).unwrap().severity,
            AlertSeverity::High
        );
        assert_eq!(
            alert_for_assessment(&device, &mk(40), Utc::now()).unwrap().severity,
            AlertSeverity::Medium
        );
        assert_eq!(
            alert_for_assessment(&device, &mk(20), Utc::now()).unwrap().severity,
            AlertSeverity::Low
        );
        assert!(alert_for_assessment(&device, &mk(19), Utc::now()).is_none());
    }

    #[test]
    fn test_known_vulnerable_platform_bumps_to_90() {
        let mut device = plc("old-plc", "10.0.1.50");
        device.vendor = Some("Siemens".to_string());
        device.model = Some("SIMATIC S7-300".to_string());
        let mut recommendations = Vec::new();
        let score = vulnerability_score(&device, &mut recommendations);
        assert!(score >= 90);
        assert!(!recommendations.is_empty());
    }

    #[test]
    fn test_firmware_age_penalty() {
        let mut device = plc("plc", "10.0.1.50");
        device.firmware_version = Some("4.2".to_string());
        device
            .metadata
            .insert("firmware_age_years".to_string(), "6".to_string());
        let mut recs = Vec::new();
        let aged = vulnerability_score(&device, &mut recs);

        let mut fresh_device = plc("plc", "10.0.1.50");
        fresh_device.firmware_version = Some("4.2".to_string());
        fresh_device
            .metadata
            .insert("firmware_age_years".to_string(), "1".to_string());
        let fresh = vulnerability_score(&fresh_device, &mut Vec::new());

        // +10 per year beyond three.
        assert_eq!(aged, fresh + 30);
    }

    #[test]
    fn test_insecure_industrial_raises_configuration() {
        let plc_a = plc("plc-a", "10.0.1.50");
        let plc_b = plc("plc-b", "10.0.1.51");
        let mut edge = Connection::new(plc_a.id, plc_b.id, ConnectionType::Ethernet, Utc::now());
        edge.metadata.is_industrial = true;
        edge.metadata.industrial_protocol = Some("Modbus".to_string());
        edge.is_secure = false;

        let mut recs = Vec::new();
        let with_insecure = configuration_score(&plc_a, std::slice::from_ref(&edge), &mut recs);
        let baseline = configuration_score(&plc_a, &[], &mut Vec::new());
        assert!(with_insecure > baseline);
        assert!(!recs.is_empty());

        // The TLS-wrapped variant scores better than the baseline.
        edge.is_secure = true;
        let secured = configuration_score(&plc_a, std::slice::from_ref(&edge), &mut Vec::new());
        assert!(secured < baseline);
    }

    #[test]
    fn test_full_assessment_weights_sum() {
        let device = plc("plc", "10.0.1.50");
        let devices = vec![device.clone()];
        let input = AnalysisInput {
            devices: &devices,
            connections: &[],
            zones: &[],
        };
        let assessment = RiskAnalyzer::new().assess(&device, &input, Utc::now());
        assert!(assessment.weights_valid());
        assert_eq!(assessment.factors.len(), 4);

        let exact: f64 = assessment
            .factors
            .iter()
            .map(|f| f.score as f64 * f.weight)
            .sum();
        assert!((exact - assessment.overall_score as f64).abs() <= 0.5);
    }

    #[test]
    fn test_enterprise_path_penalty_applies_to_l1() {
        let plc_device = plc("plc", "10.0.1.50");
        let mut erp = Device::new("erp", Utc::now());
        erp.device_type = DeviceType::ErpServer;
        erp.set_purdue_level(PurdueLevel::Level4);
        let edge = Connection::new(
            plc_device.id,
            erp.id,
            ConnectionType::Ethernet,
            Utc::now(),
        );

        let devices = vec![plc_device.clone(), erp];
        let connections = vec![edge];
        let input = AnalysisInput {
            devices: &devices,
            connections: &connections,
            zones: &[],
        };
        let reachable = exposure::enterprise_reachable(&devices, &connections);
        let mut recs = Vec::new();
        let score = exposure_score(&plc_device, &input, &reachable, &mut recs);
        // Cross-zone (25) + enterprise path (30) at minimum.
        assert!(score >= 55);
    }
}
