//! Purdue level classification.
//!
//! Weighted scoring from four signals: device type (40), hostname
//! pattern (25), vendor (20), subnet hint (15). The winning level is
//! the highest accumulated score; ties break toward the higher level,
//! failing safe toward stricter isolation. The security zone then
//! follows deterministically from the level.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use regex::RegexBuilder;
use serde::Deserialize;

use mk_model::{Cidr, DeviceType, MacAddr, PurdueLevel, SecurityZone};

use crate::CorrelationError;

const DEVICE_TYPE_POINTS: u32 = 40;
const HOSTNAME_POINTS: u32 = 25;
const VENDOR_POINTS: u32 = 20;
const SUBNET_POINTS: u32 = 15;

/// What the classifier saw for a device.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInput<'a> {
    pub device_type: DeviceType,
    pub hostname: Option<&'a str>,
    pub vendor: Option<&'a str>,
    pub macs: Vec<MacAddr>,
    pub ips: Vec<Ipv4Addr>,
}

/// Classification outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub level: PurdueLevel,
    pub zone: SecurityZone,
    /// False when no signal fired and the default (L5) applied.
    pub matched: bool,
    /// Human-readable signal trail, for audit logs.
    pub reasons: Vec<String>,
}

/// Rule file shape (YAML).
#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    hostname_patterns: Vec<PatternRule>,
    #[serde(default)]
    vendors: Vec<VendorRule>,
    #[serde(default)]
    oui: Vec<OuiRule>,
    #[serde(default)]
    subnets: Vec<SubnetRule>,
}

#[derive(Debug, Deserialize)]
struct PatternRule {
    pattern: String,
    level: PurdueLevel,
}

#[derive(Debug, Deserialize)]
struct VendorRule {
    name: String,
    level: PurdueLevel,
}

#[derive(Debug, Deserialize)]
struct OuiRule {
    prefix: String,
    vendor: String,
}

#[derive(Debug, Deserialize)]
struct SubnetRule {
    cidr: Cidr,
    level: PurdueLevel,
}

/// Compiled classifier rules: hostname regexes, vendor biases, OUI
/// prefix table, subnet hints.
pub struct ClassifierRules {
    hostname_patterns: Vec<(regex::Regex, PurdueLevel)>,
    vendors: Vec<(String, PurdueLevel)>,
    oui: HashMap<String, String>,
    subnets: Vec<(Cidr, PurdueLevel)>,
}

impl ClassifierRules {
    /// The compiled-in defaults.
    pub fn defaults() -> Self {
        let hostname = [
            ("plc", PurdueLevel::Level1),
            ("rtu", PurdueLevel::Level1),
            ("dcs", PurdueLevel::Level1),
            ("scada", PurdueLevel::Level2),
            ("hmi", PurdueLevel::Level2),
            ("hist", PurdueLevel::Level3),
            ("mes", PurdueLevel::Level3),
            ("eng", PurdueLevel::Level3),
            ("erp", PurdueLevel::Level4),
            ("dmz", PurdueLevel::Dmz),
            ("jump", PurdueLevel::Dmz),
            ("fw", PurdueLevel::Dmz),
        ];
        let vendors = [
            ("siemens", PurdueLevel::Level1),
            ("rockwell", PurdueLevel::Level1),
            ("allen-bradley", PurdueLevel::Level1),
            ("schneider", PurdueLevel::Level1),
            ("honeywell", PurdueLevel::Level2),
            ("yokogawa", PurdueLevel::Level2),
            ("emerson", PurdueLevel::Level2),
            ("ge ", PurdueLevel::Level1),
            ("belden", PurdueLevel::Level2),
            ("hirschmann", PurdueLevel::Level2),
            ("moxa", PurdueLevel::Level2),
            ("dell", PurdueLevel::Level4),
            ("hewlett", PurdueLevel::Level4),
            ("lenovo", PurdueLevel::Level4),
            ("vmware", PurdueLevel::Level4),
            ("microsoft", PurdueLevel::Level5),
        ];
        // Well-known industrial OUI prefixes.
        let oui = [
            ("28:63:36", "Siemens"),
            ("00:0e:8c", "Siemens"),
            ("08:00:06", "Siemens"),
            ("00:1d:9c", "Rockwell Automation"),
            ("00:00:bc", "Rockwell Automation"),
            ("5c:88:16", "Rockwell Automation"),
            ("00:80:f4", "Schneider Electric"),
            ("00:a0:de", "Yokogawa"),
            ("00:40:84", "Honeywell"),
            ("00:0b:ab", "Moxa"),
            ("00:80:63", "Hirschmann"),
            ("00:26:b9", "Dell"),
            ("3c:d9:2b", "Hewlett Packard"),
        ];

        let hostname_patterns = hostname
            .iter()
            .map(|(pattern, level)| {
                (
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .expect("static pattern"),
                    *level,
                )
            })
            .collect();
        ClassifierRules {
            hostname_patterns,
            vendors: vendors
                .iter()
                .map(|(name, level)| (name.to_string(), *level))
                .collect(),
            oui: oui
                .iter()
                .map(|(prefix, vendor)| (prefix.to_string(), vendor.to_string()))
                .collect(),
            subnets: Vec::new(),
        }
    }

    /// Load a YAML rule file, extending the compiled-in defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, CorrelationError> {
        let file: RulesFile =
            serde_yaml::from_str(yaml).map_err(|e| CorrelationError::Rules(e.to_string()))?;
        let mut rules = Self::defaults();
        for rule in file.hostname_patterns {
            let regex = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    CorrelationError::Rules(format!("pattern {:?}: {e}", rule.pattern))
                })?;
            rules.hostname_patterns.push((regex, rule.level));
        }
        for rule in file.vendors {
            rules.vendors.push((rule.name.to_lowercase(), rule.level));
        }
        for rule in file.oui {
            rules.oui.insert(rule.prefix.to_lowercase(), rule.vendor);
        }
        for rule in file.subnets {
            rules.subnets.push((rule.cidr, rule.level));
        }
        Ok(rules)
    }

    /// Vendor name for a MAC's OUI prefix, if known.
    pub fn vendor_for_mac(&self, mac: &MacAddr) -> Option<&str> {
        self.oui.get(&mac.oui()).map(String::as_str)
    }
}

/// Fixed device-type→level table.
fn level_for_device_type(device_type: DeviceType) -> Option<PurdueLevel> {
    match device_type {
        DeviceType::Sensor | DeviceType::Actuator | DeviceType::Drive | DeviceType::Instrument => {
            Some(PurdueLevel::Level0)
        }
        DeviceType::Plc | DeviceType::Rtu | DeviceType::Dcs | DeviceType::Controller => {
            Some(PurdueLevel::Level1)
        }
        DeviceType::ScadaServer
        | DeviceType::Hmi
        | DeviceType::AlarmServer
        | DeviceType::Datalogger => Some(PurdueLevel::Level2),
        DeviceType::Mes
        | DeviceType::Historian
        | DeviceType::EngineeringWorkstation
        | DeviceType::AssetManagement => Some(PurdueLevel::Level3),
        DeviceType::ErpServer | DeviceType::DatabaseServer => Some(PurdueLevel::Level4),
        DeviceType::EmailServer | DeviceType::WebServer => Some(PurdueLevel::Level5),
        DeviceType::Firewall
        | DeviceType::Gateway
        | DeviceType::DataDiode
        | DeviceType::JumpServer => Some(PurdueLevel::Dmz),
        DeviceType::Switch | DeviceType::Router | DeviceType::Unknown => None,
    }
}

pub struct PurdueClassifier {
    rules: ClassifierRules,
}

impl PurdueClassifier {
    pub fn new(rules: ClassifierRules) -> Self {
        PurdueClassifier { rules }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    /// Score every signal and pick the winning level. Deterministic:
    /// identical inputs always produce identical output.
    pub fn classify(&self, input: &ClassifyInput<'_>) -> Classification {
        let mut scores: HashMap<PurdueLevel, u32> = HashMap::new();
        let mut reasons = Vec::new();

        if let Some(level) = level_for_device_type(input.device_type) {
            *scores.entry(level).or_default() += DEVICE_TYPE_POINTS;
            reasons.push(format!(
                "device type {:?} suggests {}",
                input.device_type,
                level.label()
            ));
        }

        if let Some(hostname) = input.hostname {
            if let Some((pattern, level)) = self
                .rules
                .hostname_patterns
                .iter()
                .find(|(pattern, _)| pattern.is_match(hostname))
            {
                *scores.entry(*level).or_default() += HOSTNAME_POINTS;
                reasons.push(format!(
                    "hostname {hostname:?} matches /{}/ for {}",
                    pattern.as_str(),
                    level.label()
                ));
            }
        }

        // Vendor signal: explicit vendor string, or OUI-derived vendor.
        let vendor = input
            .vendor
            .map(str::to_string)
            .or_else(|| {
                input
                    .macs
                    .iter()
                    .find_map(|mac| self.rules.vendor_for_mac(mac))
                    .map(str::to_string)
            });
        if let Some(vendor) = vendor {
            let lower = vendor.to_lowercase();
            if let Some((name, level)) = self
                .rules
                .vendors
                .iter()
                .find(|(name, _)| lower.contains(name))
            {
                *scores.entry(*level).or_default() += VENDOR_POINTS;
                reasons.push(format!("vendor {vendor:?} ({name}) biases {}", level.label()));
            }
        }

        if let Some((cidr, level)) = self.rules.subnets.iter().find(|(cidr, _)| {
            input.ips.iter().any(|ip| cidr.contains(*ip))
        }) {
            *scores.entry(*level).or_default() += SUBNET_POINTS;
            reasons.push(format!("subnet {cidr} hints {}", level.label()));
        }

        let winner = scores
            .iter()
            .max_by(|(level_a, score_a), (level_b, score_b)| {
                score_a
                    .cmp(score_b)
                    .then(level_a.rank().cmp(&level_b.rank()))
            })
            .map(|(level, _)| *level);

        match winner {
            Some(level) => Classification {
                level,
                zone: level.security_zone(),
                matched: true,
                reasons,
            },
            None => Classification {
                level: PurdueLevel::Level5,
                zone: PurdueLevel::Level5.security_zone(),
                matched: false,
                reasons: vec!["no signal fired; defaulting to L5".to_string()],
            },
        }
    }
}

/// A connection violates zone isolation when its endpoint zones differ
/// by more than one trust level, or it crosses the DMZ boundary, unless
/// one endpoint is an authorized conduit (firewall/gateway/data-diode).
pub fn is_cross_zone_violation(
    source_zone: SecurityZone,
    target_zone: SecurityZone,
    source_type: DeviceType,
    target_type: DeviceType,
) -> bool {
    if source_type.is_boundary_conduit() || target_type.is_boundary_conduit() {
        return false;
    }
    let distance =
        (source_zone.trust_level() as i16 - target_zone.trust_level() as i16).unsigned_abs();
    if distance > 1 {
        return true;
    }
    (source_zone == SecurityZone::Dmz) != (target_zone == SecurityZone::Dmz)
}
