//! Security zone definitions.

use serde::{Deserialize, Serialize};

use crate::device::{PurdueLevel, SecurityZone};
use crate::net::{Cidr, Port};

/// A documented firewall rule between two zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub description: String,
    pub source_zone: SecurityZone,
    pub target_zone: SecurityZone,
    pub port: Option<Port>,
    pub allow: bool,
}

/// A named zone with its Purdue level and the subnets documented to
/// belong to it. Used by the classifier's subnet hint signal and by
/// compliance checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub name: String,
    pub purdue_level: PurdueLevel,
    pub security_zone: SecurityZone,
    pub subnets: Vec<Cidr>,
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
}

impl ZoneDefinition {
    /// True if `addr` falls inside any documented subnet of this zone.
    pub fn contains(&self, addr: std::net::Ipv4Addr) -> bool {
        self.subnets.iter().any(|s| s.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_contains() {
        let zone = ZoneDefinition {
            name: "line1-control".to_string(),
            purdue_level: PurdueLevel::Level1,
            security_zone: SecurityZone::Control,
            subnets: vec!["10.0.1.0/24".parse().unwrap()],
            firewall_rules: vec![],
        };
        assert!(zone.contains("10.0.1.50".parse().unwrap()));
        assert!(!zone.contains("10.0.2.50".parse().unwrap()));
    }
}
