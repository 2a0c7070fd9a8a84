//! Compliance checks in the NERC-CIP / IEC-62443 style: documented
//! zones, conduit rules for cross-zone traffic, classification agreeing
//! with the documented network plan.

use mk_model::{Connection, Device, SecurityZone, ZoneDefinition};

/// One failed check with its score contribution.
#[derive(Debug, Clone)]
pub struct ComplianceFinding {
    pub check: &'static str,
    pub detail: String,
    pub penalty: u8,
}

/// Run all checks for one device. The returned penalties sum (clamped
/// to 100) into the compliance factor subscore.
pub fn check_device(
    device: &Device,
    devices: &[Device],
    connections: &[Connection],
    zones: &[ZoneDefinition],
) -> Vec<ComplianceFinding> {
    let mut findings = Vec::new();

    // Every device address must fall inside a documented zone subnet.
    let ips: Vec<_> = device.ip_addresses().collect();
    if !ips.is_empty() && !zones.is_empty() {
        let documented = ips
            .iter()
            .any(|ip| zones.iter().any(|zone| zone.contains(*ip)));
        if !documented {
            findings.push(ComplianceFinding {
                check: "undocumented-subnet",
                detail: format!(
                    "no documented zone covers the addresses of {}",
                    device.name
                ),
                penalty: 40,
            });
        } else {
            // The documented zone must agree with the classified zone.
            let mismatch = ips.iter().any(|ip| {
                zones
                    .iter()
                    .find(|zone| zone.contains(*ip))
                    .is_some_and(|zone| zone.security_zone != device.security_zone)
            });
            if mismatch {
                findings.push(ComplianceFinding {
                    check: "zone-mismatch",
                    detail: format!(
                        "{} is classified {:?} but sits in a subnet documented otherwise",
                        device.name, device.security_zone
                    ),
                    penalty: 30,
                });
            }
        }
    }

    // Each cross-zone connection needs a documented firewall rule.
    let zone_of = |id: uuid::Uuid| -> Option<SecurityZone> {
        devices.iter().find(|d| d.id == id).map(|d| d.security_zone)
    };
    let mut unruled = 0usize;
    for connection in connections
        .iter()
        .filter(|c| c.source_device_id == device.id || c.target_device_id == device.id)
    {
        let (Some(src), Some(dst)) = (
            zone_of(connection.source_device_id),
            zone_of(connection.target_device_id),
        ) else {
            continue;
        };
        if src == dst {
            continue;
        }
        let ruled = zones.iter().flat_map(|z| &z.firewall_rules).any(|rule| {
            rule.source_zone == src
                && rule.target_zone == dst
                && (rule.port.is_none() || rule.port == connection.port)
        });
        if !ruled {
            unruled += 1;
        }
    }
    if unruled > 0 {
        findings.push(ComplianceFinding {
            check: "unruled-cross-zone",
            detail: format!(
                "{unruled} cross-zone connection(s) of {} have no documented firewall rule",
                device.name
            ),
            penalty: (unruled as u8).saturating_mul(15).min(45),
        });
    }

    findings
}

pub fn score(findings: &[ComplianceFinding]) -> u8 {
    findings
        .iter()
        .map(|f| f.penalty as u32)
        .sum::<u32>()
        .min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mk_model::{
        ConnectionType, DeviceType, FirewallRule, MacAddr, NetworkInterface, Port, PurdueLevel,
    };

    fn device_at(name: &str, ip: &str, level: PurdueLevel) -> Device {
        let mut device = Device::new(name, Utc::now());
        let mac: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        let mut iface = NetworkInterface::new("eth0", mac);
        iface.ip = Some(ip.parse().unwrap());
        device.interfaces.push(iface);
        device.set_purdue_level(level);
        device
    }

    fn control_zone() -> ZoneDefinition {
        ZoneDefinition {
            name: "line1".to_string(),
            purdue_level: PurdueLevel::Level1,
            security_zone: SecurityZone::Control,
            subnets: vec!["10.0.1.0/24".parse().unwrap()],
            firewall_rules: vec![],
        }
    }

    #[test]
    fn test_documented_device_passes() {
        let device = device_at("plc", "10.0.1.50", PurdueLevel::Level1);
        let findings = check_device(&device, &[device.clone()], &[], &[control_zone()]);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_undocumented_subnet_flagged() {
        let device = device_at("plc", "192.168.77.5", PurdueLevel::Level1);
        let findings = check_device(&device, &[device.clone()], &[], &[control_zone()]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, "undocumented-subnet");
        assert_eq!(score(&findings), 40);
    }

    #[test]
    fn test_zone_mismatch_flagged() {
        // Device classified enterprise but living in the control subnet.
        let device = device_at("rogue", "10.0.1.99", PurdueLevel::Level5);
        let findings = check_device(&device, &[device.clone()], &[], &[control_zone()]);
        assert!(findings.iter().any(|f| f.check == "zone-mismatch"));
    }

    #[test]
    fn test_cross_zone_needs_firewall_rule() {
        let plc = device_at("plc", "10.0.1.50", PurdueLevel::Level1);
        let erp = device_at("erp", "172.16.1.10", PurdueLevel::Level4);
        let mut edge = Connection::new(plc.id, erp.id, ConnectionType::Ethernet, Utc::now());
        edge.port = Some(Port::new(443).unwrap());

        let devices = vec![plc.clone(), erp.clone()];
        let findings = check_device(&plc, &devices, &[edge.clone()], &[control_zone()]);
        assert!(findings.iter().any(|f| f.check == "unruled-cross-zone"));

        // With a documented rule the check passes.
        let mut zone = control_zone();
        zone.firewall_rules.push(FirewallRule {
            description: "historian replication".to_string(),
            source_zone: SecurityZone::Control,
            target_zone: SecurityZone::Enterprise,
            port: Some(Port::new(443).unwrap()),
            allow: true,
        });
        let findings = check_device(&plc, &devices, &[edge], &[zone]);
        assert!(!findings.iter().any(|f| f.check == "unruled-cross-zone"));
    }
}
