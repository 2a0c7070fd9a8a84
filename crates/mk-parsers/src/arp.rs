//! Local system ARP cache parsing (`/proc/net/arp` format).

use mk_model::{ArpEntry, ArpEntryType};

// /proc/net/arp flag bits.
const ATF_COM: u64 = 0x02;
const ATF_PERM: u64 = 0x04;

/// Parse the kernel ARP cache table. Incomplete entries (flags without
/// ATF_COM) are skipped; malformed lines are logged and skipped.
pub fn parse_proc_net_arp(text: &str) -> Vec<ArpEntry> {
    let mut entries = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }
        let ip = match fields[0].parse() {
            Ok(ip) => ip,
            Err(_) => {
                log::debug!("skipping ARP line with bad IP: {line}");
                continue;
            }
        };
        let flags = u64::from_str_radix(fields[2].trim_start_matches("0x"), 16).unwrap_or(0);
        if flags & ATF_COM == 0 {
            continue; // incomplete entry, no MAC yet
        }
        let mac = match fields[3].parse() {
            Ok(mac) => mac,
            Err(_) => {
                log::debug!("skipping ARP line with bad MAC: {line}");
                continue;
            }
        };
        let entry_type = if flags & ATF_PERM != 0 {
            ArpEntryType::Static
        } else {
            ArpEntryType::Dynamic
        };
        entries.push(ArpEntry {
            ip,
            mac,
            interface: Some(fields[5].to_string()),
            vlan: None,
            entry_type,
            age_seconds: None,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
10.0.1.1         0x1         0x2         28:63:36:aa:bb:01     *        eth0
10.0.1.50        0x1         0x6         28:63:36:aa:bb:02     *        eth0
10.0.1.99        0x1         0x0         00:00:00:00:00:00     *        eth0
not-an-ip        0x1         0x2         28:63:36:aa:bb:03     *        eth0
";

    #[test]
    fn test_parse_proc_net_arp() {
        let entries = parse_proc_net_arp(SAMPLE);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].ip.to_string(), "10.0.1.1");
        assert_eq!(entries[0].entry_type, ArpEntryType::Dynamic);
        assert_eq!(entries[0].interface.as_deref(), Some("eth0"));

        assert_eq!(entries[1].ip.to_string(), "10.0.1.50");
        assert_eq!(entries[1].entry_type, ArpEntryType::Static);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_proc_net_arp("").is_empty());
        assert!(parse_proc_net_arp("header only\n").is_empty());
    }
}
