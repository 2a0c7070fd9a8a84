//! Normalization of raw SNMP walk results into a typed payload.
//!
//! Table rows are reassembled from column walks by their OID row index
//! (ifIndex for ifTable, the IP address arcs for ipAddrTable and
//! ipNetToMediaTable).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use mk_model::{
    ArpEntry, ArpEntryType, BridgeMacEntry, Cidr, EntityInfo, LldpNeighbor, MacAddr, RouteEntry,
    SnmpInterface, SnmpIpEntry, SnmpSystemInfo,
};
use mk_snmp::ber::BerValue;
use mk_snmp::message::VarBind;
use mk_snmp::mibs;
use mk_snmp::Oid;

fn mac_from_value(value: &BerValue) -> Option<MacAddr> {
    let bytes = value.as_bytes()?;
    if bytes.len() != 6 {
        return None;
    }
    let mut octets = [0u8; 6];
    octets.copy_from_slice(bytes);
    let mac = MacAddr::new(octets);
    if mac.is_zero() {
        None
    } else {
        Some(mac)
    }
}

fn ip_from_value(value: &BerValue) -> Option<Ipv4Addr> {
    match value {
        BerValue::IpAddress(octets) => Some(Ipv4Addr::from(*octets)),
        _ => None,
    }
}

fn ip_from_suffix(suffix: &[u32]) -> Option<Ipv4Addr> {
    if suffix.len() != 4 || suffix.iter().any(|&a| a > 255) {
        return None;
    }
    Some(Ipv4Addr::new(
        suffix[0] as u8,
        suffix[1] as u8,
        suffix[2] as u8,
        suffix[3] as u8,
    ))
}

/// Build the system group from a GET on the six system OIDs.
pub fn system_info(varbinds: &[VarBind]) -> SnmpSystemInfo {
    let mut info = SnmpSystemInfo::default();
    for vb in varbinds {
        let arcs = vb.oid.arcs();
        if arcs == mibs::SYS_DESCR {
            info.descr = vb.value.as_text();
        } else if arcs == mibs::SYS_OBJECT_ID {
            if let BerValue::Oid(oid) = &vb.value {
                info.object_id = Some(oid.to_string());
            }
        } else if arcs == mibs::SYS_UPTIME {
            info.uptime_ticks = vb.value.as_u64();
        } else if arcs == mibs::SYS_NAME {
            info.name = vb.value.as_text().filter(|s| !s.is_empty());
        } else if arcs == mibs::SYS_LOCATION {
            info.location = vb.value.as_text().filter(|s| !s.is_empty());
        } else if arcs == mibs::SYS_SERVICES {
            info.services = vb.value.as_i64();
        }
    }
    info
}

/// Reassemble ifTable rows from the column walks.
pub fn interface_table(varbinds: &[VarBind]) -> Vec<SnmpInterface> {
    let columns: &[(&[u32], usize)] = &[
        (mibs::IF_DESCR, 0),
        (mibs::IF_TYPE, 1),
        (mibs::IF_SPEED, 2),
        (mibs::IF_PHYS_ADDRESS, 3),
        (mibs::IF_ADMIN_STATUS, 4),
        (mibs::IF_OPER_STATUS, 5),
        (mibs::IF_IN_OCTETS, 6),
        (mibs::IF_OUT_OCTETS, 7),
    ];

    let mut rows: BTreeMap<i64, SnmpInterface> = BTreeMap::new();
    for vb in varbinds {
        for &(column, slot) in columns {
            let root = Oid::from_slice(column);
            let Some(suffix) = vb.oid.suffix(&root) else {
                continue;
            };
            let Some(&index) = suffix.first() else {
                continue;
            };
            let index = index as i64;
            let row = rows.entry(index).or_insert_with(|| SnmpInterface {
                index,
                descr: String::new(),
                if_type: None,
                speed_bps: None,
                phys_address: None,
                admin_status: None,
                oper_status: None,
                in_octets: None,
                out_octets: None,
            });
            match slot {
                0 => row.descr = vb.value.as_text().unwrap_or_default(),
                1 => row.if_type = vb.value.as_i64(),
                2 => row.speed_bps = vb.value.as_u64(),
                3 => row.phys_address = mac_from_value(&vb.value),
                4 => row.admin_status = vb.value.as_i64(),
                5 => row.oper_status = vb.value.as_i64(),
                6 => row.in_octets = vb.value.as_u64(),
                7 => row.out_octets = vb.value.as_u64(),
                _ => unreachable!(),
            }
            break;
        }
    }
    rows.into_values().collect()
}

/// Reassemble the ipAddrTable, rows keyed by the address arcs.
pub fn ip_table(varbinds: &[VarBind]) -> Vec<SnmpIpEntry> {
    let mut rows: BTreeMap<Ipv4Addr, SnmpIpEntry> = BTreeMap::new();
    let addr_root = Oid::from_slice(mibs::IP_AD_ENT_ADDR);
    let ifidx_root = Oid::from_slice(mibs::IP_AD_ENT_IF_INDEX);
    let mask_root = Oid::from_slice(mibs::IP_AD_ENT_NETMASK);

    for vb in varbinds {
        let (root, slot) = if vb.oid.starts_with(&addr_root) {
            (&addr_root, 0)
        } else if vb.oid.starts_with(&ifidx_root) {
            (&ifidx_root, 1)
        } else if vb.oid.starts_with(&mask_root) {
            (&mask_root, 2)
        } else {
            continue;
        };
        let Some(addr) = vb.oid.suffix(root).and_then(ip_from_suffix) else {
            continue;
        };
        let row = rows.entry(addr).or_insert_with(|| SnmpIpEntry {
            addr,
            netmask: None,
            if_index: None,
        });
        match slot {
            0 => {} // the row key is the address itself
            1 => row.if_index = vb.value.as_i64(),
            2 => row.netmask = ip_from_value(&vb.value),
            _ => unreachable!(),
        }
    }
    rows.into_values().collect()
}

/// Reassemble the ipNetToMediaTable (ARP), rows keyed by (ifIndex, IP).
pub fn arp_table(varbinds: &[VarBind]) -> Vec<ArpEntry> {
    let phys_root = Oid::from_slice(mibs::IP_NET_TO_MEDIA_PHYS);
    let type_root = Oid::from_slice(mibs::IP_NET_TO_MEDIA_TYPE);

    let mut macs: BTreeMap<(i64, Ipv4Addr), MacAddr> = BTreeMap::new();
    let mut types: BTreeMap<(i64, Ipv4Addr), i64> = BTreeMap::new();

    for vb in varbinds {
        let (root, is_phys) = if vb.oid.starts_with(&phys_root) {
            (&phys_root, true)
        } else if vb.oid.starts_with(&type_root) {
            (&type_root, false)
        } else {
            continue;
        };
        let Some(suffix) = vb.oid.suffix(root) else {
            continue;
        };
        // Row index: ifIndex followed by the four address arcs.
        if suffix.len() != 5 {
            continue;
        }
        let if_index = suffix[0] as i64;
        let Some(addr) = ip_from_suffix(&suffix[1..]) else {
            continue;
        };
        if is_phys {
            if let Some(mac) = mac_from_value(&vb.value) {
                macs.insert((if_index, addr), mac);
            }
        } else if let Some(t) = vb.value.as_i64() {
            types.insert((if_index, addr), t);
        }
    }

    macs.into_iter()
        .map(|((if_index, ip), mac)| {
            // ipNetToMediaType: 3 = dynamic, 4 = static.
            let entry_type = match types.get(&(if_index, ip)) {
                Some(4) => ArpEntryType::Static,
                _ => ArpEntryType::Dynamic,
            };
            ArpEntry {
                ip,
                mac,
                interface: Some(format!("ifIndex{}", if_index)),
                vlan: None,
                entry_type,
                age_seconds: None,
            }
        })
        .collect()
}

/// Bridge forwarding table: MACs learned per bridge port.
pub fn bridge_table(varbinds: &[VarBind]) -> Vec<BridgeMacEntry> {
    let addr_root = Oid::from_slice(mibs::DOT1D_TP_FDB_ADDRESS);
    let port_root = Oid::from_slice(mibs::DOT1D_TP_FDB_PORT);

    let mut macs: BTreeMap<Vec<u32>, MacAddr> = BTreeMap::new();
    let mut ports: BTreeMap<Vec<u32>, i64> = BTreeMap::new();

    for vb in varbinds {
        if let Some(suffix) = vb.oid.suffix(&addr_root) {
            if let Some(mac) = mac_from_value(&vb.value) {
                macs.insert(suffix.to_vec(), mac);
            }
        } else if let Some(suffix) = vb.oid.suffix(&port_root) {
            if let Some(port) = vb.value.as_i64() {
                ports.insert(suffix.to_vec(), port);
            }
        }
    }

    macs.into_iter()
        .map(|(suffix, mac)| BridgeMacEntry {
            mac,
            port: ports.get(&suffix).copied(),
        })
        .collect()
}

/// LLDP remote table: one neighbor per row index.
pub fn lldp_table(varbinds: &[VarBind]) -> Vec<LldpNeighbor> {
    let chassis_root = Oid::from_slice(mibs::LLDP_REM_CHASSIS_ID);
    let port_root = Oid::from_slice(mibs::LLDP_REM_PORT_ID);
    let name_root = Oid::from_slice(mibs::LLDP_REM_SYS_NAME);
    let desc_root = Oid::from_slice(mibs::LLDP_REM_SYS_DESC);

    let mut rows: BTreeMap<Vec<u32>, LldpNeighbor> = BTreeMap::new();
    for vb in varbinds {
        let (root, slot) = if vb.oid.starts_with(&chassis_root) {
            (&chassis_root, 0)
        } else if vb.oid.starts_with(&port_root) {
            (&port_root, 1)
        } else if vb.oid.starts_with(&name_root) {
            (&name_root, 2)
        } else if vb.oid.starts_with(&desc_root) {
            (&desc_root, 3)
        } else {
            continue;
        };
        let Some(suffix) = vb.oid.suffix(root) else {
            continue;
        };
        // Row index: lldpRemTimeMark.lldpRemLocalPortNum.lldpRemIndex
        if suffix.len() != 3 {
            continue;
        }
        let row = rows.entry(suffix.to_vec()).or_insert_with(|| LldpNeighbor {
            local_port: Some(suffix[1].to_string()),
            chassis_mac: None,
            system_name: None,
            remote_port: None,
            system_descr: None,
        });
        match slot {
            0 => row.chassis_mac = mac_from_value(&vb.value),
            1 => row.remote_port = vb.value.as_text(),
            2 => row.system_name = vb.value.as_text().filter(|s| !s.is_empty()),
            3 => row.system_descr = vb.value.as_text().filter(|s| !s.is_empty()),
            _ => unreachable!(),
        }
    }
    rows.into_values().collect()
}

/// Entity MIB: take the first physical entry carrying identity data
/// (index 1 is the chassis on almost every agent).
pub fn entity_info(varbinds: &[VarBind]) -> Option<EntityInfo> {
    let mfg_root = Oid::from_slice(mibs::ENT_PHYSICAL_MFG_NAME);
    let model_root = Oid::from_slice(mibs::ENT_PHYSICAL_MODEL_NAME);
    let serial_root = Oid::from_slice(mibs::ENT_PHYSICAL_SERIAL_NUM);
    let firmware_root = Oid::from_slice(mibs::ENT_PHYSICAL_FIRMWARE_REV);

    let mut info = EntityInfo::default();
    for vb in varbinds {
        let text = vb.value.as_text().filter(|s| !s.is_empty());
        if vb.oid.starts_with(&mfg_root) && info.vendor.is_none() {
            info.vendor = text;
        } else if vb.oid.starts_with(&model_root) && info.model.is_none() {
            info.model = text;
        } else if vb.oid.starts_with(&serial_root) && info.serial.is_none() {
            info.serial = text;
        } else if vb.oid.starts_with(&firmware_root) && info.firmware.is_none() {
            info.firmware = text;
        }
    }
    if info.vendor.is_none() && info.model.is_none() && info.serial.is_none() {
        None
    } else {
        Some(info)
    }
}

/// ipRouteTable rows keyed by destination arcs.
pub fn route_table(varbinds: &[VarBind]) -> Vec<RouteEntry> {
    let next_hop_root = Oid::from_slice(mibs::IP_ROUTE_NEXT_HOP);
    let mask_root = Oid::from_slice(mibs::IP_ROUTE_MASK);
    let ifidx_root = Oid::from_slice(mibs::IP_ROUTE_IF_INDEX);
    let metric_root = Oid::from_slice(mibs::IP_ROUTE_METRIC1);

    let mut next_hops: BTreeMap<Ipv4Addr, Ipv4Addr> = BTreeMap::new();
    let mut masks: BTreeMap<Ipv4Addr, Ipv4Addr> = BTreeMap::new();
    let mut ifidx: BTreeMap<Ipv4Addr, i64> = BTreeMap::new();
    let mut metrics: BTreeMap<Ipv4Addr, i64> = BTreeMap::new();

    for vb in varbinds {
        let (root, slot) = if vb.oid.starts_with(&next_hop_root) {
            (&next_hop_root, 0)
        } else if vb.oid.starts_with(&mask_root) {
            (&mask_root, 1)
        } else if vb.oid.starts_with(&ifidx_root) {
            (&ifidx_root, 2)
        } else if vb.oid.starts_with(&metric_root) {
            (&metric_root, 3)
        } else {
            continue;
        };
        let Some(dest) = vb.oid.suffix(root).and_then(ip_from_suffix) else {
            continue;
        };
        match slot {
            0 => {
                if let Some(hop) = ip_from_value(&vb.value) {
                    next_hops.insert(dest, hop);
                }
            }
            1 => {
                if let Some(mask) = ip_from_value(&vb.value) {
                    masks.insert(dest, mask);
                }
            }
            2 => {
                if let Some(v) = vb.value.as_i64() {
                    ifidx.insert(dest, v);
                }
            }
            3 => {
                if let Some(v) = vb.value.as_i64() {
                    metrics.insert(dest, v);
                }
            }
            _ => unreachable!(),
        }
    }

    next_hops
        .into_iter()
        .filter_map(|(dest, next_hop)| {
            let prefix = masks
                .get(&dest)
                .map(|m| u32::from(*m).count_ones() as u8)
                .unwrap_or(32);
            let destination = Cidr::new(dest, prefix).ok()?;
            Some(RouteEntry {
                destination,
                next_hop,
                if_index: ifidx.get(&dest).copied(),
                metric: metrics.get(&dest).copied(),
            })
        })
        .collect()
}
