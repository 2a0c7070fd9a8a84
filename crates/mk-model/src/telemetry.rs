//! Telemetry records and their typed per-source payloads.
//!
//! A [`TelemetryRecord`] is the immutable unit flowing through the
//! pipeline. Its payload is a tagged enum with one typed variant per
//! source — there is no untyped map passthrough in the core pipeline;
//! parsers either produce a typed payload or reject the input.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::{Cidr, MacAddr, Port, VlanId};

/// Where a telemetry record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Snmp,
    Arp,
    MacTable,
    Netflow,
    Syslog,
    Routing,
    #[serde(rename = "opcua")]
    OpcUa,
    Modbus,
    Manual,
}

impl fmt::Display for TelemetrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetrySource::Snmp => "snmp",
            TelemetrySource::Arp => "arp",
            TelemetrySource::MacTable => "mac_table",
            TelemetrySource::Netflow => "netflow",
            TelemetrySource::Syslog => "syslog",
            TelemetrySource::Routing => "routing",
            TelemetrySource::OpcUa => "opcua",
            TelemetrySource::Modbus => "modbus",
            TelemetrySource::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// SNMP system group (sysDescr, sysObjectID, sysUpTime, sysName,
/// sysLocation, sysServices).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnmpSystemInfo {
    pub descr: Option<String>,
    pub object_id: Option<String>,
    pub uptime_ticks: Option<u64>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub services: Option<i64>,
}

/// One row of the SNMP interface table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpInterface {
    pub index: i64,
    pub descr: String,
    pub if_type: Option<i64>,
    pub speed_bps: Option<u64>,
    pub phys_address: Option<MacAddr>,
    /// ifAdminStatus raw value (1..3).
    pub admin_status: Option<i64>,
    /// ifOperStatus raw value (1..7).
    pub oper_status: Option<i64>,
    pub in_octets: Option<u64>,
    pub out_octets: Option<u64>,
}

/// One row of the SNMP ipAddrTable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpIpEntry {
    pub addr: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
    pub if_index: Option<i64>,
}

/// ARP cache entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpEntryType {
    Dynamic,
    Static,
}

/// A single IP→MAC binding, from a local ARP cache or an SNMP
/// ipNetToMediaTable walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub interface: Option<String>,
    pub vlan: Option<VlanId>,
    pub entry_type: ArpEntryType,
    pub age_seconds: Option<u64>,
}

/// A MAC learned on a bridge port (dot1dTpFdbTable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMacEntry {
    pub mac: MacAddr,
    pub port: Option<i64>,
}

/// An LLDP neighbor announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LldpNeighbor {
    pub local_port: Option<String>,
    pub chassis_mac: Option<MacAddr>,
    pub system_name: Option<String>,
    pub remote_port: Option<String>,
    pub system_descr: Option<String>,
}

/// Entity MIB physical info (vendor, model, serial).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
}

/// Full SNMP poll result for one target.
///
/// A walk that failed partway still carries whatever was collected; the
/// record's `partial` metadata flag marks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpPayload {
    pub target: Ipv4Addr,
    pub system: Option<SnmpSystemInfo>,
    pub interfaces: Vec<SnmpInterface>,
    pub ip_addresses: Vec<SnmpIpEntry>,
    pub arp_entries: Vec<ArpEntry>,
    pub bridge_macs: Vec<BridgeMacEntry>,
    pub lldp_neighbors: Vec<LldpNeighbor>,
    pub entity: Option<EntityInfo>,
}

impl SnmpPayload {
    pub fn empty(target: Ipv4Addr) -> Self {
        SnmpPayload {
            target,
            system: None,
            interfaces: Vec::new(),
            ip_addresses: Vec::new(),
            arp_entries: Vec::new(),
            bridge_macs: Vec::new(),
            lldp_neighbors: Vec::new(),
            entity: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArpPayload {
    pub entries: Vec<ArpEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacTablePayload {
    pub entries: Vec<BridgeMacEntry>,
}

/// An aggregated NetFlow flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: Port,
    pub dst_port: Port,
    /// IP protocol number (6 = TCP, 17 = UDP).
    pub protocol: u8,
    pub bytes: u64,
    pub packets: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tcp_flags: Option<u8>,
    pub tos: Option<u8>,
    pub is_industrial: bool,
    pub industrial_protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetflowPayload {
    pub flows: Vec<FlowRecord>,
}

/// A parsed syslog message (RFC 5424, with tolerant RFC 3164 fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyslogMessage {
    /// 0-23.
    pub facility: u8,
    /// 0-7, 0 being most severe.
    pub severity: u8,
    pub timestamp: DateTime<Utc>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub message: String,
    pub structured_data: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyslogPayload {
    pub message: SyslogMessage,
    /// Set when the message matched the security-event criteria.
    pub security_event: bool,
}

/// One route table entry from an SNMP routing walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Cidr,
    pub next_hop: Ipv4Addr,
    pub if_index: Option<i64>,
    pub metric: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingPayload {
    pub router: Option<Ipv4Addr>,
    pub routes: Vec<RouteEntry>,
}

/// A scalar sample value from an OT data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// A monitored-node sample from an OPC-UA endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcUaSample {
    pub node_id: String,
    pub value: ScalarValue,
    pub source_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcUaPayload {
    pub endpoint: String,
    pub samples: Vec<OpcUaSample>,
}

/// A decoded Modbus register reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReading {
    pub name: String,
    pub address: u16,
    pub value: ScalarValue,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusPayload {
    pub target: Ipv4Addr,
    pub unit_id: u8,
    pub readings: Vec<RegisterReading>,
}

/// Operator-entered telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualPayload {
    pub note: String,
    pub attributes: BTreeMap<String, String>,
}

/// Typed telemetry payload — one variant per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TelemetryPayload {
    Snmp(SnmpPayload),
    Arp(ArpPayload),
    MacTable(MacTablePayload),
    Netflow(NetflowPayload),
    Syslog(SyslogPayload),
    Routing(RoutingPayload),
    OpcUa(OpcUaPayload),
    Modbus(ModbusPayload),
    Manual(ManualPayload),
}

impl TelemetryPayload {
    pub fn source(&self) -> TelemetrySource {
        match self {
            TelemetryPayload::Snmp(_) => TelemetrySource::Snmp,
            TelemetryPayload::Arp(_) => TelemetrySource::Arp,
            TelemetryPayload::MacTable(_) => TelemetrySource::MacTable,
            TelemetryPayload::Netflow(_) => TelemetrySource::Netflow,
            TelemetryPayload::Syslog(_) => TelemetrySource::Syslog,
            TelemetryPayload::Routing(_) => TelemetrySource::Routing,
            TelemetryPayload::OpcUa(_) => TelemetrySource::OpcUa,
            TelemetryPayload::Modbus(_) => TelemetrySource::Modbus,
            TelemetryPayload::Manual(_) => TelemetrySource::Manual,
        }
    }
}

/// The immutable unit flowing through the pipeline.
///
/// `source` always agrees with the payload variant; [`TelemetryRecord::new`]
/// derives it, so the two cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub source: TelemetrySource,
    pub timestamp: DateTime<Utc>,
    pub data: TelemetryPayload,
    pub raw: Option<String>,
    pub processed: bool,
    pub metadata: BTreeMap<String, String>,
}

impl TelemetryRecord {
    pub fn new(data: TelemetryPayload, timestamp: DateTime<Utc>) -> Self {
        TelemetryRecord {
            id: Uuid::new_v4(),
            source: data.source(),
            timestamp,
            data,
            raw: None,
            processed: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the record processed. After persistence this is the terminal
    /// state; processed records are read-only.
    pub fn mark_processed(&mut self) {
        self.processed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_flow() -> FlowRecord {
        FlowRecord {
            src_ip: "10.0.1.50".parse().unwrap(),
            dst_ip: "10.0.2.10".parse().unwrap(),
            src_port: Port::new(49152).unwrap(),
            dst_port: Port::new(502).unwrap(),
            protocol: 6,
            bytes: 1200,
            packets: 10,
            start: Utc::now(),
            end: Utc::now(),
            tcp_flags: Some(0x18),
            tos: None,
            is_industrial: true,
            industrial_protocol: Some("Modbus".to_string()),
        }
    }

    #[test]
    fn test_source_derived_from_payload() {
        let record = TelemetryRecord::new(
            TelemetryPayload::Netflow(NetflowPayload {
                flows: vec![sample_flow()],
            }),
            Utc::now(),
        );
        assert_eq!(record.source, TelemetrySource::Netflow);
        assert!(!record.processed);
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = TelemetryRecord::new(
            TelemetryPayload::Netflow(NetflowPayload {
                flows: vec![sample_flow()],
            }),
            Utc::now(),
        )
        .with_meta("partial", "false");

        let json = serde_json::to_string(&record).unwrap();
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_snmp_payload_round_trip() {
        let target: Ipv4Addr = "192.168.10.2".parse().unwrap();
        let payload = TelemetryPayload::Snmp(SnmpPayload {
            system: Some(SnmpSystemInfo {
                descr: Some("Siemens SIMATIC S7-1500".to_string()),
                name: Some("plc-line1".to_string()),
                location: Some("Plant-A/Line-1".to_string()),
                ..Default::default()
            }),
            interfaces: vec![SnmpInterface {
                index: 1,
                descr: "X1".to_string(),
                if_type: Some(6),
                speed_bps: Some(100_000_000),
                phys_address: Some("28:63:36:aa:bb:cc".parse().unwrap()),
                admin_status: Some(1),
                oper_status: Some(1),
                in_octets: Some(1000),
                out_octets: Some(2000),
            }],
            ..SnmpPayload::empty(target)
        });

        let record = TelemetryRecord::new(payload, Utc::now());
        assert_eq!(record.source, TelemetrySource::Snmp);

        let json = serde_json::to_string(&record).unwrap();
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_syslog_payload_round_trip() {
        let payload = TelemetryPayload::Syslog(SyslogPayload {
            message: SyslogMessage {
                facility: 4,
                severity: 2,
                timestamp: Utc::now(),
                hostname: Some("scada-hist1".to_string()),
                app_name: Some("sshd".to_string()),
                proc_id: Some("4242".to_string()),
                msg_id: None,
                message: "unauthorized access denied for user operator".to_string(),
                structured_data: BTreeMap::new(),
            },
            security_event: true,
        });

        let record = TelemetryRecord::new(payload, Utc::now());
        let json = serde_json::to_string(&record).unwrap();
        let back: TelemetryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
