//! Devices, network interfaces, and the Purdue level / security zone
//! vocabulary.
//!
//! ## Purdue Levels
//!
//! - **L0** — Sensors/actuators (physical process)
//! - **L1** — PLCs/RTUs/DCS (basic control)
//! - **L2** — HMIs, SCADA servers (supervisory control)
//! - **L3** — Historians, MES (site operations)
//! - **L4/L5** — Enterprise IT
//! - **DMZ** — Industrial DMZ separating OT from IT
//!
//! The level→zone mapping is fixed; changing a device's level recomputes
//! its zone through [`Device::set_purdue_level`].

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::{MacAddr, VlanId};

/// Kinds of devices found on an industrial network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Sensor,
    Actuator,
    Drive,
    Instrument,
    Plc,
    Rtu,
    Dcs,
    Controller,
    ScadaServer,
    Hmi,
    EngineeringWorkstation,
    AlarmServer,
    Datalogger,
    Historian,
    Mes,
    AssetManagement,
    ErpServer,
    DatabaseServer,
    EmailServer,
    WebServer,
    Switch,
    Router,
    Firewall,
    Gateway,
    DataDiode,
    JumpServer,
    Unknown,
}

impl DeviceType {
    /// True for devices that are authorized conduits across the OT/IT
    /// boundary. Traffic through one of these does not count as a
    /// cross-zone violation.
    pub fn is_boundary_conduit(&self) -> bool {
        matches!(
            self,
            DeviceType::Firewall | DeviceType::Gateway | DeviceType::DataDiode
        )
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Unknown
    }
}

/// Operational status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Degraded,
    Maintenance,
    Unknown,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

/// Purdue reference model level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurdueLevel {
    Level0,
    Level1,
    Level2,
    Level3,
    Level4,
    Level5,
    Dmz,
}

impl PurdueLevel {
    /// Ordering rank used for classifier tie-breaks. Higher rank wins,
    /// failing safe toward stricter isolation; the DMZ outranks L5.
    pub fn rank(&self) -> u8 {
        match self {
            PurdueLevel::Level0 => 0,
            PurdueLevel::Level1 => 1,
            PurdueLevel::Level2 => 2,
            PurdueLevel::Level3 => 3,
            PurdueLevel::Level4 => 4,
            PurdueLevel::Level5 => 5,
            PurdueLevel::Dmz => 6,
        }
    }

    /// The fixed level→zone mapping.
    pub fn security_zone(&self) -> SecurityZone {
        match self {
            PurdueLevel::Level0 => SecurityZone::Process,
            PurdueLevel::Level1 => SecurityZone::Control,
            PurdueLevel::Level2 => SecurityZone::Supervisory,
            PurdueLevel::Level3 => SecurityZone::Operations,
            PurdueLevel::Level4 | PurdueLevel::Level5 => SecurityZone::Enterprise,
            PurdueLevel::Dmz => SecurityZone::Dmz,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PurdueLevel::Level0 => "L0",
            PurdueLevel::Level1 => "L1",
            PurdueLevel::Level2 => "L2",
            PurdueLevel::Level3 => "L3",
            PurdueLevel::Level4 => "L4",
            PurdueLevel::Level5 => "L5",
            PurdueLevel::Dmz => "DMZ",
        }
    }
}

/// Security zone derived from the Purdue level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityZone {
    Untrusted,
    Process,
    Control,
    Supervisory,
    Operations,
    Dmz,
    Enterprise,
}

impl SecurityZone {
    /// Zone trust level. A connection whose endpoints differ by more than
    /// one trust level is a cross-zone connection.
    pub fn trust_level(&self) -> u8 {
        match self {
            SecurityZone::Untrusted => 0,
            SecurityZone::Process => 1,
            SecurityZone::Control => 2,
            SecurityZone::Supervisory => 3,
            SecurityZone::Operations => 4,
            SecurityZone::Dmz => 5,
            SecurityZone::Enterprise => 6,
        }
    }
}

/// Interface administrative status (ifAdminStatus 1..3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatus {
    Up,
    Down,
    Testing,
}

impl AdminStatus {
    pub fn from_snmp(value: i64) -> Option<Self> {
        match value {
            1 => Some(AdminStatus::Up),
            2 => Some(AdminStatus::Down),
            3 => Some(AdminStatus::Testing),
            _ => None,
        }
    }
}

/// Interface operational status (ifOperStatus 1..7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperStatus {
    Up,
    Down,
    Testing,
    Unknown,
    Dormant,
    NotPresent,
    LowerLayerDown,
}

impl OperStatus {
    pub fn from_snmp(value: i64) -> Option<Self> {
        match value {
            1 => Some(OperStatus::Up),
            2 => Some(OperStatus::Down),
            3 => Some(OperStatus::Testing),
            4 => Some(OperStatus::Unknown),
            5 => Some(OperStatus::Dormant),
            6 => Some(OperStatus::NotPresent),
            7 => Some(OperStatus::LowerLayerDown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Duplex {
    Full,
    Half,
}

/// A single network interface on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: MacAddr,
    pub ip: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub vlan: Option<VlanId>,
    /// Link speed in bits per second.
    pub speed_bps: Option<u64>,
    pub duplex: Option<Duplex>,
    pub admin_status: Option<AdminStatus>,
    pub oper_status: Option<OperStatus>,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, mac: MacAddr) -> Self {
        NetworkInterface {
            name: name.into(),
            mac,
            ip: None,
            netmask: None,
            gateway: None,
            vlan: None,
            speed_bps: None,
            duplex: None,
            admin_status: None,
            oper_status: None,
        }
    }
}

/// A discovered device.
///
/// Identity is assigned at first observation and never changes. The
/// correlation engine is the only component that mutates identity
/// attributes; status and risk updaters touch only their own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub hostname: Option<String>,
    pub device_type: DeviceType,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub purdue_level: PurdueLevel,
    pub security_zone: SecurityZone,
    pub status: DeviceStatus,
    pub interfaces: Vec<NetworkInterface>,
    pub location: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Device {
    /// Create a new device first observed at `now`. Defaults to L5
    /// (enterprise) until the classifier has scored it.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Device {
            id: Uuid::new_v4(),
            name: name.into(),
            hostname: None,
            device_type: DeviceType::Unknown,
            vendor: None,
            model: None,
            firmware_version: None,
            serial_number: None,
            purdue_level: PurdueLevel::Level5,
            security_zone: PurdueLevel::Level5.security_zone(),
            status: DeviceStatus::Online,
            interfaces: Vec::new(),
            location: None,
            metadata: BTreeMap::new(),
            discovered_at: now,
            last_seen_at: now,
        }
    }

    /// Advance `last_seen_at`, never letting it move backwards past
    /// `discovered_at`.
    pub fn touch(&mut self, seen_at: DateTime<Utc>) {
        if seen_at > self.last_seen_at {
            self.last_seen_at = seen_at;
        }
        if self.last_seen_at < self.discovered_at {
            self.last_seen_at = self.discovered_at;
        }
    }

    /// Assign a Purdue level, recomputing the security zone from the
    /// fixed mapping.
    pub fn set_purdue_level(&mut self, level: PurdueLevel) {
        self.purdue_level = level;
        self.security_zone = level.security_zone();
    }

    /// The interface carrying `mac`, if any.
    pub fn interface_by_mac(&self, mac: &MacAddr) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|i| &i.mac == mac)
    }

    /// All IPv4 addresses bound to this device's interfaces.
    pub fn ip_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.interfaces.iter().filter_map(|i| i.ip)
    }
}
