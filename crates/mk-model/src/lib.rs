//! # mk-model
//!
//! Core domain model for the Murakumo topology pipeline.
//!
//! Everything that flows between pipeline stages is defined here:
//! devices and their interfaces, connections, telemetry records with
//! typed per-source payloads, alerts, zone definitions, topology
//! snapshots, and risk assessments.
//!
//! Network-layer identifiers (MAC, port, VLAN, CIDR) are validated
//! newtypes — construction fails loudly on out-of-range input, so the
//! rest of the pipeline never re-checks them.

pub mod alert;
pub mod connection;
pub mod device;
pub mod net;
pub mod risk;
pub mod snapshot;
pub mod telemetry;
pub mod zone;

pub use alert::{Alert, AlertSeverity, AlertType};
pub use connection::{Connection, ConnectionMetadata, ConnectionType};
pub use device::{
    AdminStatus, Device, DeviceStatus, DeviceType, Duplex, NetworkInterface, OperStatus,
    PurdueLevel, SecurityZone,
};
pub use net::{Cidr, MacAddr, Port, ValidationError, VlanId};
pub use risk::{RiskAssessment, RiskCategory, RiskFactor};
pub use snapshot::{SnapshotSummary, TopologySnapshot};
pub use telemetry::{
    ArpEntry, ArpEntryType, ArpPayload, BridgeMacEntry, EntityInfo, FlowRecord, LldpNeighbor,
    MacTablePayload, ManualPayload, ModbusPayload, NetflowPayload, OpcUaPayload, OpcUaSample,
    RegisterReading, RouteEntry, RoutingPayload, ScalarValue, SnmpInterface, SnmpIpEntry,
    SnmpPayload, SnmpSystemInfo, SyslogMessage, SyslogPayload, TelemetryPayload, TelemetryRecord,
    TelemetrySource,
};
pub use zone::{FirewallRule, ZoneDefinition};
