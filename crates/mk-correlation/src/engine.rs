//! The correlation engine: a synchronous state machine folding parsed
//! telemetry into devices and connections.
//!
//! Identity resolution order for each record's hints:
//! 1. MAC match against any existing interface (strongest)
//! 2. IPv4 match via the IP→device cache
//! 3. hostname exact match
//! 4. SNMP sysName + vendor exact match
//!
//! Exactly one candidate → update (fill empty attributes, never
//! overwrite non-empty from a weaker signal). Multiple candidates →
//! merge the oldest into the newest with an audit event. None → create,
//! classify, raise `new_device`.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use mk_model::{
    Alert, AlertSeverity, AlertType, ArpEntry, Connection, ConnectionType, Device, DeviceStatus,
    DeviceType, FlowRecord, LldpNeighbor, MacAddr, NetworkInterface, Port, SnmpPayload,
    SyslogPayload, TelemetryPayload, TelemetryRecord, TelemetrySource, ZoneDefinition,
};

use crate::cache::IpDeviceCache;
use crate::classify::{is_cross_zone_violation, ClassifyInput, PurdueClassifier};

/// What the actor persists and publishes after each record.
#[derive(Debug, Clone)]
pub enum CorrelationEvent {
    DeviceCreated(Device),
    DeviceUpdated(Device),
    /// Touch-only: `last_seen_at` advanced, nothing else changed.
    DeviceSeen { id: Uuid, at: DateTime<Utc> },
    DevicesMerged { winner: Uuid, loser: Uuid },
    ConnectionUpserted { connection: Connection, created: bool },
    AlertRaised(Alert),
}

/// Relative trust of a telemetry source when overwriting attributes.
fn source_strength(source: TelemetrySource) -> u8 {
    match source {
        TelemetrySource::Snmp => 3,
        TelemetrySource::OpcUa | TelemetrySource::Modbus | TelemetrySource::Manual => 2,
        TelemetrySource::Arp | TelemetrySource::MacTable | TelemetrySource::Routing => 1,
        TelemetrySource::Netflow | TelemetrySource::Syslog => 0,
    }
}

const STRENGTH_KEY: &str = "identity_strength";

/// A normalized identity observation distilled from one record.
#[derive(Debug, Default)]
struct Observation {
    hostname: Option<String>,
    vendor: Option<String>,
    model: Option<String>,
    firmware: Option<String>,
    serial: Option<String>,
    location: Option<String>,
    device_type: Option<DeviceType>,
    interfaces: Vec<NetworkInterface>,
    bare_ips: Vec<Ipv4Addr>,
}

type ConnKey = (Uuid, Uuid, Option<String>, Option<u16>);

pub struct CorrelationEngine {
    devices: HashMap<Uuid, Device>,
    mac_index: HashMap<MacAddr, Uuid>,
    hostname_index: HashMap<String, Uuid>,
    ip_cache: IpDeviceCache,
    connections: HashMap<ConnKey, Connection>,
    classifier: PurdueClassifier,
    zones: Vec<ZoneDefinition>,
}

impl CorrelationEngine {
    pub fn new(classifier: PurdueClassifier, zones: Vec<ZoneDefinition>, cache_capacity: usize) -> Self {
        CorrelationEngine {
            devices: HashMap::new(),
            mac_index: HashMap::new(),
            hostname_index: HashMap::new(),
            ip_cache: IpDeviceCache::new(cache_capacity),
            connections: HashMap::new(),
            classifier,
            zones,
        }
    }

    /// Seed the engine with persisted state at startup.
    pub fn load(&mut self, devices: Vec<Device>, connections: Vec<Connection>) {
        for device in devices {
            self.index_device(&device);
            self.devices.insert(device.id, device);
        }
        for connection in connections {
            let key = (
                connection.source_device_id,
                connection.target_device_id,
                connection.protocol.clone(),
                connection.port.map(|p| p.get()),
            );
            self.connections.insert(key, connection);
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn device(&self, id: Uuid) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn zones(&self) -> &[ZoneDefinition] {
        &self.zones
    }

    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<&Device> {
        self.ip_cache.peek(ip).and_then(|id| self.devices.get(&id))
    }

    pub fn find_by_hostname(&self, hostname: &str) -> Option<&Device> {
        self.hostname_index
            .get(&hostname.to_lowercase())
            .and_then(|id| self.devices.get(id))
    }

    /// Process one record. Events come out in the order they must be
    /// applied; per-device updates keep correlation-receipt order
    /// because the actor is the only caller.
    pub fn process(&mut self, record: &TelemetryRecord) -> Vec<CorrelationEvent> {
        let now = record.timestamp;
        match &record.data {
            TelemetryPayload::Snmp(payload) => self.process_snmp(payload, now),
            TelemetryPayload::Arp(payload) => {
                let mut events = Vec::new();
                for entry in &payload.entries {
                    events.extend(self.process_arp_entry(entry, now));
                }
                events
            }
            TelemetryPayload::MacTable(payload) => {
                let mut events = Vec::new();
                for entry in &payload.entries {
                    if entry.mac.is_broadcast() || entry.mac.is_zero() {
                        continue;
                    }
                    let obs = Observation {
                        interfaces: vec![NetworkInterface::new("bridge-learned", entry.mac)],
                        ..Default::default()
                    };
                    events.extend(self.observe(obs, TelemetrySource::MacTable, now));
                }
                events
            }
            TelemetryPayload::Netflow(payload) => {
                let mut events = Vec::new();
                for flow in &payload.flows {
                    events.extend(self.process_flow(flow, now));
                }
                events
            }
            TelemetryPayload::Syslog(payload) => self.process_syslog(payload, now),
            TelemetryPayload::Routing(payload) => {
                let mut events = Vec::new();
                if let Some(router) = payload.router {
                    let obs = Observation {
                        device_type: Some(DeviceType::Router),
                        bare_ips: vec![router],
                        ..Default::default()
                    };
                    events.extend(self.observe(obs, TelemetrySource::Routing, now));
                }
                events
            }
            TelemetryPayload::OpcUa(payload) => {
                let mut events = Vec::new();
                if let Some(host) = host_of_endpoint(&payload.endpoint) {
                    let obs = Observation {
                        device_type: Some(DeviceType::ScadaServer),
                        bare_ips: vec![host],
                        ..Default::default()
                    };
                    events.extend(self.observe(obs, TelemetrySource::OpcUa, now));
                }
                events
            }
            TelemetryPayload::Modbus(payload) => {
                let obs = Observation {
                    device_type: Some(DeviceType::Rtu),
                    bare_ips: vec![payload.target],
                    ..Default::default()
                };
                self.observe(obs, TelemetrySource::Modbus, now)
            }
            TelemetryPayload::Manual(_) => Vec::new(),
        }
    }

    /// Mark long-unseen devices offline, raising one alert per
    /// transition.
    pub fn sweep_offline(&mut self, now: DateTime<Utc>, offline_after: Duration) -> Vec<CorrelationEvent> {
        let mut events = Vec::new();
        let cutoff = now - offline_after;
        let stale: Vec<Uuid> = self
            .devices
            .values()
            .filter(|d| d.status == DeviceStatus::Online && d.last_seen_at < cutoff)
            .map(|d| d.id)
            .collect();
        for id in stale {
            if let Some(device) = self.devices.get_mut(&id) {
                device.status = DeviceStatus::Offline;
                events.push(CorrelationEvent::DeviceUpdated(device.clone()));
                events.push(CorrelationEvent::AlertRaised(
                    Alert::new(
                        AlertType::DeviceOffline,
                        AlertSeverity::Medium,
                        format!("Device {} offline", device.name),
                        format!(
                            "No telemetry from {} since {}",
                            device.name, device.last_seen_at
                        ),
                        now,
                    )
                    .for_device(id),
                ));
            }
        }
        events
    }

    // ---- per-source handling ----

    fn process_snmp(&mut self, payload: &SnmpPayload, now: DateTime<Utc>) -> Vec<CorrelationEvent> {
        let mut interfaces = Vec::new();
        let mut ip_by_index: HashMap<i64, (Ipv4Addr, Option<Ipv4Addr>)> = HashMap::new();
        for entry in &payload.ip_addresses {
            if let Some(index) = entry.if_index {
                ip_by_index.insert(index, (entry.addr, entry.netmask));
            }
        }
        for iface in &payload.interfaces {
            let Some(mac) = iface.phys_address else {
                continue;
            };
            if mac.is_zero() || mac.is_broadcast() {
                continue;
            }
            let mut interface = NetworkInterface::new(iface.descr.clone(), mac);
            if let Some((ip, netmask)) = ip_by_index.get(&iface.index) {
                interface.ip = Some(*ip);
                interface.netmask = *netmask;
            }
            interface.speed_bps = iface.speed_bps;
            interface.admin_status = iface.admin_status.and_then(mk_model::AdminStatus::from_snmp);
            interface.oper_status = iface.oper_status.and_then(mk_model::OperStatus::from_snmp);
            interfaces.push(interface);
        }

        let system = payload.system.clone().unwrap_or_default();
        let entity = payload.entity.clone().unwrap_or_default();
        let descr_type = system.descr.as_deref().and_then(infer_type_from_descr);
        let vendor = entity
            .vendor
            .clone()
            .or_else(|| system.descr.as_deref().and_then(infer_vendor_from_descr));

        let obs = Observation {
            hostname: system.name.clone(),
            vendor,
            model: entity.model.clone(),
            firmware: entity.firmware.clone(),
            serial: entity.serial.clone(),
            location: system.location.clone(),
            device_type: descr_type,
            interfaces,
            bare_ips: vec![payload.target],
        };

        let mut events = self.observe(obs, TelemetrySource::Snmp, now);

        // The polled device's id, for LLDP edge building.
        let target_id = self.ip_cache.peek(payload.target);

        for entry in &payload.arp_entries {
            events.extend(self.process_arp_entry(entry, now));
        }
        if let Some(target_id) = target_id {
            for neighbor in &payload.lldp_neighbors {
                events.extend(self.process_lldp_neighbor(target_id, neighbor, now));
            }
        }
        events
    }

    fn process_arp_entry(&mut self, entry: &ArpEntry, now: DateTime<Utc>) -> Vec<CorrelationEvent> {
        if entry.mac.is_broadcast() || entry.mac.is_zero() {
            return Vec::new();
        }
        let mut interface =
            NetworkInterface::new(entry.interface.clone().unwrap_or_else(|| "arp".to_string()), entry.mac);
        interface.ip = Some(entry.ip);
        interface.vlan = entry.vlan;
        let obs = Observation {
            interfaces: vec![interface],
            ..Default::default()
        };
        self.observe(obs, TelemetrySource::Arp, now)
    }

    fn process_lldp_neighbor(
        &mut self,
        local_id: Uuid,
        neighbor: &LldpNeighbor,
        now: DateTime<Utc>,
    ) -> Vec<CorrelationEvent> {
        let mut obs = Observation {
            hostname: neighbor.system_name.clone(),
            ..Default::default()
        };
        if let Some(mac) = neighbor.chassis_mac {
            if !mac.is_zero() && !mac.is_broadcast() {
                obs.interfaces.push(NetworkInterface::new(
                    neighbor.remote_port.clone().unwrap_or_else(|| "lldp".to_string()),
                    mac,
                ));
            }
        }
        if obs.hostname.is_none() && obs.interfaces.is_empty() {
            return Vec::new();
        }

        let mut events = self.observe(obs, TelemetrySource::MacTable, now);
        let neighbor_id = neighbor
            .chassis_mac
            .and_then(|mac| self.mac_index.get(&mac).copied())
            .or_else(|| {
                neighbor
                    .system_name
                    .as_deref()
                    .and_then(|name| self.hostname_index.get(&name.to_lowercase()).copied())
            });
        if let Some(neighbor_id) = neighbor_id {
            if neighbor_id != local_id {
                // LLDP adjacency is symmetric: one edge per direction.
                events.extend(self.upsert_edge(local_id, neighbor_id, None, None, 0, 0, now, None));
                events.extend(self.upsert_edge(neighbor_id, local_id, None, None, 0, 0, now, None));
            }
        }
        events
    }

    fn process_flow(&mut self, flow: &FlowRecord, now: DateTime<Utc>) -> Vec<CorrelationEvent> {
        let source = self.ip_cache.get(flow.src_ip);
        let target = self.ip_cache.get(flow.dst_ip);
        let (Some(source), Some(target)) = (source, target) else {
            // Flows never create devices; unresolved endpoints wait for
            // a stronger source to observe them.
            return Vec::new();
        };
        if source == target {
            return Vec::new();
        }
        let protocol = ip_protocol_name(flow.protocol);
        let mut events = Vec::new();
        for id in [source, target] {
            if let Some(device) = self.devices.get_mut(&id) {
                device.touch(now);
                events.push(CorrelationEvent::DeviceSeen { id, at: now });
            }
        }
        events.extend(self.upsert_edge(
            source,
            target,
            Some(protocol),
            Some(flow.dst_port),
            flow.bytes,
            flow.packets,
            now,
            Some(flow),
        ));
        events
    }

    fn process_syslog(&mut self, payload: &SyslogPayload, now: DateTime<Utc>) -> Vec<CorrelationEvent> {
        let mut events = Vec::new();
        let device_id = payload
            .message
            .hostname
            .as_deref()
            .and_then(|hostname| self.hostname_index.get(&hostname.to_lowercase()).copied());
        if let Some(id) = device_id {
            if let Some(device) = self.devices.get_mut(&id) {
                device.touch(now);
                device.status = DeviceStatus::Online;
                events.push(CorrelationEvent::DeviceUpdated(device.clone()));
            }
        }
        if payload.security_event {
            let severity = match payload.message.severity {
                0 | 1 => AlertSeverity::Critical,
                2 => AlertSeverity::High,
                3 => AlertSeverity::Medium,
                _ => AlertSeverity::Low,
            };
            let mut alert = Alert::new(
                AlertType::SecurityViolation,
                severity,
                format!(
                    "Security event from {}",
                    payload.message.hostname.as_deref().unwrap_or("unknown host")
                ),
                payload.message.message.clone(),
                now,
            )
            .with_detail("facility", payload.message.facility.to_string())
            .with_detail("syslog_severity", payload.message.severity.to_string());
            if let Some(id) = device_id {
                alert = alert.for_device(id);
            }
            events.push(CorrelationEvent::AlertRaised(alert));
        }
        events
    }

    // ---- identity resolution ----

    fn observe(
        &mut self,
        obs: Observation,
        source: TelemetrySource,
        now: DateTime<Utc>,
    ) -> Vec<CorrelationEvent> {
        let mut events = Vec::new();

        // Resolution order: MAC, IP cache, hostname, sysName+vendor.
        let mut candidates: Vec<Uuid> = Vec::new();
        let mut push = |id: Uuid, candidates: &mut Vec<Uuid>| {
            if !candidates.contains(&id) {
                candidates.push(id);
            }
        };
        for iface in &obs.interfaces {
            if let Some(&id) = self.mac_index.get(&iface.mac) {
                push(id, &mut candidates);
            }
        }
        for ip in obs
            .interfaces
            .iter()
            .filter_map(|i| i.ip)
            .chain(obs.bare_ips.iter().copied())
        {
            if let Some(id) = self.ip_cache.get(ip) {
                push(id, &mut candidates);
            }
        }
        if let Some(hostname) = obs.hostname.as_deref() {
            if let Some(&id) = self.hostname_index.get(&hostname.to_lowercase()) {
                push(id, &mut candidates);
            }
        }
        if candidates.is_empty() && source == TelemetrySource::Snmp {
            if let (Some(name), Some(vendor)) = (obs.hostname.as_deref(), obs.vendor.as_deref()) {
                if let Some(id) = self
                    .devices
                    .values()
                    .find(|d| {
                        d.name.eq_ignore_ascii_case(name)
                            && d.vendor.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(vendor))
                    })
                    .map(|d| d.id)
                {
                    push(id, &mut candidates);
                }
            }
        }

        let target = match candidates.len() {
            0 => {
                let device = self.create_device(&obs, source, now);
                let id = device.id;
                events.push(CorrelationEvent::AlertRaised(
                    Alert::new(
                        AlertType::NewDevice,
                        AlertSeverity::Info,
                        format!("New device discovered: {}", device.name),
                        format!(
                            "First observed via {} at {}; classified {} / {:?}",
                            source,
                            now,
                            device.purdue_level.label(),
                            device.security_zone
                        ),
                        now,
                    )
                    .for_device(id),
                ));
                events.insert(0, CorrelationEvent::DeviceCreated(device));
                id
            }
            1 => candidates[0],
            _ => {
                // Merge the oldest into the newest, pairwise.
                let mut ordered = candidates.clone();
                ordered.sort_by_key(|id| {
                    self.devices
                        .get(id)
                        .map(|d| d.discovered_at)
                        .unwrap_or_else(Utc::now)
                });
                let winner = ordered[ordered.len() - 1];
                for loser in ordered.iter().take(ordered.len() - 1) {
                    events.extend(self.merge_devices(winner, *loser));
                }
                winner
            }
        };

        if let Some(update) = self.apply_observation(target, &obs, source, now) {
            events.push(update);
        }
        events
    }

    fn create_device(
        &mut self,
        obs: &Observation,
        source: TelemetrySource,
        now: DateTime<Utc>,
    ) -> Device {
        let name = obs
            .hostname
            .clone()
            .or_else(|| {
                obs.interfaces
                    .iter()
                    .find_map(|i| i.ip)
                    .or_else(|| obs.bare_ips.first().copied())
                    .map(|ip| ip.to_string())
            })
            .or_else(|| obs.interfaces.first().map(|i| i.mac.to_string()))
            .unwrap_or_else(|| "unnamed-device".to_string());

        let mut device = Device::new(name, now);
        device.hostname = obs.hostname.clone();
        device.vendor = obs.vendor.clone();
        device.model = obs.model.clone();
        device.firmware_version = obs.firmware.clone();
        device.serial_number = obs.serial.clone();
        device.location = obs.location.clone();
        device.device_type = obs.device_type.unwrap_or(DeviceType::Unknown);
        device.interfaces = obs.interfaces.clone();
        device.status = DeviceStatus::Online;
        device
            .metadata
            .insert(STRENGTH_KEY.to_string(), source_strength(source).to_string());

        self.reclassify(&mut device);
        self.index_device(&device);
        for ip in &obs.bare_ips {
            self.ip_cache.insert(*ip, device.id);
        }
        self.devices.insert(device.id, device.clone());
        device
    }

    /// Merge `loser` into `winner`: union interfaces, fill empty
    /// attributes, keep the earliest discovery, repoint all indexes
    /// atomically (the actor applies the matching persistence).
    fn merge_devices(&mut self, winner: Uuid, loser: Uuid) -> Vec<CorrelationEvent> {
        let Some(loser_device) = self.devices.remove(&loser) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        if let Some(device) = self.devices.get_mut(&winner) {
            for iface in &loser_device.interfaces {
                if device.interface_by_mac(&iface.mac).is_none() {
                    device.interfaces.push(iface.clone());
                }
            }
            fill_empty(&mut device.hostname, &loser_device.hostname);
            fill_empty(&mut device.vendor, &loser_device.vendor);
            fill_empty(&mut device.model, &loser_device.model);
            fill_empty(&mut device.firmware_version, &loser_device.firmware_version);
            fill_empty(&mut device.serial_number, &loser_device.serial_number);
            fill_empty(&mut device.location, &loser_device.location);
            if device.device_type == DeviceType::Unknown {
                device.device_type = loser_device.device_type;
            }
            if loser_device.discovered_at < device.discovered_at {
                device.discovered_at = loser_device.discovered_at;
            }
            if loser_device.last_seen_at > device.last_seen_at {
                device.last_seen_at = loser_device.last_seen_at;
            }
        }

        // Repoint indexes.
        for (_, id) in self.mac_index.iter_mut().filter(|(_, id)| **id == loser) {
            *id = winner;
        }
        for (_, id) in self
            .hostname_index
            .iter_mut()
            .filter(|(_, id)| **id == loser)
        {
            *id = winner;
        }
        self.ip_cache.repoint(loser, winner);

        // Rewrite edges that referenced the loser.
        let affected: Vec<ConnKey> = self
            .connections
            .keys()
            .filter(|(src, dst, _, _)| *src == loser || *dst == loser)
            .cloned()
            .collect();
        for key in affected {
            if let Some(mut connection) = self.connections.remove(&key) {
                let src = if connection.source_device_id == loser { winner } else { connection.source_device_id };
                let dst = if connection.target_device_id == loser { winner } else { connection.target_device_id };
                if src == dst {
                    continue; // merged into a self-edge; drop it
                }
                connection.source_device_id = src;
                connection.target_device_id = dst;
                let new_key = (src, dst, key.2.clone(), key.3);
                match self.connections.get_mut(&new_key) {
                    Some(existing) => {
                        existing.absorb(
                            connection.metadata.bytes,
                            connection.metadata.packets,
                            connection.last_seen_at,
                        );
                        events.push(CorrelationEvent::ConnectionUpserted {
                            connection: existing.clone(),
                            created: false,
                        });
                    }
                    None => {
                        self.connections.insert(new_key, connection.clone());
                        events.push(CorrelationEvent::ConnectionUpserted {
                            connection,
                            created: false,
                        });
                    }
                }
            }
        }

        events.push(CorrelationEvent::DevicesMerged { winner, loser });
        if let Some(device) = self.devices.get(&winner) {
            events.push(CorrelationEvent::DeviceUpdated(device.clone()));
        }
        events
    }

    /// Fold an observation into an existing device. Returns an update
    /// event when anything changed.
    fn apply_observation(
        &mut self,
        id: Uuid,
        obs: &Observation,
        source: TelemetrySource,
        now: DateTime<Utc>,
    ) -> Option<CorrelationEvent> {
        let strength = source_strength(source);
        let device = self.devices.get_mut(&id)?;
        let prior_strength: u8 = device
            .metadata
            .get(STRENGTH_KEY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let may_overwrite = strength >= prior_strength;

        let mut set_field = |field: &mut Option<String>, value: &Option<String>| {
            if let Some(value) = value {
                if field.is_none() || (may_overwrite && field.as_deref() != Some(value)) {
                    *field = Some(value.clone());
                }
            }
        };
        set_field(&mut device.hostname, &obs.hostname);
        set_field(&mut device.vendor, &obs.vendor);
        set_field(&mut device.model, &obs.model);
        set_field(&mut device.firmware_version, &obs.firmware);
        set_field(&mut device.serial_number, &obs.serial);
        set_field(&mut device.location, &obs.location);
        if let Some(device_type) = obs.device_type {
            if device.device_type == DeviceType::Unknown || may_overwrite {
                device.device_type = device_type;
            }
        }
        if let Some(hostname) = &device.hostname {
            if device.name != *hostname && may_overwrite {
                device.name = hostname.clone();
            }
        }

        // Merge interfaces: new MACs append, known MACs fill in IPs.
        for observed in &obs.interfaces {
            match device
                .interfaces
                .iter_mut()
                .find(|i| i.mac == observed.mac)
            {
                Some(existing) => {
                    if existing.ip.is_none() {
                        existing.ip = observed.ip;
                    }
                    if existing.netmask.is_none() {
                        existing.netmask = observed.netmask;
                    }
                    if existing.vlan.is_none() {
                        existing.vlan = observed.vlan;
                    }
                    if existing.speed_bps.is_none() {
                        existing.speed_bps = observed.speed_bps;
                    }
                    if observed.admin_status.is_some() {
                        existing.admin_status = observed.admin_status;
                    }
                    if observed.oper_status.is_some() {
                        existing.oper_status = observed.oper_status;
                    }
                }
                None => device.interfaces.push(observed.clone()),
            }
        }

        device.touch(now);
        device.status = DeviceStatus::Online;
        if strength > prior_strength {
            device
                .metadata
                .insert(STRENGTH_KEY.to_string(), strength.to_string());
        }

        // Keep the level→zone invariant current after identity changes.
        let mut device = device.clone();
        self.reclassify(&mut device);
        self.index_device(&device);
        for ip in &obs.bare_ips {
            self.ip_cache.insert(*ip, id);
        }
        self.devices.insert(id, device.clone());
        Some(CorrelationEvent::DeviceUpdated(device))
    }

    fn reclassify(&self, device: &mut Device) {
        let input = ClassifyInput {
            device_type: device.device_type,
            hostname: device.hostname.as_deref(),
            vendor: device.vendor.as_deref(),
            macs: device.interfaces.iter().map(|i| i.mac).collect(),
            ips: device.ip_addresses().collect(),
        };
        let classification = self.classifier.classify(&input);
        device.set_purdue_level(classification.level);
        // OUI-derived vendor enriches a device that had none.
        if device.vendor.is_none() {
            device.vendor = device
                .interfaces
                .iter()
                .find_map(|i| self.classifier.rules().vendor_for_mac(&i.mac))
                .map(String::from);
        }
    }

    fn index_device(&mut self, device: &Device) {
        for iface in &device.interfaces {
            self.mac_index.insert(iface.mac, device.id);
            if let Some(ip) = iface.ip {
                self.ip_cache.insert(ip, device.id);
            }
        }
        if let Some(hostname) = &device.hostname {
            self.hostname_index.insert(hostname.to_lowercase(), device.id);
        }
    }

    // ---- connection discovery ----

    #[allow(clippy::too_many_arguments)]
    fn upsert_edge(
        &mut self,
        source: Uuid,
        target: Uuid,
        protocol: Option<String>,
        port: Option<Port>,
        bytes: u64,
        packets: u64,
        now: DateTime<Utc>,
        flow: Option<&FlowRecord>,
    ) -> Vec<CorrelationEvent> {
        let mut events = Vec::new();
        let key = (source, target, protocol.clone(), port.map(|p| p.get()));
        match self.connections.get_mut(&key) {
            Some(connection) => {
                connection.absorb(bytes, packets, now);
                events.push(CorrelationEvent::ConnectionUpserted {
                    connection: connection.clone(),
                    created: false,
                });
            }
            None => {
                let mut connection = Connection::new(source, target, ConnectionType::Ethernet, now);
                connection.protocol = protocol;
                connection.port = port;
                connection.metadata.bytes = bytes;
                connection.metadata.packets = packets;
                if let Some(flow) = flow {
                    connection.metadata.is_industrial = flow.is_industrial;
                    connection.metadata.industrial_protocol = flow.industrial_protocol.clone();
                }
                self.connections.insert(key, connection.clone());
                events.push(CorrelationEvent::ConnectionUpserted {
                    connection: connection.clone(),
                    created: true,
                });
                events.extend(self.edge_alerts(&connection, now));
            }
        }
        events
    }

    fn edge_alerts(&self, connection: &Connection, now: DateTime<Utc>) -> Vec<CorrelationEvent> {
        let mut events = Vec::new();
        let (Some(source), Some(target)) = (
            self.devices.get(&connection.source_device_id),
            self.devices.get(&connection.target_device_id),
        ) else {
            return events;
        };

        if is_cross_zone_violation(
            source.security_zone,
            target.security_zone,
            source.device_type,
            target.device_type,
        ) {
            events.push(CorrelationEvent::AlertRaised(
                Alert::new(
                    AlertType::CrossZoneConnection,
                    AlertSeverity::High,
                    format!("Cross-zone connection: {} → {}", source.name, target.name),
                    format!(
                        "{} ({:?}, trust {}) communicates with {} ({:?}, trust {}) without an authorized conduit",
                        source.name,
                        source.security_zone,
                        source.security_zone.trust_level(),
                        target.name,
                        target.security_zone,
                        target.security_zone.trust_level(),
                    ),
                    now,
                )
                .for_device(source.id)
                .for_connection(connection.id)
                .with_detail(
                    "port",
                    connection
                        .port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                )
                .with_remediation(
                    "Route this traffic through the industrial DMZ or a firewall conduit",
                ),
            ));
        }

        if connection.metadata.is_industrial && !connection.is_secure {
            let protocol = connection
                .metadata
                .industrial_protocol
                .as_deref()
                .unwrap_or("industrial protocol");
            events.push(CorrelationEvent::AlertRaised(
                Alert::new(
                    AlertType::InsecureProtocol,
                    AlertSeverity::Medium,
                    format!("Unencrypted {protocol} traffic"),
                    format!(
                        "{} → {} carries {protocol} without transport security",
                        source.name, target.name
                    ),
                    now,
                )
                .for_connection(connection.id),
            ));
        }
        events
    }
}

fn fill_empty(field: &mut Option<String>, value: &Option<String>) {
    if field.is_none() {
        if let Some(value) = value {
            *field = Some(value.clone());
        }
    }
}

fn ip_protocol_name(protocol: u8) -> String {
    match protocol {
        1 => "ICMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        other => other.to_string(),
    }
}

fn host_of_endpoint(endpoint: &str) -> Option<Ipv4Addr> {
    let authority = endpoint.strip_prefix("opc.tcp://")?.split('/').next()?;
    let host = authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority);
    host.parse().ok()
}

/// sysDescr-based device-type hints.
fn infer_type_from_descr(descr: &str) -> Option<DeviceType> {
    let lower = descr.to_lowercase();
    if lower.contains("simatic") || lower.contains("s7-") || lower.contains("controllogix")
        || lower.contains("compactlogix") || lower.contains("modicon")
    {
        Some(DeviceType::Plc)
    } else if lower.contains("rtu") {
        Some(DeviceType::Rtu)
    } else if lower.contains("firewall") || lower.contains("asa") || lower.contains("fortigate") {
        Some(DeviceType::Firewall)
    } else if lower.contains("switch") || lower.contains("catalyst") {
        Some(DeviceType::Switch)
    } else if lower.contains("router") {
        Some(DeviceType::Router)
    } else {
        None
    }
}

fn infer_vendor_from_descr(descr: &str) -> Option<String> {
    let lower = descr.to_lowercase();
    for vendor in [
        "Siemens",
        "Rockwell",
        "Allen-Bradley",
        "Schneider",
        "Honeywell",
        "Yokogawa",
        "Emerson",
        "Cisco",
        "Moxa",
        "Hirschmann",
    ] {
        if lower.contains(&vendor.to_lowercase()) {
            return Some(vendor.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassifierRules, PurdueClassifier};
    use mk_model::{
        ArpEntryType, NetflowPayload, PurdueLevel, SecurityZone, SnmpInterface, SnmpSystemInfo,
        SyslogMessage,
    };

    fn engine() -> CorrelationEngine {
        CorrelationEngine::new(
            PurdueClassifier::new(ClassifierRules::defaults()),
            vec![],
            1000,
        )
    }

    fn snmp_plc_record() -> TelemetryRecord {
        let target: Ipv4Addr = "10.0.1.50".parse().unwrap();
        let payload = SnmpPayload {
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
                phys_address: Some("28:63:36:AA:BB:CC".parse().unwrap()),
                admin_status: Some(1),
                oper_status: Some(1),
                in_octets: None,
                out_octets: None,
            }],
            ip_addresses: vec![mk_model::SnmpIpEntry {
                addr: target,
                netmask: Some("255.255.255.0".parse().unwrap()),
                if_index: Some(1),
            }],
            ..SnmpPayload::empty(target)
        };
        TelemetryRecord::new(TelemetryPayload::Snmp(payload), Utc::now())
    }

    fn created_device(events: &[CorrelationEvent]) -> Device {
        events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::DeviceCreated(d) => Some(d.clone()),
                _ => None,
            })
            .expect("a device should be created")
    }

    #[test]
    fn test_snmp_discovers_plc() {
        let mut engine = engine();
        let events = engine.process(&snmp_plc_record());

        let device = created_device(&events);
        assert_eq!(device.device_type, DeviceType::Plc);
        assert_eq!(device.purdue_level, PurdueLevel::Level1);
        assert_eq!(device.security_zone, SecurityZone::Control);
        assert_eq!(device.vendor.as_deref(), Some("Siemens"));
        assert_eq!(device.interfaces.len(), 1);
        assert_eq!(device.interfaces[0].mac.to_string(), "28:63:36:aa:bb:cc");
        assert_eq!(device.location.as_deref(), Some("Plant-A/Line-1"));

        let new_device_alerts: Vec<&Alert> = events
            .iter()
            .filter_map(|e| match e {
                CorrelationEvent::AlertRaised(a) if a.alert_type == AlertType::NewDevice => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(new_device_alerts.len(), 1);
        assert_eq!(new_device_alerts[0].severity, AlertSeverity::Info);
    }

    #[test]
    fn test_duplicate_snmp_poll_is_idempotent() {
        let mut engine = engine();
        let first = snmp_plc_record();
        engine.process(&first);
        let count_after_first = engine.device_count();
        let first_seen = engine
            .find_by_hostname("plc-line1")
            .unwrap()
            .last_seen_at;

        let mut second = snmp_plc_record();
        second.timestamp = first.timestamp + Duration::seconds(10);
        let events = engine.process(&second);

        assert_eq!(engine.device_count(), count_after_first);
        let device = engine.find_by_hostname("plc-line1").unwrap();
        assert!(device.last_seen_at > first_seen);
        assert!(
            !events.iter().any(|e| matches!(
                e,
                CorrelationEvent::AlertRaised(a) if a.alert_type == AlertType::NewDevice
            )),
            "no duplicate new_device alert"
        );
        // No other device shares the MAC.
        let mac: MacAddr = "28:63:36:aa:bb:cc".parse().unwrap();
        let holders = engine
            .devices()
            .filter(|d| d.interface_by_mac(&mac).is_some())
            .count();
        assert_eq!(holders, 1);
    }

    #[test]
    fn test_arp_then_snmp_merges_nothing_but_enriches() {
        let mut engine = engine();
        // ARP sees the MAC+IP first.
        let arp = TelemetryRecord::new(
            TelemetryPayload::Arp(mk_model::ArpPayload {
                entries: vec![ArpEntry {
                    ip: "10.0.1.50".parse().unwrap(),
                    mac: "28:63:36:aa:bb:cc".parse().unwrap(),
                    interface: Some("eth0".to_string()),
                    vlan: None,
                    entry_type: ArpEntryType::Dynamic,
                    age_seconds: None,
                }],
            }),
            Utc::now(),
        );
        engine.process(&arp);
        assert_eq!(engine.device_count(), 1);

        // SNMP resolves the same device by MAC and enriches it.
        engine.process(&snmp_plc_record());
        assert_eq!(engine.device_count(), 1);
        let device = engine.find_by_hostname("plc-line1").unwrap();
        assert_eq!(device.device_type, DeviceType::Plc);
        assert_eq!(device.vendor.as_deref(), Some("Siemens"));
    }

    #[test]
    fn test_weaker_source_never_overwrites() {
        let mut engine = engine();
        engine.process(&snmp_plc_record());

        // An ARP observation of the same MAC must not clobber identity.
        let arp = TelemetryRecord::new(
            TelemetryPayload::Arp(mk_model::ArpPayload {
                entries: vec![ArpEntry {
                    ip: "10.0.1.50".parse().unwrap(),
                    mac: "28:63:36:aa:bb:cc".parse().unwrap(),
                    interface: Some("eth9".to_string()),
                    vlan: None,
                    entry_type: ArpEntryType::Dynamic,
                    age_seconds: None,
                }],
            }),
            Utc::now(),
        );
        engine.process(&arp);

        let device = engine.find_by_hostname("plc-line1").unwrap();
        assert_eq!(device.vendor.as_deref(), Some("Siemens"));
        assert_eq!(device.device_type, DeviceType::Plc);
    }

    #[test]
    fn test_multiple_candidates_merge_oldest_into_newest() {
        let mut engine = engine();
        let t0 = Utc::now();

        // Device A known by MAC only.
        let mac_only = TelemetryRecord {
            timestamp: t0,
            ..TelemetryRecord::new(
                TelemetryPayload::MacTable(mk_model::MacTablePayload {
                    entries: vec![mk_model::BridgeMacEntry {
                        mac: "28:63:36:aa:bb:cc".parse().unwrap(),
                        port: Some(4),
                    }],
                }),
                t0,
            )
        };
        engine.process(&mac_only);

        // Device B known by IP only (via a modbus poll).
        let modbus = TelemetryRecord::new(
            TelemetryPayload::Modbus(mk_model::ModbusPayload {
                target: "10.0.1.50".parse().unwrap(),
                unit_id: 1,
                readings: vec![],
            }),
            t0 + Duration::seconds(5),
        );
        engine.process(&modbus);
        assert_eq!(engine.device_count(), 2);

        // SNMP observes both identities at once → merge.
        let mut record = snmp_plc_record();
        record.timestamp = t0 + Duration::seconds(20);
        let events = engine.process(&record);

        assert_eq!(engine.device_count(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, CorrelationEvent::DevicesMerged { .. })));
        // Cache repointed: the IP resolves to the surviving device.
        let survivor = engine.find_by_ip("10.0.1.50".parse().unwrap()).unwrap();
        assert!(survivor.interface_by_mac(&"28:63:36:aa:bb:cc".parse().unwrap()).is_some());
    }

    fn two_zone_setup(engine: &mut CorrelationEngine) -> (Uuid, Uuid) {
        // Device A: PLC at L1 (control), 10.0.1.50.
        engine.process(&snmp_plc_record());
        // Device B: enterprise box at 172.16.1.10.
        let arp = TelemetryRecord::new(
            TelemetryPayload::Arp(mk_model::ArpPayload {
                entries: vec![ArpEntry {
                    ip: "172.16.1.10".parse().unwrap(),
                    mac: "02:aa:bb:00:00:01".parse().unwrap(),
                    interface: None,
                    vlan: None,
                    entry_type: ArpEntryType::Dynamic,
                    age_seconds: None,
                }],
            }),
            Utc::now(),
        );
        engine.process(&arp);
        let a = engine.find_by_ip("10.0.1.50".parse().unwrap()).unwrap().id;
        let b = engine.find_by_ip("172.16.1.10".parse().unwrap()).unwrap().id;
        (a, b)
    }

    fn flow(src: &str, sport: u16, dst: &str, dport: u16, bytes: u64) -> TelemetryRecord {
        TelemetryRecord::new(
            TelemetryPayload::Netflow(NetflowPayload {
                flows: vec![FlowRecord {
                    src_ip: src.parse().unwrap(),
                    dst_ip: dst.parse().unwrap(),
                    src_port: Port::new(sport as u32).unwrap(),
                    dst_port: Port::new(dport as u32).unwrap(),
                    protocol: 6,
                    bytes,
                    packets: 10,
                    start: Utc::now(),
                    end: Utc::now(),
                    tcp_flags: None,
                    tos: None,
                    is_industrial: mk_parsers_port_is_industrial(dport),
                    industrial_protocol: industrial_name(dport),
                }],
            }),
            Utc::now(),
        )
    }

    // Local stand-ins for the parser's port table (the engine receives
    // flows already annotated).
    fn mk_parsers_port_is_industrial(port: u16) -> bool {
        port == 502
    }

    fn industrial_name(port: u16) -> Option<String> {
        (port == 502).then(|| "Modbus".to_string())
    }

    #[test]
    fn test_cross_zone_flow_raises_high_alert() {
        let mut engine = engine();
        let (a, b) = two_zone_setup(&mut engine);

        let zone_a = engine.device(a).unwrap().security_zone;
        let zone_b = engine.device(b).unwrap().security_zone;
        assert_eq!(zone_a, SecurityZone::Control);
        assert_eq!(zone_b, SecurityZone::Enterprise);

        let events = engine.process(&flow("10.0.1.50", 5000, "172.16.1.10", 80, 1200));

        let connection = events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::ConnectionUpserted { connection, created: true } => {
                    Some(connection.clone())
                }
                _ => None,
            })
            .expect("connection created");
        assert_eq!(connection.source_device_id, a);
        assert_eq!(connection.target_device_id, b);
        assert_eq!(connection.protocol.as_deref(), Some("TCP"));
        assert_eq!(connection.port.map(|p| p.get()), Some(80));
        assert!(!connection.is_secure);

        let cross = events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::AlertRaised(a)
                    if a.alert_type == AlertType::CrossZoneConnection =>
                {
                    Some(a.clone())
                }
                _ => None,
            })
            .expect("cross-zone alert");
        assert_eq!(cross.severity, AlertSeverity::High);
    }

    #[test]
    fn test_industrial_protocol_detection_on_connection() {
        let mut engine = engine();
        // Two control-zone devices.
        engine.process(&snmp_plc_record());
        let arp = TelemetryRecord::new(
            TelemetryPayload::Arp(mk_model::ArpPayload {
                entries: vec![ArpEntry {
                    ip: "10.0.1.60".parse().unwrap(),
                    mac: "28:63:36:aa:bb:dd".parse().unwrap(),
                    interface: None,
                    vlan: None,
                    entry_type: ArpEntryType::Dynamic,
                    age_seconds: None,
                }],
            }),
            Utc::now(),
        );
        engine.process(&arp);

        let events = engine.process(&flow("10.0.1.60", 49152, "10.0.1.50", 502, 300));
        let connection = events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::ConnectionUpserted { connection, created: true } => {
                    Some(connection.clone())
                }
                _ => None,
            })
            .expect("connection created");
        assert!(connection.metadata.is_industrial);
        assert_eq!(
            connection.metadata.industrial_protocol.as_deref(),
            Some("Modbus")
        );
        assert!(!connection.is_secure);
        assert!(events.iter().any(|e| matches!(
            e,
            CorrelationEvent::AlertRaised(a) if a.alert_type == AlertType::InsecureProtocol
        )));
    }

    #[test]
    fn test_flow_totals_accumulate_on_upsert() {
        let mut engine = engine();
        two_zone_setup(&mut engine);

        engine.process(&flow("10.0.1.50", 5000, "172.16.1.10", 80, 1200));
        let events = engine.process(&flow("10.0.1.50", 5001, "172.16.1.10", 80, 800));
        let connection = events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::ConnectionUpserted { connection, created: false } => {
                    Some(connection.clone())
                }
                _ => None,
            })
            .expect("existing edge updated");
        assert_eq!(connection.metadata.bytes, 2000);
        assert_eq!(engine.connection_count(), 1);
    }

    #[test]
    fn test_self_flows_ignored() {
        let mut engine = engine();
        engine.process(&snmp_plc_record());
        let events = engine.process(&flow("10.0.1.50", 5000, "10.0.1.50", 80, 100));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CorrelationEvent::ConnectionUpserted { .. })));
    }

    #[test]
    fn test_flows_never_create_devices() {
        let mut engine = engine();
        let events = engine.process(&flow("10.9.9.1", 1000, "10.9.9.2", 80, 100));
        assert!(events.is_empty());
        assert_eq!(engine.device_count(), 0);
    }

    #[test]
    fn test_syslog_security_event_resolves_hostname() {
        let mut engine = engine();
        engine.process(&snmp_plc_record());

        let record = TelemetryRecord::new(
            TelemetryPayload::Syslog(SyslogPayload {
                message: SyslogMessage {
                    facility: 4,
                    severity: 2,
                    timestamp: Utc::now(),
                    hostname: Some("plc-line1".to_string()),
                    app_name: Some("sshd".to_string()),
                    proc_id: None,
                    msg_id: None,
                    message: "unauthorized access denied for user operator".to_string(),
                    structured_data: Default::default(),
                },
                security_event: true,
            }),
            Utc::now(),
        );
        let events = engine.process(&record);
        let alert = events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::AlertRaised(a)
                    if a.alert_type == AlertType::SecurityViolation =>
                {
                    Some(a.clone())
                }
                _ => None,
            })
            .expect("security violation alert");
        assert_eq!(alert.severity, AlertSeverity::High);
        assert!(alert.device_id.is_some());
    }

    #[test]
    fn test_syslog_unknown_host_alert_without_device() {
        let mut engine = engine();
        let record = TelemetryRecord::new(
            TelemetryPayload::Syslog(SyslogPayload {
                message: SyslogMessage {
                    facility: 4,
                    severity: 1,
                    timestamp: Utc::now(),
                    hostname: Some("ghost".to_string()),
                    app_name: None,
                    proc_id: None,
                    msg_id: None,
                    message: "attack detected".to_string(),
                    structured_data: Default::default(),
                },
                security_event: true,
            }),
            Utc::now(),
        );
        let events = engine.process(&record);
        let alert = events
            .iter()
            .find_map(|e| match e {
                CorrelationEvent::AlertRaised(a) => Some(a.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert!(alert.device_id.is_none());
    }

    #[test]
    fn test_offline_sweep_transitions_once() {
        let mut engine = engine();
        engine.process(&snmp_plc_record());

        let later = Utc::now() + Duration::hours(2);
        let events = engine.sweep_offline(later, Duration::minutes(30));
        assert!(events.iter().any(|e| matches!(
            e,
            CorrelationEvent::AlertRaised(a) if a.alert_type == AlertType::DeviceOffline
        )));

        // A second sweep raises nothing new.
        let again = engine.sweep_offline(later + Duration::minutes(5), Duration::minutes(30));
        assert!(again.is_empty());
    }

    #[test]
    fn test_no_two_devices_share_a_mac() {
        let mut engine = engine();
        engine.process(&snmp_plc_record());
        engine.process(&snmp_plc_record());
        let mac: MacAddr = "28:63:36:aa:bb:cc".parse().unwrap();
        let holders = engine
            .devices()
            .filter(|d| d.interface_by_mac(&mac).is_some())
            .count();
        assert_eq!(holders, 1);
    }
}
