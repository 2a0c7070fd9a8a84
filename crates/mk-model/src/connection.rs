//! Directed connections between devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::{Port, VlanId};

/// Physical or logical link technology of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Ethernet,
    Serial,
    Modbus,
    Profinet,
    Profibus,
    Fieldbus,
    Wireless,
    Fiber,
    Unknown,
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::Unknown
    }
}

/// Traffic counters and protocol flags accumulated on a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    pub bytes: u64,
    pub packets: u64,
    pub is_industrial: bool,
    pub industrial_protocol: Option<String>,
}

/// A directed edge between two devices.
///
/// Invariant: `source_device_id != target_device_id`, and both ids refer
/// to existing devices. The correlation engine enforces this at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub source_device_id: Uuid,
    pub target_device_id: Uuid,
    pub connection_type: ConnectionType,
    pub protocol: Option<String>,
    pub port: Option<Port>,
    pub vlan: Option<VlanId>,
    /// Nominal bandwidth in bits per second, if known.
    pub bandwidth_bps: Option<u64>,
    pub latency_ms: Option<f64>,
    pub is_secure: bool,
    pub encryption: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub metadata: ConnectionMetadata,
}

impl Connection {
    pub fn new(
        source_device_id: Uuid,
        target_device_id: Uuid,
        connection_type: ConnectionType,
        now: DateTime<Utc>,
    ) -> Self {
        Connection {
            id: Uuid::new_v4(),
            source_device_id,
            target_device_id,
            connection_type,
            protocol: None,
            port: None,
            vlan: None,
            bandwidth_bps: None,
            latency_ms: None,
            is_secure: false,
            encryption: None,
            first_seen_at: now,
            last_seen_at: now,
            metadata: ConnectionMetadata::default(),
        }
    }

    /// Fold another observation of the same edge into this connection:
    /// counters accumulate, the seen range extends.
    pub fn absorb(&mut self, bytes: u64, packets: u64, seen_at: DateTime<Utc>) {
        self.metadata.bytes += bytes;
        self.metadata.packets += packets;
        if seen_at > self.last_seen_at {
            self.last_seen_at = seen_at;
        }
        if seen_at < self.first_seen_at {
            self.first_seen_at = seen_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_accumulates_and_extends() {
        let now = Utc::now();
        let mut conn = Connection::new(Uuid::new_v4(), Uuid::new_v4(), ConnectionType::Ethernet, now);
        conn.absorb(1200, 10, now + chrono::Duration::seconds(30));
        conn.absorb(800, 5, now - chrono::Duration::seconds(5));

        assert_eq!(conn.metadata.bytes, 2000);
        assert_eq!(conn.metadata.packets, 15);
        assert_eq!(conn.first_seen_at, now - chrono::Duration::seconds(5));
        assert_eq!(conn.last_seen_at, now + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_connection_json_round_trip() {
        let mut conn = Connection::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ConnectionType::Modbus,
            Utc::now(),
        );
        conn.port = Some(Port::new(502).unwrap());
        conn.protocol = Some("TCP".to_string());
        conn.metadata.is_industrial = true;
        conn.metadata.industrial_protocol = Some("Modbus".to_string());

        let json = serde_json::to_string(&conn).unwrap();
        let back: Connection = serde_json::from_str(&json).unwrap();
        assert_eq!(conn, back);
    }
}
