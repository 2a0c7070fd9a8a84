//! Point-in-time topology snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection::Connection;
use crate::device::Device;
use crate::telemetry::TelemetrySource;
use crate::zone::ZoneDefinition;

/// Counts and provenance for a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub device_count: usize,
    pub connection_count: usize,
    pub zone_count: usize,
    pub collection_duration_ms: u64,
    pub sources: Vec<TelemetrySource>,
}

/// A consistent read of the topology at a single logical instant.
/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<Device>,
    pub connections: Vec<Connection>,
    pub zones: Vec<ZoneDefinition>,
    pub summary: SnapshotSummary,
}

impl TopologySnapshot {
    pub fn new(
        devices: Vec<Device>,
        connections: Vec<Connection>,
        zones: Vec<ZoneDefinition>,
        collection_duration_ms: u64,
        sources: Vec<TelemetrySource>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let summary = SnapshotSummary {
            device_count: devices.len(),
            connection_count: connections.len(),
            zone_count: zones.len(),
            collection_duration_ms,
            sources,
        };
        TopologySnapshot {
            id: Uuid::new_v4(),
            timestamp,
            devices,
            connections,
            zones,
            summary,
        }
    }

    /// Consistency check: every connection endpoint must exist in
    /// `devices`. A snapshot violating this was not captured atomically.
    pub fn is_consistent(&self) -> bool {
        self.connections.iter().all(|c| {
            self.devices.iter().any(|d| d.id == c.source_device_id)
                && self.devices.iter().any(|d| d.id == c.target_device_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionType;
    use crate::device::Device;

    #[test]
    fn test_snapshot_consistency() {
        let now = Utc::now();
        let a = Device::new("a", now);
        let b = Device::new("b", now);
        let conn = Connection::new(a.id, b.id, ConnectionType::Ethernet, now);

        let good = TopologySnapshot::new(
            vec![a.clone(), b.clone()],
            vec![conn.clone()],
            vec![],
            10,
            vec![TelemetrySource::Netflow],
            now,
        );
        assert!(good.is_consistent());
        assert_eq!(good.summary.device_count, 2);
        assert_eq!(good.summary.connection_count, 1);

        let bad = TopologySnapshot::new(vec![a], vec![conn], vec![], 10, vec![], now);
        assert!(!bad.is_consistent());
    }
}
