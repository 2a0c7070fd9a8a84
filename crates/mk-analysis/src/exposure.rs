//! Zone-exposure analysis over the connection graph.
//!
//! A control-level device that can reach the enterprise zone without
//! passing through an authorized conduit (firewall, gateway, data
//! diode) is exposed. Conduit devices are removed from the graph before
//! the reachability sweep, so paths through them do not count.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use uuid::Uuid;

use mk_model::{Connection, Device, SecurityZone};

/// Devices with a conduit-free path to any enterprise-zone device.
pub fn enterprise_reachable(devices: &[Device], connections: &[Connection]) -> HashSet<Uuid> {
    let mut graph: UnGraph<Uuid, ()> = UnGraph::new_undirected();
    let mut nodes: HashMap<Uuid, NodeIndex> = HashMap::new();

    for device in devices {
        if device.device_type.is_boundary_conduit() {
            continue;
        }
        nodes.insert(device.id, graph.add_node(device.id));
    }
    for connection in connections {
        let (Some(&a), Some(&b)) = (
            nodes.get(&connection.source_device_id),
            nodes.get(&connection.target_device_id),
        ) else {
            continue; // an endpoint is a conduit (or unknown): path broken
        };
        graph.update_edge(a, b, ());
    }

    let seeds: Vec<NodeIndex> = devices
        .iter()
        .filter(|d| d.security_zone == SecurityZone::Enterprise)
        .filter_map(|d| nodes.get(&d.id).copied())
        .collect();

    let mut reachable = HashSet::new();
    let mut stack = seeds.clone();
    let mut visited: HashSet<NodeIndex> = seeds.iter().copied().collect();
    while let Some(node) = stack.pop() {
        reachable.insert(graph[node]);
        for neighbor in graph.neighbors(node) {
            if visited.insert(neighbor) {
                stack.push(neighbor);
            }
        }
    }
    reachable
}

/// Count of connections into `device` originating from a zone with a
/// higher trust number (traffic descending into more sensitive zones).
pub fn higher_trust_ingress(
    device: &Device,
    devices: &[Device],
    connections: &[Connection],
) -> usize {
    let zones: HashMap<Uuid, SecurityZone> =
        devices.iter().map(|d| (d.id, d.security_zone)).collect();
    connections
        .iter()
        .filter(|c| c.target_device_id == device.id)
        .filter(|c| {
            zones
                .get(&c.source_device_id)
                .is_some_and(|z| z.trust_level() > device.security_zone.trust_level())
        })
        .count()
}
