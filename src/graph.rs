use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::flow::{
    categorize, extract_port, protocol_carries_ports, protocol_name, TrafficClass,
};
use crate::identity::{normalize_address, resolve, AddressMap, Device, IdentityKind, LogicalIdentity};
use crate::ingest::TrafficFlowRecord;

/// The deduplicated topology: one node per logical identity, one edge per
/// ordered (source, target) identity pair. Built fresh from a complete
/// batch; never patched incrementally.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub nodes: IndexMap<String, GraphNode>,
    pub edges: IndexMap<EdgeKey, GraphEdge>,
    /// Flow records dropped for missing required fields.
    pub skipped_records: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GraphNode {
    pub id: String,
    pub kind: IdentityKind,
    /// Addresses that resolved to this identity. Never empty.
    pub addresses: Vec<String>,
    /// Display tags: address-range category plus device metadata. Add-only.
    pub tags: Vec<String>,
    pub user: Option<String>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Distinct edges touching this node. Finalized after all edges are
    /// folded (two-pass).
    pub connections: u32,
    pub protocols: Vec<String>,
    pub inbound_ports: Vec<u16>,
    pub outbound_ports: Vec<u16>,
}

impl GraphNode {
    fn new(identity: &LogicalIdentity) -> Self {
        Self {
            id: identity.name.clone(),
            kind: identity.kind,
            addresses: Vec::new(),
            tags: Vec::new(),
            user: identity.user.clone(),
            tx_bytes: 0,
            rx_bytes: 0,
            connections: 0,
            protocols: Vec::new(),
            inbound_ports: Vec::new(),
            outbound_ports: Vec::new(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.tx_bytes + self.rx_bytes
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_pkts: u64,
    pub rx_pkts: u64,
    /// Protocol label of the first flow observed for this pair.
    pub protocol: String,
    /// Traffic class of the first flow observed for this pair.
    pub class: TrafficClass,
}

impl Graph {
    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn get_edge(&self, source: &str, target: &str) -> Option<&GraphEdge> {
        self.edges.get(&EdgeKey {
            source: source.to_string(),
            target: target.to_string(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn stats(&self) -> String {
        format!(
            "Nodes: {}, Edges: {}, Skipped records: {}",
            self.nodes.len(),
            self.edges.len(),
            self.skipped_records
        )
    }

    pub fn verify_graph_integrity(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for key in self.edges.keys() {
            if !self.nodes.contains_key(&key.source) {
                errors.push(format!(
                    "Edge [{} -> {}] source not found in nodes",
                    key.source, key.target
                ));
            }
            if !self.nodes.contains_key(&key.target) {
                errors.push(format!(
                    "Edge [{} -> {}] target not found in nodes",
                    key.source, key.target
                ));
            }
        }

        for (id, node) in &self.nodes {
            if node.addresses.is_empty() {
                errors.push(format!("Node id:[{}] has an empty address set", id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            warn!("Graph integrity check found {} problems", errors.len());
            Err(errors)
        }
    }
}

fn push_unique<T: PartialEq>(values: &mut Vec<T>, value: T) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Upsert the node for an identity: union in the resolved address, the
/// address-range tag, and any device metadata tags.
fn upsert_node(nodes: &mut IndexMap<String, GraphNode>, identity: &LogicalIdentity, ip: &str) {
    let node = nodes
        .entry(identity.name.clone())
        .or_insert_with(|| GraphNode::new(identity));
    push_unique(&mut node.addresses, ip.to_string());
    push_unique(&mut node.tags, categorize(ip).to_string());
    for tag in &identity.tags {
        push_unique(&mut node.tags, tag.clone());
    }
    if node.user.is_none() {
        node.user = identity.user.clone();
    }
}

/// Fold a batch of flow records into a topology graph.
///
/// Pure with respect to its inputs: the same batch always produces the
/// same node and edge maps. Malformed records are skipped and counted,
/// never fatal.
pub fn build(
    records: &[TrafficFlowRecord],
    devices: &[Device],
    services: &AddressMap,
    static_records: &AddressMap,
) -> Graph {
    let mut graph = Graph::default();

    for record in records {
        let (Some(src_raw), Some(dst_raw)) =
            (record.flow.src.as_deref(), record.flow.dst.as_deref())
        else {
            graph.skipped_records += 1;
            continue;
        };
        if src_raw.is_empty() || dst_raw.is_empty() {
            graph.skipped_records += 1;
            continue;
        }

        let src_identity = resolve(src_raw, devices, services, static_records);
        let dst_identity = resolve(dst_raw, devices, services, static_records);
        let src_ip = normalize_address(src_raw);
        let dst_ip = normalize_address(dst_raw);

        upsert_node(&mut graph.nodes, &src_identity, &src_ip);
        upsert_node(&mut graph.nodes, &dst_identity, &dst_ip);

        let proto_label = protocol_name(record.flow.proto);

        // Source-perspective counters.
        {
            let node = graph.nodes.get_mut(&src_identity.name).expect("upserted");
            node.tx_bytes += record.flow.tx_bytes;
            node.rx_bytes += record.flow.rx_bytes;
            push_unique(&mut node.protocols, proto_label.clone());
            if protocol_carries_ports(record.flow.proto) {
                if let Some(port) = extract_port(src_raw) {
                    push_unique(&mut node.outbound_ports, port);
                }
            }
        }

        // Destination-perspective counters, mirrored: what the source sent
        // is what the destination received, and vice versa.
        {
            let node = graph.nodes.get_mut(&dst_identity.name).expect("upserted");
            node.tx_bytes += record.flow.rx_bytes;
            node.rx_bytes += record.flow.tx_bytes;
            push_unique(&mut node.protocols, proto_label.clone());
            if protocol_carries_ports(record.flow.proto) {
                if let Some(port) = extract_port(dst_raw) {
                    push_unique(&mut node.inbound_ports, port);
                }
            }
        }

        let key = EdgeKey {
            source: src_identity.name.clone(),
            target: dst_identity.name.clone(),
        };
        let edge = graph.edges.entry(key).or_insert_with(|| GraphEdge {
            source: src_identity.name.clone(),
            target: dst_identity.name.clone(),
            tx_bytes: 0,
            rx_bytes: 0,
            tx_pkts: 0,
            rx_pkts: 0,
            protocol: proto_label,
            class: record.class,
        });
        edge.tx_bytes += record.flow.tx_bytes;
        edge.rx_bytes += record.flow.rx_bytes;
        edge.tx_pkts += record.flow.tx_pkts;
        edge.rx_pkts += record.flow.rx_pkts;
    }

    // Second pass: connection counts. Each distinct edge increments each
    // distinct endpoint once; a self-edge touches one endpoint, not two.
    for key in graph.edges.keys() {
        let mut touched: HashSet<&str> = HashSet::new();
        touched.insert(&key.source);
        touched.insert(&key.target);
        for id in touched {
            if let Some(node) = graph.nodes.get_mut(id) {
                node.connections += 1;
            }
        }
    }

    debug!("Built topology graph: {}", graph.stats());
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawFlow;

    fn flow(src: &str, dst: &str, proto: i64, tx: u64, rx: u64) -> TrafficFlowRecord {
        TrafficFlowRecord {
            class: TrafficClass::VirtualMesh,
            flow: RawFlow {
                proto,
                src: Some(src.to_string()),
                dst: Some(dst.to_string()),
                tx_bytes: tx,
                rx_bytes: rx,
                tx_pkts: tx / 10,
                rx_pkts: rx / 10,
            },
        }
    }

    fn empty_lookups() -> (Vec<Device>, AddressMap, AddressMap) {
        (Vec::new(), AddressMap::new(), AddressMap::new())
    }

    #[test]
    fn test_two_flows_fold_into_one_edge() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![
            flow("100.64.0.1:80", "100.64.0.2:443", 6, 100, 50),
            flow("100.64.0.1:81", "100.64.0.2:444", 6, 200, 25),
        ];
        let graph = build(&records, &devices, &services, &statics);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);

        let edge = graph.get_edge("100.64.0.1", "100.64.0.2").unwrap();
        assert_eq!(edge.tx_bytes, 300);
        assert_eq!(edge.rx_bytes, 75);

        let src = graph.get_node("100.64.0.1").unwrap();
        assert_eq!(src.outbound_ports, vec![80, 81]);
        assert!(src.inbound_ports.is_empty());
        let dst = graph.get_node("100.64.0.2").unwrap();
        assert_eq!(dst.inbound_ports, vec![443, 444]);
        assert!(dst.outbound_ports.is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![
            flow("100.64.0.1", "100.64.0.2", 6, 10, 5),
            flow("100.64.0.3", "100.64.0.1", 17, 7, 2),
            flow("100.64.0.2", "100.64.0.3", 1, 1, 1),
        ];
        let a = build(&records, &devices, &services, &statics);
        let b = build(&records, &devices, &services, &statics);

        let ids_a: Vec<&String> = a.nodes.keys().collect();
        let ids_b: Vec<&String> = b.nodes.keys().collect();
        assert_eq!(ids_a, ids_b);
        let keys_a: Vec<&EdgeKey> = a.edges.keys().collect();
        let keys_b: Vec<&EdgeKey> = b.edges.keys().collect();
        assert_eq!(keys_a, keys_b);
        for (id, node) in &a.nodes {
            let other = b.get_node(id).unwrap();
            assert_eq!(node.tx_bytes, other.tx_bytes);
            assert_eq!(node.rx_bytes, other.rx_bytes);
            assert_eq!(node.connections, other.connections);
        }
    }

    #[test]
    fn test_total_bytes_is_tx_plus_rx_on_both_ends() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![flow("100.64.0.1", "100.64.0.2", 6, 100, 40)];
        let graph = build(&records, &devices, &services, &statics);

        let src = graph.get_node("100.64.0.1").unwrap();
        assert_eq!(src.tx_bytes, 100);
        assert_eq!(src.rx_bytes, 40);
        assert_eq!(src.total_bytes(), 140);

        let dst = graph.get_node("100.64.0.2").unwrap();
        assert_eq!(dst.tx_bytes, 40);
        assert_eq!(dst.rx_bytes, 100);
        assert_eq!(dst.total_bytes(), 140);
    }

    #[test]
    fn test_self_edge_counts_one_connection() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![flow("100.64.0.1", "100.64.0.1", 6, 10, 10)];
        let graph = build(&records, &devices, &services, &statics);

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 1);
        let node = graph.get_node("100.64.0.1").unwrap();
        assert_eq!(node.connections, 1);
    }

    #[test]
    fn test_malformed_records_are_skipped_not_fatal() {
        let (devices, services, statics) = empty_lookups();
        let mut bad = flow("100.64.0.1", "100.64.0.2", 6, 1, 1);
        bad.flow.dst = None;
        let mut empty = flow("100.64.0.1", "100.64.0.2", 6, 1, 1);
        empty.flow.src = Some(String::new());
        let records = vec![bad, empty, flow("100.64.0.1", "100.64.0.2", 6, 5, 5)];

        let graph = build(&records, &devices, &services, &statics);
        assert_eq!(graph.skipped_records, 2);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_ports_only_tracked_for_tcp_udp() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![flow("100.64.0.1:1234", "100.64.0.2:5678", 1, 1, 1)];
        let graph = build(&records, &devices, &services, &statics);

        let src = graph.get_node("100.64.0.1").unwrap();
        assert!(src.outbound_ports.is_empty());
        let dst = graph.get_node("100.64.0.2").unwrap();
        assert!(dst.inbound_ports.is_empty());
    }

    #[test]
    fn test_edge_protocol_and_class_are_first_seen() {
        let (devices, services, statics) = empty_lookups();
        let mut second = flow("100.64.0.1", "100.64.0.2", 17, 1, 1);
        second.class = TrafficClass::Physical;
        let records = vec![flow("100.64.0.1", "100.64.0.2", 6, 1, 1), second];
        let graph = build(&records, &devices, &services, &statics);

        let edge = graph.get_edge("100.64.0.1", "100.64.0.2").unwrap();
        assert_eq!(edge.protocol, "TCP");
        assert_eq!(edge.class, TrafficClass::VirtualMesh);
    }

    #[test]
    fn test_service_address_resolves_to_service_name() {
        let mut services = AddressMap::new();
        services.insert(
            "svc:ingress".to_string(),
            crate::identity::AddressSet {
                addrs: vec!["100.100.10.10".to_string()],
            },
        );
        let records = vec![flow("100.64.0.1", "100.100.10.10:443", 6, 1, 1)];
        let graph = build(&records, &[], &services, &AddressMap::new());

        let node = graph.get_node("ingress").unwrap();
        assert_eq!(node.kind, IdentityKind::Service);
        assert!(graph.get_node("100.100.10.10").is_none());
    }

    #[test]
    fn test_device_tags_merge_with_category_tags() {
        let devices = vec![Device {
            id: "d1".to_string(),
            name: "laptop".to_string(),
            addresses: vec!["100.64.0.1".to_string()],
            tags: vec!["tag:dev".to_string()],
            user: Some("alice".to_string()),
        }];
        let records = vec![flow("100.64.0.1", "8.8.8.8", 6, 1, 1)];
        let graph = build(&records, &devices, &AddressMap::new(), &AddressMap::new());

        let node = graph.get_node("laptop").unwrap();
        assert!(node.tags.contains(&"mesh".to_string()));
        assert!(node.tags.contains(&"tag:dev".to_string()));
        assert_eq!(node.user.as_deref(), Some("alice"));

        let public = graph.get_node("8.8.8.8").unwrap();
        assert!(public.tags.contains(&"public".to_string()));
    }

    #[test]
    fn test_edge_keys_are_ordered_pairs() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![
            flow("100.64.0.1", "100.64.0.2", 6, 1, 1),
            flow("100.64.0.2", "100.64.0.1", 6, 1, 1),
        ];
        let graph = build(&records, &devices, &services, &statics);
        // Opposite directions are distinct edges.
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_ipv4_and_ipv6_addresses_union_on_one_device() {
        let devices = vec![Device {
            id: "d1".to_string(),
            name: "laptop".to_string(),
            addresses: vec![
                "100.64.0.1".to_string(),
                "fd7a:115c:a1e0::1".to_string(),
            ],
            tags: Vec::new(),
            user: None,
        }];
        let records = vec![
            flow("100.64.0.1", "8.8.8.8", 6, 1, 1),
            flow("[FD7A:115C:A1E0::1]:22", "8.8.8.8", 6, 1, 1),
        ];
        let graph = build(&records, &devices, &AddressMap::new(), &AddressMap::new());

        let node = graph.get_node("laptop").unwrap();
        assert_eq!(node.addresses.len(), 2);
        assert!(node.addresses.contains(&"100.64.0.1".to_string()));
        assert!(node.addresses.contains(&"fd7a:115c:a1e0::1".to_string()));
    }

    #[test]
    fn test_integrity_check_passes_on_built_graph() {
        let (devices, services, statics) = empty_lookups();
        let records = vec![flow("100.64.0.1", "100.64.0.2", 6, 1, 1)];
        let graph = build(&records, &devices, &services, &statics);
        assert!(graph.verify_graph_integrity().is_ok());
    }
}
