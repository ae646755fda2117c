use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error};

use crate::flow::TrafficClass;
use crate::identity::{AddressMap, Device};

/// One observed flow inside a log window, as it appears on the wire.
///
/// The collector emits these fields in either PascalCase or camelCase
/// depending on its version; the aliases normalize both into one type so
/// nothing downstream guesses at field names. Missing endpoints are kept
/// as `None` so the graph builder can count them as skipped.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RawFlow {
    #[serde(default, alias = "Proto")]
    pub proto: i64,
    #[serde(default, alias = "Src")]
    pub src: Option<String>,
    #[serde(default, alias = "Dst")]
    pub dst: Option<String>,
    #[serde(default, alias = "TxBytes", alias = "txBytes")]
    pub tx_bytes: u64,
    #[serde(default, alias = "RxBytes", alias = "rxBytes")]
    pub rx_bytes: u64,
    #[serde(default, alias = "TxPkts", alias = "txPkts")]
    pub tx_pkts: u64,
    #[serde(default, alias = "RxPkts", alias = "rxPkts")]
    pub rx_pkts: u64,
}

/// A flow record tagged with the class of path it traversed. This is the
/// unit the graph builder folds.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrafficFlowRecord {
    pub class: TrafficClass,
    #[serde(flatten)]
    pub flow: RawFlow,
}

/// One time-windowed log entry from a mesh node.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LogEntry {
    #[serde(default, alias = "Logged")]
    pub logged: Option<String>,
    #[serde(default, alias = "NodeId", alias = "nodeId")]
    pub node_id: Option<String>,
    #[serde(default, alias = "Start")]
    pub start: Option<String>,
    #[serde(default, alias = "End")]
    pub end: Option<String>,
    #[serde(default, alias = "VirtualTraffic", alias = "virtualTraffic")]
    pub virtual_traffic: Vec<RawFlow>,
    #[serde(default, alias = "SubnetTraffic", alias = "subnetTraffic")]
    pub subnet_traffic: Vec<RawFlow>,
    #[serde(default, alias = "PhysicalTraffic", alias = "physicalTraffic")]
    pub physical_traffic: Vec<RawFlow>,
}

impl LogEntry {
    fn record_count(&self) -> usize {
        self.virtual_traffic.len() + self.subnet_traffic.len() + self.physical_traffic.len()
    }
}

/// Flatten a batch of log entries into flow records, tagging each with the
/// traffic class of the array it came from.
pub fn flatten_entries(entries: &[LogEntry]) -> Vec<TrafficFlowRecord> {
    let mut records = Vec::with_capacity(entries.iter().map(LogEntry::record_count).sum());
    for entry in entries {
        for flow in &entry.virtual_traffic {
            records.push(TrafficFlowRecord {
                class: TrafficClass::VirtualMesh,
                flow: flow.clone(),
            });
        }
        for flow in &entry.subnet_traffic {
            records.push(TrafficFlowRecord {
                class: TrafficClass::SubnetRouted,
                flow: flow.clone(),
            });
        }
        for flow in &entry.physical_traffic {
            records.push(TrafficFlowRecord {
                class: TrafficClass::Physical,
                flow: flow.clone(),
            });
        }
    }
    debug!(
        "Flattened {} log entries into {} flow records",
        entries.len(),
        records.len()
    );
    records
}

pub fn load_log_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<LogEntry> = serde_json::from_str(&content)?;
    debug!("Loaded {} log entries from {}", entries.len(), path.display());
    Ok(entries)
}

pub fn load_devices(path: &Path) -> Result<Vec<Device>> {
    parse_lookup_file(path)
}

pub fn load_address_map(path: &Path) -> Result<AddressMap> {
    parse_lookup_file(path)
}

fn parse_lookup_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("");
    let content = std::fs::read_to_string(path)?;
    match extension {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
        "json" => serde_json::from_str(&content).map_err(Into::into),
        _ => {
            error!("Error: unsupported lookup extension {}", extension);
            anyhow::bail!("Unsupported extension");
        }
    }
}
