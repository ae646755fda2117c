use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::flow::extract_ip;

/// A named device from the mesh control plane.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Addresses registered under a service or static-record name.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AddressSet {
    #[serde(default)]
    pub addrs: Vec<String>,
}

/// name -> addresses, for services and for static records.
pub type AddressMap = IndexMap<String, AddressSet>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Device,
    Service,
    StaticRecord,
    Address,
}

/// The resolved display identity for a raw IP. Derived per lookup, never
/// stored back into the lookup tables.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LogicalIdentity {
    pub name: String,
    pub kind: IdentityKind,
    pub tags: Vec<String>,
    pub user: Option<String>,
}

/// Canonical form used for all address equality checks: bracket-stripped,
/// lower-cased, and round-tripped through `std::net` when it parses so
/// that textual IPv6 variants compare equal.
pub fn normalize_address(address: &str) -> String {
    let ip = extract_ip(address).to_lowercase();
    match ip.parse::<std::net::IpAddr>() {
        Ok(parsed) => parsed.to_string(),
        Err(_) => ip,
    }
}

/// Resolve a raw IP to its logical identity.
///
/// Devices win over services, services over static records; an unmatched
/// address resolves to itself.
pub fn resolve(
    ip: &str,
    devices: &[Device],
    services: &AddressMap,
    static_records: &AddressMap,
) -> LogicalIdentity {
    let needle = normalize_address(ip);

    for device in devices {
        for addr in &device.addresses {
            let candidate = normalize_address(addr);
            // Prefix tolerance covers minor formatting differences in the
            // control-plane export (zone suffixes, trailing metadata).
            if candidate == needle
                || candidate.starts_with(&needle)
                || needle.starts_with(&candidate)
            {
                return LogicalIdentity {
                    name: device.name.clone(),
                    kind: IdentityKind::Device,
                    tags: device.tags.clone(),
                    user: device.user.clone(),
                };
            }
        }
    }

    for (name, set) in services {
        if set.addrs.iter().any(|a| normalize_address(a) == needle) {
            let display = name.strip_prefix("svc:").unwrap_or(name);
            return LogicalIdentity {
                name: display.to_string(),
                kind: IdentityKind::Service,
                tags: Vec::new(),
                user: None,
            };
        }
    }

    for (name, set) in static_records {
        if set.addrs.iter().any(|a| normalize_address(a) == needle) {
            return LogicalIdentity {
                name: name.clone(),
                kind: IdentityKind::StaticRecord,
                tags: Vec::new(),
                user: None,
            };
        }
    }

    LogicalIdentity {
        name: needle,
        kind: IdentityKind::Address,
        tags: Vec::new(),
        user: None,
    }
}
