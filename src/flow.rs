use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// How a flow reached its destination.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficClass {
    VirtualMesh,
    SubnetRouted,
    Physical,
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficClass::VirtualMesh => write!(f, "virtual-mesh"),
            TrafficClass::SubnetRouted => write!(f, "subnet-routed"),
            TrafficClass::Physical => write!(f, "physical"),
        }
    }
}

/// Address-range classification of an IP.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AddressCategory {
    Relay,
    Mesh,
    Private,
    Public,
}

impl fmt::Display for AddressCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressCategory::Relay => write!(f, "relay"),
            AddressCategory::Mesh => write!(f, "mesh"),
            AddressCategory::Private => write!(f, "private"),
            AddressCategory::Public => write!(f, "public"),
        }
    }
}

/// The relay server announces itself on this fixed loopback-range address.
pub const RELAY_ADDR: Ipv4Addr = Ipv4Addr::new(127, 3, 3, 40);

/// Mesh overlay IPv4 range: the CGNAT block 100.64.0.0/10.
const MESH_V4_PREFIX: (u8, u8) = (100, 64);

/// Mesh overlay IPv6 range: fd7a:115c:a1e0::/48.
const MESH_V6_PREFIX: [u16; 3] = [0xfd7a, 0x115c, 0xa1e0];

/// Extract the IP portion of a composite address string.
///
/// Addresses arrive as `ip`, `ip:port`, `[v6]` or `[v6]:port`. A bare IPv6
/// literal keeps all of its colons; only a single trailing `:port` on a
/// non-IPv6 string is treated as a port suffix.
pub fn extract_ip(address: &str) -> String {
    let s = address.trim();
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
        return rest.to_string();
    }
    if s.matches(':').count() == 1 {
        if let Some((ip, port)) = s.rsplit_once(':') {
            if port.parse::<u16>().is_ok() {
                return ip.to_string();
            }
        }
    }
    s.to_string()
}

/// Extract the port portion of a composite address string, if present.
pub fn extract_port(address: &str) -> Option<u16> {
    let s = address.trim();
    if s.starts_with('[') {
        let (_, after) = s.split_once("]:")?;
        return after.parse().ok();
    }
    if s.matches(':').count() == 1 {
        let (_, port) = s.rsplit_once(':')?;
        return port.parse().ok();
    }
    None
}

/// Map an IANA protocol number to its display label.
pub fn protocol_name(proto: i64) -> String {
    match proto {
        1 => "ICMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        255 => "Reserved".to_string(),
        n => format!("Proto-{}", n),
    }
}

/// Ports are only meaningful for TCP and UDP flows.
pub fn protocol_carries_ports(proto: i64) -> bool {
    proto == 6 || proto == 17
}

/// Classify an IP string by address range.
///
/// Unparseable addresses fall through to `Public` rather than erroring;
/// the topology must render something for any input.
pub fn categorize(ip: &str) -> AddressCategory {
    let normalized = extract_ip(ip);
    let Ok(addr) = normalized.parse::<IpAddr>() else {
        return AddressCategory::Public;
    };
    match addr {
        IpAddr::V4(v4) => categorize_v4(v4),
        IpAddr::V6(v6) => categorize_v6(v6),
    }
}

fn categorize_v4(addr: Ipv4Addr) -> AddressCategory {
    if addr == RELAY_ADDR {
        return AddressCategory::Relay;
    }
    let octets = addr.octets();
    // 100.64.0.0/10
    if octets[0] == MESH_V4_PREFIX.0 && (octets[1] & 0xc0) == MESH_V4_PREFIX.1 {
        return AddressCategory::Mesh;
    }
    if addr.is_private() || addr.is_link_local() || addr.is_loopback() {
        return AddressCategory::Private;
    }
    AddressCategory::Public
}

fn categorize_v6(addr: Ipv6Addr) -> AddressCategory {
    let segments = addr.segments();
    if segments[..3] == MESH_V6_PREFIX {
        return AddressCategory::Mesh;
    }
    // Unique-local fc00::/7 and link-local fe80::/10
    if (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80 {
        return AddressCategory::Private;
    }
    if addr.is_loopback() {
        return AddressCategory::Private;
    }
    AddressCategory::Public
}
