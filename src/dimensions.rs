use serde::{Deserialize, Serialize};

use crate::graph::GraphNode;

/// Per-node bounding box used as a layout input. Computed once from node
/// content before layout runs; not part of the persistent graph.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LayoutSize {
    pub width: f64,
    pub height: f64,
}

// Approximate glyph width of the node card font, in px.
const CHAR_WIDTH: f64 = 7.5;
const WIDTH_PADDING: f64 = 24.0;
const TAG_PILL_PADDING: f64 = 18.0;

const HEADER_HEIGHT: f64 = 36.0;
const ADDRESS_LINE_HEIGHT: f64 = 16.0;
const TAG_ROW_HEIGHT: f64 = 22.0;
const TAGS_PER_ROW: usize = 3;
const PORT_CELL_SIZE: f64 = 18.0;
const MAX_PORT_COLUMNS: usize = 8;

/// IPv6 addresses longer than this are displayed truncated with an
/// ellipsis, so they stop driving width growth past it.
const IPV6_DISPLAY_LIMIT: usize = 22;

const MIN_WIDTH: f64 = 160.0;
const MIN_HEIGHT: f64 = 80.0;

const HIGH_TRAFFIC_BYTES: u64 = 1_048_576;
const HIGH_TRAFFIC_SCALE: f64 = 1.15;
const HIGH_CONNECTION_COUNT: u32 = 10;
const HIGH_CONNECTION_SCALE: f64 = 1.1;

fn display_address_len(addr: &str) -> usize {
    if addr.contains(':') && addr.len() > IPV6_DISPLAY_LIMIT {
        IPV6_DISPLAY_LIMIT + 1
    } else {
        addr.len()
    }
}

fn port_grid_columns(n_ports: usize) -> usize {
    if n_ports == 0 {
        return 0;
    }
    let cols = ((n_ports as f64).sqrt() * 1.4).ceil() as usize;
    cols.clamp(1, MAX_PORT_COLUMNS)
}

/// Estimate a node's bounding box from its content.
///
/// Deterministic: depends only on the node's fields, with no layout
/// feedback and no randomness. Width and height are floor-clamped but
/// never capped, so long names are never clipped.
pub fn estimate(node: &GraphNode) -> LayoutSize {
    let name_width = node.id.len() as f64 * CHAR_WIDTH + WIDTH_PADDING;
    let address_width = node
        .addresses
        .iter()
        .map(|a| display_address_len(a))
        .max()
        .unwrap_or(0) as f64
        * CHAR_WIDTH
        + WIDTH_PADDING;
    let protocol_width = if node.protocols.is_empty() {
        0.0
    } else {
        // Protocols render as one concatenated line.
        (node.protocols.iter().map(String::len).sum::<usize>()
            + 3 * (node.protocols.len() - 1)) as f64
            * CHAR_WIDTH
            + WIDTH_PADDING
    };
    let tag_width = node
        .tags
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0) as f64
        * CHAR_WIDTH
        + TAG_PILL_PADDING;

    let mut width = name_width
        .max(address_width)
        .max(protocol_width)
        .max(tag_width);

    let mut height = HEADER_HEIGHT;
    height += node.addresses.len() as f64 * ADDRESS_LINE_HEIGHT;
    if !node.tags.is_empty() {
        let tag_rows = node.tags.len().div_ceil(TAGS_PER_ROW);
        height += tag_rows as f64 * TAG_ROW_HEIGHT;
    }
    let n_ports = node.inbound_ports.len() + node.outbound_ports.len();
    if n_ports > 0 {
        let cols = port_grid_columns(n_ports);
        let rows = n_ports.div_ceil(cols);
        height += rows as f64 * PORT_CELL_SIZE;
    }

    // Hot nodes get breathing room in the layout.
    if node.total_bytes() > HIGH_TRAFFIC_BYTES {
        width *= HIGH_TRAFFIC_SCALE;
        height *= HIGH_TRAFFIC_SCALE;
    }
    if node.connections > HIGH_CONNECTION_COUNT {
        width *= HIGH_CONNECTION_SCALE;
        height *= HIGH_CONNECTION_SCALE;
    }

    LayoutSize {
        width: width.max(MIN_WIDTH),
        height: height.max(MIN_HEIGHT),
    }
}
