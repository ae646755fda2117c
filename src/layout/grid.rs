//! Grid fallback: deterministic row/column placement. This strategy can
//! never fail, so it terminates the fallback chain.
//!
//! The only randomness allowed here is a small positional jitter that
//! keeps coincident nodes from stacking pixel-perfectly; the row/column
//! assignment itself is purely index-driven.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LayoutInput, Point};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GridConfig {
    pub cell_padding: f64,
    pub jitter: f64,
    pub seed: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_padding: 40.0,
            jitter: 15.0,
            seed: 0x6772_6964,
        }
    }
}

pub fn layout(input: &LayoutInput, config: &GridConfig) -> Vec<Point> {
    let n = input.nodes.len();
    if n == 0 {
        return Vec::new();
    }

    let max_width = input
        .nodes
        .iter()
        .map(|node| node.size.width)
        .fold(0.0f64, f64::max);
    let max_height = input
        .nodes
        .iter()
        .map(|node| node.size.height)
        .fold(0.0f64, f64::max);
    let cell_w = max_width + config.cell_padding;
    let cell_h = max_height + config.cell_padding;

    // Tiered by graph size: tiny graphs read better as a row, small ones
    // as a fixed grid, anything else as a square-ish grid.
    let columns = if n <= 3 {
        n
    } else if n <= 9 {
        3
    } else {
        (n as f64).sqrt().ceil() as usize
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        let col = i % columns;
        let row = i / columns;
        let jx = rng.gen_range(-config.jitter..=config.jitter);
        let jy = rng.gen_range(-config.jitter..=config.jitter);
        points.push(Point {
            x: col as f64 * cell_w + jx,
            y: row as f64 * cell_h + jy,
        });
    }

    debug!("Grid layout placed {} nodes in {} columns", n, columns);
    points
}
