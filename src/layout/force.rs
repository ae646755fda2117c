//! Force-directed fallback: a fixed-step physics simulation, not an
//! animation. Charge repulsion between all pairs, spring attraction along
//! edges, a weak centering pull, and box-sized collision avoidance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LayoutError, LayoutInput, Point};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ForceConfig {
    pub charge: f64,
    pub spring: f64,
    pub center_strength: f64,
    pub damping: f64,
    pub max_force: f64,
    pub iterations: usize,
    /// Pairwise repulsion is O(n^2) per step; past this size the strategy
    /// refuses and the engine falls through to grid placement.
    pub max_nodes: usize,
    pub seed: u64,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            charge: 150.0,
            spring: 0.05,
            center_strength: 0.01,
            damping: 0.9,
            max_force: 100.0,
            iterations: 150,
            max_nodes: 500,
            seed: 0x6d65_7368,
        }
    }
}

pub fn layout(input: &LayoutInput, config: &ForceConfig) -> Result<Vec<Point>, LayoutError> {
    let n = input.nodes.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if n > config.max_nodes {
        return Err(LayoutError::Algorithm(format!(
            "{} nodes exceeds force-directed limit of {}",
            n, config.max_nodes
        )));
    }

    // Seeded ring start: deterministic, and no two nodes coincide.
    let mut rng = StdRng::seed_from_u64(config.seed);
    let radius = 100.0 + 10.0 * (n as f64).sqrt();
    let mut px: Vec<f64> = Vec::with_capacity(n);
    let mut py: Vec<f64> = Vec::with_capacity(n);
    for i in 0..n {
        let angle = i as f64 * 2.0 * std::f64::consts::PI / n as f64;
        px.push(radius * angle.cos() + rng.gen_range(-5.0..5.0));
        py.push(radius * angle.sin() + rng.gen_range(-5.0..5.0));
    }

    let mut vx = vec![0.0f64; n];
    let mut vy = vec![0.0f64; n];

    let edges: Vec<(usize, usize)> = input
        .edges
        .iter()
        .copied()
        .filter(|&(u, v)| u != v && u < n && v < n)
        .collect();

    for _ in 0..config.iterations {
        let mut fx = vec![0.0f64; n];
        let mut fy = vec![0.0f64; n];

        // Charge repulsion between all pairs.
        for a in 0..n {
            for b in (a + 1)..n {
                let dx = px[a] - px[b];
                let dy = py[a] - py[b];
                let dist = (dx * dx + dy * dy).sqrt().max(1.0);
                let push = config.charge * config.charge / (dist * dist);
                let ux = dx / dist;
                let uy = dy / dist;
                fx[a] += ux * push;
                fy[a] += uy * push;
                fx[b] -= ux * push;
                fy[b] -= uy * push;
            }
        }

        // Spring attraction along edges, rest length from node boxes.
        for &(u, v) in &edges {
            let dx = px[v] - px[u];
            let dy = py[v] - py[u];
            let dist = (dx * dx + dy * dy).sqrt().max(1.0);
            let rest = (input.nodes[u].size.width + input.nodes[v].size.width) / 2.0 + 60.0;
            let pull = config.spring * (dist - rest);
            let ux = dx / dist;
            let uy = dy / dist;
            fx[u] += ux * pull;
            fy[u] += uy * pull;
            fx[v] -= ux * pull;
            fy[v] -= uy * pull;
        }

        // Weak centering keeps disconnected pieces on screen.
        for i in 0..n {
            fx[i] -= px[i] * config.center_strength;
            fy[i] -= py[i] * config.center_strength;
        }

        for i in 0..n {
            let magnitude = (fx[i] * fx[i] + fy[i] * fy[i]).sqrt();
            if magnitude > config.max_force {
                let scale = config.max_force / magnitude;
                fx[i] *= scale;
                fy[i] *= scale;
            }
            vx[i] = (vx[i] + fx[i]) * config.damping;
            vy[i] = (vy[i] + fy[i]) * config.damping;
            px[i] += vx[i];
            py[i] += vy[i];
        }

        // Collision avoidance sized to each node's bounding box.
        for a in 0..n {
            for b in (a + 1)..n {
                let min_dx = (input.nodes[a].size.width + input.nodes[b].size.width) / 2.0;
                let min_dy = (input.nodes[a].size.height + input.nodes[b].size.height) / 2.0;
                let dx = px[b] - px[a];
                let dy = py[b] - py[a];
                if dx.abs() < min_dx && dy.abs() < min_dy {
                    let overlap_x = min_dx - dx.abs();
                    let overlap_y = min_dy - dy.abs();
                    if overlap_x < overlap_y {
                        let shift = overlap_x / 2.0 * if dx >= 0.0 { 1.0 } else { -1.0 };
                        px[a] -= shift;
                        px[b] += shift;
                    } else {
                        let shift = overlap_y / 2.0 * if dy >= 0.0 { 1.0 } else { -1.0 };
                        py[a] -= shift;
                        py[b] += shift;
                    }
                }
            }
        }
    }

    if px.iter().chain(py.iter()).any(|v| !v.is_finite()) {
        return Err(LayoutError::Algorithm(
            "force simulation diverged to non-finite coordinates".to_string(),
        ));
    }

    debug!("Force-directed layout settled {} nodes", n);
    Ok(px
        .into_iter()
        .zip(py)
        .map(|(x, y)| Point { x, y })
        .collect())
}
