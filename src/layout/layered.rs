//! Layered/hierarchical layout: the primary strategy.
//!
//! Classic Sugiyama pipeline over the aggregated topology:
//! 1. Cycle breaking (greedy source/sink peeling or DFS back-edge reversal)
//! 2. Layer assignment (longest path over the acyclic graph)
//! 3. Crossing minimization (barycenter or median sweeps)
//! 4. Coordinate assignment (sized placement + median refinement)
//!
//! Disconnected components are laid out independently and packed side by
//! side. All tie-breaking is by node index, so the result is fully
//! deterministic for a given input.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LayoutError, LayoutInput, Point};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CycleBreaking {
    #[default]
    GreedyPeel,
    DepthFirst,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CrossingMinimization {
    #[default]
    Barycenter,
    Median,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodePlacement {
    /// Center each layer, then pull nodes toward the median of their
    /// neighbors.
    #[default]
    MedianRefine,
    /// Left-pack each layer with no refinement. Cheap, blockier.
    Packed,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LayeredConfig {
    pub node_spacing: f64,
    pub layer_spacing: f64,
    pub cycle_breaking: CycleBreaking,
    pub crossing_minimization: CrossingMinimization,
    pub node_placement: NodePlacement,
    /// Quality knob in 0.0..=1.0: scales the crossing-sweep and
    /// refinement iteration budgets.
    pub thoroughness: f64,
    pub component_spacing: f64,
}

impl Default for LayeredConfig {
    fn default() -> Self {
        Self {
            node_spacing: 40.0,
            layer_spacing: 90.0,
            cycle_breaking: CycleBreaking::default(),
            crossing_minimization: CrossingMinimization::default(),
            node_placement: NodePlacement::default(),
            thoroughness: 0.7,
            component_spacing: 120.0,
        }
    }
}

impl LayeredConfig {
    fn crossing_iterations(&self) -> usize {
        let t = self.thoroughness.clamp(0.0, 1.0);
        4 + (20.0 * t) as usize
    }

    fn refinement_passes(&self) -> usize {
        let t = self.thoroughness.clamp(0.0, 1.0);
        2 + (6.0 * t) as usize
    }
}

struct ComponentGraph {
    /// Indices into the full input.
    members: Vec<usize>,
    adj: Vec<Vec<usize>>,
    radj: Vec<Vec<usize>>,
    widths: Vec<f64>,
    heights: Vec<f64>,
}

/// Run the layered pipeline over the whole input.
pub fn layout(input: &LayoutInput, config: &LayeredConfig) -> Result<Vec<Point>, LayoutError> {
    let n = input.nodes.len();
    let mut positions = vec![Point { x: 0.0, y: 0.0 }; n];
    if n == 0 {
        return Ok(positions);
    }

    let components = split_components(input);
    debug!(
        "Layered layout: {} nodes, {} edges, {} components",
        n,
        input.edges.len(),
        components.len()
    );

    let mut x_cursor = 0.0;
    for mut component in components {
        let local = layout_component(&mut component, config)?;

        let min_x = local.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = local.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        if !min_x.is_finite() || !max_x.is_finite() {
            return Err(LayoutError::Algorithm(
                "layered solver produced non-finite coordinates".to_string(),
            ));
        }

        for (slot, point) in component.members.iter().zip(local) {
            positions[*slot] = Point {
                x: point.x - min_x + x_cursor,
                y: point.y,
            };
        }
        x_cursor += (max_x - min_x) + config.component_spacing;
    }

    Ok(positions)
}

/// Undirected connected components, members ordered by node index.
fn split_components(input: &LayoutInput) -> Vec<ComponentGraph> {
    let n = input.nodes.len();
    let mut neighbors = vec![Vec::new(); n];
    for &(u, v) in &input.edges {
        if u == v || u >= n || v >= n {
            continue;
        }
        neighbors[u].push(v);
        neighbors[v].push(u);
    }

    let mut component_of = vec![usize::MAX; n];
    let mut count = 0;
    for start in 0..n {
        if component_of[start] != usize::MAX {
            continue;
        }
        let mut stack = vec![start];
        component_of[start] = count;
        while let Some(u) = stack.pop() {
            for &v in &neighbors[u] {
                if component_of[v] == usize::MAX {
                    component_of[v] = count;
                    stack.push(v);
                }
            }
        }
        count += 1;
    }

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (node, &c) in component_of.iter().enumerate() {
        members[c].push(node);
    }

    members
        .into_iter()
        .map(|members| {
            let mut slot_of = vec![usize::MAX; n];
            for (slot, &node) in members.iter().enumerate() {
                slot_of[node] = slot;
            }
            let local_n = members.len();
            let mut adj = vec![Vec::new(); local_n];
            let mut radj = vec![Vec::new(); local_n];
            for &(u, v) in &input.edges {
                if u == v || u >= n || v >= n {
                    continue;
                }
                let (su, sv) = (slot_of[u], slot_of[v]);
                if su != usize::MAX && sv != usize::MAX {
                    adj[su].push(sv);
                    radj[sv].push(su);
                }
            }
            let widths = members.iter().map(|&i| input.nodes[i].size.width).collect();
            let heights = members
                .iter()
                .map(|&i| input.nodes[i].size.height)
                .collect();
            ComponentGraph {
                members,
                adj,
                radj,
                widths,
                heights,
            }
        })
        .collect()
}

fn layout_component(
    graph: &mut ComponentGraph,
    config: &LayeredConfig,
) -> Result<Vec<Point>, LayoutError> {
    break_cycles(graph, config.cycle_breaking);
    let layer_of = assign_layers(graph)?;
    let layers = order_layers(graph, &layer_of, config);
    Ok(assign_coordinates(graph, &layers, config))
}

/// Reverse a minimal set of edges so the component becomes acyclic. The
/// reversal only affects layering; positions are produced for the
/// original nodes regardless.
fn break_cycles(graph: &mut ComponentGraph, strategy: CycleBreaking) {
    let order = match strategy {
        CycleBreaking::GreedyPeel => greedy_peel_order(graph),
        CycleBreaking::DepthFirst => dfs_order(graph),
    };

    let n = graph.members.len();
    let mut pos = vec![0usize; n];
    for (i, &v) in order.iter().enumerate() {
        pos[v] = i;
    }

    let mut adj = vec![Vec::new(); n];
    let mut radj = vec![Vec::new(); n];
    for u in 0..n {
        for &v in &graph.adj[u] {
            if u == v {
                continue;
            }
            if pos[u] > pos[v] {
                adj[v].push(u);
                radj[u].push(v);
            } else {
                adj[u].push(v);
                radj[v].push(u);
            }
        }
    }
    graph.adj = adj;
    graph.radj = radj;
}

/// Eades-style peeling: strip sinks to the right, sources to the left,
/// and when stuck, move the node with the largest out-in degree delta.
fn greedy_peel_order(graph: &ComponentGraph) -> Vec<usize> {
    let n = graph.members.len();
    let mut in_deg = vec![0usize; n];
    let mut out_deg = vec![0usize; n];
    for (u, adj) in graph.adj.iter().enumerate() {
        for &v in adj {
            if u != v {
                out_deg[u] += 1;
                in_deg[v] += 1;
            }
        }
    }

    let mut removed = vec![false; n];
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut remaining = n;

    while remaining > 0 {
        let mut progress = false;

        for v in 0..n {
            if !removed[v] && out_deg[v] == 0 {
                removed[v] = true;
                remaining -= 1;
                right.push(v);
                for &u in &graph.radj[v] {
                    if !removed[u] && u != v {
                        out_deg[u] = out_deg[u].saturating_sub(1);
                    }
                }
                progress = true;
            }
        }

        for v in 0..n {
            if !removed[v] && in_deg[v] == 0 {
                removed[v] = true;
                remaining -= 1;
                left.push(v);
                for &w in &graph.adj[v] {
                    if !removed[w] && w != v {
                        in_deg[w] = in_deg[w].saturating_sub(1);
                    }
                }
                progress = true;
            }
        }

        if !progress && remaining > 0 {
            let best = (0..n).filter(|&v| !removed[v]).max_by(|&a, &b| {
                let da = out_deg[a] as isize - in_deg[a] as isize;
                let db = out_deg[b] as isize - in_deg[b] as isize;
                da.cmp(&db).then_with(|| b.cmp(&a))
            });
            if let Some(v) = best {
                removed[v] = true;
                remaining -= 1;
                left.push(v);
                for &w in &graph.adj[v] {
                    if !removed[w] && w != v {
                        in_deg[w] = in_deg[w].saturating_sub(1);
                    }
                }
                for &u in &graph.radj[v] {
                    if !removed[u] && u != v {
                        out_deg[u] = out_deg[u].saturating_sub(1);
                    }
                }
            }
        }
    }

    right.reverse();
    left.extend(right);
    left
}

/// Plain DFS finish order; edges pointing against it are the back edges.
/// Iterative so deep chains cannot blow the stack.
fn dfs_order(graph: &ComponentGraph) -> Vec<usize> {
    let n = graph.members.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        visited[start] = true;
        while let Some(&mut (u, ref mut next)) = stack.last_mut() {
            if *next < graph.adj[u].len() {
                let v = graph.adj[u][*next];
                *next += 1;
                if !visited[v] {
                    visited[v] = true;
                    stack.push((v, 0));
                }
            } else {
                order.push(u);
                stack.pop();
            }
        }
    }
    order.reverse();
    order
}

/// Longest-path layering over the acyclic component.
fn assign_layers(graph: &ComponentGraph) -> Result<Vec<usize>, LayoutError> {
    let n = graph.members.len();
    let mut in_deg = vec![0usize; n];
    for adj in &graph.adj {
        for &v in adj {
            in_deg[v] += 1;
        }
    }

    let mut queue: Vec<usize> = (0..n).filter(|&v| in_deg[v] == 0).collect();
    queue.sort_unstable();
    let mut topo = Vec::with_capacity(n);
    while let Some(&u) = queue.first() {
        queue.remove(0);
        topo.push(u);
        for &v in &graph.adj[u] {
            in_deg[v] -= 1;
            if in_deg[v] == 0 {
                let pos = queue.partition_point(|&x| x < v);
                queue.insert(pos, v);
            }
        }
    }
    if topo.len() != n {
        // Cycle breaking should have made this impossible.
        return Err(LayoutError::Algorithm(
            "cycle survived the breaking pass".to_string(),
        ));
    }

    let mut layer = vec![0usize; n];
    for &u in &topo {
        for &v in &graph.adj[u] {
            if layer[v] <= layer[u] {
                layer[v] = layer[u] + 1;
            }
        }
    }
    Ok(layer)
}

fn count_crossings(layers: &[Vec<usize>], adj: &[Vec<usize>]) -> usize {
    let mut crossings = 0;
    for i in 0..layers.len().saturating_sub(1) {
        let upper = &layers[i];
        let lower = &layers[i + 1];
        let mut pos_lower = vec![usize::MAX; adj.len()];
        for (p, &v) in lower.iter().enumerate() {
            pos_lower[v] = p;
        }

        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for (pu, &u) in upper.iter().enumerate() {
            for &v in &adj[u] {
                if pos_lower[v] != usize::MAX {
                    pairs.push((pu, pos_lower[v]));
                }
            }
        }
        for a in 0..pairs.len() {
            for b in (a + 1)..pairs.len() {
                let (a1, b1) = pairs[a];
                let (a2, b2) = pairs[b];
                if (a1 < a2 && b1 > b2) || (a1 > a2 && b1 < b2) {
                    crossings += 1;
                }
            }
        }
    }
    crossings
}

/// Order nodes within layers via alternating barycenter/median sweeps,
/// keeping the best ordering seen.
fn order_layers(
    graph: &ComponentGraph,
    layer_of: &[usize],
    config: &LayeredConfig,
) -> Vec<Vec<usize>> {
    let n = graph.members.len();
    if n == 0 {
        return Vec::new();
    }
    let num_layers = layer_of.iter().copied().max().unwrap_or(0) + 1;
    let mut layers: Vec<Vec<usize>> = vec![Vec::new(); num_layers];
    for v in 0..n {
        layers[layer_of[v]].push(v);
    }
    for layer in &mut layers {
        layer.sort_unstable();
    }

    let mut best = layers.clone();
    let mut best_crossings = count_crossings(&layers, &graph.adj);

    for iter in 0..config.crossing_iterations() {
        if iter % 2 == 0 {
            for i in 1..num_layers {
                reorder_layer(&mut layers, i, graph, true, config.crossing_minimization);
            }
        } else {
            for i in (0..num_layers.saturating_sub(1)).rev() {
                reorder_layer(&mut layers, i, graph, false, config.crossing_minimization);
            }
        }

        let crossings = count_crossings(&layers, &graph.adj);
        if crossings < best_crossings {
            best_crossings = crossings;
            best = layers.clone();
        }
        if best_crossings == 0 {
            break;
        }
    }

    best
}

fn reorder_layer(
    layers: &mut [Vec<usize>],
    layer_idx: usize,
    graph: &ComponentGraph,
    forward: bool,
    strategy: CrossingMinimization,
) {
    let reference_idx = if forward {
        match layer_idx.checked_sub(1) {
            Some(i) => i,
            None => return,
        }
    } else if layer_idx + 1 < layers.len() {
        layer_idx + 1
    } else {
        return;
    };

    let mut ref_pos = vec![usize::MAX; graph.members.len()];
    for (p, &v) in layers[reference_idx].iter().enumerate() {
        ref_pos[v] = p;
    }

    let mut keyed: Vec<(usize, f64)> = layers[layer_idx]
        .iter()
        .map(|&v| {
            let neighbors = if forward { &graph.radj[v] } else { &graph.adj[v] };
            let mut anchors: Vec<f64> = neighbors
                .iter()
                .filter(|&&u| ref_pos[u] != usize::MAX)
                .map(|&u| ref_pos[u] as f64)
                .collect();
            if anchors.is_empty() {
                return (v, f64::MAX);
            }
            let key = match strategy {
                CrossingMinimization::Barycenter => {
                    anchors.iter().sum::<f64>() / anchors.len() as f64
                }
                CrossingMinimization::Median => {
                    anchors.sort_by(|a, b| a.total_cmp(b));
                    anchors[anchors.len() / 2]
                }
            };
            (v, key)
        })
        .collect();

    keyed.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    layers[layer_idx] = keyed.into_iter().map(|(v, _)| v).collect();
}

/// Place the ordered layers, spacing nodes by their measured widths and
/// layers by the tallest node in each.
fn assign_coordinates(
    graph: &ComponentGraph,
    layers: &[Vec<usize>],
    config: &LayeredConfig,
) -> Vec<Point> {
    let n = graph.members.len();
    let mut points = vec![Point { x: 0.0, y: 0.0 }; n];

    let mut layer_y = 0.0;
    for layer in layers {
        let tallest = layer
            .iter()
            .map(|&v| graph.heights[v])
            .fold(0.0f64, f64::max);

        let total_width: f64 = layer.iter().map(|&v| graph.widths[v]).sum::<f64>()
            + layer.len().saturating_sub(1) as f64 * config.node_spacing;
        let mut cx = match config.node_placement {
            NodePlacement::MedianRefine => -total_width / 2.0,
            NodePlacement::Packed => 0.0,
        };

        for &v in layer {
            points[v].x = cx + graph.widths[v] / 2.0;
            points[v].y = layer_y + tallest / 2.0;
            cx += graph.widths[v] + config.node_spacing;
        }
        layer_y += tallest + config.layer_spacing;
    }

    if config.node_placement == NodePlacement::MedianRefine {
        for _ in 0..config.refinement_passes() {
            for layer in layers {
                for &v in layer {
                    let mut anchors: Vec<f64> = graph.adj[v]
                        .iter()
                        .chain(graph.radj[v].iter())
                        .map(|&u| points[u].x)
                        .collect();
                    if anchors.is_empty() {
                        continue;
                    }
                    anchors.sort_by(|a, b| a.total_cmp(b));
                    let median = anchors[anchors.len() / 2];
                    points[v].x = (points[v].x + median) / 2.0;
                }
            }

            // Re-separate overlaps introduced by the pull.
            for layer in layers {
                let mut ordered: Vec<usize> = layer.clone();
                ordered.sort_by(|&a, &b| points[a].x.total_cmp(&points[b].x).then(a.cmp(&b)));
                for i in 1..ordered.len() {
                    let prev = ordered[i - 1];
                    let curr = ordered[i];
                    let min_gap =
                        (graph.widths[prev] + graph.widths[curr]) / 2.0 + config.node_spacing;
                    if points[curr].x - points[prev].x < min_gap {
                        points[curr].x = points[prev].x + min_gap;
                    }
                }
            }
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::LayoutSize;
    use crate::layout::NodeHandle;

    fn input(n: usize, edges: Vec<(usize, usize)>) -> LayoutInput {
        LayoutInput {
            nodes: (0..n)
                .map(|i| NodeHandle {
                    id: format!("n{}", i),
                    size: LayoutSize {
                        width: 100.0,
                        height: 50.0,
                    },
                })
                .collect(),
            edges,
        }
    }

    fn no_overlaps(points: &[Point], input: &LayoutInput) {
        for a in 0..points.len() {
            for b in (a + 1)..points.len() {
                let wa = input.nodes[a].size.width / 2.0;
                let wb = input.nodes[b].size.width / 2.0;
                let ha = input.nodes[a].size.height / 2.0;
                let hb = input.nodes[b].size.height / 2.0;
                let overlap_x = (points[a].x - points[b].x).abs() < (wa + wb) - 1.0;
                let overlap_y = (points[a].y - points[b].y).abs() < (ha + hb) - 1.0;
                assert!(
                    !(overlap_x && overlap_y),
                    "nodes {} and {} overlap",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_chain_layers_vertically() {
        let input = input(3, vec![(0, 1), (1, 2)]);
        let points = layout(&input, &LayeredConfig::default()).unwrap();
        assert!(points[0].y < points[1].y);
        assert!(points[1].y < points[2].y);
    }

    #[test]
    fn test_cycle_is_broken_not_fatal() {
        let input = input(3, vec![(0, 1), (1, 2), (2, 0)]);
        let points = layout(&input, &LayeredConfig::default()).unwrap();
        assert_eq!(points.len(), 3);
        no_overlaps(&points, &input);
    }

    #[test]
    fn test_self_edges_are_ignored_for_layering() {
        let input = input(2, vec![(0, 0), (0, 1)]);
        let points = layout(&input, &LayeredConfig::default()).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_disconnected_components_are_packed_apart() {
        let input = input(4, vec![(0, 1), (2, 3)]);
        let config = LayeredConfig::default();
        let points = layout(&input, &config).unwrap();
        let left = points[0].x.max(points[1].x);
        let right = points[2].x.min(points[3].x);
        assert!(right - left >= config.component_spacing - 1.0);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let input = input(6, vec![(0, 1), (0, 2), (1, 3), (2, 3), (3, 4), (4, 5)]);
        let config = LayeredConfig::default();
        let a = layout(&input, &config).unwrap();
        let b = layout(&input, &config).unwrap();
        for (pa, pb) in a.iter().zip(&b) {
            assert_eq!(pa.x, pb.x);
            assert_eq!(pa.y, pb.y);
        }
    }

    #[test]
    fn test_no_overlaps_on_diamond() {
        let input = input(4, vec![(0, 1), (0, 2), (1, 3), (2, 3)]);
        let points = layout(&input, &LayeredConfig::default()).unwrap();
        no_overlaps(&points, &input);
    }

    #[test]
    fn test_dfs_cycle_breaking_variant() {
        let input = input(4, vec![(0, 1), (1, 2), (2, 3), (3, 0)]);
        let config = LayeredConfig {
            cycle_breaking: CycleBreaking::DepthFirst,
            ..Default::default()
        };
        let points = layout(&input, &config).unwrap();
        assert_eq!(points.len(), 4);
    }

    #[test]
    fn test_median_crossing_variant() {
        let input = input(5, vec![(0, 2), (0, 3), (1, 2), (1, 4)]);
        let config = LayeredConfig {
            crossing_minimization: CrossingMinimization::Median,
            ..Default::default()
        };
        let points = layout(&input, &config).unwrap();
        assert_eq!(points.len(), 5);
    }
}
