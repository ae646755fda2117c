//! Layout engine: computes a position for every node of a topology graph.
//!
//! Strategies are attempted in a fixed fallback order and the first one to
//! succeed wins: layered (primary, time-bounded) -> force-directed ->
//! grid. Grid placement cannot fail, so the chain always terminates with
//! a position for every input node. Timeouts and solver failures are
//! recovered, logged, and never surfaced to the caller as errors.

pub mod force;
pub mod grid;
pub mod layered;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dimensions::{estimate, LayoutSize};
use crate::graph::Graph;

pub use force::ForceConfig;
pub use grid::GridConfig;
pub use layered::LayeredConfig;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Which fallback tier produced a layout. Diagnostics only; positions are
/// valid whichever tier won.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutStrategy {
    Layered,
    ForceDirected,
    Grid,
    Empty,
}

impl fmt::Display for LayoutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutStrategy::Layered => write!(f, "layered"),
            LayoutStrategy::ForceDirected => write!(f, "force-directed"),
            LayoutStrategy::Grid => write!(f, "grid"),
            LayoutStrategy::Empty => write!(f, "empty"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("layout timed out after {0:?}")]
    Timeout(Duration),
    #[error("layout algorithm failed: {0}")]
    Algorithm(String),
}

/// Node identity plus its estimated bounding box; what strategies see.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    pub id: String,
    pub size: LayoutSize,
}

/// Index-based view of the graph handed to the strategies.
#[derive(Clone, Debug, Default)]
pub struct LayoutInput {
    pub nodes: Vec<NodeHandle>,
    pub edges: Vec<(usize, usize)>,
}

impl LayoutInput {
    pub fn from_graph(graph: &Graph) -> Self {
        let mut index_of: IndexMap<&str, usize> = IndexMap::with_capacity(graph.node_count());
        let nodes = graph
            .nodes
            .values()
            .enumerate()
            .map(|(i, node)| {
                index_of.insert(node.id.as_str(), i);
                NodeHandle {
                    id: node.id.clone(),
                    size: estimate(node),
                }
            })
            .collect();
        // Malformed edges (endpoints missing from the node map) are simply
        // not given to the solvers; their nodes still get positions.
        let edges = graph
            .edges
            .keys()
            .filter_map(|key| {
                let u = index_of.get(key.source.as_str())?;
                let v = index_of.get(key.target.as_str())?;
                Some((*u, *v))
            })
            .collect();
        Self { nodes, edges }
    }
}

/// The positions for one layout run, tagged with the winning strategy.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LayoutResult {
    pub positions: IndexMap<String, Point>,
    pub strategy: Option<LayoutStrategy>,
}

impl LayoutResult {
    pub fn get(&self, id: &str) -> Option<Point> {
        self.positions.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Copy-on-write position update: returns a new result with one node
    /// moved, leaving this one untouched.
    pub fn with_position(&self, id: &str, point: Point) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.positions.get_mut(id) {
            *slot = point;
        }
        next
    }
}

pub type PrimaryFn = fn(&LayoutInput, &LayeredConfig) -> Result<Vec<Point>, LayoutError>;

#[derive(Clone, Debug)]
pub struct LayoutOptions {
    /// Wall-clock budget for the primary strategy; exceeding it is
    /// treated the same as a solver failure.
    pub timeout: Duration,
    pub layered: LayeredConfig,
    pub force: ForceConfig,
    pub grid: GridConfig,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            layered: LayeredConfig::default(),
            force: ForceConfig::default(),
            grid: GridConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LayoutEngine {
    pub options: LayoutOptions,
    /// Primary solver entry point. Swappable so failure handling can be
    /// exercised without a pathological graph.
    pub primary: PrimaryFn,
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(LayoutOptions::default())
    }
}

impl LayoutEngine {
    pub fn new(options: LayoutOptions) -> Self {
        Self {
            options,
            primary: layered::layout,
        }
    }

    /// Run the fallback chain. Always returns a position for every node
    /// in the graph; an empty graph short-circuits to an empty result.
    pub async fn compute(&self, graph: &Graph) -> LayoutResult {
        if graph.node_count() == 0 {
            debug!("Empty graph, skipping layout");
            return LayoutResult {
                positions: IndexMap::new(),
                strategy: Some(LayoutStrategy::Empty),
            };
        }

        let input = LayoutInput::from_graph(graph);

        match self.run_primary(&input).await {
            Ok(points) => return assemble(&input, points, LayoutStrategy::Layered),
            Err(err) => warn!("Primary layout strategy failed: {}", err),
        }

        match force::layout(&input, &self.options.force) {
            Ok(points) => return assemble(&input, points, LayoutStrategy::ForceDirected),
            Err(err) => warn!("Force-directed fallback failed: {}", err),
        }

        let points = grid::layout(&input, &self.options.grid);
        assemble(&input, points, LayoutStrategy::Grid)
    }

    /// The primary solver runs as a cancellable unit of work: on timeout
    /// the in-flight computation is abandoned and the caller falls
    /// through to the next strategy without blocking.
    async fn run_primary(&self, input: &LayoutInput) -> Result<Vec<Point>, LayoutError> {
        let primary = self.primary;
        let config = self.options.layered.clone();
        let task_input = input.clone();
        let handle =
            tokio::task::spawn_blocking(move || primary(&task_input, &config));

        match tokio::time::timeout(self.options.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LayoutError::Algorithm(join_err.to_string())),
            Err(_) => Err(LayoutError::Timeout(self.options.timeout)),
        }
    }
}

fn assemble(input: &LayoutInput, points: Vec<Point>, strategy: LayoutStrategy) -> LayoutResult {
    debug_assert_eq!(input.nodes.len(), points.len());
    let positions = input
        .nodes
        .iter()
        .zip(points)
        .map(|(node, point)| (node.id.clone(), point))
        .collect();
    debug!("Layout complete via {} strategy", strategy);
    LayoutResult {
        positions,
        strategy: Some(strategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use crate::identity::AddressMap;
    use crate::ingest::{RawFlow, TrafficFlowRecord};
    use crate::flow::TrafficClass;
    use std::time::Instant;

    fn record(src: &str, dst: &str) -> TrafficFlowRecord {
        TrafficFlowRecord {
            class: TrafficClass::VirtualMesh,
            flow: RawFlow {
                proto: 6,
                src: Some(src.to_string()),
                dst: Some(dst.to_string()),
                tx_bytes: 10,
                rx_bytes: 5,
                tx_pkts: 1,
                rx_pkts: 1,
            },
        }
    }

    fn small_graph() -> Graph {
        let records = vec![
            record("100.64.0.1", "100.64.0.2"),
            record("100.64.0.2", "100.64.0.3"),
        ];
        build(&records, &[], &AddressMap::new(), &AddressMap::new())
    }

    fn failing_primary(
        _input: &LayoutInput,
        _config: &LayeredConfig,
    ) -> Result<Vec<Point>, LayoutError> {
        Err(LayoutError::Algorithm("injected failure".to_string()))
    }

    fn slow_primary(
        input: &LayoutInput,
        config: &LayeredConfig,
    ) -> Result<Vec<Point>, LayoutError> {
        std::thread::sleep(Duration::from_millis(250));
        layered::layout(input, config)
    }

    #[tokio::test]
    async fn test_primary_success_is_tagged_layered() {
        let engine = LayoutEngine::default();
        let result = engine.compute(&small_graph()).await;
        assert_eq!(result.strategy, Some(LayoutStrategy::Layered));
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_graph_short_circuits() {
        let engine = LayoutEngine::default();
        let result = engine.compute(&Graph::default()).await;
        assert_eq!(result.strategy, Some(LayoutStrategy::Empty));
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_falls_through_with_full_coverage() {
        let mut engine = LayoutEngine::default();
        engine.primary = failing_primary;
        let graph = small_graph();
        let result = engine.compute(&graph).await;
        assert_eq!(result.strategy, Some(LayoutStrategy::ForceDirected));
        for id in graph.nodes.keys() {
            assert!(result.get(id).is_some(), "missing position for {}", id);
        }
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_failure() {
        let mut engine = LayoutEngine::new(LayoutOptions {
            timeout: Duration::from_millis(20),
            ..Default::default()
        });
        engine.primary = slow_primary;
        let result = engine.compute(&small_graph()).await;
        assert_ne!(result.strategy, Some(LayoutStrategy::Layered));
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn test_grid_tier_is_reached_and_bounded() {
        // Both earlier tiers refused: primary injected to fail, force
        // refuses above its node cap. Grid must cover everything fast.
        let mut options = LayoutOptions::default();
        options.force.max_nodes = 10;
        let mut engine = LayoutEngine::new(options);
        engine.primary = failing_primary;

        let records: Vec<TrafficFlowRecord> = (0..200)
            .map(|i| record(&format!("10.0.{}.1", i), &format!("10.0.{}.2", i)))
            .collect();
        let graph = build(&records, &[], &AddressMap::new(), &AddressMap::new());

        let start = Instant::now();
        let result = engine.compute(&graph).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result.strategy, Some(LayoutStrategy::Grid));
        assert_eq!(result.len(), graph.node_count());
    }

    #[tokio::test]
    async fn test_copy_on_write_patch_leaves_original_untouched() {
        let engine = LayoutEngine::default();
        let result = engine.compute(&small_graph()).await;
        let id = result.positions.keys().next().unwrap().clone();
        let before = result.get(&id).unwrap();

        let patched = result.with_position(&id, Point { x: 999.0, y: -1.0 });
        assert_eq!(result.get(&id).unwrap(), before);
        assert_eq!(patched.get(&id).unwrap(), Point { x: 999.0, y: -1.0 });
    }
}
