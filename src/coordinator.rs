//! Pipeline coordinator: the single owner of the topology graph and its
//! layout.
//!
//! The renderer and UI layers only ever see read-only views; position
//! tweaks come back in as copy-on-write patches. Graph rebuilds are total
//! (a batch fully replaces the previous graph) and debounced, and layout
//! is recomputed only when the graph actually changed shape. A rebuild
//! that lands while a layout run is in flight wins: the stale result is
//! discarded, never raced against the newer one.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::graph::{build, Graph};
use crate::identity::{AddressMap, Device};
use crate::ingest::TrafficFlowRecord;
use crate::layout::{LayoutEngine, LayoutResult, Point};

/// Everything needed for one total rebuild of the topology.
#[derive(Clone, Debug, Default)]
pub struct RebuildRequest {
    pub records: Vec<TrafficFlowRecord>,
    pub devices: Vec<Device>,
    pub services: AddressMap,
    pub static_records: AddressMap,
}

/// Read-only view handed to the renderer.
#[derive(Clone, Copy, Debug)]
pub struct TopologyView<'a> {
    pub graph: &'a Graph,
    pub layout: &'a LayoutResult,
    pub selected: Option<&'a str>,
}

pub struct TopologyCoordinator {
    engine: LayoutEngine,
    debounce: Duration,
    graph: Graph,
    layout: LayoutResult,
    selected: Option<String>,
    generation: u64,
    layout_runs: u64,
    pending: Option<(RebuildRequest, Instant)>,
}

impl TopologyCoordinator {
    pub fn new(engine: LayoutEngine) -> Self {
        Self {
            engine,
            debounce: Duration::from_millis(100),
            graph: Graph::default(),
            layout: LayoutResult::default(),
            selected: None,
            generation: 0,
            layout_runs: 0,
            pending: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn snapshot(&self) -> TopologyView<'_> {
        TopologyView {
            graph: &self.graph,
            layout: &self.layout,
            selected: self.selected.as_deref(),
        }
    }

    pub fn layout_runs(&self) -> u64 {
        self.layout_runs
    }

    /// Queue a rebuild. Requests arriving inside the debounce window
    /// coalesce: the newest batch replaces the pending one and the window
    /// restarts, so a burst of batches costs one rebuild.
    pub fn request_rebuild(&mut self, request: RebuildRequest) {
        let deadline = Instant::now() + self.debounce;
        if self.pending.is_some() {
            debug!("Coalescing rebuild request into pending batch");
        }
        self.pending = Some((request, deadline));
    }

    /// Wait out the debounce window and run the pending rebuild, if any.
    /// Returns true when a rebuild actually ran.
    pub async fn flush_pending(&mut self) -> bool {
        let Some((_, deadline)) = self.pending.as_ref() else {
            return false;
        };
        tokio::time::sleep_until(*deadline).await;
        // The sleep yielded; take whatever batch is newest now.
        let Some((request, _)) = self.pending.take() else {
            return false;
        };
        self.rebuild_now(&request).await;
        true
    }

    /// Rebuild the graph from a complete batch, replacing the previous
    /// graph wholesale, and relayout only on structural change.
    pub async fn rebuild_now(&mut self, request: &RebuildRequest) {
        self.generation += 1;
        let generation = self.generation;

        let graph = build(
            &request.records,
            &request.devices,
            &request.services,
            &request.static_records,
        );
        let structural_change = graph.node_count() != self.graph.node_count()
            || graph.edge_count() != self.graph.edge_count();
        info!(
            "Rebuilt topology ({}), structural change: {}",
            graph.stats(),
            structural_change
        );
        self.graph = graph;
        if let Some(selected) = &self.selected {
            if !self.graph.nodes.contains_key(selected) {
                self.selected = None;
            }
        }

        if structural_change {
            let result = self.engine.compute(&self.graph).await;
            self.apply_layout(generation, result);
        }
    }

    /// Install a computed layout unless a newer rebuild superseded it.
    fn apply_layout(&mut self, generation: u64, result: LayoutResult) -> bool {
        if generation != self.generation {
            debug!(
                "Discarding stale layout (generation {} superseded by {})",
                generation, self.generation
            );
            return false;
        }
        self.layout = result;
        self.layout_runs += 1;
        true
    }

    /// Selection is pure UI state: it must never trigger a relayout, so
    /// the view stays stable under interaction.
    pub fn select_node(&mut self, id: Option<&str>) {
        self.selected = id.map(str::to_string);
    }

    /// Copy-on-write position update (drag interactions). The previous
    /// result is replaced, not mutated in place.
    pub fn patch_position(&mut self, id: &str, point: Point) {
        self.layout = self.layout.with_position(id, point);
    }
}
