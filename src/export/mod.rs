pub mod to_dot;
pub mod to_json;

use serde::Serialize;

use crate::graph::{Graph, GraphEdge, GraphNode};
use crate::layout::{LayoutResult, LayoutStrategy};

/// A node annotated with its computed position: the shape handed to the
/// renderer and to the file exporters.
#[derive(Serialize, Clone, Debug)]
pub struct PositionedNode {
    #[serde(flatten)]
    pub node: GraphNode,
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Clone, Debug)]
pub struct PositionedTopology {
    pub nodes: Vec<PositionedNode>,
    pub edges: Vec<GraphEdge>,
    pub strategy: Option<LayoutStrategy>,
    pub skipped_records: usize,
}

impl PositionedTopology {
    /// Join the graph with its layout. Nodes the layout somehow missed
    /// default to the origin rather than being dropped.
    pub fn from_parts(graph: &Graph, layout: &LayoutResult) -> Self {
        let nodes = graph
            .nodes
            .values()
            .map(|node| {
                let point = layout.get(&node.id).unwrap_or_default();
                PositionedNode {
                    node: node.clone(),
                    x: point.x,
                    y: point.y,
                }
            })
            .collect();
        Self {
            nodes,
            edges: graph.edges.values().cloned().collect(),
            strategy: layout.strategy,
            skipped_records: graph.skipped_records,
        }
    }
}

/// Common rendering function used by the template-based exporters.
pub mod renderer {
    use super::PositionedTopology;
    use serde_json::{json, Value};
    use std::error::Error;

    pub fn render_template(
        topology: &PositionedTopology,
        template: &str,
    ) -> Result<String, Box<dyn Error>> {
        let handlebars = crate::common::get_handlebars();
        let context = create_standard_context(topology);
        let res = handlebars.render_template(template, &context)?;
        Ok(res)
    }

    pub fn create_standard_context(topology: &PositionedTopology) -> Value {
        json!({
            "nodes": topology.nodes,
            "edges": topology.edges,
            "strategy": topology.strategy,
            "skipped_records": topology.skipped_records,
        })
    }
}
