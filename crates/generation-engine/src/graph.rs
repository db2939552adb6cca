//! Access to the host-owned graph
//!
//! The engine never owns the graph. It reads nodes and edges through
//! `GraphHost` and writes a bounded set of result fields back with
//! `update_node_data` (uploaded image references, guide URLs, generation
//! output and error markers).

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::types::{GraphEdge, GraphNode, WorkflowGraph};

/// Trait implemented by whatever holds the editable graph
///
/// This abstracts over the host (canvas editor, tests, a server session),
/// allowing the engine to be used in different contexts.
pub trait GraphHost: Send + Sync {
    /// Identifier of the workflow this graph belongs to
    fn workflow_id(&self) -> String;

    /// Current nodes
    fn nodes(&self) -> Vec<GraphNode>;

    /// Current edges
    fn edges(&self) -> Vec<GraphEdge>;

    /// Current attribute bag of one node
    fn node_data(&self, node_id: &str) -> Option<Value>;

    /// Shallow-merge `patch` into a node's attributes
    fn update_node_data(&self, node_id: &str, patch: Map<String, Value>);
}

/// A `GraphHost` backed by an in-memory `WorkflowGraph`
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    graph: RwLock<WorkflowGraph>,
}

impl InMemoryGraph {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph: RwLock::new(graph),
        }
    }

    /// Copy of the current graph
    pub fn snapshot(&self) -> WorkflowGraph {
        self.graph.read().clone()
    }

    /// Copy of one node
    pub fn node(&self, node_id: &str) -> Option<GraphNode> {
        self.graph.read().find_node(node_id).cloned()
    }
}

impl GraphHost for InMemoryGraph {
    fn workflow_id(&self) -> String {
        self.graph.read().id.clone()
    }

    fn nodes(&self) -> Vec<GraphNode> {
        self.graph.read().nodes.clone()
    }

    fn edges(&self) -> Vec<GraphEdge> {
        self.graph.read().edges.clone()
    }

    fn node_data(&self, node_id: &str) -> Option<Value> {
        self.graph.read().find_node(node_id).map(|n| n.data.clone())
    }

    fn update_node_data(&self, node_id: &str, patch: Map<String, Value>) {
        let mut graph = self.graph.write();
        match graph.find_node_mut(node_id) {
            Some(node) => node.merge_data(&patch),
            None => log::warn!("Ignoring update for unknown node '{}'", node_id),
        }
    }
}
