//! Core types for workflow graphs
//!
//! These types mirror the graph owned by the host: nodes carrying a free-form
//! attribute bag and directed edges meaning "target consumes source's output".

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Attribute keys read from and written to node data
pub mod attrs {
    pub const ROLE: &str = "role";
    pub const SUBTYPE: &str = "subtype";
    pub const MODEL: &str = "model";
    pub const LORAS: &str = "loras";
    pub const LORA: &str = "lora";
    pub const WEIGHT: &str = "weight";
    pub const TEXT: &str = "text";
    pub const POLARITY: &str = "polarity";
    pub const IMAGE_DATA: &str = "imageData";
    pub const IMAGE_ID: &str = "imageId";
    pub const IMAGE_URL: &str = "imageUrl";
    pub const MASK_DATA: &str = "maskData";
    pub const MASK_ID: &str = "maskId";
    pub const MASK_URL: &str = "maskUrl";
    pub const GUIDE_URL: &str = "guideUrl";
    pub const STRENGTH: &str = "strength";
    pub const CREATIVITY: &str = "creativity";
    pub const TAG: &str = "tag";
    pub const ANGLE: &str = "angle";
    pub const DIRECTION: &str = "direction";
    pub const SCALE: &str = "scale";
    pub const UPSCALE_MODEL: &str = "upscaleModel";
    pub const FACE_ENHANCE: &str = "faceEnhance";
    pub const PROMPT: &str = "prompt";
    pub const SEED: &str = "seed";
    pub const NSFW: &str = "nsfw";
    pub const GENERATION_ID: &str = "generationId";
    pub const ERROR: &str = "error";
}

/// A directed edge: `target` consumes the output of `source`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
}

impl GraphEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Namespaced node type (e.g. "control-net-pose")
    pub node_type: String,
    /// Attribute bag for this instance
    #[serde(default)]
    pub data: Value,
}

impl GraphNode {
    /// Create a node with an empty attribute bag
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: Value::Object(Map::new()),
        }
    }

    /// Create a node with the given attributes
    pub fn with_data(id: impl Into<String>, node_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data,
        }
    }

    /// Raw attribute value
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Non-empty string attribute
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Numeric attribute, accepting numbers encoded as strings
    pub fn f64_attr(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean attribute
    pub fn bool_attr(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// Shallow-merge `patch` into this node's attributes.
    ///
    /// `null` values in the patch remove the key.
    pub fn merge_data(&mut self, patch: &Map<String, Value>) {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        if let Value::Object(data) = &mut self.data {
            for (key, value) in patch {
                if value.is_null() {
                    data.remove(key);
                } else {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// A complete workflow graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Unique identifier for this graph
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Nodes in the graph
    pub nodes: Vec<GraphNode>,
    /// Edges connecting nodes
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }
}
