//! Arena-allocated snapshot graph.
//!
//! `serde_json::Value` is a tree and cannot express shared or cyclic
//! structure. Snapshot loaders that need to (an entity whose relation points
//! back at itself) build a [`SnapshotGraph`] instead: nodes live in a `Vec`
//! and edges are indices, so a back-edge is just an index already in use.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Index of a node inside its graph
pub type NodeId = usize;

/// Marker rendered in place of a back-edge when a graph is turned into JSON
pub const CIRCULAR_MARKER: &str = "[Circular]";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `null`, bool, number or string
    Scalar(Value),
    /// A typed instant; compares equal to an ISO-8601 string of the same instant
    Timestamp(DateTime<Utc>),
    Array(Vec<NodeId>),
    Object(BTreeMap<String, NodeId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl SnapshotGraph {
    /// Graph whose root is an empty object
    pub fn new_object() -> Self {
        Self {
            nodes: vec![Node::Object(BTreeMap::new())],
            root: 0,
        }
    }

    /// Import a JSON tree
    pub fn from_value(value: &Value) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            root: 0,
        };
        graph.root = graph.add_value(value);
        graph
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Import a JSON subtree and return its root node
    pub fn add_value(&mut self, value: &Value) -> NodeId {
        match value {
            Value::Array(items) => {
                let children = items.iter().map(|v| self.add_value(v)).collect();
                self.add(Node::Array(children))
            }
            Value::Object(map) => {
                let children = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.add_value(v)))
                    .collect();
                self.add(Node::Object(children))
            }
            scalar => self.add(Node::Scalar(scalar.clone())),
        }
    }

    /// Point `object.key` at `child`. Returns `false` when `object` is not an object node.
    pub fn set_field(&mut self, object: NodeId, key: impl Into<String>, child: NodeId) -> bool {
        match self.nodes.get_mut(object) {
            Some(Node::Object(fields)) => {
                fields.insert(key.into(), child);
                true
            }
            _ => false,
        }
    }

    /// Append `child` to an array node. Returns `false` when `array` is not an array node.
    pub fn push_item(&mut self, array: NodeId, child: NodeId) -> bool {
        match self.nodes.get_mut(array) {
            Some(Node::Array(items)) => {
                items.push(child);
                true
            }
            _ => false,
        }
    }

    /// Child of an object node
    pub fn field(&self, object: NodeId, key: &str) -> Option<NodeId> {
        match self.nodes.get(object) {
            Some(Node::Object(fields)) => fields.get(key).copied(),
            _ => None,
        }
    }

    /// Keys of an object node, sorted
    pub fn keys(&self, object: NodeId) -> Vec<&str> {
        match self.nodes.get(object) {
            Some(Node::Object(fields)) => fields.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_null(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id), Some(Node::Scalar(Value::Null)) | None)
    }

    /// Render a node as JSON. A node already on the current path is written
    /// as [`CIRCULAR_MARKER`]; shared but acyclic nodes are rendered in full.
    pub fn to_value(&self, id: NodeId) -> Value {
        let mut on_path = HashSet::new();
        self.render(id, &mut on_path)
    }

    fn render(&self, id: NodeId, on_path: &mut HashSet<NodeId>) -> Value {
        if !on_path.insert(id) {
            return Value::String(CIRCULAR_MARKER.to_string());
        }
        let rendered = match self.nodes.get(id) {
            None => Value::Null,
            Some(Node::Scalar(v)) => v.clone(),
            Some(Node::Timestamp(ts)) => Value::String(ts.to_rfc3339()),
            Some(Node::Array(items)) => {
                Value::Array(items.iter().map(|c| self.render(*c, on_path)).collect())
            }
            Some(Node::Object(fields)) => {
                let mut map = Map::new();
                for (k, c) in fields {
                    map.insert(k.clone(), self.render(*c, on_path));
                }
                Value::Object(map)
            }
        };
        on_path.remove(&id);
        rendered
    }
}
