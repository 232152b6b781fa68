//! In-memory view of the whole graph

use super::edge::{Edge, TripleKey};
use super::node::{Node, NodeId, Position};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Invariant violations when mutating a snapshot
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("self-loop edge rejected: {0}")]
    SelfLoop(String),

    #[error("edge {edge} references missing node {node}")]
    MissingEndpoint { edge: String, node: String },
}

/// Center and minimum radius of the default circular layout
const LAYOUT_CENTER: f64 = 400.0;
const LAYOUT_MIN_RADIUS: f64 = 200.0;
const LAYOUT_SPACING: f64 = 15.0;

/// A read snapshot of nodes and edges, as returned by `GraphStore::load`
///
/// Nodes and edges keep store order; lookups go through a lazily built
/// index only when needed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.get_node(id).is_some()
    }

    /// Display label for a node, falling back to the raw id
    pub fn label_of<'a>(&'a self, id: &'a NodeId) -> &'a str {
        self.get_node(id).map(|n| n.label.as_str()).unwrap_or(id.as_str())
    }

    /// Insert or replace a node by id
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Insert or replace an edge by id, enforcing endpoint invariants
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if edge.is_self_loop() {
            return Err(GraphError::SelfLoop(edge.id.to_string()));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.contains(endpoint) {
                return Err(GraphError::MissingEndpoint {
                    edge: edge.id.to_string(),
                    node: endpoint.to_string(),
                });
            }
        }
        match self.edges.iter_mut().find(|e| e.id == edge.id) {
            Some(existing) => *existing = edge,
            None => self.edges.push(edge),
        }
        Ok(())
    }

    /// Set `metadata.degree` on every node from the current edge list
    pub fn recompute_degrees(&mut self) {
        let mut degree: HashMap<&NodeId, usize> = HashMap::new();
        for edge in &self.edges {
            *degree.entry(&edge.source).or_default() += 1;
            *degree.entry(&edge.target).or_default() += 1;
        }
        let degrees: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| degree.get(&n.id).copied().unwrap_or(0))
            .collect();
        for (node, d) in self.nodes.iter_mut().zip(degrees) {
            node.metadata.degree = d;
        }
    }

    /// Place every node evenly on a circle around (400, 400)
    pub fn circular_layout(&mut self) {
        let n = self.nodes.len();
        if n == 0 {
            return;
        }
        let radius = LAYOUT_MIN_RADIUS.max(n as f64 * LAYOUT_SPACING);
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            node.position = Position {
                x: LAYOUT_CENTER + radius * angle.cos(),
                y: LAYOUT_CENTER + radius * angle.sin(),
            };
        }
    }

    /// Edges that violate the no-self-loop or unique-triple invariants
    pub fn invariant_violations(&self) -> Vec<&Edge> {
        let mut seen: HashSet<TripleKey> = HashSet::new();
        self.edges
            .iter()
            .filter(|e| e.is_self_loop() || !seen.insert(e.key()))
            .collect()
    }
}
