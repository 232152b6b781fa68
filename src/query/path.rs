//! Multi-hop path finding between two entities

use crate::graph::{Confidence, Edge, GraphSnapshot, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use super::resolve::resolve;

/// Default hop limit for path queries and narratives
pub const DEFAULT_MAX_HOPS: usize = 4;
/// Default number of paths collected before stopping
pub const DEFAULT_MAX_PATHS: usize = 3;
/// Upper bound on queue expansions; per-path cycle checks alone let dense
/// graphs blow up combinatorially.
const DEFAULT_MAX_EXPANSIONS: usize = 200_000;

/// One step along a path: the node reached and the edge used to reach it
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub node: NodeId,
    /// `None` for the starting node
    pub edge: Option<Edge>,
}

/// An ordered walk from the start entity to the goal entity
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub hops: Vec<Hop>,
}

impl Path {
    fn start(node: NodeId) -> Self {
        Self {
            hops: vec![Hop { node, edge: None }],
        }
    }

    /// Number of edges traversed
    pub fn len(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.hops.iter().map(|h| &h.node)
    }

    pub fn last(&self) -> &NodeId {
        // A path always holds at least its start hop
        &self.hops[self.hops.len() - 1].node
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.hops.iter().any(|h| &h.node == id)
    }

    fn extended(&self, node: NodeId, edge: Edge) -> Self {
        let mut hops = self.hops.clone();
        hops.push(Hop {
            node,
            edge: Some(edge),
        });
        Self { hops }
    }
}

/// Query for finding paths between two entities
///
/// Edges are directed data but traversal treats the graph as undirected.
#[derive(Debug, Clone)]
pub struct PathQuery {
    pub source: NodeId,
    pub target: NodeId,
    pub max_hops: usize,
    pub max_paths: usize,
    pub max_expansions: usize,
}

impl PathQuery {
    pub fn between(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            max_hops: DEFAULT_MAX_HOPS,
            max_paths: DEFAULT_MAX_PATHS,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }

    pub fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths;
        self
    }

    pub fn max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    /// Breadth-first search, shortest paths first.
    ///
    /// A node may not repeat within one path but may appear on several
    /// paths. Returns nothing when start and goal are equal or either has no
    /// edges.
    pub fn execute(&self, graph: &GraphSnapshot) -> Vec<Path> {
        if self.source == self.target || self.max_paths == 0 {
            return Vec::new();
        }

        let adjacency = Adjacency::build(graph);
        if !adjacency.contains(&self.source) || !adjacency.contains(&self.target) {
            return Vec::new();
        }

        let mut found = Vec::new();
        let mut queue: VecDeque<Path> = VecDeque::new();
        queue.push_back(Path::start(self.source.clone()));
        let mut expansions = 0usize;

        while let Some(path) = queue.pop_front() {
            if found.len() >= self.max_paths {
                break;
            }
            if path.len() > self.max_hops {
                continue;
            }
            if path.last() == &self.target && !path.is_empty() {
                found.push(path);
                continue;
            }

            expansions += 1;
            if expansions > self.max_expansions {
                tracing::warn!(
                    source = %self.source,
                    target = %self.target,
                    "path search hit expansion limit"
                );
                break;
            }

            for &(neighbor, edge) in adjacency.neighbors(path.last()) {
                if !path.contains(neighbor) {
                    queue.push_back(path.extended(neighbor.clone(), edge.clone()));
                }
            }
        }

        found
    }
}

/// Find up to `max_paths` paths of at most `max_hops` edges
pub fn find_paths(
    graph: &GraphSnapshot,
    start: &NodeId,
    end: &NodeId,
    max_hops: usize,
    max_paths: usize,
) -> Vec<Path> {
    PathQuery::between(start.clone(), end.clone())
        .max_hops(max_hops)
        .max_paths(max_paths)
        .execute(graph)
}

/// Undirected neighbor lists, keeping only the first edge seen per neighbor
struct Adjacency<'a> {
    neighbors: HashMap<&'a NodeId, Vec<(&'a NodeId, &'a Edge)>>,
}

impl<'a> Adjacency<'a> {
    fn build(graph: &'a GraphSnapshot) -> Self {
        let mut neighbors: HashMap<&NodeId, Vec<(&NodeId, &Edge)>> = HashMap::new();
        let mut linked: HashSet<(&NodeId, &NodeId)> = HashSet::new();

        for edge in &graph.edges {
            if edge.is_self_loop() {
                continue;
            }
            for (from, to) in [(&edge.source, &edge.target), (&edge.target, &edge.source)] {
                if linked.insert((from, to)) {
                    neighbors.entry(from).or_default().push((to, edge));
                }
            }
        }

        Self { neighbors }
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.neighbors.contains_key(id)
    }

    fn neighbors(&self, id: &NodeId) -> &[(&'a NodeId, &'a Edge)] {
        self.neighbors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Outcome of tracing a connection between two named entities
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionTrace {
    /// One or both names matched nothing; holds the unresolved names
    Unresolved(Vec<String>),
    /// Both names resolved to the same node
    SameEntity,
    NoPath,
    Paths(Vec<Path>),
}

/// Resolve two names and search for paths between them.
///
/// Equal endpoints short-circuit to `SameEntity` without searching.
pub fn trace_connection(graph: &GraphSnapshot, entity_a: &str, entity_b: &str) -> ConnectionTrace {
    let id_a = resolve(graph, entity_a);
    let id_b = resolve(graph, entity_b);

    let (id_a, id_b) = match (id_a, id_b) {
        (Some(a), Some(b)) => (a, b),
        (a, b) => {
            let mut missing = Vec::new();
            if a.is_none() {
                missing.push(entity_a.to_string());
            }
            if b.is_none() {
                missing.push(entity_b.to_string());
            }
            return ConnectionTrace::Unresolved(missing);
        }
    };

    if id_a == id_b {
        return ConnectionTrace::SameEntity;
    }

    let paths = find_paths(graph, &id_a, &id_b, DEFAULT_MAX_HOPS, DEFAULT_MAX_PATHS);
    if paths.is_empty() {
        ConnectionTrace::NoPath
    } else {
        ConnectionTrace::Paths(paths)
    }
}

impl ConnectionTrace {
    /// Human-readable narrative with evidence for each hop
    pub fn render(&self, graph: &GraphSnapshot, entity_a: &str, entity_b: &str) -> String {
        match self {
            Self::Unresolved(missing) => {
                let quoted: Vec<String> = missing.iter().map(|m| format!("'{m}'")).collect();
                format!("Could not find entities: {} in the knowledge graph.", quoted.join(", "))
            }
            Self::SameEntity => format!("'{entity_a}' and '{entity_b}' refer to the same entity."),
            Self::NoPath => format!(
                "No connection found between '{entity_a}' and '{entity_b}' within {DEFAULT_MAX_HOPS} hops."
            ),
            Self::Paths(paths) => paths
                .iter()
                .enumerate()
                .map(|(i, path)| render_path(graph, i + 1, path))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn has_paths(&self) -> bool {
        matches!(self, Self::Paths(_))
    }
}

/// Resolve, search and render in one call
pub fn find_paths_narrative(graph: &GraphSnapshot, entity_a: &str, entity_b: &str) -> String {
    trace_connection(graph, entity_a, entity_b).render(graph, entity_a, entity_b)
}

fn render_path(graph: &GraphSnapshot, number: usize, path: &Path) -> String {
    let hops = path.len();
    let mut out = format!("Path {number} ({hops} hop{}):", if hops > 1 { "s" } else { "" });

    for pair in path.hops.windows(2) {
        let (from, to) = (&pair[0].node, &pair[1].node);
        let Some(edge) = &pair[1].edge else { continue };

        let from_label = graph.label_of(from);
        let to_label = graph.label_of(to);
        // Traversal is undirected; keep the stored direction visible.
        if &edge.source == from {
            let _ = write!(out, "\n  {from_label} --[{}]--> {to_label}", edge.predicate);
        } else {
            let _ = write!(out, "\n  {from_label} <--[{}]-- {to_label}", edge.predicate);
        }
        if !edge.evidence_text.is_empty() {
            let _ = write!(out, "\n    Evidence: \"{}\"", edge.evidence_text);
        }
        if !edge.source_filename.is_empty() {
            let _ = write!(out, "\n    Source: {}", edge.source_filename);
        }
        if edge.confidence == Confidence::Inferred {
            out.push_str(" (inferred)");
        }
    }
    out
}
