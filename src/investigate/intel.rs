//! Entity intelligence and graph evidence from the record store

use crate::graph::{Edge, EdgeId, EntityType, NodeId};
use crate::query::{normalize, resolve_match};
use crate::storage::{RecordStore, StorageResult};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Candidate nodes fetched for fuzzy entity lookup
const LOOKUP_CANDIDATES: usize = 5;
/// Edges fetched per direction for an entity profile
const PROFILE_EDGES: usize = 100;
/// Connected entities whose labels are looked up
const PROFILE_NEIGHBOURS: usize = 50;

/// Edges of one predicate touching the entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipGroup {
    pub predicate: String,
    pub edges: Vec<Edge>,
}

/// Profile of a resolved entity, built per query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityIntel {
    pub entity_id: NodeId,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub description: String,
    pub aliases: Vec<String>,
    pub edge_count: usize,
    /// Neighbour labels in first-seen order
    pub connected_entities: Vec<String>,
    /// Grouped by predicate in first-seen order
    pub relationship_types: Vec<RelationshipGroup>,
}

impl EntityIntel {
    pub fn relationship_names(&self) -> Vec<String> {
        self.relationship_types
            .iter()
            .map(|g| g.predicate.clone())
            .collect()
    }

    /// `ENTITY PROFILE` block for the synthesis context
    pub fn profile_block(&self) -> String {
        let description = if self.description.is_empty() {
            "N/A"
        } else {
            &self.description
        };
        let connected: Vec<&str> = self
            .connected_entities
            .iter()
            .take(15)
            .map(String::as_str)
            .collect();
        let relationships: Vec<&str> = self
            .relationship_types
            .iter()
            .take(10)
            .map(|g| g.predicate.as_str())
            .collect();

        let mut block = format!("\n\nENTITY PROFILE: {}\n", self.entity_name);
        block.push_str(&format!("Type: {}\n", self.entity_type.as_str()));
        block.push_str(&format!("Description: {description}\n"));
        block.push_str(&format!("Aliases: {}\n", self.aliases.join(", ")));
        block.push_str(&format!("Total connections: {}\n", self.edge_count));
        block.push_str(&format!("Connected entities: {}\n", connected.join(", ")));
        block.push_str(&format!("Relationship types: {}\n", relationships.join(", ")));
        block
    }
}

/// Fuzzy-match `name` in the store and gather its edges and neighbours.
///
/// Candidates come from a substring search; among them the resolver's
/// precedence rules pick the entity, falling back to the first candidate.
pub fn lookup_entity_intel(store: &dyn RecordStore, name: &str) -> StorageResult<Option<EntityIntel>> {
    if normalize(name).is_empty() {
        return Ok(None);
    }

    let candidates = store.search_nodes(name.trim(), LOOKUP_CANDIDATES)?;
    let best = match resolve_match(&candidates, name) {
        Some(m) => m.node,
        None => match candidates.first() {
            Some(node) => node,
            None => return Ok(None),
        },
    };
    let entity_id = best.id.clone();

    let mut edges = store.edges_from(&entity_id, PROFILE_EDGES)?;
    edges.extend(store.edges_to(&entity_id, PROFILE_EDGES)?);

    let mut neighbour_ids: Vec<NodeId> = Vec::new();
    for edge in &edges {
        for id in [&edge.source, &edge.target] {
            if *id != entity_id && !neighbour_ids.contains(id) {
                neighbour_ids.push(id.clone());
            }
        }
    }
    neighbour_ids.truncate(PROFILE_NEIGHBOURS);

    let neighbours = store.nodes_by_ids(&neighbour_ids)?;
    let connected_entities = neighbour_ids
        .iter()
        .map(|id| {
            neighbours
                .iter()
                .find(|n| n.id == *id)
                .map(|n| n.label.clone())
                .filter(|label| !label.is_empty())
                .unwrap_or_else(|| id.to_string())
        })
        .collect();

    let mut relationship_types: Vec<RelationshipGroup> = Vec::new();
    for edge in &edges {
        match relationship_types
            .iter_mut()
            .find(|g| g.predicate == edge.predicate)
        {
            Some(group) => group.edges.push(edge.clone()),
            None => relationship_types.push(RelationshipGroup {
                predicate: edge.predicate.clone(),
                edges: vec![edge.clone()],
            }),
        }
    }

    Ok(Some(EntityIntel {
        entity_id,
        entity_name: best.label.clone(),
        entity_type: best.entity_type,
        description: best.description.clone(),
        aliases: best.aliases.iter().cloned().collect(),
        edge_count: edges.len(),
        connected_entities,
        relationship_types,
    }))
}

/// Breadth-first evidence collection outward from `start`.
///
/// Each visited node contributes up to `per_direction` outgoing and
/// incoming edges. Stops after `max_hops` frontiers or once `max_edges`
/// distinct edges are collected.
pub fn collect_graph_evidence(
    store: &dyn RecordStore,
    start: &NodeId,
    max_hops: usize,
    max_edges: usize,
    per_direction: usize,
) -> StorageResult<Vec<Edge>> {
    let mut visited: HashSet<NodeId> = HashSet::from([start.clone()]);
    let mut seen_edges: HashSet<EdgeId> = HashSet::new();
    let mut collected: Vec<Edge> = Vec::new();
    let mut frontier: VecDeque<NodeId> = VecDeque::from([start.clone()]);

    for _ in 0..max_hops {
        if frontier.is_empty() || collected.len() >= max_edges {
            break;
        }
        let mut next = VecDeque::new();
        while let Some(node) = frontier.pop_front() {
            if collected.len() >= max_edges {
                break;
            }
            let mut edges = store.edges_from(&node, per_direction)?;
            edges.extend(store.edges_to(&node, per_direction)?);
            for edge in edges {
                if !seen_edges.insert(edge.id.clone()) {
                    continue;
                }
                let neighbour = edge.other_end(&node).clone();
                if visited.insert(neighbour.clone()) {
                    next.push_back(neighbour);
                }
                collected.push(edge);
            }
        }
        frontier = next;
    }

    collected.truncate(max_edges);
    Ok(collected)
}

/// Edges whose evidence text mentions any of `names`, deduplicated by id
pub fn keyword_search_evidence(
    store: &dyn RecordStore,
    names: &[String],
    limit: usize,
) -> StorageResult<Vec<Edge>> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        for edge in store.search_evidence(name, limit)? {
            if seen.insert(edge.id.clone()) {
                results.push(edge);
            }
        }
    }
    results.truncate(limit * 2);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::storage::{GraphStore, OpenStore, SqliteStore};

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let nodes = vec![
            Node::new("acme_corp", "Acme Corp", EntityType::Organization)
                .with_description("Holding company")
                .with_alias("Acme"),
            Node::new("john_smith", "John Smith", EntityType::Person),
            Node::new("jane_doe", "Jane Doe", EntityType::Person),
            Node::new("island", "Little Island", EntityType::Location),
        ];
        let edges = vec![
            Edge::new("john_smith", "employed_by", "acme_corp").with_evidence(
                "John Smith was employed by Acme Corp.",
                "payroll.pdf",
                3,
            ),
            Edge::new("jane_doe", "director_of", "acme_corp").with_evidence(
                "Jane Doe served as director of Acme.",
                "board.pdf",
                1,
            ),
            Edge::new("jane_doe", "visited", "island").with_evidence(
                "Jane Doe visited Little Island in 2002.",
                "flights.pdf",
                9,
            ),
        ];
        store.add_elements(&nodes, &edges).unwrap();
        store
    }

    #[test]
    fn intel_groups_edges_and_labels_neighbours() {
        let store = store();
        let intel = lookup_entity_intel(&store, "acme corp").unwrap().unwrap();
        assert_eq!(intel.entity_id.as_str(), "acme_corp");
        assert_eq!(intel.edge_count, 2);
        assert_eq!(intel.connected_entities, vec!["John Smith", "Jane Doe"]);
        assert_eq!(intel.relationship_names(), vec!["employed_by", "director_of"]);

        let block = intel.profile_block();
        assert!(block.starts_with("\n\nENTITY PROFILE: Acme Corp\n"));
        assert!(block.contains("Type: ORGANIZATION\n"));
        assert!(block.contains("Aliases: Acme\n"));
    }

    #[test]
    fn unknown_or_empty_names_are_not_found() {
        let store = store();
        assert!(lookup_entity_intel(&store, "Globex").unwrap().is_none());
        assert!(lookup_entity_intel(&store, "?!").unwrap().is_none());
    }

    #[test]
    fn evidence_bfs_respects_hop_and_edge_caps() {
        let store = store();
        let start = NodeId::from("acme_corp");

        let one_hop = collect_graph_evidence(&store, &start, 1, 50, 25).unwrap();
        assert_eq!(one_hop.len(), 2);

        let two_hops = collect_graph_evidence(&store, &start, 2, 50, 25).unwrap();
        assert_eq!(two_hops.len(), 3);
        assert_eq!(two_hops[2].predicate, "visited");

        let capped = collect_graph_evidence(&store, &start, 2, 1, 25).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn keyword_search_dedups_across_names() {
        let store = store();
        let names = vec!["Jane Doe".to_string(), "Acme".to_string(), " ".to_string()];
        let hits = keyword_search_evidence(&store, &names, 10).unwrap();
        assert_eq!(hits.len(), 3);
    }
}
