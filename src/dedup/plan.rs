//! Merge planning: canonical selection, alias union and id remapping
//!
//! A plan is computed entirely in memory from the current node and edge
//! lists. Nothing touches the store until the plan is applied.

use crate::graph::{Edge, EdgeId, EntityType, Node, NodeId, TripleKey};
use crate::query::normalize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Aliases listed per entity in the model prompt
const PROMPT_ALIASES: usize = 5;

/// Canonical entities and where every merged id now points
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    /// Surviving nodes in first-seen order
    canonical: Vec<Node>,
    index: HashMap<NodeId, usize>,
    /// Merged id -> canonical id; never contains identity pairs
    remap: BTreeMap<NodeId, NodeId>,
    heuristic_merges: usize,
    semantic_merges: usize,
}

fn description_len(node: &Node) -> usize {
    node.description.chars().count()
}

/// Fold `other` into `canonical`: labels and aliases become aliases,
/// the longer description wins.
fn absorb(canonical: &mut Node, other: &Node) {
    canonical.aliases.insert(other.label.clone());
    canonical.aliases.extend(other.aliases.iter().cloned());
    if description_len(other) > description_len(canonical) {
        canonical.description = other.description.clone();
    }
}

impl MergePlan {
    /// Pass 1: group by `(normalize(label), type)` and merge each group
    /// into its member with the longest description.
    ///
    /// Nodes whose label normalizes to nothing are never grouped.
    pub fn heuristic(nodes: &[Node]) -> Self {
        let mut groups: Vec<Vec<&Node>> = Vec::new();
        let mut by_key: HashMap<(String, EntityType), usize> = HashMap::new();

        for node in nodes {
            let label = normalize(&node.label);
            if label.is_empty() {
                groups.push(vec![node]);
                continue;
            }
            match by_key.get(&(label.clone(), node.entity_type)) {
                Some(&i) => groups[i].push(node),
                None => {
                    by_key.insert((label, node.entity_type), groups.len());
                    groups.push(vec![node]);
                }
            }
        }

        let mut plan = Self::default();
        for mut group in groups {
            // Stable: ties keep the first-seen member
            group.sort_by_key(|n| std::cmp::Reverse(description_len(n)));
            let mut canonical = group[0].clone();
            for other in &group[1..] {
                absorb(&mut canonical, other);
                if other.id != canonical.id {
                    plan.remap.insert(other.id.clone(), canonical.id.clone());
                    plan.heuristic_merges += 1;
                }
            }
            canonical.aliases.remove(&canonical.label);
            plan.index.insert(canonical.id.clone(), plan.canonical.len());
            plan.canonical.push(canonical);
        }
        plan
    }

    /// Surviving entities, in first-seen order
    pub fn canonical(&self) -> &[Node] {
        &self.canonical
    }

    pub fn canonical_count(&self) -> usize {
        self.canonical.len()
    }

    pub fn heuristic_merges(&self) -> usize {
        self.heuristic_merges
    }

    pub fn semantic_merges(&self) -> usize {
        self.semantic_merges
    }

    /// Merged ids and their canonical targets
    pub fn remap(&self) -> &BTreeMap<NodeId, NodeId> {
        &self.remap
    }

    /// Where `id` lives after the merge
    pub fn resolve<'a>(&'a self, id: &'a NodeId) -> &'a NodeId {
        self.remap.get(id).unwrap_or(id)
    }

    /// `id | label | type | aliases: a, b` lines for the model prompt
    pub fn entity_lines(&self) -> Vec<String> {
        self.canonical
            .iter()
            .map(|n| {
                let aliases: Vec<&str> = n
                    .aliases
                    .iter()
                    .take(PROMPT_ALIASES)
                    .map(String::as_str)
                    .collect();
                format!(
                    "{} | {} | {} | aliases: {}",
                    n.id,
                    n.label,
                    n.entity_type.as_str(),
                    aliases.join(", ")
                )
            })
            .collect()
    }

    /// Pass 2: merge a group of ids judged to be one real-world entity.
    ///
    /// Ids are resolved through the existing remap first; unknown ids are
    /// ignored. Every id that pointed at an absorbed entity is repointed to
    /// the new canonical. Returns the number of entities absorbed.
    pub fn merge_group(&mut self, ids: &[NodeId]) -> usize {
        let mut members: Vec<usize> = Vec::new();
        for id in ids {
            let resolved = self.resolve(id).clone();
            if let Some(&i) = self.index.get(&resolved) {
                if !members.contains(&i) {
                    members.push(i);
                }
            }
        }
        if members.len() < 2 {
            return 0;
        }

        members.sort_by_key(|&i| std::cmp::Reverse(description_len(&self.canonical[i])));
        let keep = members[0];
        let canonical_id = self.canonical[keep].id.clone();

        let absorbed: Vec<Node> = members[1..].iter().map(|&i| self.canonical[i].clone()).collect();
        for other in &absorbed {
            absorb(&mut self.canonical[keep], other);
            for target in self.remap.values_mut() {
                if *target == other.id {
                    *target = canonical_id.clone();
                }
            }
            self.remap.insert(other.id.clone(), canonical_id.clone());
        }
        let label = self.canonical[keep].label.clone();
        self.canonical[keep].aliases.remove(&label);

        let gone: HashSet<NodeId> = absorbed.into_iter().map(|n| n.id).collect();
        self.canonical.retain(|n| !gone.contains(&n.id));
        self.index = self
            .canonical
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        self.semantic_merges += gone.len();
        gone.len()
    }

    /// Retarget edges onto canonical ids, then drop self-loops and
    /// duplicate `(source, predicate, target)` triples (first one kept).
    ///
    /// A moved edge takes the id derived from its new triple; its old id is
    /// retired.
    pub fn rewrite_edges(&self, edges: &[Edge]) -> EdgeRewrite {
        let mut rewrite = EdgeRewrite::default();
        let mut seen: HashSet<TripleKey> = HashSet::new();

        for edge in edges {
            let source = self.resolve(&edge.source).clone();
            let target = self.resolve(&edge.target).clone();
            let moved = source != edge.source || target != edge.target;

            if source == target {
                rewrite.self_loops.push(edge.id.clone());
                continue;
            }
            if !seen.insert((source.clone(), edge.predicate.clone(), target.clone())) {
                rewrite.duplicates.push(edge.id.clone());
                continue;
            }
            if moved {
                let id = EdgeId::derive(&source, &edge.predicate, &target);
                if id != edge.id {
                    rewrite.retired.push(edge.id.clone());
                }
                rewrite.updated.push(Edge {
                    id,
                    source,
                    target,
                    ..edge.clone()
                });
            }
        }
        rewrite
    }

    /// Canonical nodes that differ from their stored version
    pub fn changed_nodes(&self, original: &[Node]) -> Vec<Node> {
        let before: HashMap<&NodeId, &Node> = original.iter().map(|n| (&n.id, n)).collect();
        self.canonical
            .iter()
            .filter(|n| before.get(&n.id).map_or(true, |old| *old != *n))
            .cloned()
            .collect()
    }

    /// Ids to delete, limited to nodes that actually exist
    pub fn removed_nodes(&self, original: &[Node]) -> Vec<NodeId> {
        let existing: BTreeSet<&NodeId> = original.iter().map(|n| &n.id).collect();
        self.remap
            .keys()
            .filter(|id| existing.contains(id))
            .cloned()
            .collect()
    }
}

/// Edge changes implied by a merge plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRewrite {
    /// Edges whose endpoints moved, under their re-derived ids
    pub updated: Vec<Edge>,
    /// Previous ids of the edges in `updated`
    pub retired: Vec<EdgeId>,
    pub self_loops: Vec<EdgeId>,
    pub duplicates: Vec<EdgeId>,
}

impl EdgeRewrite {
    /// Edges that disappear from the graph
    pub fn removed(&self) -> Vec<EdgeId> {
        self.self_loops.iter().chain(&self.duplicates).cloned().collect()
    }

    /// Every id to delete before `updated` is written back
    pub fn deletions(&self) -> Vec<EdgeId> {
        self.self_loops
            .iter()
            .chain(&self.duplicates)
            .chain(&self.retired)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.self_loops.is_empty() && self.duplicates.is_empty()
    }
}
