//! Name → node id resolution
//!
//! Matching is precedence-based, not best-score-based: the first rule that
//! produces a hit wins, in the order exact label, partial label, alias, id.

use crate::graph::{GraphSnapshot, Node, NodeId};

/// Lowercase, drop everything but ASCII alphanumerics and whitespace, trim
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Which rule produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    ExactLabel,
    PartialLabel,
    Alias,
    Id,
}

/// A resolved entity and how it was found
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch<'a> {
    pub node: &'a Node,
    pub kind: MatchKind,
}

/// Resolve `name` against a set of candidate nodes.
///
/// Candidates are visited in id order so that ties among partial matches
/// resolve the same way regardless of store order. A name that normalizes to
/// the empty string never matches.
pub fn resolve_match<'a, I>(nodes: I, name: &str) -> Option<EntityMatch<'a>>
where
    I: IntoIterator<Item = &'a Node>,
{
    let query = normalize(name);
    if query.is_empty() {
        return None;
    }

    let mut candidates: Vec<(&'a Node, String)> =
        nodes.into_iter().map(|n| (n, normalize(&n.label))).collect();
    candidates.sort_by(|a, b| a.0.id.cmp(&b.0.id));

    let found = |node: &'a Node, kind| Some(EntityMatch { node, kind });

    if let Some((node, _)) = candidates.iter().find(|(_, label)| *label == query) {
        return found(*node, MatchKind::ExactLabel);
    }

    if let Some((node, _)) = candidates
        .iter()
        .find(|(_, label)| !label.is_empty() && (label.contains(&query) || query.contains(label.as_str())))
    {
        return found(*node, MatchKind::PartialLabel);
    }

    if let Some((node, _)) = candidates.iter().find(|(n, _)| {
        n.aliases.iter().any(|alias| {
            let alias = normalize(alias);
            alias == query || alias.contains(&query)
        })
    }) {
        return found(*node, MatchKind::Alias);
    }

    let as_id = query.replace(' ', "_");
    candidates
        .iter()
        .find(|(n, _)| n.id.as_str().to_lowercase() == as_id)
        .and_then(|(node, _)| found(*node, MatchKind::Id))
}

/// Resolve a name to a node id in a loaded graph
pub fn resolve(graph: &GraphSnapshot, name: &str) -> Option<NodeId> {
    resolve_match(&graph.nodes, name).map(|m| m.node.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityType;

    fn graph() -> GraphSnapshot {
        GraphSnapshot::new(
            vec![
                Node::new("jane_doe_2", "Janet Doerr", EntityType::Person),
                Node::new("jdoe", "Jane Doe", EntityType::Person).with_alias("J. Doe"),
                Node::new("acme", "Acme Corporation", EntityType::Organization)
                    .with_alias("ACME Holdings, Inc."),
                Node::new("wire_transfer_17", "", EntityType::FinancialEntity),
            ],
            vec![],
        )
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  J. Doe, Esq.! "), "j doe esq");
        assert_eq!(normalize("Acme-Corp"), "acmecorp");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn exact_label_beats_alias_and_id() {
        let g = graph();
        let m = resolve_match(&g.nodes, "jane doe").unwrap();
        assert_eq!(m.node.id.as_str(), "jdoe");
        assert_eq!(m.kind, MatchKind::ExactLabel);
    }

    #[test]
    fn partial_label_matches_in_either_direction() {
        let g = graph();
        let m = resolve_match(&g.nodes, "Acme").unwrap();
        assert_eq!(m.kind, MatchKind::PartialLabel);
        assert_eq!(m.node.id.as_str(), "acme");

        let m = resolve_match(&g.nodes, "the Acme Corporation board").unwrap();
        assert_eq!(m.node.id.as_str(), "acme");
    }

    #[test]
    fn alias_matches_when_no_label_does() {
        let g = graph();
        let m = resolve_match(&g.nodes, "holdings inc").unwrap();
        assert_eq!(m.kind, MatchKind::Alias);
        assert_eq!(m.node.id.as_str(), "acme");
    }

    #[test]
    fn id_match_is_last_resort() {
        let g = graph();
        let m = resolve_match(&g.nodes, "Wire Transfer 17").unwrap();
        assert_eq!(m.kind, MatchKind::Id);
        assert_eq!(m.node.id.as_str(), "wire_transfer_17");
    }

    #[test]
    fn partial_ties_resolve_by_id_order() {
        let g = GraphSnapshot::new(
            vec![
                Node::new("z_smith", "John Smith Jr", EntityType::Person),
                Node::new("a_smith", "John Smith Sr", EntityType::Person),
            ],
            vec![],
        );
        assert_eq!(resolve(&g, "john smith"), Some(NodeId::from("a_smith")));
    }

    #[test]
    fn unresolvable_and_empty_names_return_none() {
        let g = graph();
        assert_eq!(resolve(&g, "Nobody Atall"), None);
        assert_eq!(resolve(&g, "..."), None);
    }
}
