//! Community assignment contract
//!
//! Detection runs elsewhere. This module only consumes its output and
//! stamps community ids and palette colours onto nodes.

use super::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Palette cycled by community id
pub const COMMUNITY_COLORS: [&str; 15] = [
    "#3b82f6", "#ef4444", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#06b6d4", "#f97316",
    "#84cc16", "#6366f1", "#14b8a6", "#e11d48", "#0ea5e9", "#a855f7", "#22c55e",
];

/// Colour for a community id
pub fn community_color(id: usize) -> &'static str {
    COMMUNITY_COLORS[id % COMMUNITY_COLORS.len()]
}

/// One detected community
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityAssignment {
    pub id: usize,
    pub members: Vec<NodeId>,
}

/// Stamp `communityId`/`communityColor` on member nodes, returning how many
/// nodes changed. Members that are not in `nodes` are ignored.
pub fn apply_communities(nodes: &mut [Node], assignments: &[CommunityAssignment]) -> usize {
    let by_member: HashMap<&NodeId, usize> = assignments
        .iter()
        .flat_map(|a| a.members.iter().map(move |m| (m, a.id)))
        .collect();

    let mut changed = 0;
    for node in nodes.iter_mut() {
        if let Some(&community) = by_member.get(&node.id) {
            node.metadata.community_id = Some(community);
            node.metadata.community_color = Some(community_color(community).to_string());
            changed += 1;
        }
    }
    changed
}
