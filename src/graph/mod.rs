//! Core graph data structures

mod community;
mod edge;
mod node;
mod snapshot;


pub use community::{apply_communities, community_color, CommunityAssignment, COMMUNITY_COLORS};
pub use edge::{Confidence, Edge, EdgeId, TripleKey};
pub use node::{EntityType, Node, NodeId, NodeMetadata, Position};
pub use snapshot::{GraphError, GraphSnapshot};
