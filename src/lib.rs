//! Casegraph: investigative knowledge graph and research pipeline
//!
//! Entities and relationships extracted from case documents live in a
//! SQLite-backed graph. Questions are answered by an investigation that
//! combines entity profiles, multi-hop connection paths, graph traversal
//! and vector search over document chunks, then streams a cited report.
//!
//! # Example
//!
//! ```
//! use casegraph::query::{find_paths_narrative, DEFAULT_MAX_HOPS};
//! use casegraph::{Edge, EntityType, GraphSnapshot, Node};
//!
//! let graph = GraphSnapshot::new(
//!     vec![
//!         Node::new("acme_corp", "Acme Corp", EntityType::Organization),
//!         Node::new("john_smith", "John Smith", EntityType::Person),
//!     ],
//!     vec![Edge::new("john_smith", "employed_by", "acme_corp")],
//! );
//! let narrative = find_paths_narrative(&graph, "John Smith", "Acme Corp");
//! assert!(narrative.contains("employed_by"));
//! assert_eq!(DEFAULT_MAX_HOPS, 4);
//! ```

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod dedup;
mod graph;
pub mod investigate;
pub mod model;
pub mod query;
pub mod search;
pub mod storage;

pub use cancel::CancellationToken;
pub use collaborators::{Collaborators, SetupError};
pub use config::Config;
pub use graph::{
    apply_communities, community_color, CommunityAssignment, Confidence, Edge, EdgeId,
    EntityType, GraphError, GraphSnapshot, Node, NodeId, NodeMetadata, Position, TripleKey,
    COMMUNITY_COLORS,
};
pub use investigate::{InvestigationEvent, InvestigationRequest, Investigator, Step, StepStatus};
pub use storage::{GraphStore, OpenStore, RecordStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
