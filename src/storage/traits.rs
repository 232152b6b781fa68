//! Storage trait definitions

use crate::graph::{CommunityAssignment, Edge, EdgeId, GraphSnapshot, Node, NodeId};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of an `add_elements` upsert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
    /// Self-loops and edges whose endpoints do not exist
    pub edges_rejected: usize,
}

/// Whole-graph access used by path finding, import and the UI
///
/// Implementations must be thread-safe (Send + Sync) so concurrent
/// investigations can share one store.
pub trait GraphStore: Send + Sync {
    /// Load every node and edge; `metadata.degree` is recomputed
    fn load(&self) -> StorageResult<GraphSnapshot>;

    /// Upsert nodes and edges by id
    ///
    /// Nodes are written first so edges may reference nodes from the same
    /// call. Edges that would break the no-self-loop or existing-endpoint
    /// invariants are skipped and counted.
    fn add_elements(&self, nodes: &[Node], edges: &[Edge]) -> StorageResult<AddReport>;

    /// Move a node on the canvas
    fn update_node_position(&self, id: &NodeId, x: f64, y: f64) -> StorageResult<()>;
}

/// Table-like access to the `nodes` and `edges` collections
///
/// Used by entity intelligence, keyword search and deduplication. Result
/// order is insertion order unless stated otherwise.
pub trait RecordStore: Send + Sync {
    // === Node Operations ===

    /// Case-insensitive substring search over labels and aliases
    fn search_nodes(&self, term: &str, limit: usize) -> StorageResult<Vec<Node>>;

    fn nodes_by_ids(&self, ids: &[NodeId]) -> StorageResult<Vec<Node>>;

    fn all_nodes(&self) -> StorageResult<Vec<Node>>;

    fn upsert_nodes(&self, nodes: &[Node]) -> StorageResult<usize>;

    /// Delete nodes by id; edges are left to the caller
    fn delete_nodes(&self, ids: &[NodeId]) -> StorageResult<usize>;

    /// Stamp community ids and colours onto member nodes
    fn apply_communities(&self, assignments: &[CommunityAssignment]) -> StorageResult<usize>;

    // === Edge Operations ===

    /// Edges where `id` is the source
    fn edges_from(&self, id: &NodeId, limit: usize) -> StorageResult<Vec<Edge>>;

    /// Edges where `id` is the target
    fn edges_to(&self, id: &NodeId, limit: usize) -> StorageResult<Vec<Edge>>;

    /// Case-insensitive substring search over evidence text
    fn search_evidence(&self, term: &str, limit: usize) -> StorageResult<Vec<Edge>>;

    fn all_edges(&self) -> StorageResult<Vec<Edge>>;

    fn upsert_edges(&self, edges: &[Edge]) -> StorageResult<usize>;

    fn delete_edges(&self, ids: &[EdgeId]) -> StorageResult<usize>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
