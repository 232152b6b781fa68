//! Query system over the entity graph
//!
//! Resolves free-text names to entities, finds multi-hop paths between
//! them and recognises connection-style questions.

mod connection;
mod path;
mod resolve;

pub use connection::detect_connection_query;
pub use path::{
    find_paths, find_paths_narrative, trace_connection, ConnectionTrace, Hop, Path, PathQuery,
    DEFAULT_MAX_HOPS, DEFAULT_MAX_PATHS,
};
pub use resolve::{normalize, resolve, resolve_match, EntityMatch, MatchKind};
