//! Storage backends for the entity graph
//!
//! `GraphStore` covers whole-graph loads and UI writes; `RecordStore`
//! covers the filtered row access used by the investigation pipeline and
//! deduplication. `SqliteStore` implements both.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{AddReport, GraphStore, OpenStore, RecordStore, StorageError, StorageResult};
