//! Semantic retrieval over document chunks
//!
//! A search pass embeds a query, asks the vector index for neighbours,
//! extracts chunk text and optionally re-ranks. Passes share no state, so
//! the pipeline runs several of them concurrently and merges the results
//! into an [`EvidencePool`].

mod pass;
mod pool;
mod rerank;
mod vector;

pub use pass::{extract_chunk_text, Candidate, PageRef, SearchError, SearchRequest, Searcher};
pub use pool::{chunk_signature, EvidencePool};
pub use rerank::{sigmoid, CrossEncoderReranker, RerankError, RerankResult, Reranker};
pub use vector::{
    MemoryVectorIndex, MetadataFilter, PineconeIndex, VectorError, VectorIndex, VectorMatch,
    VectorRecord,
};
