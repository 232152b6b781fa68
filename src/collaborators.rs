//! External collaborators wired once at startup
//!
//! The pipeline, resolver and deduplicator receive their clients from a
//! `Collaborators` value instead of reaching for globals.

use crate::config::{Config, InvestigationConfig};
use crate::model::{OpenAiModel, TextModel};
use crate::search::{CrossEncoderReranker, PineconeIndex, Reranker, Searcher, VectorIndex};
use crate::storage::{GraphStore, OpenStore, RecordStore, SqliteStore, StorageError};
use std::sync::Arc;

/// A required collaborator could not be built
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("failed to open store: {0}")]
    Storage(#[from] StorageError),
}

/// Shared clients for one process
#[derive(Clone)]
pub struct Collaborators {
    pub graph: Arc<dyn GraphStore>,
    pub records: Arc<dyn RecordStore>,
    pub model: Arc<dyn TextModel>,
    pub index: Arc<dyn VectorIndex>,
    pub reranker: Option<Arc<dyn Reranker>>,
}

impl Collaborators {
    /// Wire collaborators around one store serving both graph and record
    /// access.
    pub fn new<S>(store: Arc<S>, model: Arc<dyn TextModel>, index: Arc<dyn VectorIndex>) -> Self
    where
        S: GraphStore + RecordStore + 'static,
    {
        Self {
            graph: store.clone(),
            records: store,
            model,
            index,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build production clients from configuration.
    ///
    /// Fails before any investigation starts when the model endpoint, its
    /// key or the vector host is missing. The re-ranker is optional.
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        let base_url = config
            .model
            .base_url
            .as_deref()
            .ok_or(SetupError::MissingSetting("model.base_url (LLM_BASE_URL)"))?;
        if config.model.api_key.is_none() {
            return Err(SetupError::MissingSetting("model.api_key (LLM_API_KEY)"));
        }
        let host = config
            .vector
            .host
            .as_deref()
            .ok_or(SetupError::MissingSetting("vector.host (VECTOR_HOST)"))?;

        let store = Arc::new(SqliteStore::open(config.store.resolved_path())?);
        let model: Arc<dyn TextModel> = Arc::new(OpenAiModel::new(base_url, &config.model));
        let index: Arc<dyn VectorIndex> = Arc::new(PineconeIndex::new(host, &config.vector));

        let mut collaborators = Self::new(store, model, index);
        if let Some(url) = &config.reranker.base_url {
            tracing::info!(url = %url, "cross-encoder reranker enabled");
            collaborators = collaborators
                .with_reranker(Arc::new(CrossEncoderReranker::new(url.as_str(), &config.reranker)));
        }
        Ok(collaborators)
    }

    /// A search-pass runner using these clients
    pub fn searcher(&self, config: &InvestigationConfig) -> Searcher {
        Searcher::new(self.model.clone(), self.index.clone())
            .with_reranker(self.reranker.clone())
            .with_call_timeout(config.call_timeout())
            .with_embed_attempts(config.embed_attempts)
    }
}
