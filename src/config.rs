//! Runtime configuration
//!
//! Loaded from an optional YAML file, then overridden from the environment.
//! Every field has a default so an empty file (or no file) is valid; whether
//! the resulting settings are sufficient is checked when collaborators are
//! built.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub vector: VectorConfig,
    pub reranker: RerankerConfig,
    pub investigation: InvestigationConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file; defaults to the platform data dir
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_db_path)
    }
}

/// OpenAI-compatible text model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL without the `/v1` suffix, e.g. `https://api.openai.com`
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Pinecone-style vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Index host, e.g. `https://case-docs-abc123.svc.pinecone.io`
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub namespace: Option<String>,
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            host: None,
            api_key: None,
            namespace: None,
            timeout_secs: 30,
        }
    }
}

/// Cross-encoder re-ranker sidecar. Without a base URL results keep
/// similarity order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30)
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: 10,
        }
    }
}

/// Limits and timeouts for the investigation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestigationConfig {
    /// Per external call
    pub call_timeout_secs: u64,
    /// Longest gap between streamed report chunks
    pub stream_idle_timeout_secs: u64,
    pub embed_attempts: usize,
    /// Candidates kept per search pass after re-ranking
    pub rerank_top_n: usize,
    pub pass_fetch_k: usize,
    pub focused_pass_fetch_k: usize,
    pub keyword_fetch_k: usize,
    /// Names searched with a people filter
    pub keyword_filter_names: usize,
    /// Names searched in edge evidence text
    pub keyword_evidence_names: usize,
    pub keyword_evidence_limit: usize,
    pub graph_max_hops: usize,
    pub graph_max_edges: usize,
    pub graph_edges_per_direction: usize,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            stream_idle_timeout_secs: 30,
            embed_attempts: 3,
            rerank_top_n: 5,
            pass_fetch_k: 50,
            focused_pass_fetch_k: 40,
            keyword_fetch_k: 10,
            keyword_filter_names: 3,
            keyword_evidence_names: 5,
            keyword_evidence_limit: 10,
            graph_max_hops: 2,
            graph_max_edges: 50,
            graph_edges_per_direction: 25,
        }
    }
}

impl InvestigationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

/// Deduplication thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// The semantic pass only runs above this many canonical entities
    pub semantic_threshold: usize,
    /// Entities per model request
    pub batch_size: usize,
    /// Rows per store write or delete
    pub store_batch: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 10,
            batch_size: 500,
            store_batch: 100,
        }
    }
}

/// Default database path under the platform data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("casegraph")
        .join("casegraph.db")
}

impl Config {
    /// Parse a YAML file without applying environment overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults or `path`, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style lookups
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn number<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            })
        }

        if let Some(path) = get("CASEGRAPH_DB") {
            self.store.path = Some(PathBuf::from(path));
        }

        if let Some(url) = get("LLM_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Some(key) = get("LLM_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(model) = get("LLM_CHAT_MODEL") {
            self.model.chat_model = model;
        }
        if let Some(model) = get("LLM_EMBEDDING_MODEL") {
            self.model.embedding_model = model;
        }
        if let Some(val) = get("LLM_TIMEOUT_SECS") {
            self.model.timeout_secs = number("LLM_TIMEOUT_SECS", val)?;
        }

        if let Some(host) = get("VECTOR_HOST") {
            self.vector.host = Some(host);
        }
        if let Some(key) = get("VECTOR_API_KEY") {
            self.vector.api_key = Some(key);
        }
        if let Some(ns) = get("VECTOR_NAMESPACE") {
            self.vector.namespace = Some(ns);
        }

        if let Some(url) = get("RERANKER_BASE_URL") {
            self.reranker.base_url = Some(url);
        }
        if let Some(model) = get("RERANKER_MODEL") {
            self.reranker.model = Some(model);
        }
        if let Some(val) = get("RERANKER_TIMEOUT_SECS") {
            let secs: u64 = number("RERANKER_TIMEOUT_SECS", val)?;
            self.reranker.timeout_secs = secs.min(30);
        }

        if let Some(val) = get("CASEGRAPH_CALL_TIMEOUT_SECS") {
            self.investigation.call_timeout_secs = number("CASEGRAPH_CALL_TIMEOUT_SECS", val)?;
        }
        if let Some(val) = get("CASEGRAPH_STREAM_IDLE_SECS") {
            self.investigation.stream_idle_timeout_secs =
                number("CASEGRAPH_STREAM_IDLE_SECS", val)?;
        }
        if let Some(val) = get("CASEGRAPH_DEDUP_THRESHOLD") {
            self.dedup.semantic_threshold = number("CASEGRAPH_DEDUP_THRESHOLD", val)?;
        }

        Ok(())
    }
}
