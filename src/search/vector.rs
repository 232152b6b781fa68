//! Vector index client and metadata filters

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::VectorConfig;

/// Errors from vector index operations
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("vector index request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("vector index returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("vector dimension mismatch: index has {expected}, query has {got}")]
    Dimension { expected: usize, got: usize },
}

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(Value),
    In(Vec<Value>),
}

/// Conjunction of `$eq` / `$in` clauses over metadata fields
///
/// Serializes to the Pinecone filter syntax, e.g.
/// `{"people": {"$in": ["John Smith"]}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    clauses: Vec<(String, Clause)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Clause::Eq(value.into())));
        self
    }

    pub fn any_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field.into(), Clause::In(values)));
        self
    }

    /// Documents whose `people` list mentions `name`
    pub fn people_in(name: &str) -> Self {
        Self::new().any_of("people", [name])
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (field, clause) in &self.clauses {
            let op = match clause {
                Clause::Eq(v) => json!({ "$eq": v }),
                Clause::In(vs) => json!({ "$in": vs }),
            };
            out.insert(field.clone(), op);
        }
        Value::Object(out)
    }

    /// Evaluate against a metadata map. List-valued fields match when any
    /// element satisfies the clause.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.clauses.iter().all(|(field, clause)| {
            let Some(actual) = metadata.get(field) else {
                return false;
            };
            let candidates: Vec<&Value> = match actual {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            candidates.iter().any(|v| match clause {
                Clause::Eq(expected) => *v == expected,
                Clause::In(allowed) => allowed.contains(*v),
            })
        })
    }
}

/// Nearest-neighbour search over document chunks
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError>;
}

// ─── Pinecone ────────────────────────────────────────────

/// Pinecone data-plane client (`POST {host}/query`)
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: Option<String>,
    namespace: Option<String>,
    timeout: Duration,
}

impl PineconeIndex {
    pub fn new(host: impl Into<String>, config: &VectorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            namespace: config.namespace.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn request_body(&self, vector: &[f32], top_k: usize, filter: Option<&MetadataFilter>) -> Value {
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter.to_json();
        }
        if let Some(ns) = &self.namespace {
            body["namespace"] = json!(ns);
        }
        body
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        let mut request = self
            .client
            .post(format!("{}/query", self.host))
            .timeout(self.timeout)
            .json(&self.request_body(vector, top_k, filter));
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api { status, body });
        }
        let body: QueryResponse = resp.json().await?;
        Ok(body.matches)
    }
}

// ─── In-memory ───────────────────────────────────────────

/// A stored vector with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Brute-force cosine index held in memory
#[derive(Default)]
pub struct MemoryVectorIndex {
    records: Mutex<Vec<VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record by id
    pub fn upsert(&self, record: VectorRecord) {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        let records = self.records.lock().unwrap();
        let mut matches = Vec::new();
        for record in records.iter() {
            if record.values.len() != vector.len() {
                return Err(VectorError::Dimension {
                    expected: record.values.len(),
                    got: vector.len(),
                });
            }
            if filter.is_some_and(|f| !f.matches(&record.metadata)) {
                continue;
            }
            matches.push(VectorMatch {
                id: record.id.clone(),
                score: cosine(vector, &record.values),
                metadata: record.metadata.clone(),
            });
        }
        // Stable sort keeps insertion order among equal scores
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }
}
