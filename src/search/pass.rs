//! One semantic search round-trip: embed, query, extract, re-rank

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::rerank::Reranker;
use super::vector::{MetadataFilter, VectorError, VectorIndex, VectorMatch};
use crate::model::{embed_with_retry, ModelError, TextModel, EMBED_ATTEMPTS};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("embedding failed: {0}")]
    Embed(#[from] ModelError),
    #[error("vector query failed: {0}")]
    Index(#[from] VectorError),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
}

/// Page of a chunk: a page number, or a label such as `Chunk 12`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageRef {
    Number(i64),
    Label(String),
}

impl std::fmt::Display for PageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Label(s) => f.write_str(s),
        }
    }
}

/// A retrieved document chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub filename: String,
    pub page: PageRef,
    /// Vector similarity
    pub score: f32,
}

/// Parameters of one search pass
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub fetch_k: usize,
    pub rerank_top_n: usize,
    pub filter: Option<MetadataFilter>,
    pub rerank: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, fetch_k: usize, rerank_top_n: usize) -> Self {
        Self {
            query: query.into(),
            fetch_k,
            rerank_top_n,
            filter: None,
            rerank: true,
        }
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Keep similarity order even when a re-ranker is configured
    pub fn without_rerank(mut self) -> Self {
        self.rerank = false;
        self
    }
}

/// Runs search passes against shared collaborators
///
/// Holds no per-call state, so one `Searcher` can serve concurrent passes
/// with different parameters.
#[derive(Clone)]
pub struct Searcher {
    model: Arc<dyn TextModel>,
    index: Arc<dyn VectorIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    call_timeout: Duration,
    embed_attempts: usize,
}

impl Searcher {
    pub fn new(model: Arc<dyn TextModel>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            model,
            index,
            reranker: None,
            call_timeout: Duration::from_secs(60),
            embed_attempts: EMBED_ATTEMPTS,
        }
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_embed_attempts(mut self, attempts: usize) -> Self {
        self.embed_attempts = attempts;
        self
    }

    async fn timed<T, E>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, SearchError>
    where
        SearchError: From<E>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SearchError::Timeout(what, self.call_timeout)),
        }
    }

    /// Embed the query, fetch `fetch_k` neighbours and return at most
    /// `rerank_top_n` candidates.
    ///
    /// Re-ranking only happens when there are more candidates than
    /// `rerank_top_n`; a failing re-ranker falls back to similarity order.
    pub async fn search_pass(&self, request: &SearchRequest) -> Result<Vec<Candidate>, SearchError> {
        let vector = self
            .timed(
                "embedding",
                embed_with_retry(self.model.as_ref(), &request.query, self.embed_attempts),
            )
            .await?;

        let matches = self
            .timed(
                "vector query",
                self.index.query(&vector, request.fetch_k, request.filter.as_ref()),
            )
            .await?;

        let mut candidates: Vec<Candidate> = matches.iter().filter_map(extract_candidate).collect();
        let top_n = request.rerank_top_n;

        let reranker = self.reranker.as_ref().filter(|_| request.rerank);
        match reranker {
            Some(reranker) if candidates.len() > top_n => {
                let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
                let reranked = tokio::time::timeout(
                    self.call_timeout,
                    reranker.rerank(&request.query, &texts, top_n),
                )
                .await;
                match reranked {
                    Ok(Ok(results)) => {
                        candidates = results
                            .into_iter()
                            .filter_map(|r| candidates.get(r.index).cloned())
                            .take(top_n)
                            .collect();
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "reranker failed, using similarity order");
                        candidates.truncate(top_n);
                    }
                    Err(_) => {
                        tracing::warn!("reranker timed out, using similarity order");
                        candidates.truncate(top_n);
                    }
                }
            }
            _ => candidates.truncate(top_n),
        }

        tracing::debug!(query = %request.query, hits = matches.len(), kept = candidates.len(), "search pass");
        Ok(candidates)
    }
}

/// Chunk text from match metadata
///
/// Prefers the nested `_node_content.text` layout, falling back to a flat
/// `text` field.
pub fn extract_chunk_text(metadata: &Map<String, Value>) -> Option<String> {
    let nested = metadata
        .get("_node_content")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|node| node.get("text").and_then(Value::as_str).map(str::to_string))
        .filter(|t| !t.is_empty());

    nested.or_else(|| {
        metadata
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

/// Render a JSON number as an integer when it has no fractional part
fn integral(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn page_of(metadata: &Map<String, Value>) -> PageRef {
    let page = metadata.get("page");
    if let Some(n) = page.and_then(integral) {
        return PageRef::Number(n);
    }
    match page {
        Some(Value::String(s)) if !s.is_empty() => return PageRef::Label(s.clone()),
        Some(Value::Number(n)) => return PageRef::Label(n.to_string()),
        _ => {}
    }

    let index = match metadata.get("chunk_index") {
        None | Some(Value::Null) => return PageRef::Label(String::new()),
        Some(Value::String(s)) if s.is_empty() => return PageRef::Label(String::new()),
        Some(Value::String(s)) => s.clone(),
        Some(v) => integral(v).map(|i| i.to_string()).unwrap_or_else(|| v.to_string()),
    };
    PageRef::Label(format!("Chunk {index}"))
}

fn extract_candidate(m: &VectorMatch) -> Option<Candidate> {
    let text = extract_chunk_text(&m.metadata)?;
    let filename = m
        .metadata
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Some(Candidate {
        text,
        filename,
        page: page_of(&m.metadata),
        score: m.score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockTextModel;
    use crate::search::rerank::{RerankError, RerankResult};
    use crate::search::vector::{MemoryVectorIndex, VectorRecord};
    use async_trait::async_trait;
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn nested_node_content_wins_over_flat_text() {
        let m = meta(json!({
            "_node_content": "{\"text\": \"nested body\"}",
            "text": "flat body"
        }));
        assert_eq!(extract_chunk_text(&m).as_deref(), Some("nested body"));
    }

    #[test]
    fn falls_back_to_flat_text_when_nested_is_broken() {
        let m = meta(json!({ "_node_content": "{oops", "text": "flat body" }));
        assert_eq!(extract_chunk_text(&m).as_deref(), Some("flat body"));
        assert_eq!(extract_chunk_text(&meta(json!({ "text": "" }))), None);
    }

    #[test]
    fn page_falls_back_to_chunk_index() {
        assert_eq!(page_of(&meta(json!({ "page": 4.0 }))), PageRef::Number(4));
        assert_eq!(page_of(&meta(json!({ "page": 0 }))), PageRef::Number(0));
        assert_eq!(page_of(&meta(json!({ "page": "iv" }))), PageRef::Label("iv".into()));
        assert_eq!(
            page_of(&meta(json!({ "page": "", "chunk_index": 12 }))),
            PageRef::Label("Chunk 12".into())
        );
        assert_eq!(page_of(&meta(json!({}))), PageRef::Label(String::new()));
    }

    async fn index_with(model: &MockTextModel, texts: &[(&str, &str)]) -> Arc<MemoryVectorIndex> {
        let index = Arc::new(MemoryVectorIndex::new());
        for (i, (text, person)) in texts.iter().enumerate() {
            index.upsert(VectorRecord {
                id: format!("chunk-{i}"),
                values: model.embed(text).await.unwrap(),
                metadata: meta(json!({
                    "text": text,
                    "filename": format!("doc{i}.pdf"),
                    "page": i + 1,
                    "people": [person],
                })),
            });
        }
        index
    }

    struct ReverseReranker;

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
            top_n: usize,
        ) -> Result<Vec<RerankResult>, RerankError> {
            Ok((0..documents.len())
                .rev()
                .take(top_n)
                .map(|index| RerankResult { index, score: 1.0 })
                .collect())
        }
    }

    struct BrokenReranker;

    #[async_trait]
    impl Reranker for BrokenReranker {
        async fn rerank(&self, _: &str, _: &[String], _: usize) -> Result<Vec<RerankResult>, RerankError> {
            Err(RerankError::BadIndex(99))
        }
    }

    const CORPUS: [(&str, &str); 3] = [
        ("Acme payroll lists John Smith", "John Smith"),
        ("Flight log for the island", "Jane Doe"),
        ("Acme board minutes", "Jane Doe"),
    ];

    #[tokio::test]
    async fn truncates_to_top_n_without_reranker() {
        let model = Arc::new(MockTextModel::new());
        let index = index_with(&model, &CORPUS).await;
        let searcher = Searcher::new(model, index);
        let hits = searcher
            .search_pass(&SearchRequest::new("Acme payroll", 10, 2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "doc0.pdf");
    }

    #[tokio::test]
    async fn reranker_reorders_candidates() {
        let model = Arc::new(MockTextModel::new());
        let index = index_with(&model, &CORPUS).await;
        let searcher = Searcher::new(model, index).with_reranker(Some(Arc::new(ReverseReranker)));
        let plain = searcher
            .search_pass(&SearchRequest::new("Acme payroll", 10, 3))
            .await
            .unwrap();
        let reranked = searcher
            .search_pass(&SearchRequest::new("Acme payroll", 10, 2))
            .await
            .unwrap();
        assert_eq!(reranked[0], plain[2]);
        assert_eq!(reranked[1], plain[1]);
    }

    #[tokio::test]
    async fn failing_reranker_falls_back_to_similarity_order() {
        let model = Arc::new(MockTextModel::new());
        let index = index_with(&model, &CORPUS).await;
        let searcher = Searcher::new(model, index).with_reranker(Some(Arc::new(BrokenReranker)));
        let hits = searcher
            .search_pass(&SearchRequest::new("Acme payroll", 10, 1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "doc0.pdf");
    }

    #[tokio::test]
    async fn filter_restricts_to_mentioned_people() {
        let model = Arc::new(MockTextModel::new());
        let index = index_with(&model, &CORPUS).await;
        let searcher = Searcher::new(model, index);
        let request = SearchRequest::new("John Smith", 10, 5)
            .with_filter(MetadataFilter::people_in("John Smith"))
            .without_rerank();
        let hits = searcher.search_pass(&request).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page, PageRef::Number(1));
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_after_retries() {
        let model = Arc::new(MockTextModel::new().failing_embeds(10));
        let index = Arc::new(MemoryVectorIndex::new());
        let searcher = Searcher::new(model.clone(), index).with_embed_attempts(1);
        let err = searcher
            .search_pass(&SearchRequest::new("anything", 5, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Embed(_)));
        assert_eq!(model.embed_calls(), 1);
    }
}
