//! Cross-encoder re-ranking via an OpenAI-compatible `/v1/rerank` endpoint
//!
//! One batch request scores every query-passage pair.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RerankerConfig;

/// Longest passage sent to the re-ranker, in characters
const MAX_PASSAGE_CHARS: usize = 1500;

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("reranker request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reranker returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("reranker returned index {0} outside the candidate list")]
    BadIndex(usize),
}

/// Score for one document, by its position in the input
#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    pub index: usize,
    /// 0.0 - 1.0 after sigmoid normalization
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return at most `top_n` results, best first
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>, RerankError>;
}

pub struct CrossEncoderReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl CrossEncoderReranker {
    pub fn new(base_url: impl Into<String>, config: &RerankerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: config.model.clone().unwrap_or_else(|| "default".to_string()),
            timeout: Duration::from_secs(config.timeout_secs.min(30)),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>, RerankError> {
        let body = RerankRequest {
            model: &self.model,
            query,
            documents: documents
                .iter()
                .map(|d| truncate_chars(d, MAX_PASSAGE_CHARS))
                .collect(),
            top_n,
        };

        let resp = self
            .client
            .post(format!("{}/v1/rerank", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RerankError::Api { status, body });
        }

        let body: RerankResponse = resp.json().await?;
        rank(body.results, documents.len(), top_n)
    }
}

/// Normalize, validate and order raw scores
fn rank(raw: Vec<RerankResultRaw>, len: usize, top_n: usize) -> Result<Vec<RerankResult>, RerankError> {
    let mut results = Vec::with_capacity(raw.len());
    for r in raw {
        if r.index >= len {
            return Err(RerankError::BadIndex(r.index));
        }
        results.push(RerankResult {
            index: r.index,
            score: sigmoid(r.relevance_score),
        });
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_n);
    Ok(results)
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_zero() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let raw = vec![
            RerankResultRaw { index: 0, relevance_score: -2.0 },
            RerankResultRaw { index: 1, relevance_score: 3.0 },
            RerankResultRaw { index: 2, relevance_score: 0.5 },
        ];
        let ranked = rank(raw, 3, 2).unwrap();
        assert_eq!(ranked.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 2]);
        assert!(ranked[0].score > 0.9);
    }

    #[test]
    fn test_rank_rejects_out_of_range_index() {
        let raw = vec![RerankResultRaw { index: 7, relevance_score: 1.0 }];
        assert!(matches!(rank(raw, 3, 5), Err(RerankError::BadIndex(7))));
    }

    #[test]
    fn test_passages_truncated_by_chars() {
        let long = "ü".repeat(MAX_PASSAGE_CHARS + 10);
        assert_eq!(truncate_chars(&long, MAX_PASSAGE_CHARS).chars().count(), MAX_PASSAGE_CHARS);
    }
}
