//! Text model client: embeddings, generation and streamed generation
//!
//! Two implementations:
//! - `OpenAiModel`: any OpenAI-compatible HTTP endpoint (production)
//! - `MockTextModel`: scripted responses and deterministic embeddings (testing)

mod mock;
mod openai;
mod retry;

pub use mock::MockTextModel;
pub use openai::OpenAiModel;
pub use retry::{embed_with_retry, EMBED_ATTEMPTS};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Errors from text model operations
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model response parse error: {0}")]
    Parse(String),
    #[error("model returned no content")]
    Empty,
    #[error("model stream error: {0}")]
    Stream(String),
}

/// Requested shape of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the model for a single JSON object
    Json,
}

/// Incremental text chunks from a streamed generation
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// Client trait for the external text model.
///
/// Abstracts over transport so the pipeline and deduplicator don't depend on
/// how the model is reached.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;

    /// Generate a complete response
    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, ModelError>;

    /// Generate a response as a stream of text chunks
    async fn generate_stream(&self, prompt: &str) -> Result<TextStream, ModelError>;
}

/// Strip a surrounding markdown code fence, if any
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_between(text: &str, open: char, close: char) -> Option<serde_json::Value> {
    let body = strip_fence(text);
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    let start = body.find(open)?;
    let end = body.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

/// Parse a JSON object out of model output, tolerating fences and chatter
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match extract_between(text, '{', '}')? {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parse a JSON array out of model output, tolerating fences and chatter
pub fn extract_json_array(text: &str) -> Option<Vec<serde_json::Value>> {
    match extract_between(text, '[', ']')? {
        serde_json::Value::Array(items) => Some(items),
        _ => None,
    }
}
