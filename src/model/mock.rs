//! Scripted text model for tests and offline runs

use super::{ModelError, ResponseFormat, TextModel, TextStream};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Width of the hashed bag-of-words embedding
const MOCK_DIMS: usize = 64;

/// Mock model returning preconfigured responses.
///
/// Generation rules are matched by prompt substring, first registered rule
/// wins. Unmatched prompts get `{}` in JSON mode and an empty string
/// otherwise. Embeddings are deterministic bag-of-words hashes, so texts
/// sharing words land close together.
pub struct MockTextModel {
    rules: Vec<(String, Result<String, String>)>,
    stream_chunks: Vec<String>,
    stream_failure: Option<String>,
    embed_failures: AtomicUsize,
    embed_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockTextModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTextModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            stream_chunks: Vec::new(),
            stream_failure: None,
            embed_failures: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Respond with `response` when the prompt contains `needle`
    pub fn with_response(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Ok(response.into())));
        self
    }

    /// Fail generation when the prompt contains `needle`
    pub fn with_failure(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Err(message.into())));
        self
    }

    /// Chunks yielded by `generate_stream`
    pub fn with_stream<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Yield the configured chunks, then fail with `message`
    pub fn with_stream_failure(mut self, message: impl Into<String>) -> Self {
        self.stream_failure = Some(message.into());
        self
    }

    /// Fail the next `n` embedding calls
    pub fn failing_embeds(self, n: usize) -> Self {
        self.embed_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Every prompt passed to `generate` or `generate_stream`, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn record(&self, prompt: &str) {
        self.prompts.lock().unwrap().push(prompt.to_string());
    }
}

/// FNV-1a, stable across runs and platforms
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Unit-length hashed bag-of-words vector
pub(crate) fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let index = (fnv1a(&token.to_lowercase()) % MOCK_DIMS as u64) as usize;
        vector[index] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl TextModel for MockTextModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.embed_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.embed_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ModelError::Api {
                status: 503,
                body: "mock embedding unavailable".to_string(),
            });
        }
        Ok(hashed_embedding(text))
    }

    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, ModelError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt);

        match self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Ok(response))) => Ok(response.clone()),
            Some((_, Err(message))) => Err(ModelError::Api {
                status: 500,
                body: message.clone(),
            }),
            None => Ok(match format {
                ResponseFormat::Json => "{}".to_string(),
                ResponseFormat::Text => String::new(),
            }),
        }
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TextStream, ModelError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt);

        let mut items: Vec<Result<String, ModelError>> =
            self.stream_chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.stream_failure {
            items.push(Err(ModelError::Stream(message.clone())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
