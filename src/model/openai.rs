//! OpenAI-compatible HTTP client for embeddings and chat completions

use super::{ModelError, ResponseFormat, TextModel, TextStream};
use crate::config::ModelConfig;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest text sent to the embedding endpoint, in bytes
const MAX_EMBED_CHARS: usize = 8_000;

pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    timeout: Duration,
}

impl OpenAiModel {
    pub fn new(base_url: impl Into<String>, config: &ModelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}/v1/{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ModelError> {
        let mut request = self.post(path).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }
        Ok(resp)
    }

    fn chat_request<'a>(&'a self, prompt: &'a str, format: ResponseFormat, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.chat_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream,
            response_format: match format {
                ResponseFormat::Json => Some(JsonFormat { kind: "json_object" }),
                ResponseFormat::Text => None,
            },
        }
    }
}

/// Truncate to at most `MAX_EMBED_CHARS` bytes on a char boundary
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl TextModel for OpenAiModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let body = EmbedRequest {
            model: &self.embedding_model,
            input: vec![truncate_for_embedding(text)],
        };
        let resp: EmbedResponse = self
            .send("embeddings", &body, Some(self.timeout))
            .await?
            .json()
            .await?;
        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(ModelError::Empty)
    }

    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, ModelError> {
        let body = self.chat_request(prompt, format, false);
        let resp: ChatResponse = self
            .send("chat/completions", &body, Some(self.timeout))
            .await?
            .json()
            .await?;
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(ModelError::Empty)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TextStream, ModelError> {
        let body = self.chat_request(prompt, ResponseFormat::Text, true);
        // No overall deadline: the consumer applies an idle timeout per chunk.
        let resp = self.send("chat/completions", &body, None).await?;

        let stream = stream_lines(resp.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_sse_line(&line),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Parse one server-sent line of a streamed completion. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for malformed chunks
/// - None to skip (blank lines, `[DONE]`, role-only chunks)
fn parse_sse_line(line: &str) -> Option<Result<String, ModelError>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            if content.is_empty() {
                None
            } else {
                Some(Ok(content))
            }
        }
        Err(e) => Some(Err(ModelError::Parse(format!("stream chunk: {e}")))),
    }
}

/// Convert a byte stream into a stream of complete lines
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks decode intact.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String, ModelError>> + Send {
    futures::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&raw[..newline]).into_owned();
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((Err(ModelError::Stream(e.to_string())), (stream, buffer)));
                    }
                    None => {
                        let rest = String::from_utf8_lossy(&std::mem::take(&mut buffer)).into_owned();
                        if rest.trim().is_empty() {
                            return None;
                        }
                        return Some((Ok(rest), (stream, buffer)));
                    }
                }
            }
        },
    )
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct JsonFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
