//! Gemini `streamGenerateContent` over server-sent events.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use super::{ChunkStream, GenerationBackend, GenerationError, TextChunk};
use crate::config::GenerationConfig;

pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    use_search_grounding: bool,
}

impl GeminiBackend {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Gemini backend needs an API key"))?;
        // No overall timeout: a healthy stream may run long, a stalled one
        // trips the read timeout.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                config.api_base, config.model
            ),
            api_key,
            use_search_grounding: config.use_search_grounding,
        })
    }

    async fn request(
        &self,
        prompt: &str,
        grounded: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if grounded {
            body["tools"] = json!([{ "google_search": {} }]);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }
        Ok(response)
    }
}

impl GenerationBackend for GeminiBackend {
    async fn generate(&self, prompt: String) -> Result<ChunkStream, GenerationError> {
        let response = if self.use_search_grounding {
            match self.request(&prompt, true).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "grounded generation failed, retrying without search");
                    self.request(&prompt, false).await?
                }
            }
        } else {
            self.request(&prompt, false).await?
        };

        debug!(status = %response.status(), "generation stream opened");
        let chunks = sse_payloads(response.bytes_stream())
            .map(|payload| payload.and_then(|data| TextChunk::from_json(&data)));
        Ok(chunks.boxed())
    }
}

type ByteStream<B, E> = Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>;

/// Split a byte stream into SSE `data:` payloads. Lines are decoded only once
/// complete, so multi-byte characters split across network chunks survive.
pub fn sse_payloads<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<String, GenerationError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<GenerationError> + Send + 'static,
{
    struct State<B, E> {
        bytes: ByteStream<B, E>,
        buf: Vec<u8>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        buf: Vec::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(['\r', '\n']);
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() && data != "[DONE]" {
                        return Some((Ok(data.to_string()), state));
                    }
                }
                continue;
            }

            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    state.buf.clear();
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    if !state.buf.is_empty() {
                        state.buf.push(b'\n');
                    }
                }
            }
        }
    })
}
