//! Generation backends: submit a prompt, receive a stream of text chunks.

pub mod aggregate;
pub mod gemini;
pub mod scripted;

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;

pub use aggregate::{Candidate, Content, Part, TextChunk, aggregate};
pub use gemini::GeminiBackend;
pub use scripted::ScriptedBackend;

use crate::config::{BackendKind, GenerationConfig};

pub type ChunkStream = BoxStream<'static, Result<TextChunk, GenerationError>>;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("backend reported an error: {0}")]
    Api(String),

    #[error("undecodable chunk: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("script exhausted")]
    ScriptExhausted,

    #[error("{0}")]
    Scripted(String),
}

pub trait GenerationBackend: Send + Sync {
    fn generate(
        &self,
        prompt: String,
    ) -> impl Future<Output = Result<ChunkStream, GenerationError>> + Send;
}

impl<B: GenerationBackend> GenerationBackend for Arc<B> {
    async fn generate(&self, prompt: String) -> Result<ChunkStream, GenerationError> {
        (**self).generate(prompt).await
    }
}

/// Backend selected by configuration.
pub enum AnyBackend {
    Gemini(GeminiBackend),
    Scripted(ScriptedBackend),
}

impl AnyBackend {
    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        match config.backend {
            BackendKind::Gemini => Ok(Self::Gemini(GeminiBackend::new(config)?)),
            BackendKind::Scripted => {
                let path = config
                    .script_file
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Scripted backend needs a script file"))?;
                Ok(Self::Scripted(ScriptedBackend::from_file(path)?))
            }
        }
    }
}

impl GenerationBackend for AnyBackend {
    async fn generate(&self, prompt: String) -> Result<ChunkStream, GenerationError> {
        match self {
            Self::Gemini(b) => b.generate(prompt).await,
            Self::Scripted(b) => b.generate(prompt).await,
        }
    }
}
