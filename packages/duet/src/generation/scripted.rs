//! Canned replies for offline rehearsal and tests.
//!
//! A script file holds one reply per block, blocks separated by a line
//! containing only `---`. Replies are served round-robin.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use futures::StreamExt;

use super::{ChunkStream, GenerationBackend, GenerationError, TextChunk};

pub struct ScriptedBackend {
    replies: Vec<String>,
    next: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            next: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script file: {:?}", path))?;
        let replies = parse_script(&raw);
        if replies.is_empty() {
            anyhow::bail!("Script file {:?} contains no replies", path);
        }
        Ok(Self::new(replies))
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }
}

fn parse_script(raw: &str) -> Vec<String> {
    let mut replies = Vec::new();
    let mut current = String::new();
    for line in raw.lines() {
        if line.trim() == "---" {
            replies.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    replies.push(current);
    replies
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, prompt: String) -> Result<ChunkStream, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt);
        }
        if self.replies.is_empty() {
            return Err(GenerationError::ScriptExhausted);
        }

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        let reply = &self.replies[idx];

        // Two chunks, so consumers see a reply assembled from a stream.
        let split = reply
            .char_indices()
            .nth(reply.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(reply.len());
        let (head, tail) = reply.split_at(split);
        let chunks = vec![
            Ok(TextChunk::Direct(head.to_string())),
            Ok(TextChunk::Direct(tail.to_string())),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }
}
