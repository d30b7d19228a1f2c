use duet_protocol::Speaker;
use serde::Serialize;

use super::endpoint::EndpointError;
use crate::generation::GenerationError;

/// One labeled utterance, as dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

/// Strictly increasing turn ids, starting at 1. Never reused.
#[derive(Debug)]
pub struct TurnIdAllocator {
    next: u64,
}

impl TurnIdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for TurnIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Acked,
    TimedOut,
}

#[derive(Debug)]
pub enum RoundOutcome {
    /// Every extracted turn was dispatched, in order.
    Completed { turns: Vec<(Turn, TurnOutcome)> },
    Aborted(RoundAbort),
}

#[derive(Debug, thiserror::Error)]
pub enum RoundAbort {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("generation produced no text")]
    EmptyOutput,

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}
