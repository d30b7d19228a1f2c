//! Turn Router: viewer chat in, sequenced character turns out.
//!
//! The router owns one endpoint connection per character. For each viewer
//! chat it runs a dialogue round: record the line, echo it, generate,
//! extract turns, then dispatch them one at a time. Each turn waits for the
//! front-end's `speech_end` (or the ack timeout) before the next is sent.

pub mod endpoint;
pub mod turn;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Local;
use duet_protocol::{InboundEvent, Speaker, TurnFrame, UserMessage};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use endpoint::{EndpointError, EndpointHandle, Inbound, LinkState, spawn_endpoint};
pub use turn::{RoundAbort, RoundOutcome, Turn, TurnIdAllocator, TurnOutcome};

use crate::config::RouterConfig;
use crate::extract::SpeakerTags;
use crate::generation::{GenerationBackend, aggregate};
use crate::history::DialogueHistory;
use crate::prompt::PromptBuilder;

const TURN_BROADCAST_CAPACITY: usize = 64;

/// A chat already accepted, kept so its copy from the other endpoint can be
/// recognised.
#[derive(Debug)]
struct SeenChat {
    endpoint: Speaker,
    source: Speaker,
    text: String,
    received_at: Instant,
}

pub struct Router<B> {
    endpoint_a: EndpointHandle,
    endpoint_b: EndpointHandle,
    inbound: mpsc::Receiver<Inbound>,
    backend: B,
    prompt: PromptBuilder,
    tags: SpeakerTags,
    history: DialogueHistory,
    ids: TurnIdAllocator,
    ack_timeout: Duration,
    /// Chats that arrived while a round was in flight.
    backlog: VecDeque<(String, Speaker)>,
    seen_chats: VecDeque<SeenChat>,
    chat_dedup_window: Duration,
    turns_tx: broadcast::Sender<Turn>,
}

impl<B: GenerationBackend> Router<B> {
    pub fn new(
        endpoint_a: EndpointHandle,
        endpoint_b: EndpointHandle,
        inbound: mpsc::Receiver<Inbound>,
        backend: B,
        prompt: PromptBuilder,
        config: &RouterConfig,
    ) -> Self {
        let (turns_tx, _) = broadcast::channel(TURN_BROADCAST_CAPACITY);
        let tags = prompt.tags().clone();
        Self {
            endpoint_a,
            endpoint_b,
            inbound,
            backend,
            prompt,
            tags,
            history: DialogueHistory::new(config.history_budget),
            ids: TurnIdAllocator::new(),
            ack_timeout: config.ack_timeout,
            backlog: VecDeque::new(),
            seen_chats: VecDeque::new(),
            chat_dedup_window: config.chat_dedup_window,
            turns_tx,
        }
    }

    /// Every dispatched turn is published here after its frames are queued.
    pub fn subscribe_turns(&self) -> broadcast::Receiver<Turn> {
        self.turns_tx.subscribe()
    }

    pub fn history(&self) -> &DialogueHistory {
        &self.history
    }

    pub fn assign_turn_id(&mut self) -> u64 {
        self.ids.next_id()
    }

    fn endpoint(&self, speaker: Speaker) -> &EndpointHandle {
        match speaker {
            Speaker::A => &self.endpoint_a,
            Speaker::B => &self.endpoint_b,
        }
    }

    /// Process chats until cancelled or until both endpoints are gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("router started");
        loop {
            if let Some((text, source)) = self.backlog.pop_front() {
                self.handle_round(&text, source).await;
                continue;
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.inbound.recv() => next,
            };
            let Some(Inbound {
                endpoint,
                event,
                received_at,
            }) = next
            else {
                warn!("inbound queue closed, router stopping");
                break;
            };

            match event {
                InboundEvent::Chat { text, source } => {
                    if let Some(text) = self.accept_chat(endpoint, received_at, text, source) {
                        self.handle_round(&text, source).await;
                    }
                }
                InboundEvent::SpeechEnd { character, turn_id } => {
                    debug!(%character, turn_id, "stale speech_end outside a turn");
                }
                InboundEvent::Other => {}
            }
        }
        info!("router stopped");
    }

    async fn handle_round(&mut self, text: &str, source: Speaker) {
        match self.run_dialogue_round(text, source).await {
            RoundOutcome::Completed { turns } => {
                let timed_out = turns
                    .iter()
                    .filter(|(_, o)| *o == TurnOutcome::TimedOut)
                    .count();
                info!(
                    %source,
                    turns = turns.len(),
                    timed_out,
                    "dialogue round completed"
                );
            }
            RoundOutcome::Aborted(reason) => {
                warn!(%source, error = %reason, "dialogue round aborted");
            }
        }
    }

    /// One viewer input through dispatch of every turn it produced.
    pub async fn run_dialogue_round(&mut self, viewer_text: &str, source: Speaker) -> RoundOutcome {
        self.history
            .append(format!("{}: {viewer_text}", self.tags.tag(source)));

        if let Err(e) = self
            .endpoint(source)
            .send_json(&UserMessage::new(viewer_text, source))
            .await
        {
            return RoundOutcome::Aborted(e.into());
        }

        let prompt = self.prompt.build(source, &self.history, Local::now());
        let output = match self.backend.generate(prompt).await {
            Ok(stream) => aggregate(stream).await,
            Err(e) => Err(e),
        };
        let output = match output {
            Ok(text) if text.is_empty() => return RoundOutcome::Aborted(RoundAbort::EmptyOutput),
            Ok(text) => text,
            Err(e) => return RoundOutcome::Aborted(e.into()),
        };

        let extracted = self.tags.extract(&output, source);
        debug!(turns = extracted.len(), "extracted turns");

        let mut turns = Vec::with_capacity(extracted.len());
        for t in extracted {
            match self.dispatch_turn(t.speaker, &t.text, t.emotion()).await {
                Ok(done) => turns.push(done),
                Err(e) => return RoundOutcome::Aborted(e.into()),
            }
        }
        RoundOutcome::Completed { turns }
    }

    /// Send one turn to its speaker and wait for the acknowledgement.
    pub async fn dispatch_turn(
        &mut self,
        speaker: Speaker,
        text: &str,
        emotion: Option<&str>,
    ) -> Result<(Turn, TurnOutcome), EndpointError> {
        let id = self.assign_turn_id();
        let endpoint = self.endpoint(speaker).clone();
        for frame in TurnFrame::envelope(id, speaker, text, emotion) {
            endpoint.send_json(&frame).await?;
        }

        let turn = Turn {
            id,
            speaker,
            text: text.to_string(),
            emotion: emotion.map(str::to_string),
        };
        info!(turn_id = id, %speaker, "turn sent");
        let _ = self.turns_tx.send(turn.clone());

        let outcome = self.wait_for_ack(speaker, id).await?;
        if outcome == TurnOutcome::TimedOut {
            warn!(
                turn_id = id,
                %speaker,
                timeout_ms = self.ack_timeout.as_millis() as u64,
                "no speech_end before timeout, moving on"
            );
        }
        Ok((turn, outcome))
    }

    async fn wait_for_ack(&mut self, speaker: Speaker, id: u64) -> Result<TurnOutcome, EndpointError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            let next = match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Err(_) => return Ok(TurnOutcome::TimedOut),
                Ok(None) => return Err(EndpointError::InboundClosed),
                Ok(Some(next)) => next,
            };

            match next.event {
                InboundEvent::SpeechEnd { character, turn_id }
                    if next.endpoint == speaker && character == speaker && turn_id == id =>
                {
                    debug!(turn_id = id, %speaker, "speech_end received");
                    return Ok(TurnOutcome::Acked);
                }
                InboundEvent::SpeechEnd { character, turn_id } => {
                    debug!(
                        expected = id,
                        %character,
                        turn_id,
                        endpoint = %next.endpoint,
                        "discarding non-matching speech_end"
                    );
                }
                InboundEvent::Chat { text, source } => {
                    let accepted = self.accept_chat(next.endpoint, next.received_at, text, source);
                    if let Some(text) = accepted {
                        debug!(%source, "queueing chat until the round finishes");
                        self.backlog.push_back((text, source));
                    }
                }
                InboundEvent::Other => {}
            }
        }
    }

    /// A paired-room chat reaches both solo rooms, so the router sees it once
    /// per endpoint. The first copy is accepted whichever endpoint it came
    /// in on; the same `(source, text)` arriving on the other endpoint within
    /// the window is dropped.
    fn accept_chat(
        &mut self,
        endpoint: Speaker,
        received_at: Instant,
        text: String,
        source: Speaker,
    ) -> Option<String> {
        if text.trim().is_empty() {
            debug!(%source, "ignoring empty chat");
            return None;
        }

        let window = self.chat_dedup_window;
        let apart = |a: Instant, b: Instant| {
            a.saturating_duration_since(b)
                .max(b.saturating_duration_since(a))
        };
        self.seen_chats
            .retain(|seen| received_at.saturating_duration_since(seen.received_at) <= window);

        let copy = self.seen_chats.iter().position(|seen| {
            seen.endpoint != endpoint
                && seen.source == source
                && seen.text == text
                && apart(seen.received_at, received_at) <= window
        });
        if let Some(pos) = copy {
            self.seen_chats.remove(pos);
            debug!(%endpoint, %source, "dropping second copy of chat");
            return None;
        }

        self.seen_chats.push_back(SeenChat {
            endpoint,
            source,
            text: text.clone(),
            received_at,
        });
        Some(text)
    }
}
