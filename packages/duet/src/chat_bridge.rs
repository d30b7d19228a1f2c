//! Bridge between a live-chat platform and the router.
//!
//! New platform messages are routed to a character by prefix and injected
//! into the router's inbound queue as `chat` events. Optionally, every
//! dispatched turn is posted back to the platform.

use std::future::Future;

use duet_protocol::{InboundEvent, Speaker};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::router::{Inbound, Turn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
}

pub trait ChatPlatform: Send + Sync {
    /// Messages posted since the previous call.
    fn fetch_new_messages(&self) -> impl Future<Output = anyhow::Result<Vec<ChatMessage>>> + Send;

    fn post_message(&self, text: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Pick the character a viewer message is addressed to.
///
/// A message starting with a character's prefix (case-insensitive, after
/// turning full-width spaces into ASCII spaces) goes to that character with
/// the prefix removed. Anything else goes to `default_source` unchanged.
pub fn detect_target(text: &str, config: &ChatConfig) -> (Speaker, String) {
    let normalized = text.replace('\u{3000}', " ");
    let normalized = normalized.trim();

    for (speaker, prefix) in [(Speaker::A, &config.prefix_a), (Speaker::B, &config.prefix_b)] {
        if let Some(rest) = strip_prefix_ignore_case(normalized, prefix) {
            return (speaker, rest.trim().to_string());
        }
    }
    (config.default_source, text.trim().to_string())
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let n = prefix.chars().count();
    let split = text.char_indices().nth(n).map_or(text.len(), |(i, _)| i);
    let (head, rest) = text.split_at(split);
    if head.chars().count() == n && head.to_lowercase() == prefix.to_lowercase() {
        Some(rest)
    } else {
        None
    }
}

pub struct ChatBridge<P> {
    platform: P,
    config: ChatConfig,
    inbound: mpsc::Sender<Inbound>,
    turns: Option<broadcast::Receiver<Turn>>,
}

impl<P: ChatPlatform> ChatBridge<P> {
    /// `turns` is only listened to when the config enables mirroring.
    pub fn new(
        platform: P,
        config: ChatConfig,
        inbound: mpsc::Sender<Inbound>,
        turns: broadcast::Receiver<Turn>,
    ) -> Self {
        let turns = config.mirror_turns.then_some(turns);
        Self {
            platform,
            config,
            inbound,
            turns,
        }
    }

    /// Fetch new messages once and inject them. Returns how many were sent.
    pub async fn poll_once(&self) -> anyhow::Result<usize> {
        let messages = self.platform.fetch_new_messages().await?;
        let mut sent = 0;
        for msg in messages {
            let (source, text) = detect_target(&msg.text, &self.config);
            if text.is_empty() {
                debug!(author = %msg.author, "skipping message with nothing after the prefix");
                continue;
            }
            info!(author = %msg.author, %source, "viewer message");
            // Injected as if it arrived on the source's own endpoint.
            self.inbound
                .send(Inbound::new(source, InboundEvent::Chat { text, source }))
                .await
                .map_err(|_| anyhow::anyhow!("router inbound queue closed"))?;
            sent += 1;
        }
        Ok(sent)
    }

    pub async fn mirror(&self, turn: &Turn) -> anyhow::Result<()> {
        self.platform
            .post_message(&format!("{}: {}", turn.speaker, turn.text))
            .await
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let event = {
                let turns = self.turns.as_mut();
                tokio::select! {
                    _ = cancel.cancelled() => BridgeEvent::Stop,
                    _ = ticker.tick() => BridgeEvent::Poll,
                    turn = async {
                        match turns {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => BridgeEvent::Turn(turn),
                }
            };

            match event {
                BridgeEvent::Stop => break,
                BridgeEvent::Poll => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "chat poll failed");
                        if self.inbound.is_closed() {
                            break;
                        }
                    }
                }
                BridgeEvent::Turn(Ok(turn)) => {
                    if let Err(e) = self.mirror(&turn).await {
                        warn!(turn_id = turn.id, error = %e, "failed to mirror turn");
                    }
                }
                BridgeEvent::Turn(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(skipped = n, "turn mirror lagging");
                }
                BridgeEvent::Turn(Err(broadcast::error::RecvError::Closed)) => {
                    self.turns = None;
                }
            }
        }
        debug!("chat bridge stopped");
    }
}

enum BridgeEvent {
    Stop,
    Poll,
    Turn(Result<Turn, broadcast::error::RecvError>),
}

/// Reads viewer messages from stdin, one per line, and prints posts to
/// stdout. Useful for driving a local stack by hand.
pub struct ConsolePlatform {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl ConsolePlatform {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }
}

impl ChatPlatform for ConsolePlatform {
    async fn fetch_new_messages(&self) -> anyhow::Result<Vec<ChatMessage>> {
        let mut lines = self.lines.lock().await;
        let mut out = Vec::new();
        while let Ok(text) = lines.try_recv() {
            out.push(ChatMessage {
                author: "console".to_string(),
                text,
            });
        }
        Ok(out)
    }

    async fn post_message(&self, text: &str) -> anyhow::Result<()> {
        println!("{text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatFileConfig;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn config(mirror_turns: bool) -> ChatConfig {
        ChatConfig::from_file(&ChatFileConfig {
            mirror_turns,
            poll_interval_ms: 100,
            ..Default::default()
        })
    }

    #[derive(Default)]
    struct MockPlatform {
        batches: Mutex<VecDeque<Vec<ChatMessage>>>,
        posted: Mutex<Vec<String>>,
    }

    impl MockPlatform {
        fn with_batch(texts: &[&str]) -> Self {
            let batch = texts
                .iter()
                .map(|t| ChatMessage {
                    author: "viewer".into(),
                    text: t.to_string(),
                })
                .collect();
            Self {
                batches: Mutex::new(VecDeque::from([batch])),
                posted: Mutex::default(),
            }
        }
    }

    impl ChatPlatform for MockPlatform {
        async fn fetch_new_messages(&self) -> anyhow::Result<Vec<ChatMessage>> {
            Ok(self.batches.lock().await.pop_front().unwrap_or_default())
        }

        async fn post_message(&self, text: &str) -> anyhow::Result<()> {
            self.posted.lock().await.push(text.to_string());
            Ok(())
        }
    }

    // ── prefix routing ──────────────────────────────────────────────────

    #[test]
    fn prefix_routes_and_strips() {
        let c = config(false);
        assert_eq!(detect_target("ir hello", &c), (Speaker::A, "hello".into()));
        assert_eq!(detect_target("FI how are you", &c), (Speaker::B, "how are you".into()));
        assert_eq!(detect_target("Ir Mixed Case", &c), (Speaker::A, "Mixed Case".into()));
    }

    #[test]
    fn full_width_space_is_normalized() {
        let c = config(false);
        assert_eq!(
            detect_target("\u{3000}fi\u{3000}こんにちは", &c),
            (Speaker::B, "こんにちは".into())
        );
    }

    #[test]
    fn no_prefix_uses_default_source() {
        let c = config(false);
        assert_eq!(detect_target("  hello both  ", &c), (Speaker::A, "hello both".into()));
        assert_eq!(detect_target("i", &c), (Speaker::A, "i".into()));
    }

    // ── bridge ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn poll_injects_routed_chats() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_turns_tx, turns_rx) = broadcast::channel(8);
        let bridge = ChatBridge::new(
            MockPlatform::with_batch(&["fi hey B", "hello", "ir"]),
            config(false),
            tx,
            turns_rx,
        );

        assert_eq!(bridge.poll_once().await.unwrap(), 2);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.endpoint, Speaker::B);
        assert_eq!(
            first.event,
            InboundEvent::Chat {
                text: "hey B".into(),
                source: Speaker::B
            }
        );
        let second = rx.recv().await.unwrap();
        assert_eq!(second.endpoint, Speaker::A);
        assert_eq!(bridge.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mirrors_turns_when_enabled() {
        let (tx, _rx) = mpsc::channel(8);
        let (turns_tx, turns_rx) = broadcast::channel(8);
        let platform = std::sync::Arc::new(MockPlatform::default());
        let bridge = ChatBridge::new(ArcPlatform(platform.clone()), config(true), tx, turns_rx);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(cancel.clone()));

        turns_tx
            .send(Turn {
                id: 4,
                speaker: Speaker::B,
                text: "Nice to meet you".into(),
                emotion: None,
            })
            .unwrap();

        for _ in 0..50 {
            if !platform.posted.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*platform.posted.lock().await, vec!["B: Nice to meet you".to_string()]);
    }

    struct ArcPlatform(std::sync::Arc<MockPlatform>);

    impl ChatPlatform for ArcPlatform {
        async fn fetch_new_messages(&self) -> anyhow::Result<Vec<ChatMessage>> {
            self.0.fetch_new_messages().await
        }

        async fn post_message(&self, text: &str) -> anyhow::Result<()> {
            self.0.post_message(text).await
        }
    }
}
