//! Supervised outbound connection to one character endpoint on the relay.
//!
//! Each endpoint runs a supervisor task that connects, pumps frames in both
//! directions, and reconnects after a fixed delay whenever the socket drops.
//! Inbound events from both endpoints fan in to one queue owned by the
//! router. Health is published on a `watch` channel.

use std::time::Duration;

use duet_protocol::{InboundEvent, Speaker};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting { attempt: u32 },
    Connected,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint {0} has stopped")]
    Stopped(Speaker),

    #[error("inbound queue closed")]
    InboundClosed,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An event received on one endpoint's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub endpoint: Speaker,
    pub event: InboundEvent,
    /// Stamped when the frame is read, not when the router gets to it.
    pub received_at: Instant,
}

impl Inbound {
    pub fn new(endpoint: Speaker, event: InboundEvent) -> Self {
        Self {
            endpoint,
            event,
            received_at: Instant::now(),
        }
    }
}

/// Sending side of an endpoint, held by the router.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    speaker: Speaker,
    outbound: mpsc::Sender<String>,
    state: watch::Receiver<LinkState>,
}

impl EndpointHandle {
    pub fn from_channels(
        speaker: Speaker,
        outbound: mpsc::Sender<String>,
        state: watch::Receiver<LinkState>,
    ) -> Self {
        Self {
            speaker,
            outbound,
            state,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Block until the socket is up. Fails once the supervisor has stopped.
    pub async fn wait_connected(&self) -> Result<(), EndpointError> {
        let mut state = self.state.clone();
        let connected = state
            .wait_for(|s| matches!(s, LinkState::Connected | LinkState::Stopped))
            .await
            .map(|s| *s == LinkState::Connected)
            .unwrap_or(false);
        if connected {
            Ok(())
        } else {
            Err(EndpointError::Stopped(self.speaker))
        }
    }

    /// Serialize `frame` and queue it once the endpoint is connected.
    pub async fn send_json<T: Serialize>(&self, frame: &T) -> Result<(), EndpointError> {
        let text = serde_json::to_string(frame)?;
        self.wait_connected().await?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| EndpointError::Stopped(self.speaker))
    }
}

/// Spawn the supervisor for `speaker`'s endpoint at `url`.
pub fn spawn_endpoint(
    speaker: Speaker,
    url: String,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) -> (EndpointHandle, JoinHandle<()>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (state_tx, state_rx) = watch::channel(LinkState::Connecting { attempt: 0 });

    let task = tokio::spawn(supervise(
        speaker,
        url,
        reconnect_delay,
        outbound_rx,
        inbound,
        state_tx,
        cancel,
    ));

    (
        EndpointHandle::from_channels(speaker, outbound_tx, state_rx),
        task,
    )
}

enum SessionEnd {
    Dropped,
    Cancelled,
    RouterGone,
}

async fn supervise(
    speaker: Speaker,
    url: String,
    reconnect_delay: Duration,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<Inbound>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        state.send_replace(LinkState::Connecting { attempt });

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws, _)) => {
                info!(endpoint = %speaker, url = %url, "endpoint connected");
                attempt = 0;
                state.send_replace(LinkState::Connected);

                match run_session(speaker, ws, &mut outbound, &inbound, &cancel).await {
                    SessionEnd::Dropped => {
                        warn!(endpoint = %speaker, "endpoint connection dropped");
                    }
                    SessionEnd::Cancelled | SessionEnd::RouterGone => break,
                }
            }
            Err(e) => {
                warn!(endpoint = %speaker, attempt, error = %e, "endpoint connect failed");
            }
        }

        state.send_replace(LinkState::Connecting { attempt: attempt + 1 });
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    state.send_replace(LinkState::Stopped);
    debug!(endpoint = %speaker, "endpoint supervisor stopped");
}

async fn run_session<S>(
    speaker: Speaker,
    ws: tokio_tungstenite::WebSocketStream<S>,
    outbound: &mut mpsc::Receiver<String>,
    inbound: &mpsc::Sender<Inbound>,
    cancel: &CancellationToken,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }

            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::RouterGone;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!(endpoint = %speaker, error = %e, "endpoint send failed");
                    return SessionEnd::Dropped;
                }
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match InboundEvent::parse(text.as_str()) {
                    Some(InboundEvent::Other) => {
                        trace!(endpoint = %speaker, "ignoring frame");
                    }
                    Some(event) => {
                        if inbound.send(Inbound::new(speaker, event)).await.is_err() {
                            return SessionEnd::RouterGone;
                        }
                    }
                    None => {
                        debug!(endpoint = %speaker, len = text.len(), "dropping malformed frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(endpoint = %speaker, error = %e, "endpoint read failed");
                    return SessionEnd::Dropped;
                }
            },
        }
    }
}
