//! Room Relay: WebSocket rooms with cross-room forwarding.
//!
//! Every upgrade joins one of the three rooms based on its request path.
//! Text frames fan out to the rest of the room and to the linked rooms (see
//! [`RoomName::linked_rooms`]). The relay is content-agnostic apart from
//! reading a frame's `target` field.

mod handler;
pub mod rooms;
mod views;

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use duet_protocol::RoomName;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use uuid::Uuid;

pub use rooms::{Delivery, MemberId, RoomRegistry};

use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;

#[derive(Clone)]
pub struct RelayState {
    pub rooms: Arc<RwLock<RoomRegistry>>,
    pub metrics: Arc<RelayMetrics>,
    pub config: Arc<RelayConfig>,
    /// Cancelled when the server stops; every socket task closes its peer.
    pub closing: CancellationToken,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(RoomRegistry::new())),
            metrics: Arc::new(RelayMetrics::new()),
            config: Arc::new(config),
            closing: CancellationToken::new(),
        }
    }

    pub async fn room_count(&self, room: RoomName) -> usize {
        self.rooms.read().await.count(room)
    }
}

#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: RelayState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/api/rooms", get(rooms))
        .route("/api/metrics", get(metrics))
        .route("/status", get(status))
        .fallback(handler::ws_upgrade)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve the relay on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: RelayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("duet relay listening on ws://{}", addr);
    info!("  /A /WA /wsA /soloA      -> soloA");
    info!("  /B /WB /wsB /soloB      -> soloB");
    info!("  /AB /ab /wsAB /paired   -> paired");
    info!("  anything else           -> {}", state.config.default_room);

    // Upgraded sockets are not tracked by graceful shutdown; close them here.
    let closing = state.closing.clone();
    let shutdown = async move {
        shutdown.await;
        closing.cancel();
    };
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    Json(json!({
        "status": "ok",
        "connections": snapshot.connections.active,
        "uptime_secs": snapshot.uptime_secs,
    }))
}

async fn rooms(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.rooms.read().await.counts())
}

async fn metrics(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn status(State(state): State<RelayState>) -> impl IntoResponse {
    let counts = state.rooms.read().await.counts();
    Html(views::status_page(&counts, &state.metrics.snapshot()).into_string())
}
