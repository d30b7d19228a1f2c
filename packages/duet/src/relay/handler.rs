use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::Uri;
use axum::response::Response;
use duet_protocol::RoomName;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::RelayState;

/// Any path upgrades; the path only picks the room.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(state): State<RelayState>,
) -> Response {
    let room = RoomName::resolve(uri.path(), state.config.default_room);
    ws.on_upgrade(move |socket| handle_socket(socket, room, state))
}

async fn handle_socket(socket: WebSocket, room: RoomName, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.peer_queue_capacity);

    let id = state.rooms.write().await.join(room, tx);
    state.metrics.connection_opened();
    info!(member = id, %room, "socket joined room");

    loop {
        tokio::select! {
            _ = state.closing.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            Some(text) = rx.recv() => {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.metrics.frame_received();
                    let delivery = state.rooms.read().await.forward(room, id, text.as_str());
                    state.metrics.record_forwarded(delivery.delivered);
                    state.metrics.record_dropped(delivery.dropped);
                }
                Some(Ok(Message::Binary(_))) => {
                    state.metrics.frame_ignored();
                    debug!(member = id, "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(member = id, error = %e, "socket read failed");
                    break;
                }
            },
        }
    }

    state.rooms.write().await.leave(room, id);
    state.metrics.connection_closed();
    info!(member = id, %room, "socket left room");
}
