#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use duet::config::{RelayConfig, RelayFileConfig};
use duet::relay::{self, RelayState};
use duet_protocol::RoomName;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: RelayState,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve_on(listener)
    }

    fn serve_on(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = RelayState::new(RelayConfig::from_file(&RelayFileConfig::default()).unwrap());
        let stop = CancellationToken::new();
        let shutdown = stop.clone();
        let serve_state = state.clone();
        let task = tokio::spawn(async move {
            relay::serve(listener, serve_state, async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });
        Self {
            addr,
            state,
            stop,
            task: Some(task),
        }
    }

    /// Stop serving and close every connected socket.
    pub async fn shutdown(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            task.await.unwrap();
        }
    }

    /// Shut down, then serve again on the same address with empty rooms.
    pub async fn restart(&mut self) {
        self.shutdown().await;
        let mut attempts = 0;
        let listener = loop {
            match TcpListener::bind(self.addr).await {
                Ok(listener) => break listener,
                Err(e) if attempts < 50 => {
                    attempts += 1;
                    eprintln!("rebinding {}: {e}", self.addr);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("could not rebind {}: {e}", self.addr),
            }
        };
        *self = Self::serve_on(listener);
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub async fn connect(&self, path: &str) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(self.url(path)).await.unwrap();
        ws
    }

    /// Wait until `room` has `n` members, so frames sent afterwards are seen.
    pub async fn wait_for_members(&self, room: RoomName, n: usize) {
        for _ in 0..200 {
            if self.state.room_count(room).await == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{room} never reached {n} members");
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

pub async fn send(ws: &mut Client, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next text frame, or `None` if nothing arrives within `wait`.
pub async fn recv_within(ws: &mut Client, wait: Duration) -> Option<String> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text.as_str().to_string()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

pub async fn recv_json(ws: &mut Client) -> serde_json::Value {
    let text = recv_within(ws, Duration::from_secs(5))
        .await
        .expect("expected a frame");
    serde_json::from_str(&text).unwrap()
}
