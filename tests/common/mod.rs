//! Shared helpers for integration tests.
//!
//! - [`FakeRelay`]: in-process relay server; every URL path is a room and
//!   each text frame is broadcast to the other members of its room
//! - [`FakeAgent`]: scripted target agent speaking the bridge protocol

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Installs a test subscriber honouring `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `predicate` until it holds or [`WAIT`] elapses.
pub async fn eventually<F: FnMut() -> bool>(mut predicate: F) -> Result<()> {
    tokio::time::timeout(WAIT, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("condition not reached in time")
}

// ============================================================================
// FakeRelay
// ============================================================================

type Rooms = HashMap<String, Vec<Member>>;

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

/// Room-broadcasting WebSocket relay.
pub struct FakeRelay {
    addr: SocketAddr,
    rooms: Arc<Mutex<Rooms>>,
    accept_task: JoinHandle<()>,
}

impl FakeRelay {
    /// Binds an ephemeral port and starts accepting.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let rooms = Arc::new(Mutex::new(Rooms::new()));

        let accept_task = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move {
                let next_id = Arc::new(AtomicU64::new(1));
                while let Ok((stream, _)) = listener.accept().await {
                    let rooms = Arc::clone(&rooms);
                    let id = next_id.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_member(stream, id, rooms));
                }
            }
        });

        Ok(Self {
            addr,
            rooms,
            accept_task,
        })
    }

    /// Base URL to hand to the bridge.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// URL of one room.
    pub fn room_url(&self, room: &str) -> String {
        format!("ws://{}/{room}", self.addr)
    }

    /// Number of sockets currently joined to `room`.
    pub fn members(&self, room: &str) -> usize {
        self.rooms.lock().get(room).map_or(0, Vec::len)
    }

    /// Closes every socket joined to `room`.
    pub fn close_room(&self, room: &str) {
        if let Some(members) = self.rooms.lock().remove(room) {
            for member in members {
                let _ = member.tx.send(Message::Close(None));
            }
        }
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_member(stream: TcpStream, id: u64, rooms: Arc<Mutex<Rooms>>) {
    let mut room = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            room = request.uri().path().trim_start_matches('/').to_string();
            Ok(response)
        },
    )
    .await;
    let Ok(ws_stream) = ws_stream else {
        return;
    };

    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    rooms
        .lock()
        .entry(room.clone())
        .or_default()
        .push(Member { id, tx });

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(_) => {
                let rooms = rooms.lock();
                for member in rooms.get(&room).into_iter().flatten() {
                    if member.id != id {
                        let _ = member.tx.send(message.clone());
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(members) = rooms.lock().get_mut(&room) {
        members.retain(|member| member.id != id);
    }
    writer.abort();
}

// ============================================================================
// FakeAgent
// ============================================================================

/// Scripted target agent.
pub struct FakeAgent {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FakeAgent {
    /// Connects to `url` without sending anything.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = tokio::time::timeout(WAIT, connect_async(url))
            .await
            .context("connect timed out")??;
        Ok(Self { ws })
    }

    /// Sends one JSON frame.
    pub async fn send(&mut self, frame: Value) -> Result<()> {
        self.ws.send(Message::Text(frame.to_string().into())).await?;
        Ok(())
    }

    /// Claims the bridge.
    pub async fn handshake(&mut self) -> Result<()> {
        self.send(json!({"type": "HANDSHAKE", "name": "fake-agent"})).await
    }

    /// Posts a presence beacon.
    pub async fn announce(&mut self, peer_id: &str) -> Result<()> {
        self.send(json!({"type": "PEER_ANNOUNCE", "peerId": peer_id, "displayName": peer_id}))
            .await
    }

    /// Receives the next JSON frame.
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .context("no frame in time")?
                .ok_or_else(|| anyhow!("socket closed"))??;

            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => return Err(anyhow!("socket closed")),
                _ => {}
            }
        }
    }

    /// Receives frames until one of type `kind` arrives.
    pub async fn recv_kind(&mut self, kind: &str) -> Result<Value> {
        loop {
            let frame = self.recv().await?;
            if frame["type"] == kind {
                return Ok(frame);
            }
        }
    }

    /// Answers the next `EXECUTE_COMMAND` with `result`.
    pub async fn answer_execute(&mut self, result: Value) -> Result<Value> {
        let command = self.recv_kind("EXECUTE_COMMAND").await?;
        self.send(json!({
            "type": "EXECUTION_RESULT",
            "requestId": command["requestId"],
            "success": true,
            "result": result,
        }))
        .await?;
        Ok(command)
    }

    /// Returns `true` once the peer has closed the socket.
    pub async fn closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(WAIT, async {
                loop {
                    match self.ws.next().await {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                        _ => {}
                    }
                }
            })
            .await,
            Ok(())
        )
    }

    /// Closes the socket.
    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
