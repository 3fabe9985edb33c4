//! WebSocket fan-out
//!
//! The `Hub` is the room's `Outbox` in production. Broadcasts go through a
//! single `tokio::sync::broadcast` channel that every socket subscribes to;
//! unicasts go through a per-connection unbounded `mpsc` sender looked up by
//! `ConnId`. Each socket runs a send task and a receive task; whichever
//! finishes first tears the other down and the room is told the connection
//! is gone.

use super::handlers::AppState;
use crate::events::{ClientMessage, ControlEvent, Outbox, ServerEvent};
use crate::identity::ConnId;
use crate::room::RoomEvent;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Receiving ends handed to a freshly accepted socket
pub struct Connection {
    pub id: ConnId,
    pub broadcasts: broadcast::Receiver<String>,
    pub direct: mpsc::UnboundedReceiver<String>,
    pub closed: watch::Receiver<bool>,
}

pub struct Hub {
    tx: broadcast::Sender<String>,
    direct: DashMap<ConnId, mpsc::UnboundedSender<String>>,
    next_id: AtomicU64,
    closed: watch::Sender<bool>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            direct: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed,
        }
    }

    /// Allocate an id and subscribe a new socket
    pub fn connect(&self) -> Connection {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (direct_tx, direct) = mpsc::unbounded_channel();
        self.direct.insert(id, direct_tx);
        Connection {
            id,
            broadcasts: self.tx.subscribe(),
            direct,
            closed: self.closed.subscribe(),
        }
    }

    pub fn disconnect(&self, id: ConnId) {
        self.direct.remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.direct.len()
    }

    /// Ask every open socket to close
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl Outbox for Hub {
    fn broadcast(&self, event: ServerEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event.to_json());
    }

    fn unicast(&self, conn: ConnId, event: ServerEvent) {
        if let Some(tx) = self.direct.get(&conn) {
            let _ = tx.send(event.to_json());
        }
    }
}

/// Translate a client frame into the event the room understands
pub fn route(conn: ConnId, msg: ClientMessage) -> RoomEvent {
    match msg {
        ClientMessage::Join { username } => RoomEvent::Join { conn, username },
        ClientMessage::Message { text } => RoomEvent::Chat { conn, text },
        ClientMessage::SnakeInput { direction } => RoomEvent::Control {
            conn,
            control: ControlEvent::SnakeTurn(direction),
        },
        ClientMessage::SnakeQuit => RoomEvent::Control {
            conn,
            control: ControlEvent::SnakeQuit,
        },
        ClientMessage::DragLane { direction } => RoomEvent::Control {
            conn,
            control: ControlEvent::DragLane(direction),
        },
        ClientMessage::DragNitro => RoomEvent::Control {
            conn,
            control: ControlEvent::DragNitro,
        },
    }
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let Connection {
        id,
        mut broadcasts,
        mut direct,
        closed,
    } = state.hub.connect();
    info!(conn = %id, "🔌 WebSocket client connected (total: {})", state.hub.connection_count());

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                Some(text) = direct.recv() => text,
                msg = broadcasts.recv() => match msg {
                    Ok(text) => text,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(conn = %id, skipped, "Client lagging behind broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let room = state.room.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => {
                        if !room.send(route(id, msg)) {
                            break;
                        }
                    }
                    Err(e) => debug!(conn = %id, "Ignoring malformed frame: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(conn = %id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = until_closed(closed) => {},
    }
    send_task.abort();
    recv_task.abort();

    state.hub.disconnect(id);
    state.room.send(RoomEvent::Disconnect { conn: id });
    info!(conn = %id, "🔌 WebSocket client disconnected (total: {})", state.hub.connection_count());
}

async fn until_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
