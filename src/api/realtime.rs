use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handlers::UserQuery;
use super::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl RealtimeEvent {
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn connected() -> Self {
        Self::new(
            "connected",
            json!({ "message": "Connected to ML analytics stream" }),
        )
    }

    pub fn echo(received: &str) -> Self {
        Self::new("echo", json!({ "received": received }))
    }

    pub fn heartbeat(user_id: Option<Uuid>) -> Self {
        Self::new(
            "heartbeat",
            json!({ "status": "waiting_for_data", "user_id": user_id }),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<RealtimeEvent>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self) -> (Uuid, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.clients.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Delivers to every open client and forgets the ones that went away.
    /// Returns the number of clients reached.
    pub async fn broadcast(&self, event: RealtimeEvent) -> usize {
        let mut clients = self.clients.write().await;
        clients.retain(|id, tx| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                debug!(client = %id, "dropping closed client");
            }
            delivered
        });
        clients.len()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

pub async fn ws_analytics(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry))
}

async fn handle_socket(socket: WebSocket, registry: ConnectionRegistry) {
    let (id, mut events) = registry.add().await;
    let (mut sender, mut receiver) = socket.split();
    let open = registry.len().await;
    info!(client = %id, open, "websocket client connected");

    if send_event(&mut sender, &RealtimeEvent::connected()).await.is_ok() {
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if send_event(&mut sender, &RealtimeEvent::echo(text.as_str())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(client = %id, error = %err, "websocket receive failed");
                        break;
                    }
                },
            }
        }
    }

    registry.remove(id).await;
    info!(client = %id, "websocket client disconnected");
}

async fn send_event<S>(sender: &mut S, event: &RealtimeEvent) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(payload.into())).await
}

pub async fn sse_analytics(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let every = state.config.sse_heartbeat;
    let user_id = query.user_id;

    let heartbeats = futures::stream::unfold(tokio::time::interval(every), move |mut ticker| async move {
        ticker.tick().await;
        let event = Event::default().json_data(RealtimeEvent::heartbeat(user_id));
        Some((event, ticker))
    });

    Sse::new(heartbeats).keep_alive(KeepAlive::default())
}
