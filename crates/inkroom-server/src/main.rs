//! InkRoom Relay Server
//!
//! Relays chat payloads (serialized shapes) between clients in the same room
//! and keeps each room's recent history for late joiners.
//!
//! ## Protocol
//!
//! Clients connect to `/ws?token=<bearer>` and send JSON:
//! ```json
//! { "type": "join_room", "roomId": "room-id" }
//! { "type": "leave_room", "roomId": "room-id" }
//! { "type": "chat", "roomId": "room-id", "message": "<opaque string>" }
//! ```
//! Other peers in the room receive `{ "type": "chat", "roomId", "message" }`;
//! the sender does not. History is served newest first by `GET /chats/{room_id}`.

mod state;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use state::{AppState, ClientMessage, HistoryResponse, RoomReceiver, ServerMessage};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkroom_server=info,tower_http=info".into()),
        )
        .init();

    let raw_addr = std::env::var("INKROOM_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let addr: SocketAddr = match raw_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid INKROOM_ADDR {:?}: {}", raw_addr, e);
            std::process::exit(2);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("InkRoom relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws?token=<token>", addr);

    if let Err(e) = axum::serve(listener, app(Arc::new(AppState::new()))).await {
        error!("Server error: {}", e);
    }
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/chats/{room_id}", get(chats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "InkRoom Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// Room history, newest first
async fn chats(State(state): State<Arc<AppState>>, Path(room_id): Path<String>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        messages: state.history(&room_id),
    })
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Token verification belongs to the auth service; only presence is checked.
    if params.token.as_deref().is_none_or(str::is_empty) {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to encode {:?}: {}", msg, e);
            None
        }
    }
}

/// What to do with one item received from the room broadcast.
#[derive(Debug)]
enum Forward {
    Deliver(ServerMessage),
    Skip,
    /// The peer can no longer be kept consistent and must rejoin.
    Disconnect(String),
}

fn forward(received: Result<(String, ServerMessage), RecvError>, peer_id: &str) -> Forward {
    match received {
        // Don't echo back to sender
        Ok((from, _)) if from == peer_id => Forward::Skip,
        Ok((_, msg)) => Forward::Deliver(msg),
        Err(RecvError::Lagged(skipped)) => Forward::Disconnect(format!("lagged behind room by {} messages", skipped)),
        Err(RecvError::Closed) => Forward::Disconnect("room closed".to_string()),
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut current_room: Option<String> = None;
    let mut room_rx: Option<RoomReceiver> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore binary and ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::JoinRoom { room_id }) => {
                        if let Some(old_room) = current_room.take() {
                            state.leave_room(&old_room, &peer_id);
                        }
                        let (rx, peer_count) = state.join_room(&room_id, &peer_id);
                        info!("Peer {} joined room {} ({} peers)", peer_id, room_id, peer_count);
                        room_rx = Some(rx);
                        current_room = Some(room_id);
                        None
                    }
                    Ok(ClientMessage::LeaveRoom { room_id }) => {
                        if current_room.as_deref() == Some(room_id.as_str()) {
                            state.leave_room(&room_id, &peer_id);
                            info!(
                                "Peer {} left room {} ({} peers)",
                                peer_id,
                                room_id,
                                state.peer_count(&room_id)
                            );
                            current_room = None;
                            room_rx = None;
                        }
                        None
                    }
                    Ok(ClientMessage::Chat { room_id, message }) => {
                        if state.is_member(&room_id, &peer_id)
                            && state.post_chat(&room_id, &peer_id, message).is_some()
                        {
                            debug!("Peer {} posted to room {}", peer_id, room_id);
                            None
                        } else {
                            Some(ServerMessage::Error {
                                message: format!("Not a member of room {}", room_id),
                            })
                        }
                    }
                    Err(e) => {
                        warn!("Invalid message from {}: {}", peer_id, e);
                        Some(ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        })
                    }
                };

                if let Some(frame) = reply.as_ref().and_then(encode) {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            msg = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await,
                    None => {
                        // No room joined, just wait forever
                        std::future::pending().await
                    }
                }
            } => {
                match forward(msg, &peer_id) {
                    Forward::Deliver(server_msg) => {
                        if let Some(frame) = encode(&server_msg) {
                            if sender.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Forward::Skip => {}
                    Forward::Disconnect(reason) => {
                        warn!("Disconnecting {}: {}", peer_id, reason);
                        let close = CloseFrame {
                            code: close_code::AGAIN,
                            reason: reason.into(),
                        };
                        let _ = sender.send(Message::Close(Some(close))).await;
                        break;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(ref room) = current_room {
        state.leave_room(room, &peer_id);
    }
    info!("Connection closed: {}", peer_id);
}
