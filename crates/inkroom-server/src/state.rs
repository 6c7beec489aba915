//! Room registry and wire messages.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Chat records kept per room; older ones are dropped first.
pub const MAX_ROOM_HISTORY: usize = 1000;
const CHANNEL_CAPACITY: usize = 256;

/// A message sent by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, leaving the current one if any
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Leave a room
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Opaque chat payload for the room
    Chat {
        #[serde(rename = "roomId")]
        room_id: String,
        message: String,
    },
}

/// A message sent to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Chat payload from another peer
    Chat {
        #[serde(rename = "roomId")]
        room_id: String,
        message: String,
    },
    /// Error message
    Error { message: String },
}

/// One stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: u64,
    pub room_id: String,
    pub user_id: String,
    pub message: String,
}

/// Body of `GET /chats/{room_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Newest first.
    pub messages: Vec<ChatRecord>,
}

pub type RoomReceiver = broadcast::Receiver<(String, ServerMessage)>;

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<(String, ServerMessage)>,
    /// Connected peer IDs
    peers: HashSet<String>,
    /// Oldest first, capped at `MAX_ROOM_HISTORY`
    history: VecDeque<ChatRecord>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            history: VecDeque::new(),
        }
    }
}

/// Shared application state.
///
/// A room's peer set and history are only touched through its map entry, so
/// concurrent connections in the same room are serialized on that entry.
pub struct AppState {
    rooms: DashMap<String, Room>,
    next_id: AtomicU64,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add peer to room and subscribe to its broadcasts.
    pub fn join_room(&self, room_id: &str, peer_id: &str) -> (RoomReceiver, usize) {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string());
        (room.tx.subscribe(), room.peers.len())
    }

    /// Remove peer from room
    pub fn leave_room(&self, room_id: &str, peer_id: &str) {
        // Rooms with history outlive their last peer.
        self.rooms
            .remove_if_mut(room_id, |_, room| {
                room.peers.remove(peer_id);
                room.peers.is_empty() && room.history.is_empty()
            });
    }

    /// Store a chat message and broadcast it to the room.
    pub fn post_chat(&self, room_id: &str, peer_id: &str, message: String) -> Option<ChatRecord> {
        let mut room = self.rooms.get_mut(room_id)?;
        let record = ChatRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            room_id: room_id.to_string(),
            user_id: peer_id.to_string(),
            message,
        };
        room.history.push_back(record.clone());
        while room.history.len() > MAX_ROOM_HISTORY {
            room.history.pop_front();
        }
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::Chat {
                room_id: record.room_id.clone(),
                message: record.message.clone(),
            },
        ));
        Some(record)
    }

    /// Room history, newest first.
    pub fn history(&self, room_id: &str) -> Vec<ChatRecord> {
        self.rooms
            .get(room_id)
            .map(|room| room.history.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|room| room.peers.len()).unwrap_or(0)
    }

    pub fn is_member(&self, room_id: &str, peer_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.peers.contains(peer_id))
    }
}
