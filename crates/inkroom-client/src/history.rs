//! Room history: the shapes committed before this session joined.

use inkroom_core::protocol::decode_shape;
use inkroom_core::shapes::Shape;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use thiserror::Error;
use url::Url;

/// History errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History request failed: {0}")]
    Request(String),
    #[error("History service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed history response: {0}")]
    Decode(String),
    #[error("History store error: {0}")]
    Other(String),
}

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Source of a room's previously committed shapes.
///
/// `fetch` resolves to the shapes in commit order, oldest first.
#[cfg(not(target_arch = "wasm32"))]
pub trait HistoryStore: Send + Sync {
    fn fetch<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, HistoryResult<Vec<Shape>>>;
}

/// Source of a room's previously committed shapes (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait HistoryStore {
    fn fetch<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, HistoryResult<Vec<Shape>>>;
}

/// One stored chat record. Other columns the service returns are ignored.
#[derive(Debug, Deserialize)]
struct HistoryRecord {
    #[serde(default)]
    id: Option<i64>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    messages: Vec<HistoryRecord>,
}

/// Decode a `{"messages": [...]}` body.
///
/// The service lists records newest first; the result is in commit order.
/// Records whose message is not a valid shape are skipped.
pub fn parse_history(body: &str) -> HistoryResult<Vec<Shape>> {
    let response: HistoryResponse =
        serde_json::from_str(body).map_err(|e| HistoryError::Decode(e.to_string()))?;

    let total = response.messages.len();
    let shapes: Vec<Shape> = response
        .messages
        .into_iter()
        .rev()
        .filter_map(|record| match decode_shape(&record.message) {
            Ok(shape) => Some(shape),
            Err(e) => {
                log::warn!("Skipping history record {:?}: {}", record.id, e);
                None
            }
        })
        .collect();

    log::debug!("Decoded {} of {} history records", shapes.len(), total);
    Ok(shapes)
}

/// History fetched over HTTP: `GET <api>/chats/<roomId>`.
pub struct HttpHistoryStore {
    http: reqwest::Client,
    api_url: Url,
}

impl HttpHistoryStore {
    pub fn new(api_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
        }
    }

    fn room_url(&self, room_id: &str) -> HistoryResult<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| HistoryError::Request(format!("Cannot build history URL from {}", self.api_url)))?
            .pop_if_empty()
            .extend(["chats", room_id]);
        Ok(url)
    }
}

impl HistoryStore for HttpHistoryStore {
    fn fetch<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, HistoryResult<Vec<Shape>>> {
        Box::pin(async move {
            let url = self.room_url(room_id)?;
            log::info!("Fetching history for room {}", room_id);

            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| HistoryError::Request(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| HistoryError::Request(e.to_string()))?;

            if !(200..300).contains(&status) {
                return Err(HistoryError::Status { status, body });
            }
            parse_history(&body)
        })
    }
}

/// In-memory history for offline use and tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    rooms: RwLock<HashMap<String, Vec<Shape>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a shape to a room, as if it had been committed there.
    pub fn record(&self, room_id: &str, shape: Shape) -> HistoryResult<()> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| HistoryError::Other(format!("Lock error: {}", e)))?;
        rooms.entry(room_id.to_string()).or_default().push(shape);
        Ok(())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn fetch<'a>(&'a self, room_id: &'a str) -> BoxFuture<'a, HistoryResult<Vec<Shape>>> {
        Box::pin(async move {
            let rooms = self
                .rooms
                .read()
                .map_err(|e| HistoryError::Other(format!("Lock error: {}", e)))?;
            Ok(rooms.get(room_id).cloned().unwrap_or_default())
        })
    }
}
