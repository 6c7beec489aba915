//! WebSocket connection to the relay.
//!
//! Provides a platform-agnostic [`Connection`] interface; frames are passed
//! through as text and decoded by the session.

use thiserror::Error;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Error,
}

/// Events from the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The socket is open and frames may be sent.
    Opened,
    /// A text frame from the relay.
    Message(String),
    /// The socket closed.
    Closed,
    /// The socket failed; terminal like `Closed`.
    Error { message: String },
}

impl ConnectionState {
    fn after(self, event: &ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Opened => ConnectionState::Open,
            ConnectionEvent::Closed => ConnectionState::Closed,
            ConnectionEvent::Error { .. } => ConnectionState::Error,
            ConnectionEvent::Message(_) => self,
        }
    }
}

/// A bidirectional text-frame channel owned by one session.
///
/// `send` is fire-and-forget; inbound frames are collected in the background
/// and handed out by `poll_events`.
pub trait Connection {
    /// Queue a text frame.
    fn send(&mut self, text: &str) -> Result<(), ConnectionError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<ConnectionEvent>;

    /// Get current connection state.
    fn state(&self) -> ConnectionState;

    /// Close the connection. Idempotent.
    fn close(&mut self);

    /// Check if the connection is open.
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

fn validate_url(url: &url::Url) -> Result<(), ConnectionError> {
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConnectionError::InvalidUrl(format!(
            "Invalid WebSocket URL scheme: {}",
            other
        ))),
    }
}

// ============================================================================
// WASM WebSocket Client
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_client {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;
    use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

    /// WebSocket client for WASM.
    ///
    /// Browser callbacks push into a shared queue that `poll_events()` drains.
    pub struct WasmWebSocket {
        ws: Option<WebSocket>,
        state: ConnectionState,
        events: Rc<RefCell<Vec<ConnectionEvent>>>,
        _on_open: Option<Closure<dyn Fn()>>,
        _on_message: Option<Closure<dyn Fn(MessageEvent)>>,
        _on_close: Option<Closure<dyn Fn(CloseEvent)>>,
        _on_error: Option<Closure<dyn Fn(ErrorEvent)>>,
    }

    impl WasmWebSocket {
        /// Create a client that is not connected yet.
        pub fn new() -> Self {
            Self {
                ws: None,
                state: ConnectionState::Closed,
                events: Rc::new(RefCell::new(Vec::new())),
                _on_open: None,
                _on_message: None,
                _on_close: None,
                _on_error: None,
            }
        }

        /// Create a client and start connecting to `url`.
        pub fn connect_to(url: &url::Url) -> Result<Self, ConnectionError> {
            let mut ws = Self::new();
            ws.connect(url)?;
            Ok(ws)
        }

        /// Start connecting to a WebSocket server.
        pub fn connect(&mut self, url: &url::Url) -> Result<(), ConnectionError> {
            if self.ws.is_some() {
                return Err(ConnectionError::AlreadyConnected);
            }
            validate_url(url)?;

            let ws = WebSocket::new(url.as_str())
                .map_err(|e| ConnectionError::InvalidUrl(format!("Failed to create WebSocket: {:?}", e)))?;
            ws.set_binary_type(web_sys::BinaryType::Arraybuffer);

            self.state = ConnectionState::Connecting;
            let events = self.events.clone();

            let events_open = events.clone();
            let on_open = Closure::wrap(Box::new(move || {
                events_open.borrow_mut().push(ConnectionEvent::Opened);
            }) as Box<dyn Fn()>);
            ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

            let events_msg = events.clone();
            let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
                if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                    events_msg.borrow_mut().push(ConnectionEvent::Message(txt.into()));
                }
            }) as Box<dyn Fn(MessageEvent)>);
            ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

            let events_close = events.clone();
            let on_close = Closure::wrap(Box::new(move |_e: CloseEvent| {
                events_close.borrow_mut().push(ConnectionEvent::Closed);
            }) as Box<dyn Fn(CloseEvent)>);
            ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

            let events_err = events;
            let on_error = Closure::wrap(Box::new(move |_e: ErrorEvent| {
                events_err.borrow_mut().push(ConnectionEvent::Error {
                    message: "WebSocket error".to_string(),
                });
            }) as Box<dyn Fn(ErrorEvent)>);
            ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            self.ws = Some(ws);
            self._on_open = Some(on_open);
            self._on_message = Some(on_message);
            self._on_close = Some(on_close);
            self._on_error = Some(on_error);

            Ok(())
        }
    }

    impl Connection for WasmWebSocket {
        fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
            match self.ws {
                Some(ref ws) => ws
                    .send_with_str(text)
                    .map_err(|e| ConnectionError::SendFailed(format!("{:?}", e))),
                None => Err(ConnectionError::NotConnected),
            }
        }

        fn poll_events(&mut self) -> Vec<ConnectionEvent> {
            let mut events = self.events.borrow_mut();
            for event in events.iter() {
                self.state = self.state.after(event);
            }
            std::mem::take(&mut *events)
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn close(&mut self) {
            if let Some(ws) = self.ws.take() {
                ws.set_onopen(None);
                ws.set_onmessage(None);
                ws.set_onclose(None);
                ws.set_onerror(None);
                let _ = ws.close();
            }
            self.state = ConnectionState::Closed;
            self._on_open = None;
            self._on_message = None;
            self._on_close = None;
            self._on_error = None;
        }
    }

    impl Default for WasmWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for WasmWebSocket {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_client::WasmWebSocket;

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};

    /// Read timeout that bounds how long the socket thread waits before
    /// checking for outgoing commands.
    const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        state: ConnectionState,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<ConnectionEvent>>,
        /// Handle to the WebSocket thread.
        thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        /// Create a client that is not connected yet.
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Closed,
                cmd_tx: None,
                event_rx: None,
                thread: None,
            }
        }

        /// Create a client and start connecting to `url`.
        pub fn connect_to(url: &url::Url) -> Result<Self, ConnectionError> {
            let mut ws = Self::new();
            ws.connect(url)?;
            Ok(ws)
        }

        /// Start connecting to a WebSocket server.
        pub fn connect(&mut self, url: &url::Url) -> Result<(), ConnectionError> {
            if self.cmd_tx.is_some() {
                return Err(ConnectionError::AlreadyConnected);
            }
            validate_url(url)?;

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<ConnectionEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || socket_thread(&url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self.thread = Some(handle);

            Ok(())
        }
    }

    fn socket_thread(url: &str, cmd_rx: Receiver<WsCommand>, event_tx: Sender<ConnectionEvent>) {
        // Never log the query string; it carries the bearer token.
        let display_url = url.split('?').next().unwrap_or(url);
        log::info!("WebSocket thread: connecting to {}", display_url);

        let (mut socket, response) = match connect(url) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(ConnectionEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return;
            }
        };
        log::info!("WebSocket connected, status: {}", response.status());
        let _ = event_tx.send(ConnectionEvent::Opened);

        match socket.get_mut() {
            tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(READ_POLL_INTERVAL));
                let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
            }
            #[allow(unreachable_patterns)]
            _ => {
                log::debug!("TLS or other stream - using default timeout handling");
            }
        }

        let terminal = loop {
            if let Some(terminal) = drain_commands(&mut socket, &cmd_rx) {
                break terminal;
            }

            match socket.read() {
                Ok(Message::Text(txt)) => {
                    log::debug!("WebSocket received: {}", truncate(&txt));
                    let _ = event_tx.send(ConnectionEvent::Message(txt));
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break ConnectionEvent::Closed;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(tungstenite::Error::ConnectionClosed) => break ConnectionEvent::Closed,
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    break ConnectionEvent::Error { message: e.to_string() };
                }
            }
        };

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(terminal);
    }

    /// Send every queued command. Returns the terminal event if the socket
    /// should shut down.
    fn drain_commands<S: std::io::Read + std::io::Write>(
        socket: &mut tungstenite::WebSocket<S>,
        cmd_rx: &Receiver<WsCommand>,
    ) -> Option<ConnectionEvent> {
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending: {}", truncate(&msg));
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        return Some(ConnectionEvent::Error { message: e.to_string() });
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return Some(ConnectionEvent::Closed);
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    return Some(ConnectionEvent::Closed);
                }
                Err(TryRecvError::Empty) => return None,
            }
        }
    }

    fn truncate(text: &str) -> &str {
        match text.char_indices().nth(100) {
            Some((i, _)) => &text[..i],
            None => text,
        }
    }

    impl Connection for NativeWebSocket {
        fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(text.to_string()))
                    .map_err(|e| ConnectionError::SendFailed(e.to_string())),
                None => Err(ConnectionError::NotConnected),
            }
        }

        fn poll_events(&mut self) -> Vec<ConnectionEvent> {
            let mut events = Vec::new();
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    self.state = self.state.after(&event);
                    events.push(event);
                }
            }
            events
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn close(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            // The thread finishes on its own once it sees the close command.
            self.thread = None;
            self.state = ConnectionState::Closed;
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

// ============================================================================
// Platform type alias
// ============================================================================

/// Platform-specific WebSocket client type.
#[cfg(target_arch = "wasm32")]
pub type PlatformWebSocket = WasmWebSocket;

#[cfg(not(target_arch = "wasm32"))]
pub type PlatformWebSocket = NativeWebSocket;
