//! Room session: one client's live view of one room.
//!
//! A [`Session`] owns the canonical shape list, the tool state machine, the
//! raster surface and the relay connection. Every entry point is synchronous
//! except [`Session::load_history`]; hosts drive the session by forwarding
//! pointer input and calling [`Session::pump`] from their event loop.
//!
//! Lifecycle:
//! 1. `open` starts in `Connecting`.
//! 2. `pump` sees the connection open, sends `join_room` once and moves to
//!    `Loading` until history lands (or `Ready` if it already has).
//! 3. History replaces the shape list outright; frames that arrived while it
//!    was in flight are replayed on top of it.
//! 4. `close` (or drop) sends `leave_room` if possible and closes the socket.
//!    Anything arriving afterwards, including a late history response, is
//!    discarded.

use crate::analysis::Annotation;
use crate::connection::{Connection, ConnectionError, ConnectionEvent};
use crate::history::{HistoryError, HistoryStore};
use inkroom_core::input::PointerEvent;
use inkroom_core::protocol::{ClientMessage, Inbound, ProtocolError, parse_relay_message};
use inkroom_core::shapes::{Shape, ShapeError};
use inkroom_core::tools::{ToolKind, ToolManager, ToolOutcome};
use inkroom_render::{CapturedImage, RasterRenderer, RenderContext, Renderer, RendererError};
use kurbo::Rect;
use thiserror::Error;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not ready for drawing ({0:?})")]
    NotReady(SessionStatus),
    #[error("Session is closed")]
    Closed,
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Render(#[from] RendererError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    InvalidShape(#[from] ShapeError),
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the relay connection to open.
    Connecting,
    /// Joined the room; history has not landed yet.
    Loading,
    /// Connected, joined and history applied. Pointer input is accepted.
    Ready,
    /// The history fetch failed; call `load_history` again to retry.
    LoadFailed,
    /// The connection closed or failed. Terminal.
    Disconnected,
    /// `close` was called. Terminal.
    Closed,
}

/// What an operation did, for hosts and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideEffects {
    /// The surface was repainted.
    pub repainted: bool,
    /// Shape committed locally by this operation.
    pub committed: Option<Shape>,
    /// Shapes appended to the canonical list (local and remote).
    pub appended: usize,
    /// Frames sent to the relay.
    pub messages_sent: usize,
    /// Region handed to the capture callback.
    pub captured: Option<Rect>,
}

impl SideEffects {
    fn merge(&mut self, other: SideEffects) {
        self.repainted |= other.repainted;
        if other.committed.is_some() {
            self.committed = other.committed;
        }
        self.appended += other.appended;
        self.messages_sent += other.messages_sent;
        if other.captured.is_some() {
            self.captured = other.captured;
        }
    }
}

/// Identifies one history request; responses for older tickets are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryTicket(u64);

type CaptureCallback = Box<dyn FnMut(&CapturedImage)>;

/// One client's live view of one room.
pub struct Session<C: Connection> {
    room_id: String,
    shapes: Vec<Shape>,
    tools: ToolManager,
    renderer: RasterRenderer,
    connection: C,
    joined: bool,
    history_loaded: bool,
    history_error: Option<String>,
    next_ticket: u64,
    pending_ticket: Option<HistoryTicket>,
    /// Inbound frames received before history landed, in arrival order.
    buffered: Vec<String>,
    disconnected: Option<String>,
    closed: bool,
    capture_callback: Option<CaptureCallback>,
    annotations: Vec<Annotation>,
    repaints: u64,
}

impl<C: Connection> Session<C> {
    /// Create a session for `room_id` over a connection that is opening.
    ///
    /// The surface is painted once so hosts have a frame to show while
    /// connecting.
    pub fn open(room_id: impl Into<String>, connection: C, viewport: (u32, u32)) -> Self {
        let room_id = room_id.into();
        log::info!("Opening session for room {}", room_id);
        let mut session = Self {
            room_id,
            shapes: Vec::new(),
            tools: ToolManager::new(),
            renderer: RasterRenderer::new(viewport.0, viewport.1),
            connection,
            joined: false,
            history_loaded: false,
            history_error: None,
            next_ticket: 0,
            pending_ticket: None,
            buffered: Vec::new(),
            disconnected: None,
            closed: false,
            capture_callback: None,
            annotations: Vec::new(),
            repaints: 0,
        };
        session.repaint();
        session
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Canonical shape list in local commit and arrival order.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn status(&self) -> SessionStatus {
        if self.closed {
            SessionStatus::Closed
        } else if self.disconnected.is_some() {
            SessionStatus::Disconnected
        } else if self.history_error.is_some() {
            SessionStatus::LoadFailed
        } else if !self.joined {
            SessionStatus::Connecting
        } else if !self.history_loaded {
            SessionStatus::Loading
        } else {
            SessionStatus::Ready
        }
    }

    /// Reason for a `Disconnected` or `LoadFailed` status.
    pub fn last_error(&self) -> Option<&str> {
        self.disconnected.as_deref().or(self.history_error.as_deref())
    }

    pub fn tool(&self) -> ToolKind {
        self.tools.current_tool()
    }

    pub fn renderer(&self) -> &RasterRenderer {
        &self.renderer
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Number of full repaints since the session opened.
    pub fn repaint_count(&self) -> u64 {
        self.repaints
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Start a history request. Any earlier outstanding request becomes stale.
    pub fn begin_history_load(&mut self) -> HistoryTicket {
        self.next_ticket += 1;
        let ticket = HistoryTicket(self.next_ticket);
        self.pending_ticket = Some(ticket);
        self.history_error = None;
        ticket
    }

    /// Apply the outcome of the request identified by `ticket`.
    ///
    /// History replaces the shape list, then buffered frames are replayed on
    /// top of it. Stale or post-close responses are dropped without effect.
    pub fn apply_history(
        &mut self,
        ticket: HistoryTicket,
        result: Result<Vec<Shape>, HistoryError>,
    ) -> Result<SideEffects, SessionError> {
        if self.closed || self.pending_ticket != Some(ticket) {
            log::debug!("Discarding stale history response {:?}", ticket);
            return Ok(SideEffects::default());
        }
        self.pending_ticket = None;

        let history = match result {
            Ok(history) => history,
            Err(e) => {
                log::error!("History fetch for room {} failed: {}", self.room_id, e);
                self.history_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        log::info!("Loaded {} shapes for room {}", history.len(), self.room_id);
        let mut effects = SideEffects {
            appended: history.len(),
            ..SideEffects::default()
        };
        self.shapes = history;
        self.history_loaded = true;

        for frame in std::mem::take(&mut self.buffered) {
            if self.ingest(&frame) {
                effects.appended += 1;
            }
        }

        self.repaint();
        effects.repainted = true;
        Ok(effects)
    }

    /// Fetch history from `store` and apply it.
    ///
    /// This is the only suspension point of a session. Dropping the future
    /// abandons the request; a later call issues a fresh ticket.
    pub async fn load_history<S: HistoryStore + ?Sized>(&mut self, store: &S) -> Result<SideEffects, SessionError> {
        let ticket = self.begin_history_load();
        let result = store.fetch(&self.room_id).await;
        self.apply_history(ticket, result)
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Drain connection events.
    ///
    /// Sends `join_room` the first time the connection reports open. A failed
    /// join disconnects the session; the remaining events are still handled.
    pub fn pump(&mut self) -> SideEffects {
        let mut effects = SideEffects::default();
        if self.closed {
            return effects;
        }

        for event in self.connection.poll_events() {
            match event {
                ConnectionEvent::Opened => {
                    if self.joined || self.disconnected.is_some() {
                        continue;
                    }
                    let sent = ClientMessage::join(self.room_id.as_str())
                        .to_json()
                        .map_err(SessionError::from)
                        .and_then(|join| self.connection.send(&join).map_err(SessionError::from));
                    match sent {
                        Ok(()) => {
                            self.joined = true;
                            effects.messages_sent += 1;
                            log::info!("Joined room {}", self.room_id);
                        }
                        Err(e) => {
                            log::error!("Failed to join room {}: {}", self.room_id, e);
                            self.mark_disconnected(e.to_string());
                        }
                    }
                }
                ConnectionEvent::Message(text) => {
                    effects.merge(self.apply_remote_message(&text));
                }
                ConnectionEvent::Closed => {
                    self.mark_disconnected("Connection closed".to_string());
                }
                ConnectionEvent::Error { message } => {
                    self.mark_disconnected(message);
                }
            }
        }
        effects
    }

    /// Apply one inbound relay frame.
    ///
    /// Frames that arrive before history are buffered. Malformed frames are
    /// logged and dropped, leaving the shape list unchanged.
    pub fn apply_remote_message(&mut self, text: &str) -> SideEffects {
        let mut effects = SideEffects::default();
        if self.closed {
            return effects;
        }
        if !self.history_loaded {
            log::debug!("Buffering frame until history lands");
            self.buffered.push(text.to_string());
            return effects;
        }
        if self.ingest(text) {
            self.repaint();
            effects.repainted = true;
            effects.appended = 1;
        }
        effects
    }

    /// Decode a frame and append its shape. Returns whether a shape was added.
    fn ingest(&mut self, text: &str) -> bool {
        match parse_relay_message(text) {
            Ok(Inbound::Shape { shape, .. }) => {
                self.shapes.push(shape);
                true
            }
            Ok(Inbound::RelayError { message }) => {
                log::warn!("Relay reported an error: {}", message);
                false
            }
            Ok(Inbound::Ignored) => false,
            Err(e) => {
                log::warn!("Dropping malformed frame: {}", e);
                false
            }
        }
    }

    fn mark_disconnected(&mut self, reason: String) {
        if self.disconnected.is_none() {
            log::warn!("Room {} disconnected: {}", self.room_id, reason);
            self.disconnected = Some(reason);
        }
        self.tools.cancel();
    }

    // ------------------------------------------------------------------
    // Drawing
    // ------------------------------------------------------------------

    /// Single entry point for pointer input.
    ///
    /// Input is ignored unless the session is `Ready`.
    pub fn handle_pointer_event(&mut self, event: PointerEvent) -> Result<SideEffects, SessionError> {
        if self.status() != SessionStatus::Ready {
            log::trace!("Ignoring pointer input while {:?}", self.status());
            return Ok(SideEffects::default());
        }

        match self.tools.handle_pointer_event(event) {
            ToolOutcome::Ignored | ToolOutcome::Started => Ok(SideEffects::default()),
            ToolOutcome::Preview | ToolOutcome::SelectionCleared | ToolOutcome::Discarded => {
                self.repaint();
                Ok(SideEffects {
                    repainted: true,
                    ..SideEffects::default()
                })
            }
            ToolOutcome::Committed(shape) => self.apply_local_commit(shape),
            ToolOutcome::Captured(region) => self.capture_region(region),
        }
    }

    /// Append a locally drawn shape, repaint and broadcast it.
    ///
    /// If the send fails the shape stays in the local list and the session
    /// becomes `Disconnected`.
    pub fn apply_local_commit(&mut self, shape: Shape) -> Result<SideEffects, SessionError> {
        let status = self.status();
        if status != SessionStatus::Ready {
            return Err(SessionError::NotReady(status));
        }
        shape.validate()?;
        let frame = ClientMessage::chat(self.room_id.as_str(), &shape)?.to_json()?;

        self.shapes.push(shape.clone());
        self.repaint();
        let mut effects = SideEffects {
            repainted: true,
            committed: Some(shape),
            appended: 1,
            ..SideEffects::default()
        };

        match self.connection.send(&frame) {
            Ok(()) => effects.messages_sent = 1,
            Err(e) => {
                log::error!("Failed to broadcast shape: {}", e);
                self.mark_disconnected(e.to_string());
            }
        }
        Ok(effects)
    }

    /// Select a tool. Ignored (returns `false`) while a drag is in progress.
    pub fn set_tool(&mut self, tool: ToolKind) -> bool {
        self.tools.set_tool(tool)
    }

    /// Resize the surface and repaint.
    pub fn resize(&mut self, width: u32, height: u32) -> SideEffects {
        self.renderer.resize(width, height);
        self.repaint();
        SideEffects {
            repainted: true,
            ..SideEffects::default()
        }
    }

    // ------------------------------------------------------------------
    // Region capture
    // ------------------------------------------------------------------

    /// Register the sink for captured regions, replacing any previous one.
    pub fn set_capture_callback(&mut self, callback: impl FnMut(&CapturedImage) + 'static) {
        self.capture_callback = Some(Box::new(callback));
    }

    /// Capture `region` of the board.
    ///
    /// The surface is repainted first so the selection overlay is not part of
    /// the image, then the pixels are encoded and handed to the callback.
    /// Nothing is sent to the relay.
    pub fn capture_region(&mut self, region: Rect) -> Result<SideEffects, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.repaint();
        let image = self.renderer.capture(region)?;
        let captured = image.region;
        match self.capture_callback.as_mut() {
            Some(callback) => callback(&image),
            None => log::debug!("No capture callback registered; dropping capture"),
        }
        Ok(SideEffects {
            repainted: true,
            captured: Some(captured),
            ..SideEffects::default()
        })
    }

    /// Attach analysis text to a captured region. Local only.
    pub fn annotate(&mut self, region: Rect, text: impl Into<String>) -> &Annotation {
        self.annotations.push(Annotation::new(region, text));
        &self.annotations[self.annotations.len() - 1]
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Leave the room and close the connection. Idempotent.
    ///
    /// After this returns no further pointer input, relay frames or history
    /// responses are applied.
    pub fn close(&mut self) -> SideEffects {
        let mut effects = SideEffects::default();
        if self.closed {
            return effects;
        }
        self.closed = true;
        self.tools.cancel();
        self.buffered.clear();
        self.pending_ticket = None;

        if self.joined && self.connection.is_open() {
            match ClientMessage::leave(self.room_id.as_str()).to_json() {
                Ok(frame) => match self.connection.send(&frame) {
                    Ok(()) => effects.messages_sent = 1,
                    Err(e) => log::debug!("Could not send leave_room: {}", e),
                },
                Err(e) => log::error!("Failed to encode leave_room: {}", e),
            }
        }
        self.connection.close();
        log::info!("Closed session for room {}", self.room_id);
        effects
    }

    fn repaint(&mut self) {
        let preview = self.tools.preview();
        let ctx = RenderContext::new(&self.shapes, self.renderer.size()).with_preview(preview.as_ref());
        self.renderer.render(&ctx);
        self.repaints += 1;
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::history::MemoryHistoryStore;
    use crate::history::tests::block_on;
    use inkroom_core::shapes::{Circle, Rectangle};
    use kurbo::Point;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Scripted connection. Events are queued by the test; sent frames are
    /// recorded in a shared log the test keeps a handle to.
    #[derive(Default)]
    struct MockConnection {
        state: Rc<RefCell<MockState>>,
    }

    #[derive(Default)]
    struct MockState {
        events: Vec<ConnectionEvent>,
        sent: Vec<String>,
        open: bool,
        closed: bool,
        fail_sends: bool,
    }

    impl MockConnection {
        fn new() -> (Self, Rc<RefCell<MockState>>) {
            let conn = Self::default();
            let handle = conn.state.clone();
            (conn, handle)
        }
    }

    impl Connection for MockConnection {
        fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
            let mut state = self.state.borrow_mut();
            if state.fail_sends || !state.open {
                return Err(ConnectionError::SendFailed("socket gone".into()));
            }
            state.sent.push(text.to_string());
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<ConnectionEvent> {
            let mut state = self.state.borrow_mut();
            let events = std::mem::take(&mut state.events);
            for event in &events {
                match event {
                    ConnectionEvent::Opened => state.open = true,
                    ConnectionEvent::Closed | ConnectionEvent::Error { .. } => state.open = false,
                    ConnectionEvent::Message(_) => {}
                }
            }
            events
        }

        fn state(&self) -> ConnectionState {
            let state = self.state.borrow();
            if state.closed {
                ConnectionState::Closed
            } else if state.open {
                ConnectionState::Open
            } else {
                ConnectionState::Connecting
            }
        }

        fn close(&mut self) {
            let mut state = self.state.borrow_mut();
            state.open = false;
            state.closed = true;
        }
    }

    fn push_event(handle: &Rc<RefCell<MockState>>, event: ConnectionEvent) {
        handle.borrow_mut().events.push(event);
    }

    fn sent(handle: &Rc<RefCell<MockState>>) -> Vec<serde_json::Value> {
        handle
            .borrow()
            .sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    const RECT_FRAME: &str = r#"{"type":"chat","roomId":"R","message":"{\"shape\":{\"type\":\"rect\",\"x\":1,\"y\":1,\"width\":2,\"height\":2}}"}"#;

    fn chat_frame(shape: &Shape) -> String {
        ClientMessage::chat("R", shape).unwrap().to_json().unwrap()
    }

    /// A session that is connected, joined and has loaded empty history.
    fn ready_session() -> (Session<MockConnection>, Rc<RefCell<MockState>>) {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (200, 200));
        push_event(&handle, ConnectionEvent::Opened);
        session.pump();
        let ticket = session.begin_history_load();
        session.apply_history(ticket, Ok(Vec::new())).unwrap();
        handle.borrow_mut().sent.clear();
        assert_eq!(session.status(), SessionStatus::Ready);
        (session, handle)
    }

    fn drag(session: &mut Session<MockConnection>, from: (f64, f64), to: (f64, f64)) -> SideEffects {
        let mut effects = SideEffects::default();
        effects.merge(session.handle_pointer_event(PointerEvent::down(from.0, from.1)).unwrap());
        effects.merge(session.handle_pointer_event(PointerEvent::moved(to.0, to.1)).unwrap());
        effects.merge(session.handle_pointer_event(PointerEvent::up(to.0, to.1)).unwrap());
        effects
    }

    #[test]
    fn test_join_room_sent_once_on_open() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(sent(&handle).is_empty());

        push_event(&handle, ConnectionEvent::Opened);
        let effects = session.pump();
        assert_eq!(effects.messages_sent, 1);
        assert_eq!(sent(&handle), vec![serde_json::json!({"type": "join_room", "roomId": "R"})]);
        assert_eq!(session.status(), SessionStatus::Loading);

        push_event(&handle, ConnectionEvent::Opened);
        assert_eq!(session.pump().messages_sent, 0);
        assert_eq!(sent(&handle).len(), 1);
    }

    #[test]
    fn test_failed_join_disconnects_and_keeps_draining() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        handle.borrow_mut().fail_sends = true;
        push_event(&handle, ConnectionEvent::Opened);
        push_event(&handle, ConnectionEvent::Message(RECT_FRAME.to_string()));

        let effects = session.pump();
        assert_eq!(effects.messages_sent, 0);
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(session.last_error().unwrap().contains("socket gone"));
        assert!(handle.borrow().events.is_empty());
        assert_eq!(session.buffered.len(), 1);

        handle.borrow_mut().fail_sends = false;
        push_event(&handle, ConnectionEvent::Opened);
        assert_eq!(session.pump().messages_sent, 0);
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn test_history_before_open_waits_for_join() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        let store = MemoryHistoryStore::new();
        block_on(session.load_history(&store)).unwrap();
        assert_eq!(session.status(), SessionStatus::Connecting);

        push_event(&handle, ConnectionEvent::Opened);
        session.pump();
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_input_ignored_until_ready() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        session.set_tool(ToolKind::Rect);
        push_event(&handle, ConnectionEvent::Opened);
        session.pump();

        let effects = drag(&mut session, (0.0, 0.0), (10.0, 10.0));
        assert_eq!(effects, SideEffects::default());
        assert!(session.shapes().is_empty());
        assert!(matches!(
            session.apply_local_commit(Shape::Rect(Rectangle::new(Point::ZERO, 1.0, 1.0))),
            Err(SessionError::NotReady(SessionStatus::Loading))
        ));
    }

    #[test]
    fn test_rect_commit_appends_and_broadcasts() {
        let (mut session, handle) = ready_session();
        session.set_tool(ToolKind::Rect);

        session.handle_pointer_event(PointerEvent::down(10.0, 10.0)).unwrap();
        let effects = session.handle_pointer_event(PointerEvent::up(110.0, 60.0)).unwrap();

        let expected = Shape::Rect(Rectangle { x: 10.0, y: 10.0, width: 100.0, height: 50.0 });
        assert_eq!(session.shapes(), std::slice::from_ref(&expected));
        assert_eq!(effects.committed, Some(expected.clone()));
        assert_eq!(effects.messages_sent, 1);

        let frames = sent(&handle);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "chat");
        assert_eq!(frames[0]["roomId"], "R");
        let inner: serde_json::Value = serde_json::from_str(frames[0]["message"].as_str().unwrap()).unwrap();
        assert_eq!(inner["shape"], serde_json::to_value(&expected).unwrap());
    }

    #[test]
    fn test_circle_commit() {
        let (mut session, _handle) = ready_session();
        session.set_tool(ToolKind::Circle);
        drag(&mut session, (0.0, 0.0), (40.0, 20.0));
        assert_eq!(
            session.shapes(),
            &[Shape::Circle(Circle { center_x: 20.0, center_y: 10.0, radius: 20.0 })]
        );
    }

    #[test]
    fn test_small_select_does_nothing() {
        let (mut session, handle) = ready_session();
        let captures = Rc::new(RefCell::new(0));
        let counter = captures.clone();
        session.set_capture_callback(move |_| *counter.borrow_mut() += 1);
        session.set_tool(ToolKind::Select);

        let effects = drag(&mut session, (0.0, 0.0), (5.0, 5.0));
        assert_eq!(*captures.borrow(), 0);
        assert!(session.shapes().is_empty());
        assert!(sent(&handle).is_empty());
        assert!(effects.repainted);
        assert_eq!(effects.captured, None);
    }

    #[test]
    fn test_select_captures_without_overlay() {
        let (mut session, handle) = ready_session();
        let images: Rc<RefCell<Vec<CapturedImage>>> = Rc::default();
        let sink = images.clone();
        session.set_capture_callback(move |image| sink.borrow_mut().push(image.clone()));
        session.set_tool(ToolKind::Select);

        let effects = drag(&mut session, (60.0, 40.0), (20.0, 10.0));
        assert_eq!(effects.captured, Some(Rect::new(20.0, 10.0, 60.0, 40.0)));
        assert!(sent(&handle).is_empty());

        let images = images.borrow();
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].width, images[0].height), (40, 30));
        // The overlay tint must not be in the captured pixels.
        assert_eq!(session.renderer().pixel(40, 25), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_capture_excludes_selection_tint() {
        let (mut session, _handle) = ready_session();
        session.set_tool(ToolKind::Select);
        session.handle_pointer_event(PointerEvent::down(10.0, 10.0)).unwrap();
        session.handle_pointer_event(PointerEvent::moved(50.0, 50.0)).unwrap();
        assert_ne!(session.renderer().pixel(30, 30), Some([0, 0, 0, 255]));

        session.handle_pointer_event(PointerEvent::up(50.0, 50.0)).unwrap();
        assert_eq!(session.renderer().pixel(30, 30), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_remote_rect_appends_once_with_one_repaint() {
        let (mut session, _handle) = ready_session();
        let before = session.repaint_count();

        let effects = session.apply_remote_message(RECT_FRAME);
        assert_eq!(
            session.shapes(),
            &[Shape::Rect(Rectangle { x: 1.0, y: 1.0, width: 2.0, height: 2.0 })]
        );
        assert!(effects.repainted);
        assert_eq!(effects.appended, 1);
        assert_eq!(session.repaint_count(), before + 1);
    }

    #[test]
    fn test_malformed_remote_frames_are_dropped() {
        let (mut session, _handle) = ready_session();
        let before = session.repaint_count();
        for frame in [
            "garbage",
            r#"{"type":"chat","roomId":"R","message":"{\"shape\":{\"type\":\"triangle\"}}"}"#,
            r#"{"type":"chat","roomId":"R","message":"{\"shape\":{\"type\":\"eraser\",\"points\":[]}}"}"#,
            r#"{"type":"presence","count":2}"#,
        ] {
            assert_eq!(session.apply_remote_message(frame), SideEffects::default());
        }
        assert!(session.shapes().is_empty());
        assert_eq!(session.repaint_count(), before);
    }

    #[test]
    fn test_list_order_follows_local_and_arrival_order() {
        let (mut session, handle) = ready_session();
        let remote_a = Shape::Circle(Circle::new(Point::new(5.0, 5.0), 1.0));
        let remote_b = Shape::Circle(Circle::new(Point::new(9.0, 9.0), 3.0));

        push_event(&handle, ConnectionEvent::Message(chat_frame(&remote_a)));
        session.pump();
        session.set_tool(ToolKind::Rect);
        drag(&mut session, (0.0, 0.0), (4.0, 4.0));
        push_event(&handle, ConnectionEvent::Message(chat_frame(&remote_b)));
        session.pump();

        let shapes = session.shapes();
        assert_eq!(shapes.len(), 3);
        assert_eq!(shapes[0], remote_a);
        assert!(matches!(shapes[1], Shape::Rect(_)));
        assert_eq!(shapes[2], remote_b);
    }

    #[test]
    fn test_frames_before_history_are_replayed_after_it() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        push_event(&handle, ConnectionEvent::Opened);
        push_event(&handle, ConnectionEvent::Message(RECT_FRAME.to_string()));
        let ticket = session.begin_history_load();
        session.pump();
        assert!(session.shapes().is_empty());

        let old = Shape::Circle(Circle::new(Point::new(50.0, 50.0), 10.0));
        let effects = session.apply_history(ticket, Ok(vec![old.clone()])).unwrap();

        assert_eq!(effects.appended, 2);
        assert_eq!(session.shapes().len(), 2);
        assert_eq!(session.shapes()[0], old);
        assert!(matches!(session.shapes()[1], Shape::Rect(_)));
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_history_replaces_list() {
        let (mut session, _handle) = ready_session();
        session.apply_remote_message(RECT_FRAME);
        let store = MemoryHistoryStore::new();
        let circle = Shape::Circle(Circle::new(Point::new(3.0, 3.0), 1.0));
        store.record("R", circle.clone()).unwrap();

        block_on(session.load_history(&store)).unwrap();
        assert_eq!(session.shapes(), &[circle]);
    }

    #[test]
    fn test_stale_history_discarded() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        push_event(&handle, ConnectionEvent::Opened);
        session.pump();

        let first = session.begin_history_load();
        let second = session.begin_history_load();
        let stale = vec![Shape::Rect(Rectangle::new(Point::ZERO, 1.0, 1.0))];
        assert_eq!(session.apply_history(first, Ok(stale)).unwrap(), SideEffects::default());
        assert_eq!(session.status(), SessionStatus::Loading);

        session.apply_history(second, Ok(Vec::new())).unwrap();
        assert_eq!(session.status(), SessionStatus::Ready);
        assert!(session.shapes().is_empty());
    }

    #[test]
    fn test_history_after_close_discarded() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        push_event(&handle, ConnectionEvent::Opened);
        session.pump();
        let ticket = session.begin_history_load();

        session.close();
        let late = vec![Shape::Rect(Rectangle::new(Point::ZERO, 1.0, 1.0))];
        assert_eq!(session.apply_history(ticket, Ok(late)).unwrap(), SideEffects::default());
        assert!(session.shapes().is_empty());
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[test]
    fn test_history_failure_blocks_input_and_can_retry() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        push_event(&handle, ConnectionEvent::Opened);
        session.pump();

        let ticket = session.begin_history_load();
        let err = session
            .apply_history(ticket, Err(HistoryError::Request("refused".into())))
            .unwrap_err();
        assert!(matches!(err, SessionError::History(_)));
        assert_eq!(session.status(), SessionStatus::LoadFailed);
        assert!(session.last_error().unwrap().contains("refused"));

        session.set_tool(ToolKind::Rect);
        drag(&mut session, (0.0, 0.0), (10.0, 10.0));
        assert!(session.shapes().is_empty());

        block_on(session.load_history(&MemoryHistoryStore::new())).unwrap();
        assert_eq!(session.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_connection_loss_is_terminal() {
        let (mut session, handle) = ready_session();
        session.set_tool(ToolKind::Rect);
        session.handle_pointer_event(PointerEvent::down(0.0, 0.0)).unwrap();

        push_event(&handle, ConnectionEvent::Error { message: "reset".into() });
        session.pump();
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(session.last_error(), Some("reset"));

        session.handle_pointer_event(PointerEvent::up(10.0, 10.0)).unwrap();
        push_event(&handle, ConnectionEvent::Opened);
        session.pump();
        assert!(session.shapes().is_empty());
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn test_failed_send_keeps_shape_and_disconnects() {
        let (mut session, handle) = ready_session();
        handle.borrow_mut().fail_sends = true;
        session.set_tool(ToolKind::Rect);

        let effects = drag(&mut session, (0.0, 0.0), (10.0, 10.0));
        assert_eq!(session.shapes().len(), 1);
        assert_eq!(effects.messages_sent, 0);
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn test_tool_switch_mid_drag_ignored() {
        let (mut session, _handle) = ready_session();
        session.set_tool(ToolKind::Rect);
        session.handle_pointer_event(PointerEvent::down(0.0, 0.0)).unwrap();
        assert!(!session.set_tool(ToolKind::Pencil));
        session.handle_pointer_event(PointerEvent::up(5.0, 5.0)).unwrap();
        assert!(matches!(session.shapes()[0], Shape::Rect(_)));
        assert!(session.set_tool(ToolKind::Pencil));
    }

    #[test]
    fn test_pencil_click_commits_nothing() {
        let (mut session, handle) = ready_session();
        session.set_tool(ToolKind::Pencil);
        session.handle_pointer_event(PointerEvent::down(3.0, 3.0)).unwrap();
        let effects = session.handle_pointer_event(PointerEvent::up(3.0, 3.0)).unwrap();
        assert_eq!(effects.committed, None);
        assert!(session.shapes().is_empty());
        assert!(sent(&handle).is_empty());
    }

    #[test]
    fn test_close_sends_leave_and_stops_processing() {
        let (mut session, handle) = ready_session();
        let effects = session.close();
        assert_eq!(effects.messages_sent, 1);
        assert_eq!(sent(&handle), vec![serde_json::json!({"type": "leave_room", "roomId": "R"})]);
        assert!(handle.borrow().closed);

        assert_eq!(session.apply_remote_message(RECT_FRAME), SideEffects::default());
        assert_eq!(session.close(), SideEffects::default());
        assert!(session.shapes().is_empty());
    }

    #[test]
    fn test_drop_closes_connection() {
        let (session, handle) = ready_session();
        drop(session);
        assert!(handle.borrow().closed);
        assert_eq!(sent(&handle).len(), 1);
    }

    #[test]
    fn test_close_before_join_sends_nothing() {
        let (conn, handle) = MockConnection::new();
        let mut session = Session::open("R", conn, (100, 100));
        assert_eq!(session.close().messages_sent, 0);
        assert!(sent(&handle).is_empty());
        assert!(handle.borrow().closed);
    }

    #[test]
    fn test_resize_repaints() {
        let (mut session, _handle) = ready_session();
        let effects = session.resize(320, 240);
        assert!(effects.repainted);
        assert_eq!((session.renderer().width(), session.renderer().height()), (320, 240));
        assert_eq!(session.renderer().pixel(319, 239), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_annotations_stay_local() {
        let (mut session, handle) = ready_session();
        let region = Rect::new(0.0, 0.0, 20.0, 20.0);
        let note = session.annotate(region, "x = 4").clone();
        assert_eq!(note, Annotation::new(region, "x = 4"));
        assert_eq!(session.annotations().len(), 1);
        assert!(session.shapes().is_empty());
        assert!(sent(&handle).is_empty());
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let (mut session, _handle) = ready_session();
        session.apply_remote_message(RECT_FRAME);
        let first = session.renderer().image().clone();
        session.resize(200, 200);
        assert_eq!(session.renderer().image().as_raw(), first.as_raw());
    }
}
