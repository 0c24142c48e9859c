//! # Network Connection
//!
//! Room-scoped connection shared by every component of one context.
//!
//! ## Delivery classes
//!
//! | Class          | Transport closed          | Transport open            |
//! |----------------|---------------------------|---------------------------|
//! | `Immediate`    | dropped                   | sent right away           |
//! | `Queued`       | dropped                   | flushed once per frame    |
//! | `OnConnection` | held until the next open  | sent right away           |
//! | `OnRoomJoin`   | held until the next join  | sent right away if joined |
//!
//! ## Threading
//!
//! A connection is a cheap handle to state owned by one scheduler thread.
//! Incoming frames are read at `PreUpdate` and dispatched to listeners
//! synchronously, binary frames decoded once per frame ahead of their
//! listeners; `Queued` output is flushed at `PostRender`. Listeners are
//! snapshotted before dispatch, so a listener may register or remove
//! listeners (itself included) while running.

mod listeners;

pub use listeners::{BinaryListener, BinaryMessage, KeyedListener, ListenerId, ListenerKey, Subscription};

use crate::config::NetworkConfig;
use crate::error::{ListenerError, ListenerResult, NetworkError, NetworkResult, WireResult};
use crate::transport::{Frame, Transport, TransportEvent, TransportStats};
use crate::wire::BinaryModel;
use listeners::{decode_boxed, shared_binary, Listeners};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tandem_core::{CallbackId, Context, FrameEvent};
use tandem_shared::{
    BinaryIdentifier, Envelope, JoinRoomPayload, JoinedRoomPayload, RoomEvent, RoomRequest,
    SendQueue, UserPresencePayload,
};
use tracing::{debug, error, info, trace, warn};

struct Inner {
    config: NetworkConfig,
    transport: Option<Box<dyn Transport>>,
    /// Synthetic events delivered ahead of the transport's on the next poll.
    pending_events: Vec<TransportEvent>,
    connection_id: Option<String>,
    room: Option<String>,
    requested_room: Option<JoinRoomPayload>,
    users: Vec<String>,
    on_connection: Vec<Frame>,
    on_room_join: Vec<Frame>,
    queued: Vec<Frame>,
    room_state: HashMap<String, Value>,
    listeners: Listeners,
}

impl Inner {
    fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    fn transmit(&mut self, frame: Frame) -> NetworkResult<()> {
        match self.transport.as_mut() {
            Some(transport) if transport.is_open() => transport.send(frame),
            _ => Err(NetworkError::NotConnected),
        }
    }

    fn transmit_all(&mut self, frames: Vec<Frame>, class: SendQueue) {
        let total = frames.len();
        for frame in frames {
            if let Err(err) = self.transmit(frame) {
                debug!(?class, %err, "buffered frame dropped");
            }
        }
        if total > 0 {
            trace!(?class, total, "buffered frames sent");
        }
    }

    fn send_join(&mut self) {
        let Some(request) = self.requested_room.clone() else {
            return;
        };
        match encode(RoomRequest::JoinRoom.key(), &request) {
            Ok(frame) => {
                if let Err(err) = self.transmit(frame) {
                    debug!(room = %request.room, %err, "join request not sent");
                }
            }
            Err(err) => error!(%err, "failed to encode join request"),
        }
    }

    fn clear_room(&mut self) -> Option<String> {
        self.users.clear();
        self.room_state.clear();
        self.room.take()
    }
}

fn encode(key: &str, payload: &impl serde::Serialize) -> NetworkResult<Frame> {
    let data = serde_json::to_value(payload)?;
    Ok(Frame::Text(serde_json::to_string(&Envelope::new(key, data))?))
}

/// Handle to the room connection of one context.
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct NetworkConnection {
    inner: Rc<RefCell<Inner>>,
}

/// Non-owning connection handle.
#[derive(Clone, Default)]
pub struct WeakConnection(Weak<RefCell<Inner>>);

impl WeakConnection {
    /// Returns the connection if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<NetworkConnection> {
        self.0.upgrade().map(|inner| NetworkConnection { inner })
    }
}

impl Default for NetworkConnection {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl NetworkConnection {
    /// Creates a connection with no transport.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                config,
                transport: None,
                pending_events: Vec::new(),
                connection_id: None,
                room: None,
                requested_room: None,
                users: Vec::new(),
                on_connection: Vec::new(),
                on_room_join: Vec::new(),
                queued: Vec::new(),
                room_state: HashMap::new(),
                listeners: Listeners::default(),
            })),
        }
    }

    /// Non-owning handle, for listeners that must not keep the connection alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection(Rc::downgrade(&self.inner))
    }

    /// The connection stored in `cx`, if one was installed.
    #[must_use]
    pub fn from_context(cx: &Context) -> Option<Self> {
        cx.resource::<Self>().cloned()
    }

    /// Stores this connection in `cx` and registers the frame callbacks that
    /// drive it: polling at `PreUpdate`, flushing at `PostRender`.
    pub fn install(&self, cx: &mut Context) -> [CallbackId; 2] {
        cx.insert_resource(self.clone());
        let poller = self.downgrade();
        let poll = cx.add_frame_callback(FrameEvent::PreUpdate, move |cx| {
            if let Some(connection) = poller.upgrade() {
                connection.poll(cx);
            }
            Ok(())
        });
        let flusher = self.downgrade();
        let flush = cx.add_frame_callback(FrameEvent::PostRender, move |_| {
            if let Some(connection) = flusher.upgrade() {
                connection.flush();
            }
            Ok(())
        });
        [poll, flush]
    }

    /// Connection settings
    #[must_use]
    pub fn config(&self) -> NetworkConfig {
        self.inner.borrow().config.clone()
    }

    // =========================================================================
    // Transport and room
    // =========================================================================

    /// Attaches a transport, closing any previous one.
    ///
    /// `OnConnection` messages are sent when it first reports open.
    pub fn connect(&self, transport: impl Transport + 'static) {
        let mut inner = self.inner.borrow_mut();
        if let Some(mut previous) = inner.transport.take() {
            previous.close();
            if inner.room.is_some() {
                inner.pending_events.push(TransportEvent::Closed);
            }
        }
        inner.transport = Some(Box::new(transport));
    }

    /// Closes the transport. Room listeners see `left-room` on the next poll.
    pub fn disconnect(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(mut transport) = inner.transport.take() {
            transport.close();
            inner.pending_events.push(TransportEvent::Closed);
            info!("connection closed locally");
        }
    }

    /// Joins `room`, now if the transport is open, otherwise once it opens.
    pub fn join_room(&self, room: impl Into<String>) {
        self.request_join(JoinRoomPayload { room: room.into(), view_only: false });
    }

    /// Joins `room` without being listed in its roster.
    pub fn join_room_as_viewer(&self, room: impl Into<String>) {
        self.request_join(JoinRoomPayload { room: room.into(), view_only: true });
    }

    fn request_join(&self, request: JoinRoomPayload) {
        let mut inner = self.inner.borrow_mut();
        debug!(room = %request.room, view_only = request.view_only, "join requested");
        inner.requested_room = Some(request);
        if inner.is_open() {
            inner.send_join();
        }
    }

    /// Leaves the current room and stops rejoining it on reconnect.
    pub fn leave_room(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.requested_room = None;
        if inner.room.is_none() {
            return;
        }
        match encode(RoomRequest::LeaveRoom.key(), &Value::Null) {
            Ok(frame) => {
                if let Err(err) = inner.transmit(frame) {
                    debug!(%err, "leave request not sent");
                }
            }
            Err(err) => error!(%err, "failed to encode leave request"),
        }
    }

    /// Returns true while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().is_open()
    }

    /// Id assigned by the room server on join.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner.borrow().connection_id.clone()
    }

    /// Returns true if `id` is the local peer.
    #[must_use]
    pub fn is_local(&self, id: &str) -> bool {
        self.inner.borrow().connection_id.as_deref() == Some(id)
    }

    /// Name of the joined room
    #[must_use]
    pub fn current_room(&self) -> Option<String> {
        self.inner.borrow().room.clone()
    }

    /// Returns true once a room join has completed.
    #[must_use]
    pub fn is_in_room(&self) -> bool {
        self.inner.borrow().room.is_some()
    }

    /// Roster of the joined room, local peer included.
    #[must_use]
    pub fn users_in_room(&self) -> Vec<String> {
        self.inner.borrow().users.clone()
    }

    /// Returns true if `id` is listed in the joined room.
    #[must_use]
    pub fn user_is_in_room(&self, id: &str) -> bool {
        self.inner.borrow().users.iter().any(|user| user == id)
    }

    /// Last stored keyed payload seen for `guid` in the joined room.
    #[must_use]
    pub fn try_get_state(&self, guid: &str) -> Option<Value> {
        self.inner.borrow().room_state.get(guid).cloned()
    }

    /// Traffic counters of the current transport
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.inner.borrow().transport.as_ref().map(|t| t.stats()).unwrap_or_default()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Sends a keyed message with the given delivery class.
    pub fn send(&self, key: impl Into<String>, data: Value, class: SendQueue) {
        self.send_envelope(Envelope::new(key, data), class);
    }

    /// Sends a prepared envelope with the given delivery class.
    pub fn send_envelope(&self, envelope: Envelope, class: SendQueue) {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(err) => {
                error!(key = %envelope.key, %err, "failed to encode message");
                return;
            }
        };
        let mut inner = self.inner.borrow_mut();
        let frame = Frame::Text(text);
        let accepted = match class {
            SendQueue::Immediate => match inner.transmit(frame) {
                Ok(()) => true,
                Err(err) => {
                    debug!(key = %envelope.key, %err, "immediate message dropped");
                    false
                }
            },
            SendQueue::Queued => {
                if inner.is_open() {
                    inner.queued.push(frame);
                    true
                } else {
                    debug!(key = %envelope.key, "queued message dropped while disconnected");
                    false
                }
            }
            SendQueue::OnConnection if inner.is_open() => match inner.transmit(frame) {
                Ok(()) => true,
                Err(err) => {
                    debug!(key = %envelope.key, %err, "message dropped");
                    false
                }
            },
            SendQueue::OnConnection => {
                inner.on_connection.push(frame);
                true
            }
            SendQueue::OnRoomJoin if inner.room.is_some() && inner.is_open() => match inner.transmit(frame) {
                Ok(()) => true,
                Err(err) => {
                    debug!(key = %envelope.key, %err, "message dropped");
                    false
                }
            },
            SendQueue::OnRoomJoin => {
                inner.on_room_join.push(frame);
                true
            }
        };
        // Room state only follows messages that were sent or held for sending
        if accepted && inner.room.is_some() {
            if let Some(guid) = envelope.guid().filter(|_| !envelope.dont_save()) {
                inner.room_state.insert(guid.to_owned(), envelope.data.clone());
            }
        }
    }

    /// Sends a binary frame right away. Dropped outside a room.
    pub fn send_binary(&self, frame: Vec<u8>) {
        let mut inner = self.inner.borrow_mut();
        if inner.room.is_none() {
            debug!(len = frame.len(), "binary frame dropped outside a room");
            return;
        }
        if let Err(err) = inner.transmit(Frame::Binary(frame)) {
            debug!(%err, "binary frame dropped");
        }
    }

    /// Encodes and sends a binary model.
    pub fn send_model<M: BinaryModel>(&self, model: &M) -> WireResult<()> {
        self.send_binary(model.to_frame()?);
        Ok(())
    }

    /// Sends everything buffered as `Queued`. Runs at `PostRender`.
    pub fn flush(&self) {
        let mut inner = self.inner.borrow_mut();
        let frames = std::mem::take(&mut inner.queued);
        if frames.is_empty() {
            return;
        }
        if !inner.is_open() {
            debug!(dropped = frames.len(), "queued messages dropped while disconnected");
            return;
        }
        inner.transmit_all(frames, SendQueue::Queued);
    }

    /// Number of frames held for later delivery, per class.
    #[must_use]
    pub fn pending(&self, class: SendQueue) -> usize {
        let inner = self.inner.borrow();
        match class {
            SendQueue::OnConnection => inner.on_connection.len(),
            SendQueue::OnRoomJoin => inner.on_room_join.len(),
            SendQueue::Queued => inner.queued.len(),
            SendQueue::Immediate => 0,
        }
    }

    // =========================================================================
    // Listening
    // =========================================================================

    /// Registers a listener for a keyed message or room event.
    ///
    /// Listeners of one key run in registration order.
    pub fn begin_listen<F>(&self, key: &str, listener: F) -> ListenerId
    where
        F: FnMut(&mut Context, &Value) -> ListenerResult + 'static,
    {
        self.inner.borrow_mut().listeners.add_keyed(key, Rc::new(RefCell::new(listener)))
    }

    /// Registers a listener for a room event.
    pub fn on_room_event<F>(&self, event: RoomEvent, listener: F) -> Subscription
    where
        F: FnMut(&mut Context, &Value) -> ListenerResult + 'static,
    {
        self.subscribe(event.key(), listener)
    }

    /// Registers a keyed listener that is removed when the guard drops.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: FnMut(&mut Context, &Value) -> ListenerResult + 'static,
    {
        let id = self.begin_listen(key, listener);
        Subscription::new(self.downgrade(), ListenerKey::Keyed(key.to_owned()), id)
    }

    /// Removes a keyed listener. Returns false if it was not registered.
    pub fn stop_listening(&self, key: &str, id: ListenerId) -> bool {
        self.remove_listener(&ListenerKey::Keyed(key.to_owned()), id)
    }

    /// Registers a raw binary listener for `identifier`. Receives the whole
    /// frame, identifier included.
    pub fn begin_listen_binary_raw<F>(&self, identifier: BinaryIdentifier, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Context, &[u8]) -> ListenerResult + 'static,
    {
        let raw = shared_binary(move |cx, message| listener(cx, message.frame));
        self.inner.borrow_mut().listeners.add_binary(identifier, raw)
    }

    /// Registers a listener for decoded `M` frames.
    ///
    /// Each frame is decoded once for all listeners of `M::IDENTIFIER`.
    /// Frames that fail to decode are logged and reach no listener.
    pub fn begin_listen_binary<M, F>(&self, mut listener: F) -> ListenerId
    where
        M: BinaryModel + Clone + 'static,
        F: FnMut(&mut Context, M) -> ListenerResult + 'static,
    {
        let typed = shared_binary(move |cx, message| match message.model::<M>() {
            Some(model) => listener(cx, model.clone()),
            None => Err(ListenerError::msg("frame decoded as another model")),
        });
        let mut inner = self.inner.borrow_mut();
        inner.listeners.set_decoder(M::IDENTIFIER, decode_boxed::<M>);
        inner.listeners.add_binary(M::IDENTIFIER, typed)
    }

    /// Like [`begin_listen_binary`](Self::begin_listen_binary), removed when
    /// the guard drops.
    pub fn subscribe_binary<M, F>(&self, listener: F) -> Subscription
    where
        M: BinaryModel + Clone + 'static,
        F: FnMut(&mut Context, M) -> ListenerResult + 'static,
    {
        let id = self.begin_listen_binary::<M, F>(listener);
        Subscription::new(self.downgrade(), ListenerKey::Binary(M::IDENTIFIER), id)
    }

    /// Removes a binary listener. Returns false if it was not registered.
    pub fn stop_listen_binary(&self, identifier: BinaryIdentifier, id: ListenerId) -> bool {
        self.remove_listener(&ListenerKey::Binary(identifier), id)
    }

    /// Number of listeners registered for `key`.
    #[must_use]
    pub fn listener_count(&self, key: &ListenerKey) -> usize {
        self.inner.borrow().listeners.count(key)
    }

    pub(crate) fn remove_listener(&self, key: &ListenerKey, id: ListenerId) -> bool {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => inner.listeners.remove(key, id),
            Err(_) => {
                warn!(?key, ?id, "listener removed while the connection was busy, ignored");
                false
            }
        }
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Reads everything the transport received and dispatches it.
    /// Returns the number of transport events handled.
    pub fn poll(&self, cx: &mut Context) -> usize {
        let events = {
            let mut inner = self.inner.borrow_mut();
            let mut events = std::mem::take(&mut inner.pending_events);
            if let Some(transport) = inner.transport.as_mut() {
                events.extend(transport.poll());
            }
            events
        };
        let count = events.len();
        for event in events {
            match event {
                TransportEvent::Opened => self.handle_opened(),
                TransportEvent::Closed => self.handle_closed(cx),
                TransportEvent::Frame(Frame::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => self.handle_envelope(cx, envelope),
                    Err(err) => warn!(%err, "malformed keyed frame dropped"),
                },
                TransportEvent::Frame(Frame::Binary(bytes)) => self.dispatch_binary(cx, &bytes),
            }
        }
        count
    }

    fn handle_opened(&self) {
        let mut inner = self.inner.borrow_mut();
        info!("transport opened");
        let held = std::mem::take(&mut inner.on_connection);
        inner.transmit_all(held, SendQueue::OnConnection);
        if inner.requested_room.is_none() {
            if let Some(room) = inner.config.auto_join_room() {
                inner.requested_room = Some(JoinRoomPayload { room: room.to_owned(), view_only: false });
            }
        }
        inner.send_join();
    }

    fn handle_closed(&self, cx: &mut Context) {
        let left = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.connection_id.take();
            inner.clear_room().map(|room| JoinedRoomPayload {
                room,
                user_id: id.unwrap_or_default(),
                in_room: Vec::new(),
            })
        };
        info!("transport closed");
        if let Some(payload) = left {
            match serde_json::to_value(&payload) {
                Ok(data) => self.dispatch(cx, RoomEvent::LeftRoom.key(), &data),
                Err(err) => error!(%err, "failed to encode left-room event"),
            }
        }
    }

    fn handle_envelope(&self, cx: &mut Context, envelope: Envelope) {
        let event = RoomEvent::from_key(&envelope.key);
        {
            let mut inner = self.inner.borrow_mut();
            match event {
                Some(RoomEvent::JoinedRoom) => {
                    let payload = match serde_json::from_value::<JoinedRoomPayload>(envelope.data.clone()) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(%err, "malformed joined-room event dropped");
                            return;
                        }
                    };
                    info!(room = %payload.room, id = %payload.user_id, users = payload.in_room.len(), "joined room");
                    inner.room_state.clear();
                    inner.connection_id = Some(payload.user_id);
                    inner.room = Some(payload.room);
                    inner.users = payload.in_room;
                    let held = std::mem::take(&mut inner.on_room_join);
                    inner.transmit_all(held, SendQueue::OnRoomJoin);
                }
                Some(RoomEvent::LeftRoom) => {
                    if let Some(room) = inner.clear_room() {
                        info!(%room, "left room");
                    }
                }
                Some(RoomEvent::UserJoinedRoom) => {
                    if let Ok(payload) = serde_json::from_value::<UserPresencePayload>(envelope.data.clone()) {
                        debug!(user = %payload.user_id, "user joined room");
                        if !inner.users.contains(&payload.user_id) {
                            inner.users.push(payload.user_id);
                        }
                    }
                }
                Some(RoomEvent::UserLeftRoom) => {
                    if let Ok(payload) = serde_json::from_value::<UserPresencePayload>(envelope.data.clone()) {
                        debug!(user = %payload.user_id, "user left room");
                        inner.users.retain(|user| *user != payload.user_id);
                    }
                }
                Some(RoomEvent::RoomStateSent) => trace!("room state replay complete"),
                None => {
                    if let Some(guid) = envelope.guid().filter(|_| !envelope.dont_save()) {
                        inner.room_state.insert(guid.to_owned(), envelope.data.clone());
                    }
                }
            }
        }
        self.dispatch(cx, &envelope.key, &envelope.data);
    }

    fn dispatch(&self, cx: &mut Context, key: &str, data: &Value) {
        let listeners = self.inner.borrow().listeners.keyed_snapshot(key);
        if listeners.is_empty() {
            trace!(key, "no listener");
            return;
        }
        let listener_key = ListenerKey::Keyed(key.to_owned());
        for (id, listener) in listeners {
            // Removed by an earlier listener of this dispatch
            if !self.inner.borrow().listeners.contains(&listener_key, id) {
                continue;
            }
            let Ok(mut callback) = listener.try_borrow_mut() else {
                warn!(key, ?id, "listener re-entered, skipped");
                continue;
            };
            if let Err(err) = (&mut *callback)(cx, data) {
                error!(key, ?id, %err, "listener failed");
            }
        }
    }

    fn dispatch_binary(&self, cx: &mut Context, frame: &[u8]) {
        let Some(identifier) = BinaryIdentifier::from_frame(frame) else {
            warn!(len = frame.len(), "binary frame without identifier dropped");
            return;
        };
        let (listeners, decoder) = {
            let inner = self.inner.borrow();
            (inner.listeners.binary_snapshot(identifier), inner.listeners.decoder(identifier))
        };
        if listeners.is_empty() {
            trace!(%identifier, "no binary listener");
            return;
        }
        let decoded = match decoder.map(|decode| decode(frame)).transpose() {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%identifier, %err, "malformed binary frame dropped");
                return;
            }
        };
        let message = BinaryMessage::new(frame, decoded.as_deref());
        let listener_key = ListenerKey::Binary(identifier);
        for (id, listener) in listeners {
            if !self.inner.borrow().listeners.contains(&listener_key, id) {
                continue;
            }
            let Ok(mut callback) = listener.try_borrow_mut() else {
                warn!(%identifier, ?id, "listener re-entered, skipped");
                continue;
            };
            if let Err(err) = (&mut *callback)(cx, &message) {
                error!(%identifier, ?id, %err, "binary listener failed");
            }
        }
    }
}

impl std::fmt::Debug for NetworkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("NetworkConnection")
                .field("open", &inner.is_open())
                .field("id", &inner.connection_id)
                .field("room", &inner.room)
                .field("users", &inner.users.len())
                .finish(),
            Err(_) => f.write_str("NetworkConnection(<busy>)"),
        }
    }
}
