//! WebSocket connection handler
//!
//! One [`ConnectionHandler`] exists per client connection. It binds to a
//! [`Socket`], turns inbound text frames into [`Envelope`]s and emits them to
//! listeners registered by message type. When the socket closes it removes
//! its user from the shared game state and detaches from the socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{Envelope, Frame, MalformedFramePolicy, ProtocolResult};
use super::socket::{Socket, SocketEvent, SocketListener};
use crate::game::User;

/// Session-wide user registry, as seen by a connection handler
pub trait UserRegistry: Send + Sync {
    /// Remove a user by id
    fn remove(&self, user_id: &str);
}

/// Session-wide card display, as seen by a connection handler
pub trait CardStore: Send + Sync {
    /// Remove the card played by a user
    fn remove_card(&self, user_id: &str);
}

/// Handles to the state shared by every connection of a game session
///
/// Either handle may be absent; cleanup skips whatever is missing.
#[derive(Clone, Default)]
pub struct SharedState {
    pub users: Option<Arc<dyn UserRegistry>>,
    pub card_display: Option<Arc<dyn CardStore>>,
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("users", &self.users.is_some())
            .field("card_display", &self.card_display.is_some())
            .finish()
    }
}

/// Callback invoked with a parsed message and the handler that received it
pub type Listener = Arc<dyn Fn(&Envelope, &Arc<ConnectionHandler>) + Send + Sync>;

/// Create a fresh, unbound connection handler
///
/// Every call allocates a new handler; no state is shared between them.
pub fn get_new_handler() -> Arc<ConnectionHandler> {
    Arc::new(ConnectionHandler::new())
}

/// Handles a single WebSocket connection
pub struct ConnectionHandler {
    id: Uuid,
    shared_state: RwLock<Option<SharedState>>,
    connection: RwLock<Option<Arc<dyn Socket>>>,
    user: RwLock<Option<Arc<User>>>,
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    malformed_policy: RwLock<MalformedFramePolicy>,
    closed: AtomicBool,
}

impl ConnectionHandler {
    /// Create a new connection handler with no shared state and no socket
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            shared_state: RwLock::new(None),
            connection: RwLock::new(None),
            user: RwLock::new(None),
            listeners: RwLock::new(HashMap::new()),
            malformed_policy: RwLock::new(MalformedFramePolicy::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Connection id used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Store the session's shared state, replacing any previous value
    pub fn init(
        &self,
        users: Option<Arc<dyn UserRegistry>>,
        card_display: Option<Arc<dyn CardStore>>,
    ) {
        *self.shared_state.write() = Some(SharedState {
            users,
            card_display,
        });
    }

    /// Shared state stored by [`ConnectionHandler::init`]
    pub fn shared_state(&self) -> Option<SharedState> {
        self.shared_state.read().clone()
    }

    /// Bind the handler to a socket
    ///
    /// Subscribes `message` to [`ConnectionHandler::on_message`] and `close`
    /// to [`ConnectionHandler::on_close`]. Binding the socket that is already
    /// bound does nothing; binding a different one detaches the old socket
    /// first. A closed handler cannot be bound again.
    pub fn set_connection(self: &Arc<Self>, connection: Arc<dyn Socket>) {
        if self.is_closed() {
            warn!("Handler {} is closed, refusing to bind a new socket", self.id);
            return;
        }

        let previous = self.connection.write().replace(Arc::clone(&connection));
        if let Some(previous) = previous {
            if Arc::ptr_eq(&previous, &connection) {
                debug!("Handler {} already bound to this socket", self.id);
                return;
            }
            debug!("Handler {} rebinding, detaching previous socket", self.id);
            previous.remove_all_listeners();
        }

        // Weak handles: the socket must not keep the handler alive
        let handler = Arc::downgrade(self);
        connection.on(SocketListener::Message(Arc::new(move |frame: &Frame| {
            if let Some(handler) = handler.upgrade() {
                handler.on_message(frame);
            }
        })));

        let handler = Arc::downgrade(self);
        connection.on(SocketListener::Close(Arc::new(move || {
            if let Some(handler) = handler.upgrade() {
                handler.on_close();
            }
        })));

        debug!(
            "Handler {} bound to socket ({} message listeners)",
            self.id,
            connection.listener_count(SocketEvent::Message)
        );
    }

    /// Currently bound socket
    pub fn get_connection(&self) -> Option<Arc<dyn Socket>> {
        self.connection.read().clone()
    }

    /// Handle a frame delivered by the socket
    ///
    /// Non-text frames are ignored. Text frames that do not parse as an
    /// envelope are handled according to the malformed-frame policy; they
    /// never propagate an error.
    pub fn on_message(self: &Arc<Self>, frame: &Frame) {
        if let Err(e) = self.dispatch(frame) {
            match self.malformed_policy() {
                MalformedFramePolicy::Drop => {
                    warn!("Handler {} dropping malformed message: {}", self.id, e);
                }
                MalformedFramePolicy::Disconnect => {
                    warn!("Handler {} closing connection on malformed message: {}", self.id, e);
                    if let Some(connection) = self.get_connection() {
                        connection.close();
                    }
                }
            }
        }
    }

    /// Parse a frame and emit it to listeners of its type
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(self: &Arc<Self>, frame: &Frame) -> ProtocolResult<usize> {
        let Some(text) = frame.utf8_data() else {
            debug!(
                "Handler {} ignoring {} frame ({} bytes)",
                self.id,
                frame.kind(),
                frame.payload_len()
            );
            return Ok(0);
        };

        let envelope = Envelope::from_json(text)?;
        Ok(self.emit(&envelope))
    }

    /// Invoke every listener registered for the envelope's type, in order
    pub fn emit(self: &Arc<Self>, envelope: &Envelope) -> usize {
        let listeners = self
            .listeners
            .read()
            .get(envelope.kind())
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() {
            debug!("Handler {} has no listeners for '{}'", self.id, envelope.kind());
            return 0;
        }

        for listener in &listeners {
            listener(envelope, self);
        }
        listeners.len()
    }

    /// Tear down the connection
    ///
    /// Removes the user (if any) from the shared registries, then detaches
    /// every listener from the bound socket. Subsequent calls do nothing.
    pub fn on_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Handler {} already closed", self.id);
            return;
        }

        if let Some(user) = self.get_user() {
            let shared = self.shared_state().unwrap_or_default();
            if let Some(users) = &shared.users {
                users.remove(&user.id);
            }
            if let Some(card_display) = &shared.card_display {
                card_display.remove_card(&user.id);
            }
            info!("User {} left (connection {})", user.id, self.id);
        }

        if let Some(connection) = self.get_connection() {
            connection.remove_all_listeners();
        }

        debug!("Handler {} closed", self.id);
    }

    /// Whether [`ConnectionHandler::on_close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Associate an authenticated user with this connection
    pub fn set_user(&self, user: Arc<User>) {
        *self.user.write() = Some(user);
    }

    /// User associated with this connection, if logged in
    pub fn get_user(&self) -> Option<Arc<User>> {
        self.user.read().clone()
    }

    /// Register a listener for a message type
    pub fn on<F>(&self, kind: impl Into<String>, callback: F)
    where
        F: Fn(&Envelope, &Arc<ConnectionHandler>) + Send + Sync + 'static,
    {
        let kind = kind.into();
        self.listeners
            .write()
            .entry(kind.clone())
            .or_default()
            .push(Arc::new(callback));
        debug!(
            "Handler {} has {} '{}' listeners",
            self.id,
            self.listener_count(&kind),
            kind
        );
    }

    /// Number of listeners registered for a message type
    pub fn listener_count(&self, kind: &str) -> usize {
        self.listeners.read().get(kind).map_or(0, Vec::len)
    }

    /// Set how malformed text frames are handled
    pub fn set_malformed_policy(&self, policy: MalformedFramePolicy) {
        *self.malformed_policy.write() = policy;
    }

    /// Current malformed-frame policy
    pub fn malformed_policy(&self) -> MalformedFramePolicy {
        *self.malformed_policy.read()
    }
}

impl Default for ConnectionHandler {
    fn default() -> Self {
        Self::new()
    }
}
