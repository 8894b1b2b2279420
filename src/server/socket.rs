//! Socket capability
//!
//! The handler sees its transport only through the [`Socket`] trait: named
//! event subscription, full unsubscription and a close request. [`WsSocket`]
//! is the implementation driven by the WebSocket read loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::protocol::Frame;

/// Callback invoked for every inbound frame
pub type MessageListener = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Callback invoked once when the transport closes
pub type CloseListener = Arc<dyn Fn() + Send + Sync>;

/// Named socket events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    Message,
    Close,
}

/// A listener subscribed to one socket event
#[derive(Clone)]
pub enum SocketListener {
    Message(MessageListener),
    Close(CloseListener),
}

impl SocketListener {
    /// Event this listener is subscribed to
    pub fn event(&self) -> SocketEvent {
        match self {
            SocketListener::Message(_) => SocketEvent::Message,
            SocketListener::Close(_) => SocketEvent::Close,
        }
    }
}

impl std::fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SocketListener").field(&self.event()).finish()
    }
}

/// Event-emitting transport a connection handler binds to
pub trait Socket: Send + Sync {
    /// Subscribe a listener to its event
    fn on(&self, listener: SocketListener);

    /// Remove every listener for every event
    fn remove_all_listeners(&self);

    /// Ask the transport to close the connection
    ///
    /// The transport emits `close` once it has actually closed.
    fn close(&self);

    /// Number of listeners subscribed to an event
    fn listener_count(&self, event: SocketEvent) -> usize;
}

#[derive(Default)]
struct ListenerTable {
    message: Vec<MessageListener>,
    close: Vec<CloseListener>,
}

/// Socket backed by a WebSocket connection task
///
/// The connection task feeds frames in with [`WsSocket::emit_message`] and
/// reports the end of the connection with [`WsSocket::emit_close`].
pub struct WsSocket {
    peer_addr: Option<SocketAddr>,
    listeners: Mutex<ListenerTable>,
    closed: AtomicBool,
    close_requested: Notify,
}

impl WsSocket {
    /// Create a socket, optionally tagged with the remote peer's address
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            peer_addr,
            listeners: Mutex::new(ListenerTable::default()),
            closed: AtomicBool::new(false),
            close_requested: Notify::new(),
        }
    }

    /// Address of the remote peer
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Deliver a frame to every message listener, in subscription order
    pub fn emit_message(&self, frame: &Frame) {
        // Listeners may touch the table themselves, so call them unlocked
        let listeners = self.listeners.lock().message.clone();
        for listener in listeners {
            listener(frame);
        }
    }

    /// Notify close listeners that the connection is gone
    ///
    /// Only the first call has any effect.
    pub fn emit_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = self.listeners.lock().close.clone();
        debug!(
            "Socket {:?} closed, notifying {} listeners",
            self.peer_addr,
            listeners.len()
        );
        for listener in listeners {
            listener();
        }
    }

    /// Resolves once someone calls [`Socket::close`]
    pub async fn close_requested(&self) {
        self.close_requested.notified().await;
    }
}

impl Socket for WsSocket {
    fn on(&self, listener: SocketListener) {
        let mut table = self.listeners.lock();
        match listener {
            SocketListener::Message(callback) => table.message.push(callback),
            SocketListener::Close(callback) => table.close.push(callback),
        }
    }

    fn remove_all_listeners(&self) {
        let mut table = self.listeners.lock();
        table.message.clear();
        table.close.clear();
    }

    fn close(&self) {
        self.close_requested.notify_one();
    }

    fn listener_count(&self, event: SocketEvent) -> usize {
        let table = self.listeners.lock();
        match event {
            SocketEvent::Message => table.message.len(),
            SocketEvent::Close => table.close.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_message_listener(counter: &Arc<AtomicUsize>) -> SocketListener {
        let counter = Arc::clone(counter);
        SocketListener::Message(Arc::new(move |_frame: &Frame| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_emit_message_reaches_listeners() {
        let socket = WsSocket::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        socket.on(counting_message_listener(&counter));
        socket.on(counting_message_listener(&counter));

        socket.emit_message(&Frame::Utf8("{}".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(socket.listener_count(SocketEvent::Message), 2);
        assert_eq!(socket.listener_count(SocketEvent::Close), 0);
    }

    #[test]
    fn test_remove_all_listeners() {
        let socket = WsSocket::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        socket.on(counting_message_listener(&counter));
        socket.on(SocketListener::Close(Arc::new(|| {})));

        socket.remove_all_listeners();
        socket.emit_message(&Frame::Utf8("{}".to_string()));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(socket.listener_count(SocketEvent::Message), 0);
        assert_eq!(socket.listener_count(SocketEvent::Close), 0);

        // Nothing left to remove
        socket.remove_all_listeners();
    }

    #[test]
    fn test_emit_close_fires_once() {
        let socket = WsSocket::new(None);
        let counter = Arc::new(AtomicUsize::new(0));
        let close_counter = Arc::clone(&counter);
        socket.on(SocketListener::Close(Arc::new(move || {
            close_counter.fetch_add(1, Ordering::SeqCst);
        })));

        socket.emit_close();
        socket.emit_close();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_detach_during_emit() {
        let socket = Arc::new(WsSocket::new(None));
        let inner = Arc::clone(&socket);
        socket.on(SocketListener::Close(Arc::new(move || {
            inner.remove_all_listeners();
        })));

        socket.emit_close();
        assert_eq!(socket.listener_count(SocketEvent::Close), 0);
    }

    #[tokio::test]
    async fn test_close_request_is_remembered() {
        let socket = WsSocket::new(None);
        socket.close();

        tokio::time::timeout(Duration::from_secs(1), socket.close_requested())
            .await
            .expect("close request should already be pending");
    }

    #[test]
    fn test_listener_event() {
        let listener = SocketListener::Close(Arc::new(|| {}));
        assert_eq!(listener.event(), SocketEvent::Close);
        assert!(format!("{:?}", listener).contains("Close"));
    }
}
