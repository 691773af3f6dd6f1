//! Connection identity and outbound queues.
//!
//! A [`ClientHandle`] is the registry's view of one live connection: the
//! key it files the connection under, and the only way to queue events for
//! delivery to that client.

use chatterbox_protocol::ServerEvent;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Global counter for connection IDs.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A process-unique identifier for one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        ConnectionId(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receiving half of a connection's outbound queue. Drained by the session
/// task that owns the socket.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// The write capability for one connection.
///
/// Cloning is cheap and every clone refers to the same connection.
/// Equality and hashing consider only the connection ID, so a handle can
/// serve as a map key while still carrying its outbound sender.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

impl ClientHandle {
    /// Create a handle together with the receiving half of its queue.
    #[must_use]
    pub fn new() -> (Self, EventReceiver) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            ClientHandle {
                id: ConnectionId::next(),
                outbox,
            },
            rx,
        )
    }

    /// This connection's ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for delivery to this client.
    ///
    /// Returns `false` if the session has already gone away. The failure
    /// is local to this connection; callers move on to other recipients.
    pub fn send(&self, event: Arc<ServerEvent>) -> bool {
        self.outbox.send(event).is_ok()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_connection_ids_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::next();
        assert!(id.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_send_delivers_to_receiver() {
        let (handle, mut rx) = ClientHandle::new();

        assert!(handle.send(Arc::new(ServerEvent::system("hi"))));
        let event = rx.try_recv().unwrap();
        assert_eq!(*event, ServerEvent::system("hi"));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (handle, rx) = ClientHandle::new();
        drop(rx);

        assert!(!handle.send(Arc::new(ServerEvent::system("hi"))));
    }

    #[test]
    fn test_clones_compare_and_hash_by_id() {
        let (handle, _rx) = ClientHandle::new();
        let (other, _other_rx) = ClientHandle::new();

        assert_eq!(handle, handle.clone());
        assert_ne!(handle, other);

        let mut map = HashMap::new();
        map.insert(handle.clone(), "general");
        assert_eq!(map.get(&handle), Some(&"general"));
        assert_eq!(map.get(&other), None);
    }
}
