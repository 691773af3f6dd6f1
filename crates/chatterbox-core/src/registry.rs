//! Connection registry and room-scoped broadcaster.
//!
//! The registry is the process-wide map from live connections to their
//! room and username, and the fan-out point for every event the server
//! sends. Join, leave, and broadcast each run as one critical section, so
//! a broadcast can never observe a half-applied membership change.

use crate::connection::ClientHandle;
use chatterbox_protocol::ServerEvent;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// What a connection was registered as, reported once when it leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Username registered at join time.
    pub username: String,
    /// Room the connection belonged to.
    pub room: String,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of distinct rooms with at least one member.
    pub rooms: usize,
}

/// The two membership maps. Their key sets are always identical: join and
/// leave mutate both under the same lock.
#[derive(Default)]
struct RegistryInner {
    /// Connection -> room name.
    rooms: HashMap<ClientHandle, String>,
    /// Connection -> username.
    usernames: HashMap<ClientHandle, String>,
}

/// The connection registry.
///
/// All operations take `&self`; the registry is shared across session
/// tasks behind an `Arc`.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Registry {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Register a connection under a room and username, announcing it to
    /// the room.
    ///
    /// The announcement is fanned out after the insert, inside the same
    /// critical section, so the joining connection receives its own join
    /// notice and no concurrent broadcast can slip between the two.
    pub fn join(&self, handle: ClientHandle, username: impl Into<String>, room: impl Into<String>) {
        let username = username.into();
        let room = room.into();

        let mut inner = self.lock();
        inner.rooms.insert(handle.clone(), room.clone());
        inner.usernames.insert(handle, username.clone());

        debug!(
            room = %room,
            username = %username,
            connections = inner.rooms.len(),
            "Connection joined"
        );

        let event = Arc::new(ServerEvent::joined(&username, &room));
        fan_out(&inner, &room, &event);
    }

    /// Remove a connection, returning what it was registered as.
    ///
    /// Returns `None` if the connection never completed a join or was
    /// already removed; the caller then has nothing to announce. Leaving
    /// does not broadcast by itself, so a departure notice composed from
    /// the returned [`Departure`] is never delivered to the leaver.
    pub fn leave(&self, handle: &ClientHandle) -> Option<Departure> {
        let mut inner = self.lock();
        let room = inner.rooms.remove(handle)?;
        // The key sets of the two maps move together; a hit in one is a
        // hit in the other.
        let username = inner.usernames.remove(handle).unwrap_or_default();

        debug!(
            room = %room,
            username = %username,
            connections = inner.rooms.len(),
            "Connection left"
        );

        Some(Departure { username, room })
    }

    /// Broadcast an event to every connection registered in a room.
    ///
    /// Each delivery is independent: a recipient whose session is already
    /// gone is skipped without affecting the rest. Returns the number of
    /// connections the event was queued for.
    pub fn broadcast(&self, room: &str, event: ServerEvent) -> usize {
        let inner = self.lock();
        fan_out(&inner, room, &Arc::new(event))
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        let rooms = inner.rooms.values().collect::<HashSet<_>>().len();
        RegistryStats {
            connections: inner.rooms.len(),
            rooms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // The critical sections never panic, so a poisoned lock still
        // holds structurally sound maps; keep serving.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue `event` for every member of `room`. Runs under the registry lock;
/// sends are non-blocking, so the lock is held only for the scan.
fn fan_out(inner: &RegistryInner, room: &str, event: &Arc<ServerEvent>) -> usize {
    let mut delivered = 0;
    for (handle, member_room) in &inner.rooms {
        if member_room == room && handle.send(Arc::clone(event)) {
            delivered += 1;
        }
    }
    trace!(room = %room, delivered, "Broadcast event");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::EventReceiver;

    fn join_member(registry: &Registry, username: &str, room: &str) -> (ClientHandle, EventReceiver) {
        let (handle, rx) = ClientHandle::new();
        registry.join(handle.clone(), username, room);
        (handle, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    #[test]
    fn test_join_announces_to_room_including_joiner() {
        let registry = Registry::new();
        let (_alice, mut alice_rx) = join_member(&registry, "Alice", "general");
        let (_bob, mut bob_rx) = join_member(&registry, "Bob", "general");

        assert_eq!(
            drain(&mut alice_rx),
            vec![
                ServerEvent::system("Alice joined general room"),
                ServerEvent::system("Bob joined general room"),
            ]
        );
        // The joiner hears its own announcement.
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::system("Bob joined general room")]
        );
    }

    #[test]
    fn test_broadcast_scoped_to_room() {
        let registry = Registry::new();
        let (_alice, mut alice_rx) = join_member(&registry, "Alice", "rust");
        let (_carol, mut carol_rx) = join_member(&registry, "Carol", "go");
        drain(&mut alice_rx);
        drain(&mut carol_rx);

        let delivered = registry.broadcast("rust", ServerEvent::chat("Alice", "hello"));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::chat("Alice", "hello")]);
        assert_eq!(drain(&mut carol_rx), vec![]);
    }

    #[test]
    fn test_broadcast_to_empty_room() {
        let registry = Registry::new();
        let (_alice, mut alice_rx) = join_member(&registry, "Alice", "rust");
        drain(&mut alice_rx);

        assert_eq!(registry.broadcast("attic", ServerEvent::system("anyone?")), 0);
        assert_eq!(drain(&mut alice_rx), vec![]);
    }

    #[test]
    fn test_leave_reports_registration_once() {
        let registry = Registry::new();
        let (alice, _alice_rx) = join_member(&registry, "Alice", "rust");

        let departure = registry.leave(&alice).unwrap();
        assert_eq!(departure.username, "Alice");
        assert_eq!(departure.room, "rust");

        // Second removal is a no-op.
        assert!(registry.leave(&alice).is_none());
    }

    #[test]
    fn test_leave_unregistered_connection() {
        let registry = Registry::new();
        let (handle, _rx) = ClientHandle::new();

        assert!(registry.leave(&handle).is_none());
    }

    #[test]
    fn test_left_connection_excluded_from_broadcasts() {
        let registry = Registry::new();
        let (_alice, mut alice_rx) = join_member(&registry, "Alice", "general");
        let (bob, mut bob_rx) = join_member(&registry, "Bob", "general");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        registry.leave(&bob);
        let delivered = registry.broadcast("general", ServerEvent::system("Bob left general room"));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut bob_rx), vec![]);
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::system("Bob left general room")]
        );
    }

    #[test]
    fn test_broadcast_skips_dead_recipients() {
        let registry = Registry::new();
        let (_alice, mut alice_rx) = join_member(&registry, "Alice", "general");
        let (_bob, bob_rx) = join_member(&registry, "Bob", "general");
        drain(&mut alice_rx);
        drop(bob_rx);

        let delivered = registry.broadcast("general", ServerEvent::chat("Alice", "hi"));

        // Bob's queue is gone but Alice still gets the event.
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::chat("Alice", "hi")]);
    }

    #[test]
    fn test_per_sender_order_preserved() {
        let registry = Registry::new();
        let (_alice, mut alice_rx) = join_member(&registry, "Alice", "general");
        drain(&mut alice_rx);

        for i in 0..10 {
            registry.broadcast("general", ServerEvent::chat("Bob", format!("msg-{i}")));
        }

        let received = drain(&mut alice_rx);
        let expected: Vec<_> = (0..10)
            .map(|i| ServerEvent::chat("Bob", format!("msg-{i}")))
            .collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_maps_share_key_set_through_churn() {
        let registry = Registry::new();
        let members: Vec<_> = (0..8)
            .map(|i| join_member(&registry, &format!("user-{i}"), "general"))
            .collect();

        for (handle, _) in members.iter().take(4) {
            registry.leave(handle);
        }

        let inner = registry.inner.lock().unwrap();
        let room_keys: HashSet<_> = inner.rooms.keys().map(ClientHandle::id).collect();
        let username_keys: HashSet<_> = inner.usernames.keys().map(ClientHandle::id).collect();
        assert_eq!(room_keys, username_keys);
        assert_eq!(room_keys.len(), 4);
    }

    #[test]
    fn test_stats() {
        let registry = Registry::new();
        let (_a, _arx) = join_member(&registry, "Alice", "rust");
        let (_b, _brx) = join_member(&registry, "Bob", "rust");
        let (_c, _crx) = join_member(&registry, "Carol", "go");

        let stats = registry.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.rooms, 2);
    }

    #[test]
    fn test_concurrent_churn_keeps_maps_consistent() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let (handle, _rx) = ClientHandle::new();
                        registry.join(handle.clone(), format!("user-{t}-{i}"), "general");
                        registry.broadcast("general", ServerEvent::typing(format!("user-{t}-{i}")));
                        registry.leave(&handle);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.rooms, 0);
    }
}
