//! Room membership and group broadcast.
//!
//! Rooms are named sets of connection ids. Membership is stored on both sides
//! (room → ids here, connection → room names on the [`Connection`]) and both
//! sides are only ever changed while holding the room map lock, so they
//! always agree. Rooms are created on first join and dropped when they
//! become empty.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::message::{OutboundMessage, encode};

/// Owner of all room memberships.
#[derive(Debug)]
pub struct RoomManager {
    rooms: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    registry: Arc<ConnectionRegistry>,
}

impl RoomManager {
    /// Creates a room manager resolving members through `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Adds the connection to a room.
    ///
    /// Returns false if it was already a member or is being torn down.
    pub fn join(&self, conn: &Connection, room: &str) -> bool {
        let mut rooms = self.rooms.lock();
        if conn.is_closed() {
            return false;
        }

        let inserted = rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn.id().clone());
        conn.add_room(room);

        if inserted {
            debug!(conn_id = %conn.id(), room, "Joined room");
        }
        inserted
    }

    /// Removes the connection from a room. Returns false if it was not a member.
    pub fn leave(&self, conn: &Connection, room: &str) -> bool {
        let mut rooms = self.rooms.lock();
        let removed = Self::remove_member(&mut rooms, room, conn.id());
        conn.remove_room(room);

        if removed {
            debug!(conn_id = %conn.id(), room, "Left room");
        }
        removed
    }

    /// Removes the connection from every room it belongs to.
    ///
    /// Idempotent: a second call finds no rooms and does nothing.
    pub fn leave_all(&self, conn: &Connection) -> Vec<String> {
        let mut rooms = self.rooms.lock();
        let mut left: Vec<String> = conn.take_rooms().into_iter().collect();
        left.retain(|room| Self::remove_member(&mut rooms, room, conn.id()));
        left.sort();
        left
    }

    /// Sends an event to every open member of a room, skipping `exclude`.
    ///
    /// Membership is snapshotted when the call starts; connections joining or
    /// leaving while the frames are queued may or may not receive it.
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast(
        &self,
        room: &str,
        event: &str,
        data: Value,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let members = self.members(room);
        if members.is_empty() {
            return 0;
        }

        let text = match encode(&OutboundMessage::event(event, data)) {
            Ok(text) => text,
            Err(e) => {
                warn!(room, event, error = %e, "Failed to encode broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for id in members {
            if exclude == Some(&id) {
                continue;
            }
            let Some(conn) = self.registry.get(&id) else {
                continue;
            };
            if !conn.is_open() {
                continue;
            }
            match conn.try_send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(conn_id = %id, room, error = %e, "Failed to broadcast message"),
            }
        }

        debug!(room, event, delivered, "Broadcast complete");
        delivered
    }

    /// Returns a snapshot of the members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .lock()
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if the connection is a member of the room.
    #[must_use]
    pub fn is_member(&self, room: &str, id: &ConnectionId) -> bool {
        self.rooms
            .lock()
            .get(room)
            .is_some_and(|members| members.contains(id))
    }

    /// Returns the names of all non-empty rooms.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of non-empty rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    fn remove_member(
        rooms: &mut HashMap<String, HashSet<ConnectionId>>,
        room: &str,
        id: &ConnectionId,
    ) -> bool {
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(id);
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, RoomManager) {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = RoomManager::new(Arc::clone(&registry));
        (registry, rooms)
    }

    fn connect(registry: &ConnectionRegistry) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        (registry.register(tx, None), rx)
    }

    fn drain_text(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let (registry, rooms) = setup();
        let (conn, _rx) = connect(&registry);

        assert!(rooms.join(&conn, "family-42"));
        assert!(!rooms.join(&conn, "family-42"));
        assert_eq!(rooms.members("family-42").len(), 1);
        assert_eq!(conn.rooms(), vec!["family-42".to_string()]);
    }

    #[tokio::test]
    async fn test_join_join_leave_leaves_room() {
        let (registry, rooms) = setup();
        let (conn, _rx) = connect(&registry);

        rooms.join(&conn, "family-42");
        rooms.join(&conn, "family-42");
        assert!(rooms.leave(&conn, "family-42"));

        assert!(!rooms.is_member("family-42", conn.id()));
        assert!(!conn.in_room("family-42"));
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let (registry, rooms) = setup();
        let (conn, _rx) = connect(&registry);
        let (other, _other_rx) = connect(&registry);
        rooms.join(&other, "family-42");

        assert!(!rooms.leave(&conn, "family-42"));
        assert!(!rooms.leave(&conn, "nowhere"));
        assert_eq!(rooms.members("family-42"), vec![other.id().clone()]);
    }

    #[tokio::test]
    async fn test_empty_rooms_are_collected() {
        let (registry, rooms) = setup();
        let (a, _rx_a) = connect(&registry);
        let (b, _rx_b) = connect(&registry);

        rooms.join(&a, "room");
        rooms.join(&b, "room");
        rooms.leave(&a, "room");
        assert_eq!(rooms.rooms(), vec!["room".to_string()]);

        rooms.leave(&b, "room");
        assert!(rooms.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_leave_all_is_idempotent() {
        let (registry, rooms) = setup();
        let (conn, _rx) = connect(&registry);

        rooms.join(&conn, "a");
        rooms.join(&conn, "b");

        assert_eq!(rooms.leave_all(&conn), vec!["a".to_string(), "b".to_string()]);
        assert!(rooms.leave_all(&conn).is_empty());
        assert_eq!(rooms.room_count(), 0);
        assert!(conn.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_join_rejected_after_close() {
        let (registry, rooms) = setup();
        let (conn, _rx) = connect(&registry);
        conn.mark_closed();

        assert!(!rooms.join(&conn, "room"));
        assert_eq!(rooms.room_count(), 0);
        assert!(conn.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let (registry, rooms) = setup();
        let mut peers = Vec::new();
        for _ in 0..4 {
            let (conn, rx) = connect(&registry);
            rooms.join(&conn, "family-42");
            peers.push((conn, rx));
        }
        let sender_id = peers[0].0.id().clone();

        let delivered = rooms.broadcast("family-42", "note", json!({"x": 1}), Some(&sender_id));
        assert_eq!(delivered, 3);

        assert!(drain_text(&mut peers[0].1).is_empty());
        for (_, rx) in peers.iter_mut().skip(1) {
            let frames = drain_text(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["event"], json!("note"));
            assert_eq!(frames[0]["data"], json!({"x": 1}));
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_exclusion_reaches_everyone() {
        let (registry, rooms) = setup();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);
        rooms.join(&a, "room");
        rooms.join(&b, "room");

        assert_eq!(rooms.broadcast("room", "note", json!({}), None), 2);
        assert_eq!(drain_text(&mut rx_a).len(), 1);
        assert_eq!(drain_text(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_members() {
        let (registry, rooms) = setup();
        let (a, _rx_a) = connect(&registry);
        let (b, rx_b) = connect(&registry);
        rooms.join(&a, "room");
        rooms.join(&b, "room");
        drop(rx_b);

        assert_eq!(rooms.broadcast("room", "note", json!({}), None), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room() {
        let (_registry, rooms) = setup();
        assert_eq!(rooms.broadcast("missing", "note", json!({}), None), 0);
    }

    #[tokio::test]
    async fn test_leave_all_concurrent_with_broadcast() {
        let (registry, rooms) = setup();
        let rooms = Arc::new(rooms);
        let mut conns = Vec::new();
        for _ in 0..32 {
            let (conn, rx) = connect(&registry);
            rooms.join(&conn, "busy");
            conns.push((conn, rx));
        }

        let broadcaster = {
            let rooms = Arc::clone(&rooms);
            tokio::spawn(async move {
                for i in 0..10 {
                    rooms.broadcast("busy", "tick", json!({ "i": i }), None);
                    tokio::task::yield_now().await;
                }
            })
        };
        for (conn, _) in &conns {
            rooms.leave_all(conn);
            rooms.leave_all(conn);
        }
        broadcaster.await.unwrap();

        assert_eq!(rooms.room_count(), 0);
        assert!(conns.iter().all(|(conn, _)| conn.rooms().is_empty()));
    }
}
