//! WebSocket connection management.
//!
//! This module provides connection state tracking and management including:
//! - Connection state (liveness, room membership, authenticated user)
//! - Outbound frame queue owned by each connection
//! - Connection registry resolving ids to live connections

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};

use crate::auth::Claims;
use crate::error::{RealtimeError, RealtimeResult};
use crate::message::{OutboundMessage, encode};

/// Unique connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a new unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Frame queued for the socket writer of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded JSON text frame
    Text(String),
    /// Protocol-level ping
    Ping,
    /// Close the socket
    Close,
}

/// State of a single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    alive: AtomicBool,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    rooms: parking_lot::RwLock<HashSet<String>>,
    user: parking_lot::RwLock<Option<Claims>>,
    query_token: Option<String>,
    connected_at: chrono::DateTime<chrono::Utc>,
}

impl Connection {
    /// Creates a new connection around the outbound queue of its socket.
    #[must_use]
    pub fn new(id: ConnectionId, sender: mpsc::Sender<Outbound>, query_token: Option<String>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            sender,
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            closed_tx,
            rooms: parking_lot::RwLock::new(HashSet::new()),
            user: parking_lot::RwLock::new(None),
            query_token,
            connected_at: chrono::Utc::now(),
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Returns the time the connection was accepted.
    #[must_use]
    pub fn connected_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.connected_at
    }

    /// Returns the token passed in the connection query string, if any.
    #[must_use]
    pub fn query_token(&self) -> Option<&str> {
        self.query_token.as_deref()
    }

    /// Returns true until teardown starts and while the socket writer is running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Returns true once teardown has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the liveness flag.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Records a pong from the peer.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clears the liveness flag, returning its previous value.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Flips the connection to closed. Returns true for the one caller that wins.
    pub(crate) fn mark_closed(&self) -> bool {
        let won = self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.closed_tx.send_replace(true);
        }
        won
    }

    /// Resolves once the connection has been torn down.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Queues a text frame, waiting for queue capacity.
    ///
    /// The wait is abandoned as soon as teardown starts.
    pub async fn send_text(&self, text: String) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::Transport(format!("connection {} is closed", self.id)));
        }
        tokio::select! {
            biased;
            () = self.closed() => {
                Err(RealtimeError::Transport(format!("connection {} is closed", self.id)))
            }
            sent = self.sender.send(Outbound::Text(text)) => sent.map_err(|_| {
                RealtimeError::Transport(format!("connection {} writer stopped", self.id))
            }),
        }
    }

    /// Queues a text frame without waiting.
    pub fn try_send_text(&self, text: String) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::Transport(format!("connection {} is closed", self.id)));
        }
        self.sender.try_send(Outbound::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RealtimeError::Transport(format!("connection {} queue is full", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                RealtimeError::Transport(format!("connection {} writer stopped", self.id))
            }
        })
    }

    /// Encodes and queues an outbound message.
    pub async fn send_message(&self, message: &OutboundMessage) -> RealtimeResult<()> {
        let text = encode(message)?;
        self.send_text(text).await
    }

    /// Queues a protocol ping. Returns false if the frame could not be queued.
    pub fn ping(&self) -> bool {
        self.sender.try_send(Outbound::Ping).is_ok()
    }

    /// Asks the socket writer to close the socket.
    pub fn close(&self) {
        let _ = self.sender.try_send(Outbound::Close);
    }

    /// Returns the rooms this connection belongs to.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.read().iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Returns true if the connection belongs to the room.
    #[must_use]
    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.read().contains(room)
    }

    pub(crate) fn add_room(&self, room: &str) -> bool {
        self.rooms.write().insert(room.to_string())
    }

    pub(crate) fn remove_room(&self, room: &str) -> bool {
        self.rooms.write().remove(room)
    }

    pub(crate) fn take_rooms(&self) -> HashSet<String> {
        std::mem::take(&mut *self.rooms.write())
    }

    /// Returns the authenticated user, if any.
    #[must_use]
    pub fn user(&self) -> Option<Claims> {
        self.user.read().clone()
    }

    /// Returns the authenticated user ID, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.user.read().as_ref().map(|c| c.sub.clone())
    }

    /// Returns true if the connection is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    pub(crate) fn set_user(&self, claims: Claims) {
        *self.user.write() = Some(claims);
    }

    pub(crate) fn clear_user(&self) -> Option<Claims> {
        self.user.write().take()
    }
}

/// Registry of all active WebSocket connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Active connections by ID
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Creates a new connection registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a new connection under a fresh ID.
    pub fn register(
        &self,
        sender: mpsc::Sender<Outbound>,
        query_token: Option<String>,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(ConnectionId::generate(), sender, query_token));
        self.connections
            .insert(connection.id().clone(), Arc::clone(&connection));
        connection
    }

    /// Stores an already-built connection.
    pub fn register_connection(&self, connection: Arc<Connection>) {
        self.connections
            .insert(connection.id().clone(), connection);
    }

    /// Unregisters a connection. Returns false if it was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Returns a connection by ID.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns a snapshot of all registered connections.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the IDs of all registered connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Encodes a message once and queues it for each open target.
    ///
    /// Unknown and closed targets are skipped. Returns the number of
    /// connections the frame was queued for.
    pub fn emit(&self, targets: &[ConnectionId], message: &OutboundMessage) -> usize {
        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(event = message.event_name(), error = %e, "Failed to encode message");
                return 0;
            }
        };

        targets
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|conn| conn.is_open())
            .filter(|conn| match conn.try_send_text(text.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(conn_id = %conn.id(), error = %e, "Failed to emit message");
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection() -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(10);
        (Connection::new(ConnectionId::generate(), tx, None), rx)
    }

    #[test]
    fn test_connection_id_generate() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::from("conn-42");
        assert_eq!(format!("{id}"), "conn-42");
        assert_eq!(id.as_str(), "conn-42");
    }

    #[tokio::test]
    async fn test_connection_new() {
        let (conn, _rx) = test_connection();

        assert!(conn.is_open());
        assert!(conn.is_alive());
        assert!(!conn.is_authenticated());
        assert!(conn.rooms().is_empty());
        assert!(conn.query_token().is_none());
    }

    #[tokio::test]
    async fn test_liveness_flag() {
        let (conn, _rx) = test_connection();

        assert!(conn.take_alive());
        assert!(!conn.take_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_mark_closed_wins_once() {
        let (conn, _rx) = test_connection();

        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(!conn.is_open());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_teardown() {
        let (conn, _rx) = test_connection();
        let conn = Arc::new(conn);

        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        conn.mark_closed();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already closed: resolves immediately
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_send_text_queues_frame() {
        let (conn, mut rx) = test_connection();

        conn.send_text("hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Text("hello".to_string())));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, _rx) = test_connection();
        conn.mark_closed();

        let err = conn.send_text("late".to_string()).await.unwrap_err();
        assert_eq!(err.error_code(), "transport_error");
        assert!(conn.try_send_text("late".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_blocked_send_released_by_teardown() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(Connection::new(ConnectionId::generate(), tx, None));
        conn.send_text("fills the queue".to_string()).await.unwrap();

        let pending = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send_text("reply".to_string()).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        conn.mark_closed();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err().error_code(), "transport_error");
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes_connection() {
        let (conn, rx) = test_connection();
        drop(rx);

        assert!(!conn.is_open());
        assert!(!conn.ping());
    }

    #[tokio::test]
    async fn test_try_send_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(ConnectionId::generate(), tx, None);

        conn.try_send_text("one".to_string()).unwrap();
        assert!(conn.try_send_text("two".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_ping_and_close_frames() {
        let (conn, mut rx) = test_connection();

        assert!(conn.ping());
        conn.close();
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_connection_registry_register() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(10);

        let conn = registry.register(tx, Some("token".to_string()));
        assert_eq!(registry.count(), 1);
        assert_eq!(conn.query_token(), Some("token"));
        assert!(registry.get(conn.id()).is_some());
    }

    #[tokio::test]
    async fn test_connection_registry_assigns_unique_ids() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(10);

        let a = registry.register(tx.clone(), None);
        let b = registry.register(tx, None);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.all().len(), 2);
        assert_eq!(registry.ids().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_registry_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(10);
        let conn = registry.register(tx, None);

        assert!(registry.unregister(conn.id()));
        assert!(!registry.unregister(conn.id()));
        assert_eq!(registry.count(), 0);
        assert!(registry.get(conn.id()).is_none());
    }

    #[tokio::test]
    async fn test_register_existing_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = test_connection();
        let conn = Arc::new(conn);

        registry.register_connection(Arc::clone(&conn));
        assert!(registry.get(conn.id()).is_some());
    }

    #[tokio::test]
    async fn test_emit_reaches_exact_targets() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(10);
        let (tx_b, mut rx_b) = mpsc::channel(10);
        let a = registry.register(tx_a, None);
        let _b = registry.register(tx_b, None);

        let message = OutboundMessage::event("note", serde_json::json!({"n": 1}));
        let targets = [a.id().clone(), ConnectionId::from("missing")];
        assert_eq!(registry.emit(&targets, &message), 1);

        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Text(_))));
        assert!(rx_b.try_recv().is_err());
    }
}
