//! Per-message dispatch context.

use axum::http::Extensions;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::Claims;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::error::{RealtimeError, RealtimeResult};
use crate::message::{InboundMessage, OutboundMessage};
use crate::room::RoomManager;

/// Everything middleware and handlers see while one inbound message is dispatched.
///
/// A context is built for every message and dropped when the dispatch ends.
/// Values stored in [`extensions`](Self::extensions_mut) do not leak into
/// later messages; state that must outlive the message (the authenticated
/// user, room membership) lives on the [`Connection`].
#[derive(Debug)]
pub struct DispatchContext {
    connection: Arc<Connection>,
    event: String,
    data: Value,
    extensions: Extensions,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
}

impl DispatchContext {
    /// Creates a context for a decoded inbound message.
    #[must_use]
    pub fn new(
        connection: Arc<Connection>,
        message: InboundMessage,
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
    ) -> Self {
        Self {
            connection,
            event: message.event,
            data: message.data,
            extensions: Extensions::new(),
            registry,
            rooms,
        }
    }

    /// Returns the connection the message arrived on.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Returns the ID of the connection the message arrived on.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Returns the event name.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns the message payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the message payload for modification by middleware.
    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    /// Returns a string field of the payload.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Deserializes the payload into a typed request.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the payload does not match `T`.
    pub fn parse_data<T: DeserializeOwned>(&self) -> RealtimeResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            RealtimeError::Parse(format!("Invalid data for event '{}': {e}", self.event))
        })
    }

    /// Returns the authenticated user, if any.
    #[must_use]
    pub fn user(&self) -> Option<Claims> {
        self.connection.user()
    }

    /// Returns the authenticated user, or an `auth_required` error.
    ///
    /// # Errors
    ///
    /// Returns an authentication error if the connection is anonymous.
    pub fn require_user(&self) -> RealtimeResult<Claims> {
        self.connection.user().ok_or_else(RealtimeError::auth_required)
    }

    /// Attaches an authenticated user to the connection for its lifetime.
    pub fn set_user(&self, claims: Claims) {
        self.connection.set_user(claims);
    }

    /// Detaches the authenticated user, returning it.
    pub fn clear_user(&self) -> Option<Claims> {
        self.connection.clear_user()
    }

    /// Returns the per-dispatch extensions.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns the per-dispatch extensions mutably.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Sends an event to the connection the message arrived on.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection is closed.
    pub async fn emit(&self, event: &str, data: Value) -> RealtimeResult<()> {
        self.connection
            .send_message(&OutboundMessage::event(event, data))
            .await
    }

    /// Sends an event to exactly the given connections.
    pub fn emit_to(&self, targets: &[ConnectionId], event: &str, data: Value) -> usize {
        self.registry
            .emit(targets, &OutboundMessage::event(event, data))
    }

    /// Adds the connection to a room.
    pub fn join(&self, room: &str) -> bool {
        self.rooms.join(&self.connection, room)
    }

    /// Removes the connection from a room.
    pub fn leave(&self, room: &str) -> bool {
        self.rooms.leave(&self.connection, room)
    }

    /// Sends an event to every other member of a room.
    pub fn broadcast(&self, room: &str, event: &str, data: Value) -> usize {
        self.rooms
            .broadcast(room, event, data, Some(self.connection.id()))
    }

    /// Sends an event to every member of a room, this connection included.
    pub fn broadcast_including_self(&self, room: &str, event: &str, data: Value) -> usize {
        self.rooms.broadcast(room, event, data, None)
    }

    /// Returns the room manager.
    #[must_use]
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}
