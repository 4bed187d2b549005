//! Connection hub.
//!
//! The hub wires the registry, room manager and event router together and
//! owns the connection lifecycle: accepting, dispatching inbound text and
//! tearing connections down exactly once.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, Outbound};
use crate::context::DispatchContext;
use crate::heartbeat::HeartbeatMonitor;
use crate::message::{ERROR_EVENT, OutboundMessage, decode};
use crate::room::RoomManager;
use crate::router::{DispatchOutcome, EventRouter};

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the socket
    ClientClosed,
    /// Reading from or writing to the socket failed
    TransportError,
    /// The peer stopped answering pings
    HeartbeatTimeout,
    /// The server is shutting down
    ServerShutdown,
    /// Server code asked for the connection to be dropped
    Terminated,
}

impl DisconnectReason {
    /// Returns the reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ServerShutdown => "server_shutdown",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composition root of the real-time service.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    router: Arc<EventRouter>,
    config: Arc<RealtimeConfig>,
}

impl ConnectionHub {
    /// Creates a hub with an empty router.
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_router(config, Arc::new(EventRouter::new()))
    }

    /// Creates a hub around an existing router.
    #[must_use]
    pub fn with_router(config: RealtimeConfig, router: Arc<EventRouter>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(Arc::clone(&registry)));
        Self {
            registry,
            rooms,
            router,
            config: Arc::new(config),
        }
    }

    /// Registers a newly accepted connection.
    pub fn connect(
        &self,
        sender: mpsc::Sender<Outbound>,
        query_token: Option<String>,
    ) -> Arc<Connection> {
        let conn = self.registry.register(sender, query_token);
        info!(
            conn_id = %conn.id(),
            connections = self.registry.count(),
            "WebSocket connection established"
        );
        conn
    }

    /// Decodes and dispatches one inbound text frame.
    ///
    /// Frames arriving after teardown started are dropped. A malformed frame
    /// is answered with a `parse_error` frame on the `error` event and the
    /// connection stays open. Returns `None` when the frame was dropped.
    pub async fn handle_text(&self, conn: &Arc<Connection>, raw: &str) -> Option<DispatchOutcome> {
        if !conn.is_open() {
            debug!(conn_id = %conn.id(), "Dropping frame for closed connection");
            return None;
        }

        let message = match decode(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(conn_id = %conn.id(), error = %err, "Malformed message");
                if let Err(e) = conn.send_message(&OutboundMessage::error(ERROR_EVENT, &err)).await {
                    debug!(conn_id = %conn.id(), error = %e, "Error frame dropped");
                }
                return Some(DispatchOutcome::Failed(err));
            }
        };

        let ctx = DispatchContext::new(
            Arc::clone(conn),
            message,
            Arc::clone(&self.registry),
            Arc::clone(&self.rooms),
        );
        Some(self.router.dispatch(ctx).await)
    }

    /// Records a pong from the peer.
    pub fn handle_pong(&self, conn: &Connection) {
        conn.mark_alive();
    }

    /// Tears a connection down: leaves every room, then unregisters.
    ///
    /// Runs at most once per connection no matter how many paths race to
    /// close it. Returns true for the call that performed the teardown.
    pub fn disconnect(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        let Some(conn) = self.registry.get(id) else {
            return false;
        };
        if !conn.mark_closed() {
            return false;
        }

        let rooms = self.rooms.leave_all(&conn);
        self.registry.unregister(id);

        info!(
            conn_id = %id,
            reason = %reason,
            user_id = conn.user_id().as_deref().unwrap_or("anonymous"),
            rooms = rooms.len(),
            connections = self.registry.count(),
            "WebSocket connection closed"
        );
        true
    }

    /// Closes the socket of a connection and tears it down.
    pub fn terminate(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        if let Some(conn) = self.registry.get(id) {
            conn.close();
        }
        self.disconnect(id, reason)
    }

    /// Terminates every connection. Returns how many were torn down.
    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        let closed = self
            .registry
            .ids()
            .iter()
            .filter(|id| self.terminate(id, reason))
            .count();
        if closed > 0 {
            warn!(closed, reason = %reason, "Closed all connections");
        }
        closed
    }

    /// Sends an event to exactly the given connections.
    pub fn emit(&self, targets: &[ConnectionId], event: &str, data: Value) -> usize {
        self.registry
            .emit(targets, &OutboundMessage::event(event, data))
    }

    /// Sends an event to every member of a room except `exclude`.
    pub fn broadcast(
        &self,
        room: &str,
        event: &str,
        data: Value,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        self.rooms.broadcast(room, event, data, exclude)
    }

    /// Returns a heartbeat monitor for this hub.
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatMonitor {
        HeartbeatMonitor::new(self.clone())
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the room manager.
    #[must_use]
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Returns the event router.
    #[must_use]
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Returns the service configuration.
    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}
