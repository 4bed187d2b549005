//! # Hearth Realtime
//!
//! Real-time WebSocket connection service for the Hearth family-finance backend.
//!
//! This crate provides:
//! - JSON event envelope codec
//! - Connection registry and room membership with group broadcast
//! - Event routing through global and per-route middleware
//! - Heartbeat-based detection of dead peers
//! - JWT token verification
//! - Axum WebSocket endpoint and health check
//!
//! # Architecture
//!
//! The [`ConnectionHub`] is the composition root. Every inbound text frame is
//! decoded, matched to a route by its `event` name, run through global then
//! route middleware and finally the route handler. The sender gets a success
//! frame for a reply, an error frame for a failure, and nothing when the
//! handler completes without a reply. Handlers reach other connections through the
//! [`DispatchContext`] (`emit`, `join`, `leave`, `broadcast`).
//!
//! # Authentication
//!
//! Routes opt into authentication with [`AuthMiddleware`]. Tokens are taken
//! from:
//! - The event payload: `{"event":"auth","data":{"token":"<jwt>"}}`
//! - Query parameter: `ws://host/ws?token=<jwt>`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod message;
pub mod middleware;
pub mod room;
pub mod router;
pub mod routes;
pub mod server;
pub mod ws;

pub use auth::{Claims, JwtManager, TokenVerifier, UserRole};
pub use config::{JwtConfig, RealtimeConfig};
pub use connection::{Connection, ConnectionId, ConnectionRegistry, Outbound};
pub use context::DispatchContext;
pub use error::{RealtimeError, RealtimeResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatReport};
pub use hub::{ConnectionHub, DisconnectReason};
pub use message::{InboundMessage, OutboundMessage};
pub use middleware::{
    AuthMiddleware, Flow, Handler, Middleware, Reply, RequireRole, TraceMiddleware, handler_fn,
    middleware_fn,
};
pub use room::RoomManager;
pub use router::{DispatchOutcome, EventRouter};
pub use server::RealtimeServer;
