//! WebSocket transport.
//!
//! Adapts axum WebSocket upgrades onto the [`ConnectionHub`](crate::hub::ConnectionHub).

mod handler;

pub use handler::{WsQuery, ws_handler};
