//! HTTP route definitions.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::hub::ConnectionHub;
use crate::ws::ws_handler;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Open WebSocket connections
    pub connections: usize,
    /// Non-empty rooms
    pub rooms: usize,
    /// Registered event routes
    pub routes: usize,
}

/// Health check handler.
///
/// GET /health
pub async fn health_check(State(hub): State<ConnectionHub>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: hub.connection_count(),
        rooms: hub.rooms().room_count(),
        routes: hub.router().route_count(),
    })
}

/// Creates the router serving the WebSocket endpoint and the health check.
pub fn create_router(hub: ConnectionHub) -> Router {
    let ws_path = hub.config().ws_path.clone();

    Router::new()
        .route("/health", get(health_check))
        .route(&ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;

    #[test]
    fn test_create_router() {
        let hub = ConnectionHub::new(RealtimeConfig::default());
        let _router = create_router(hub);
    }

    #[test]
    fn test_create_router_custom_path() {
        let hub = ConnectionHub::new(RealtimeConfig {
            ws_path: "/realtime".to_string(),
            ..Default::default()
        });
        let _router = create_router(hub);
    }

    #[tokio::test]
    async fn test_health_check_reports_counts() {
        let hub = ConnectionHub::new(RealtimeConfig::default());
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let conn = hub.connect(tx, None);
        hub.rooms().join(&conn, "family-42");

        let Json(health) = health_check(State(hub)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.connections, 1);
        assert_eq!(health.rooms, 1);
        assert_eq!(health.routes, 0);
    }
}
