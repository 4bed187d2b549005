//! Real-time server implementation.

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::RealtimeError;
use crate::hub::ConnectionHub;
use crate::routes::create_router;

/// HTTP server exposing a [`ConnectionHub`] over WebSocket.
#[derive(Debug, Clone)]
pub struct RealtimeServer {
    hub: ConnectionHub,
}

impl RealtimeServer {
    /// Creates a server for the hub.
    #[must_use]
    pub fn new(hub: ConnectionHub) -> Self {
        Self { hub }
    }

    /// Returns the hub served by this server.
    #[must_use]
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Binds `addr` and serves until `shutdown_signal` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run.
    pub async fn run_with_shutdown(
        self,
        addr: SocketAddr,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), RealtimeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RealtimeError::Transport(format!("Failed to bind to {addr}: {e}")))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serves on an already bound listener until `shutdown_signal` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while running.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), RealtimeError> {
        let addr = listener
            .local_addr()
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let app = create_router(self.hub.clone());

        info!(%addr, ws_path = %self.hub.config().ws_path, "Realtime server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| RealtimeError::Transport(format!("Server error: {e}")))?;

        warn!("Realtime server shutting down");
        Ok(())
    }
}
