//! Main server implementation.
//!
//! Wires configuration, logging, the connection hub, the heartbeat monitor
//! and the HTTP listener together, and drives graceful shutdown.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use hearth_realtime::{
    ConnectionHub, DisconnectReason, EventRouter, JwtManager, RealtimeServer, TokenVerifier,
};
use hearth_telemetry::logging::init_logging;

use crate::config::{ConfigLoader, ServerConfig};
use crate::handlers::register_routes;
use crate::shutdown::{ShutdownController, setup_signal_handlers};

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not initialized
    Stopped,
    /// Logging and routes are set up
    Starting,
    /// Accepting connections
    Running,
    /// Closing connections
    ShuttingDown,
}

/// The Hearth server.
pub struct HearthServer {
    config: ServerConfig,
    state: Arc<RwLock<ServerState>>,
    shutdown: ShutdownController,
    hub: ConnectionHub,
    _log_guards: Vec<WorkerGuard>,
}

impl std::fmt::Debug for HearthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HearthServer")
            .field("state", &self.state())
            .field("bind_address", &self.config.bind_address())
            .field("connections", &self.hub.connection_count())
            .finish_non_exhaustive()
    }
}

impl HearthServer {
    /// Creates a server with the application routes registered.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtManager::new(&config.jwt));
        let router = Arc::new(EventRouter::new());
        register_routes(&router, verifier);

        let hub = ConnectionHub::with_router(config.realtime.clone(), router);

        Self {
            config,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown: ShutdownController::new(),
            hub,
            _log_guards: Vec::new(),
        }
    }

    /// Loads, overrides and validates configuration from a file.
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ServerError> {
        let mut config: ServerConfig =
            ConfigLoader::load_file(path).map_err(|e| ServerError::Config(e.to_string()))?;

        config.apply_env_overrides();

        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the connection hub.
    #[must_use]
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Returns the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Initializes logging. Must be called once before [`run`](Self::run).
    pub fn initialize(&mut self) -> Result<(), ServerError> {
        self.transition(ServerState::Stopped, ServerState::Starting)?;

        let guards = init_logging(&self.config.logging).map_err(|e| {
            ServerError::Initialization(format!("Failed to initialize logging: {e}"))
        })?;
        self._log_guards = guards;

        info!(
            level = %self.config.logging.level,
            routes = self.hub.router().route_count(),
            "Hearth server initialized"
        );
        Ok(())
    }

    /// Binds the configured address and runs until shutdown is signalled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr: SocketAddr = self.config.bind_address().parse().map_err(|e| {
            ServerError::Config(format!(
                "Invalid bind address {}: {e}",
                self.config.bind_address()
            ))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Runtime(format!("Failed to bind to {addr}: {e}")))?;

        let signal_ctrl = self.shutdown.clone();
        tokio::spawn(async move {
            setup_signal_handlers(signal_ctrl).await;
        });

        self.serve(listener).await
    }

    /// Serves on a bound listener until shutdown is initiated, then closes
    /// every connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.transition(ServerState::Starting, ServerState::Running)?;

        let heartbeat = self.hub.heartbeat().spawn(self.shutdown.subscribe());

        let shutdown = self.shutdown.clone();
        let shutdown_signal = async move {
            shutdown.wait_for_shutdown().await;
        };

        let result = RealtimeServer::new(self.hub.clone())
            .serve(listener, shutdown_signal)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()));

        // A listener failure still tears down the heartbeat and connections.
        self.shutdown.initiate_shutdown();
        self.graceful_shutdown(heartbeat).await;

        result
    }

    async fn graceful_shutdown(&self, heartbeat: tokio::task::JoinHandle<()>) {
        *self.state.write() = ServerState::ShuttingDown;
        info!("Performing graceful shutdown...");

        if tokio::time::timeout(self.config.shutdown.timeout(), heartbeat)
            .await
            .is_err()
        {
            warn!("Heartbeat monitor did not stop in time");
        }

        let closed = self.hub.close_all(DisconnectReason::ServerShutdown);
        info!(closed, "Connections closed");

        *self.state.write() = ServerState::Stopped;
        self.shutdown.mark_complete();
        info!("Graceful shutdown complete");
    }

    /// Initiates shutdown.
    pub fn shutdown(&self) {
        self.shutdown.initiate_shutdown();
    }

    fn transition(&self, from: ServerState, to: ServerState) -> Result<(), ServerError> {
        let mut state = self.state.write();
        if *state != from {
            return Err(ServerError::InvalidState(format!(
                "expected {from:?}, found {:?}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }
}

/// Server error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A component failed to start
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The server failed while running
    #[error("Runtime error: {0}")]
    Runtime(String),
}
