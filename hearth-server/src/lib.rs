//! # Hearth Server
//!
//! Process entry point for the Hearth real-time service.
//!
//! This crate provides:
//! - Configuration loading from YAML, TOML or JSON with `HEARTH_*` overrides
//! - The application event routes (auth, chat, family updates, rooms)
//! - Service startup, heartbeat supervision and graceful shutdown
//!
//! # Architecture
//!
//! [`HearthServer`] builds a [`hearth_realtime::ConnectionHub`], registers the
//! routes from [`handlers`], initializes logging through `hearth-telemetry`,
//! then serves the WebSocket endpoint until SIGINT or SIGTERM. On shutdown the
//! heartbeat monitor stops and every open connection is closed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod handlers;
pub mod server;
pub mod shutdown;

pub use config::{ConfigError, ConfigLoader, ServerConfig};
pub use server::{HearthServer, ServerError, ServerState};
pub use shutdown::ShutdownController;
