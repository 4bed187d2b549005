//! # Hearth Server
//!
//! Main entry point for the Hearth real-time service.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! hearth-server
//!
//! # Run with custom configuration file
//! hearth-server --config /path/to/config.yaml
//!
//! # Run with environment variable overrides
//! HEARTH_PORT=9090 HEARTH_JWT_SECRET=... hearth-server
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use hearth_server::{HearthServer, ServerConfig};

/// Hearth real-time server
#[derive(Parser, Debug)]
#[command(name = "hearth-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override server host
    #[arg(long, env = "HEARTH_HOST")]
    host: Option<String>,

    /// Override server port
    #[arg(long, env = "HEARTH_PORT")]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if args.validate {
        println!("Configuration is valid");
        return;
    }

    match run_server(config).await {
        Ok(()) => info!("Hearth server stopped"),
        Err(e) => {
            error!(error = %e, "Server error");
            std::process::exit(1);
        }
    }
}

/// Loads configuration from file and applies command-line overrides.
fn load_config(args: &Args) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = if args.config.exists() {
        HearthServer::load_config(&args.config)?
    } else {
        eprintln!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        config
    };

    if let Some(host) = &args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

/// Creates and runs the server.
async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = HearthServer::new(config);
    server.initialize()?;
    server.run().await?;
    Ok(())
}
