//! # Hearth Telemetry
//!
//! Structured logging for the Hearth backend services.
//!
//! This crate provides:
//! - Structured logging with JSON and pretty formats
//! - Stdout and rolling file outputs
//! - Log level filtering with `RUST_LOG` overrides

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Logging configuration and initialization
pub mod logging;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::logging::{LogConfig, LogFormat, LogOutput, LoggingError, init_logging};
}
