//! Structured logging system for Hearth.
//!
//! Provides configurable logging with support for:
//! - JSON and pretty-print formats
//! - Multiple output targets (stdout, file)
//! - Log rotation
//! - `RUST_LOG` overrides of the configured level

mod config;

pub use config::{LogConfig, LogFormat, LogOutput, RotationConfig};

use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Initialize the logging system with the given configuration.
///
/// Returns guards that must be kept alive for the duration of the program
/// to ensure all logs are flushed.
///
/// # Example
///
/// ```no_run
/// use hearth_telemetry::logging::{init_logging, LogConfig};
///
/// let config = LogConfig::default();
/// let _guards = init_logging(&config).expect("Failed to initialize logging");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>, LoggingError> {
    let env_filter = build_filter(config)?;
    let (layers, guards) = build_layers(config)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(guards)
}

/// Builds the level filter. `RUST_LOG` wins over the configured level.
fn build_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| LoggingError::InvalidConfig(format!("invalid level '{}': {e}", config.level)))
}

fn build_layers<S>(config: &LogConfig) -> Result<(Vec<BoxedLayer<S>>, Vec<WorkerGuard>), LoggingError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if config.outputs.is_empty() {
        return Err(LoggingError::InvalidConfig(
            "at least one log output is required".to_string(),
        ));
    }

    let mut layers = Vec::new();
    let mut guards = Vec::new();

    for output in &config.outputs {
        match output {
            LogOutput::Stdout => layers.push(create_stdout_layer(config)),
            LogOutput::File {
                path,
                file_name,
                rotation,
            } => {
                let (layer, guard) = create_file_layer(config, path, file_name, *rotation)?;
                layers.push(layer);
                guards.push(guard);
            }
        }
    }

    Ok((layers, guards))
}

fn span_events(config: &LogConfig) -> FmtSpan {
    if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    }
}

fn create_stdout_layer<S>(config: &LogConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(config.include_thread_id)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info)
        .with_span_events(span_events(config));

    match config.format {
        LogFormat::Json => Box::new(base_layer.json().flatten_event(true)),
        LogFormat::Pretty => Box::new(base_layer.pretty()),
    }
}

fn create_file_layer<S>(
    config: &LogConfig,
    path: &str,
    file_name: &str,
    rotation: Option<RotationConfig>,
) -> Result<(BoxedLayer<S>, WorkerGuard), LoggingError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(Path::new(path))?;

    let file_appender: RollingFileAppender = match rotation.unwrap_or(RotationConfig::Daily) {
        RotationConfig::Hourly => tracing_appender::rolling::hourly(path, file_name),
        RotationConfig::Daily => tracing_appender::rolling::daily(path, file_name),
        RotationConfig::Never => tracing_appender::rolling::never(path, file_name),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Files are always JSON for ingestion
    let layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(config.include_thread_id)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info)
        .with_span_events(span_events(config))
        .json()
        .flatten_event(true);

    Ok((Box::new(layer), guard))
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create log directory
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid logging configuration: {0}")]
    InvalidConfig(String),

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_build_layers_stdout() {
        let config = LogConfig::default();
        let (layers, guards) = build_layers::<Registry>(&config).unwrap();
        assert_eq!(layers.len(), 1);
        assert!(guards.is_empty());
    }

    #[test]
    fn test_build_layers_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        let config = LogConfig {
            format: LogFormat::Pretty,
            outputs: vec![
                LogOutput::Stdout,
                LogOutput::File {
                    path: log_dir.to_string_lossy().into_owned(),
                    file_name: "test.log".to_string(),
                    rotation: Some(RotationConfig::Never),
                },
            ],
            ..Default::default()
        };

        let (layers, guards) = build_layers::<Registry>(&config).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(guards.len(), 1);
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_build_layers_requires_output() {
        let config = LogConfig {
            outputs: Vec::new(),
            ..Default::default()
        };
        let err = build_layers::<Registry>(&config).err().unwrap();
        assert!(matches!(err, LoggingError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            level: "hearth=verbose".to_string(),
            ..Default::default()
        };
        assert!(matches!(build_filter(&config), Err(LoggingError::InvalidConfig(_))));
    }
}
