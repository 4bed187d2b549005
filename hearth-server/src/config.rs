//! Server configuration module.
//!
//! Configuration is read from a YAML, TOML or JSON file (chosen by
//! extension), then `HEARTH_*` environment variables are applied on top and
//! the result is validated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use hearth_realtime::{JwtConfig, RealtimeConfig};
use hearth_telemetry::logging::LogConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HEARTH";

/// Server configuration.
///
/// Contains all settings needed to start and run the Hearth server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: HttpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LogConfig,

    /// Real-time connection service settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Token verification settings.
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl ServerConfig {
    /// Creates a new server configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `HEARTH_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides resolved by `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}_{suffix}"));

        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT").and_then(|v| parse_or_warn("PORT", &v)) {
            self.server.port = port;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(secret) = var("JWT_SECRET") {
            self.jwt.secret = secret;
        }
        if let Some(secs) =
            var("HEARTBEAT_INTERVAL_SECS").and_then(|v| parse_or_warn("HEARTBEAT_INTERVAL_SECS", &v))
        {
            self.realtime.heartbeat_interval_secs = secs;
        }
        if let Some(secs) =
            var("SHUTDOWN_TIMEOUT_SECS").and_then(|v| parse_or_warn("SHUTDOWN_TIMEOUT_SECS", &v))
        {
            self.shutdown.timeout_secs = secs;
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::invalid("server.host", "cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must be greater than 0"));
        }
        if self.realtime.heartbeat_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "realtime.heartbeat_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.realtime.max_message_size == 0 {
            return Err(ConfigError::invalid(
                "realtime.max_message_size",
                "must be greater than 0",
            ));
        }
        if self.realtime.max_queue_size == 0 {
            return Err(ConfigError::invalid(
                "realtime.max_queue_size",
                "must be greater than 0",
            ));
        }
        if !self.realtime.ws_path.starts_with('/') {
            return Err(ConfigError::invalid("realtime.ws_path", "must start with '/'"));
        }
        if self.jwt.secret.is_empty() {
            return Err(ConfigError::invalid("jwt.secret", "cannot be empty"));
        }
        if self.jwt.secret == JwtConfig::default().secret {
            warn!("jwt.secret is the built-in default; set HEARTH_JWT_SECRET in production");
        }
        Ok(())
    }

    /// Returns the listener address as `host:port`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = %format!("{ENV_PREFIX}_{name}"), value, "Ignoring unparseable override");
            None
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Timeout for graceful shutdown in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    /// YAML format (.yaml, .yml)
    #[default]
    Yaml,
    /// TOML format (.toml)
    Toml,
    /// JSON format (.json)
    Json,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "yaml" | "yml" => Some(Self::Yaml),
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                _ => None,
            })
    }
}

/// Configuration file loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from a file, detecting the format from its extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension is not recognized, the file cannot be
    /// read or the content cannot be parsed.
    pub fn load_file<T, P>(path: P) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason: "Unrecognized file extension. Supported: .yaml, .yml, .toml, .json".to_string(),
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::load_str(&content, format).map_err(|e| match e {
            ConfigError::InvalidFormat { reason, .. } => ConfigError::InvalidFormat {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parses configuration from a string in the given format.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be parsed.
    pub fn load_str<T>(content: &str, format: ConfigFormat) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        let invalid = |reason: String| ConfigError::InvalidFormat {
            path: "<string>".to_string(),
            reason,
        };

        match format {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| invalid(format!("YAML parse error: {e}")))
            }
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| invalid(format!("TOML parse error: {e}")))
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| invalid(format!("JSON parse error: {e}")))
            }
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read {path}: {reason}")]
    FileRead {
        /// File path.
        path: String,
        /// Underlying error.
        reason: String,
    },

    /// The file could not be parsed.
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat {
        /// File path.
        path: String,
        /// Parse error.
        reason: String,
    },

    /// A value failed validation.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}
