//! Real-time service configuration.
//!
//! This module provides configuration for the connection service including:
//! - Heartbeat interval
//! - Message size and queue limits
//! - WebSocket endpoint path
//! - JWT verification settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Real-time connection service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Heartbeat interval in seconds. A silent peer is dropped after at most two intervals.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum number of queued frames per connection (each direction)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Path the WebSocket endpoint is mounted on
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_message_size: default_max_message_size(),
            max_queue_size: default_max_queue_size(),
            ws_path: default_ws_path(),
        }
    }
}

impl RealtimeConfig {
    /// Returns the heartbeat interval as a Duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the worst-case time to detect a dead peer.
    #[must_use]
    pub fn dead_peer_bound(&self) -> Duration {
        self.heartbeat_interval() * 2
    }
}

/// JWT verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for signing tokens (should be loaded from environment in production)
    #[serde(default = "default_jwt_secret")]
    pub secret: String,

    /// Token expiration time in seconds
    #[serde(default = "default_token_expiration")]
    pub expiration_secs: u64,

    /// Issuer claim
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Audience claim
    #[serde(default = "default_audience")]
    pub audience: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            expiration_secs: default_token_expiration(),
            issuer: default_issuer(),
            audience: default_audience(),
        }
    }
}

impl JwtConfig {
    /// Returns the token expiration duration.
    #[must_use]
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_token_expiration() -> u64 {
    3600 // 1 hour
}

fn default_issuer() -> String {
    "hearth".to_string()
}

fn default_audience() -> String {
    "hearth-realtime".to_string()
}
