// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client and server configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! protocol = "v5"
//!
//! [client]
//! request_topic = "rpc/request"
//! response_topic = "rpc/request/response"   # optional
//! timeout_ms = 5000
//!
//! [server]
//! request_topic = "rpc/request"
//! verbose = false
//! ```

use crate::transport::{has_wildcard, ProtocolLevel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Suffix appended to the request topic when no response topic is set.
pub const RESPONSE_TOPIC_SUFFIX: &str = "/response";

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Call multiplexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Topic calls are published on.
    pub request_topic: String,

    /// Topic replies are requested on. Defaults to
    /// `<request_topic>/response`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,

    /// Per-call timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ClientConfig {
    pub fn new(request_topic: impl Into<String>) -> Self {
        Self {
            request_topic: request_topic.into(),
            response_topic: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Set an explicit response topic.
    pub fn response_topic(mut self, topic: impl Into<String>) -> Self {
        self.response_topic = Some(topic.into());
        self
    }

    /// Set the default per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Topic replies are published to.
    pub fn reply_address(&self) -> String {
        self.response_topic
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.request_topic, RESPONSE_TOPIC_SUFFIX))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topic("client request_topic", &self.request_topic)?;
        if let Some(topic) = &self.response_topic {
            validate_topic("client response_topic", topic)?;
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("client timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Topic calls are received on.
    pub request_topic: String,

    /// Log every inbound request at info level.
    #[serde(default)]
    pub verbose: bool,
}

impl ServerConfig {
    pub fn new(request_topic: impl Into<String>) -> Self {
        Self {
            request_topic: request_topic.into(),
            verbose: false,
        }
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topic("server request_topic", &self.request_topic)
    }
}

/// Configuration file root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Protocol level of the connection: "v5" or "v3.1.1".
    #[serde(default = "default_protocol")]
    pub protocol: String,

    pub client: ClientConfig,

    pub server: ServerConfig,
}

fn default_protocol() -> String {
    "v5".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::for_topic("rpc/request")
    }
}

impl BusConfig {
    /// Client and server sharing one request topic.
    pub fn for_topic(request_topic: &str) -> Self {
        Self {
            protocol: default_protocol(),
            client: ClientConfig::new(request_topic),
            server: ServerConfig::new(request_topic),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn protocol_level(&self) -> Result<ProtocolLevel, ConfigError> {
        ProtocolLevel::parse(&self.protocol)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown protocol {:?}", self.protocol)))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol_level()?;
        self.client.validate()?;
        self.server.validate()
    }
}

fn validate_topic(what: &str, topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is empty", what)));
    }
    if has_wildcard(topic) {
        return Err(ConfigError::Invalid(format!(
            "{} {:?} contains wildcards",
            what, topic
        )));
    }
    Ok(())
}
