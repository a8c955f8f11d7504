// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish/subscribe transport capability.
//!
//! The RPC layer consumes a connection through the [`Transport`] trait:
//! topic subscribe/publish plus one inbound message stream. Connection
//! lifecycle, delivery guarantees and reconnection belong to the
//! implementation.
//!
//! # Shared inbound stream
//!
//! Every listener obtained from [`Transport::messages`] sees every message
//! delivered to the connection, whatever topic it was published on.
//! Components sharing a connection must filter by topic themselves.
//!
//! # Topic filters
//!
//! Subscriptions accept MQTT-style wildcards:
//! - `+` matches exactly one topic level
//! - `#` matches zero or more levels (must be the last level)

pub mod mem;

use thiserror::Error;
use tokio::sync::broadcast;

pub use mem::{MemoryBroker, MemoryConnection};

/// Negotiated protocol revision of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolLevel {
    /// No message properties; routing data must travel in the body.
    V311,
    /// Message properties (correlation data, response topic) available.
    #[default]
    V5,
}

impl ProtocolLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "v3" | "v3.1.1" | "3.1.1" | "4" => Some(Self::V311),
            "v5" | "5" | "5.0" => Some(Self::V5),
            _ => None,
        }
    }
}

/// Capability flags derived once from the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_structured_routing: bool,
}

impl Capabilities {
    pub fn from_level(level: ProtocolLevel) -> Self {
        Self {
            supports_structured_routing: level == ProtocolLevel::V5,
        }
    }
}

/// Out-of-band message properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub correlation_data: Option<Vec<u8>>,
    pub response_topic: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.correlation_data.is_none() && self.response_topic.is_none()
    }
}

/// A message as published or delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid topic filter: {0:?}")]
    InvalidFilter(String),

    #[error("invalid publish topic: {0:?}")]
    InvalidTopic(String),

    #[error("connection closed")]
    Closed,
}

/// One physical connection to a publish/subscribe bus.
pub trait Transport: Send + Sync + 'static {
    /// Protocol revision negotiated for this connection.
    fn protocol_level(&self) -> ProtocolLevel;

    /// Subscriptions are counted per filter: several components sharing
    /// the connection may hold the same filter.
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Release one hold on `filter`; delivery stops with the last one.
    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Fire-and-forget publish. Metadata may be dropped by the transport
    /// when the protocol level cannot carry it.
    fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Attach a new listener to the inbound stream.
    fn messages(&self) -> broadcast::Receiver<Message>;

    /// Number of live inbound listeners.
    fn listener_count(&self) -> usize;
}

/// Check if a subscription filter matches a concrete topic.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter.is_empty() || topic.is_empty() {
        return false;
    }

    if filter == topic {
        return true;
    }

    if !has_wildcard(filter) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();

    while let Some(level) = filter_levels.next() {
        if level == "#" {
            // # must be last and matches everything remaining (including nothing)
            return filter_levels.peek().is_none();
        }

        match topic_levels.next() {
            Some(t) if level == "+" || level == t => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

/// Whether a topic contains subscription wildcards.
pub fn has_wildcard(topic: &str) -> bool {
    topic.contains('+') || topic.contains('#')
}

/// Validate a subscription filter.
pub fn validate_filter(filter: &str) -> Result<(), TransportError> {
    let levels: Vec<&str> = filter.split('/').collect();
    let bad_level = levels.iter().enumerate().any(|(i, level)| {
        (level.contains('#') && (*level != "#" || i != levels.len() - 1))
            || (level.contains('+') && *level != "+")
    });
    if filter.is_empty() || bad_level {
        return Err(TransportError::InvalidFilter(filter.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(topic_matches("rpc/request", "rpc/request"));
        assert!(!topic_matches("rpc/request", "rpc/response"));
        assert!(!topic_matches("", "rpc"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("rpc/+/response", "rpc/a/response"));
        assert!(!topic_matches("rpc/+/response", "rpc/a/b/response"));
        assert!(!topic_matches("rpc/+", "rpc"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("rpc/#", "rpc/request"));
        assert!(topic_matches("rpc/#", "rpc/request/response"));
        assert!(topic_matches("rpc/#", "rpc"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("rpc/#", "other/request"));
    }

    #[test]
    fn filter_validation() {
        assert!(validate_filter("rpc/request").is_ok());
        assert!(validate_filter("rpc/+/x").is_ok());
        assert!(validate_filter("rpc/#").is_ok());
        assert!(validate_filter("rpc/#/x").is_err());
        assert!(validate_filter("rpc/a+").is_err());
        assert!(validate_filter("").is_err());
    }

    #[test]
    fn capabilities_follow_level() {
        assert!(Capabilities::from_level(ProtocolLevel::V5).supports_structured_routing);
        assert!(!Capabilities::from_level(ProtocolLevel::V311).supports_structured_routing);
    }

    #[test]
    fn protocol_level_parsing() {
        assert_eq!(ProtocolLevel::parse("v5"), Some(ProtocolLevel::V5));
        assert_eq!(ProtocolLevel::parse("v3.1.1"), Some(ProtocolLevel::V311));
        assert_eq!(ProtocolLevel::parse("v6"), None);
    }
}
