// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol adapters: where the correlation token and reply address travel.
//!
//! Two wire conventions exist, picked once per connection from its
//! [`Capabilities`]:
//!
//! - [`StructuredRouting`] (v5): token and reply address are message
//!   properties (`correlation data`, `response topic`); the body carries
//!   only the envelope.
//! - [`InlineFallback`] (v3.1.1): both are folded into the JSON body as
//!   top-level `correlationId` and `responseTopic` fields next to `trpc`.
//!
//! Decoding never fails loudly. A body that is not JSON, or that carries no
//! token, decodes to `None` so callers can ignore foreign traffic.

use crate::transport::{Capabilities, Metadata};
use crate::types::CorrelationToken;
use serde::ser::Error as _;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Body field holding the token under [`InlineFallback`].
pub const CORRELATION_ID_FIELD: &str = "correlationId";
/// Body field holding the reply address under [`InlineFallback`].
pub const RESPONSE_TOPIC_FIELD: &str = "responseTopic";

/// Encoded message ready for publishing (topic chosen by the caller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

/// Envelope and routing data recovered from an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Envelope with any routing fields removed.
    pub body: Value,
    pub token: CorrelationToken,
    pub reply_address: Option<String>,
}

/// One wire convention for correlation data.
pub trait ProtocolAdapter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Attach token and (for calls) reply address to an envelope.
    fn encode_outgoing(
        &self,
        envelope: Value,
        token: &CorrelationToken,
        reply_address: Option<&str>,
    ) -> Result<Outgoing, serde_json::Error>;

    /// Recover envelope, token and reply address. `None` for anything that
    /// is not routable traffic.
    fn decode_incoming(&self, payload: &[u8], metadata: &Metadata) -> Option<Routed>;
}

/// Pick the adapter for a connection's capabilities.
pub fn select(capabilities: Capabilities) -> Arc<dyn ProtocolAdapter> {
    if capabilities.supports_structured_routing {
        Arc::new(StructuredRouting)
    } else {
        Arc::new(InlineFallback)
    }
}

/// Routing data carried as message properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredRouting;

impl ProtocolAdapter for StructuredRouting {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn encode_outgoing(
        &self,
        envelope: Value,
        token: &CorrelationToken,
        reply_address: Option<&str>,
    ) -> Result<Outgoing, serde_json::Error> {
        Ok(Outgoing {
            payload: serde_json::to_vec(&envelope)?,
            metadata: Metadata {
                correlation_data: Some(token.as_bytes().to_vec()),
                response_topic: reply_address.map(str::to_string),
            },
        })
    }

    fn decode_incoming(&self, payload: &[u8], metadata: &Metadata) -> Option<Routed> {
        let token = CorrelationToken::from_bytes(metadata.correlation_data.as_deref()?)?;
        let body = serde_json::from_slice::<Value>(payload).ok()?;
        let reply_address = metadata
            .response_topic
            .clone()
            .filter(|topic| !topic.is_empty());
        Some(Routed {
            body,
            token,
            reply_address,
        })
    }
}

/// Routing data folded into the JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineFallback;

impl ProtocolAdapter for InlineFallback {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn encode_outgoing(
        &self,
        envelope: Value,
        token: &CorrelationToken,
        reply_address: Option<&str>,
    ) -> Result<Outgoing, serde_json::Error> {
        let Value::Object(mut body) = envelope else {
            return Err(serde_json::Error::custom(
                "inline routing requires an object envelope",
            ));
        };
        body.insert(
            CORRELATION_ID_FIELD.to_string(),
            Value::String(token.to_text()),
        );
        if let Some(address) = reply_address {
            body.insert(
                RESPONSE_TOPIC_FIELD.to_string(),
                Value::String(address.to_string()),
            );
        }
        Ok(Outgoing {
            payload: serde_json::to_vec(&body)?,
            metadata: Metadata::default(),
        })
    }

    fn decode_incoming(&self, payload: &[u8], _metadata: &Metadata) -> Option<Routed> {
        let mut body: Map<String, Value> = serde_json::from_slice(payload).ok()?;
        let token = match body.remove(CORRELATION_ID_FIELD)? {
            Value::String(s) => CorrelationToken::from_string(s)?,
            _ => return None,
        };
        let reply_address = match body.remove(RESPONSE_TOPIC_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        };
        Some(Routed {
            body: Value::Object(body),
            token,
            reply_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ProtocolLevel;
    use serde_json::json;

    fn envelope() -> Value {
        json!({"trpc": {"id": 1, "method": "query", "params": {"path": "greet"}}})
    }

    #[test]
    fn select_follows_capabilities() {
        let v5 = select(Capabilities::from_level(ProtocolLevel::V5));
        let v3 = select(Capabilities::from_level(ProtocolLevel::V311));
        assert_eq!(v5.name(), "structured");
        assert_eq!(v3.name(), "inline");
    }

    #[test]
    fn structured_keeps_routing_out_of_body() {
        let token = CorrelationToken::generate();
        let out = StructuredRouting
            .encode_outgoing(envelope(), &token, Some("rpc/response"))
            .unwrap();
        let body: Value = serde_json::from_slice(&out.payload).unwrap();
        assert_eq!(body, envelope());
        assert_eq!(out.metadata.response_topic.as_deref(), Some("rpc/response"));

        let routed = StructuredRouting
            .decode_incoming(&out.payload, &out.metadata)
            .unwrap();
        assert_eq!(routed.token, token);
        assert_eq!(routed.reply_address.as_deref(), Some("rpc/response"));
        assert_eq!(routed.body, envelope());
    }

    #[test]
    fn structured_echoes_binary_correlation_data() {
        let raw = vec![0xde, 0xad, 0xbe, 0xef, 0xff, 0x00, 0x10, 0x80];
        let payload = serde_json::to_vec(&envelope()).unwrap();
        let meta = Metadata {
            correlation_data: Some(raw.clone()),
            response_topic: Some("rpc/response".into()),
        };
        let routed = StructuredRouting.decode_incoming(&payload, &meta).unwrap();

        let out = StructuredRouting
            .encode_outgoing(envelope(), &routed.token, None)
            .unwrap();
        assert_eq!(out.metadata.correlation_data, Some(raw));
    }

    #[test]
    fn structured_ignores_messages_without_token() {
        let payload = serde_json::to_vec(&envelope()).unwrap();
        assert!(StructuredRouting
            .decode_incoming(&payload, &Metadata::default())
            .is_none());
    }

    #[test]
    fn inline_folds_routing_into_body() {
        let token = CorrelationToken::generate();
        let out = InlineFallback
            .encode_outgoing(envelope(), &token, Some("rpc/response"))
            .unwrap();
        assert!(out.metadata.is_empty());

        let body: Value = serde_json::from_slice(&out.payload).unwrap();
        assert_eq!(body[CORRELATION_ID_FIELD], json!(token.to_text()));
        assert_eq!(body[RESPONSE_TOPIC_FIELD], json!("rpc/response"));

        let routed = InlineFallback
            .decode_incoming(&out.payload, &Metadata::default())
            .unwrap();
        assert_eq!(routed.token, token);
        assert_eq!(routed.body, envelope());
    }

    #[test]
    fn inline_reply_has_no_response_topic() {
        let token = CorrelationToken::generate();
        let out = InlineFallback
            .encode_outgoing(envelope(), &token, None)
            .unwrap();
        let routed = InlineFallback
            .decode_incoming(&out.payload, &Metadata::default())
            .unwrap();
        assert!(routed.reply_address.is_none());
    }

    #[test]
    fn inline_ignores_foreign_traffic() {
        let meta = Metadata::default();
        assert!(InlineFallback.decode_incoming(b"not json", &meta).is_none());
        assert!(InlineFallback.decode_incoming(b"[1,2,3]", &meta).is_none());
        assert!(InlineFallback
            .decode_incoming(br#"{"trpc": {"id": 1}}"#, &meta)
            .is_none());
        assert!(InlineFallback
            .decode_incoming(br#"{"correlationId": 5}"#, &meta)
            .is_none());
        assert!(InlineFallback
            .decode_incoming(br#"{"correlationId": ""}"#, &meta)
            .is_none());
    }

    #[test]
    fn inline_rejects_non_object_envelope() {
        let token = CorrelationToken::generate();
        assert!(InlineFallback
            .encode_outgoing(json!([1]), &token, None)
            .is_err());
    }
}
