// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core types shared by the client and server halves.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque per-call value used to route a reply back to its waiter.
///
/// Generated fresh for every call attempt and never reused. On the wire it
/// travels either as MQTT v5 correlation data (raw bytes, echoed back
/// unchanged) or as the `correlationId` string field of the message body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Vec<u8>);

impl CorrelationToken {
    /// Generate a new random token (UUID v4, string form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into_bytes())
    }

    /// Rebuild a token from correlation data bytes.
    ///
    /// Any non-empty byte sequence is a valid token; `None` if empty.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes.to_vec()))
        }
    }

    /// Rebuild a token from its string form. Returns `None` if empty.
    pub fn from_string(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s.into_bytes()))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// String form used for the inline `correlationId` field.
    ///
    /// The token itself when it is UTF-8, lowercase hex otherwise.
    pub fn to_text(&self) -> String {
        match std::str::from_utf8(&self.0) {
            Ok(s) => s.to_string(),
            Err(_) => self.0.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Caller-assigned call identifier, echoed back in the reply.
///
/// Distinct from the [`CorrelationToken`]: the id is application level
/// bookkeeping, the token is transport routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallId {
    Number(i64),
    Text(String),
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for CallId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Kind of call.
///
/// Queries are side-effect free by convention, mutations are not.
/// Subscriptions need a long-lived push channel and are always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Query,
    Mutation,
    Subscription,
}

impl CallKind {
    /// Wire method string.
    pub fn as_method(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }

    /// Parse a wire method string.
    ///
    /// Accepts the `read`/`write` aliases. Anything unrecognised (or a
    /// missing method) is a query.
    pub fn from_method(method: Option<&str>) -> Self {
        match method {
            Some("mutation") | Some("write") => Self::Mutation,
            Some("subscription") => Self::Subscription,
            _ => Self::Query,
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method())
    }
}

/// Structured error codes carried in error replies.
///
/// Serialized by name (`"NOT_FOUND"`); each code also has a JSON-RPC number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    BadRequest,
    InternalServerError,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotSupported,
    Timeout,
    Conflict,
    PreconditionFailed,
    PayloadTooLarge,
    UnprocessableContent,
    TooManyRequests,
    ClientClosedRequest,
}

impl ErrorCode {
    /// JSON-RPC 2.0 style numeric code.
    pub fn json_rpc_code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::BadRequest => -32600,
            Self::InternalServerError => -32603,
            Self::Unauthorized => -32001,
            Self::Forbidden => -32003,
            Self::NotFound => -32004,
            Self::MethodNotSupported => -32005,
            Self::Timeout => -32008,
            Self::Conflict => -32009,
            Self::PreconditionFailed => -32012,
            Self::PayloadTooLarge => -32013,
            Self::UnprocessableContent => -32022,
            Self::TooManyRequests => -32029,
            Self::ClientClosedRequest => -32099,
        }
    }

    /// Reverse of [`ErrorCode::json_rpc_code`]; unknown numbers map to
    /// `InternalServerError`.
    pub fn from_json_rpc_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::BadRequest,
            -32001 => Self::Unauthorized,
            -32003 => Self::Forbidden,
            -32004 => Self::NotFound,
            -32005 => Self::MethodNotSupported,
            -32008 => Self::Timeout,
            -32009 => Self::Conflict,
            -32012 => Self::PreconditionFailed,
            -32013 => Self::PayloadTooLarge,
            -32022 => Self::UnprocessableContent,
            -32029 => Self::TooManyRequests,
            -32099 => Self::ClientClosedRequest,
            _ => Self::InternalServerError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::BadRequest => "BAD_REQUEST",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            Self::Timeout => "TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnprocessableContent => "UNPROCESSABLE_CONTENT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::ClientClosedRequest => "CLIENT_CLOSED_REQUEST",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
