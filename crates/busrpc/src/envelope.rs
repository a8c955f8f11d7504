// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Call and reply envelopes.
//!
//! Both envelopes wrap their content in a top-level `trpc` object:
//!
//! ```text
//! call:   { "trpc": { "id": 1, "method": "query", "params": { "path": "greet", "input": "world" } } }
//! ok:     { "trpc": { "id": 1, "result": { "type": "data", "data": { ... } } } }
//! error:  { "trpc": { "id": 1, "error": { "message": "...", "code": -32004, "data": { "code": "NOT_FOUND" } } } }
//! ```
//!
//! Parsing never fails loudly: anything that does not have the expected
//! shape yields `None`, since the bus may carry unrelated traffic. A call
//! that is recognizably a call (wrapper and id present) but has ill-typed
//! fields still parses, and reports the problem through
//! [`CallEnvelope::malformed`] so it can be answered.

use crate::types::{CallId, CallKind, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize)]
struct Wire<T> {
    trpc: T,
}

/// A call as it travels from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallEnvelope {
    pub id: CallId,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    pub params: CallParams,
    #[serde(skip)]
    malformed: Option<&'static str>,
}

/// Procedure address and (codec-encoded) input of a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallParams {
    /// Empty when the sender omitted it.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl CallEnvelope {
    pub fn new(id: CallId, kind: CallKind, path: impl Into<String>, input: Option<Value>) -> Self {
        Self {
            id,
            method: Some(kind.as_method().to_string()),
            params: CallParams {
                path: path.into(),
                input,
            },
            malformed: None,
        }
    }

    /// Call kind derived from the method string.
    pub fn kind(&self) -> CallKind {
        CallKind::from_method(self.method.as_deref())
    }

    pub fn path(&self) -> &str {
        &self.params.path
    }

    /// Why the call cannot be dispatched, if a field had the wrong type.
    pub fn malformed(&self) -> Option<&'static str> {
        self.malformed
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(Wire { trpc: self })
    }

    /// Extract a call from a decoded body.
    ///
    /// Returns `None` when the `trpc` wrapper is missing or the id is
    /// absent/null. A null `method`, `params`, `path` or `input` counts as
    /// absent; any other non-string method or path, or non-object params,
    /// marks the call [`malformed`](Self::malformed).
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut outer) = value else {
            return None;
        };
        let Value::Object(mut body) = outer.remove("trpc")? else {
            return None;
        };
        let id = serde_json::from_value::<CallId>(body.remove("id")?).ok()?;

        let mut malformed = None;
        let method = match body.remove("method") {
            None | Some(Value::Null) => None,
            Some(Value::String(method)) => Some(method),
            Some(_) => {
                malformed = Some("method must be a string");
                None
            }
        };

        let mut params = CallParams::default();
        match body.remove("params") {
            None | Some(Value::Null) => {}
            Some(Value::Object(mut map)) => {
                match map.remove("path") {
                    None | Some(Value::Null) => {}
                    Some(Value::String(path)) => params.path = path,
                    Some(_) => malformed = malformed.or(Some("path must be a string")),
                }
                params.input = map.remove("input").filter(|input| !input.is_null());
            }
            Some(_) => malformed = malformed.or(Some("params must be an object")),
        }

        Some(Self {
            id,
            method,
            params,
            malformed,
        })
    }
}

/// Success or failure carried by a reply.
///
/// The error payload is kept as raw JSON: the client runs it through its
/// codec before interpreting it as an [`ErrorShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Data(Value),
    Error(Value),
}

/// A reply as it travels from server to client.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub id: CallId,
    pub outcome: ReplyOutcome,
}

#[derive(Serialize, Deserialize)]
struct ReplyBody {
    id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<ResultBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct ResultBody {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl ReplyEnvelope {
    pub fn success(id: CallId, data: Value) -> Self {
        Self {
            id,
            outcome: ReplyOutcome::Data(data),
        }
    }

    pub fn error(id: CallId, shape: &ErrorShape) -> Self {
        Self {
            id,
            outcome: ReplyOutcome::Error(shape.to_value()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Error(_))
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let body = match &self.outcome {
            ReplyOutcome::Data(data) => ReplyBody {
                id: self.id.clone(),
                result: Some(ResultBody {
                    kind: Some("data".to_string()),
                    data: data.clone(),
                }),
                error: None,
            },
            ReplyOutcome::Error(error) => ReplyBody {
                id: self.id.clone(),
                result: None,
                error: Some(error.clone()),
            },
        };
        serde_json::to_value(Wire { trpc: body })
    }

    /// Extract a reply from a decoded body.
    ///
    /// Returns `None` when the id is absent/null, when neither `result` nor
    /// `error` is present, or when the result is not of type `data`.
    pub fn from_value(value: Value) -> Option<Self> {
        let body = serde_json::from_value::<Wire<ReplyBody>>(value).ok()?.trpc;
        let outcome = match (body.error, body.result) {
            (Some(error), _) => ReplyOutcome::Error(error),
            (None, Some(result)) => match result.kind.as_deref() {
                None | Some("data") => ReplyOutcome::Data(result.data),
                Some(_) => return None,
            },
            (None, None) => return None,
        };
        Some(Self {
            id: body.id,
            outcome,
        })
    }
}

/// Structured error sent back to a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub message: String,
    /// JSON-RPC number of `data.code`.
    pub code: i32,
    pub data: ErrorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Input of the failed call, attached for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl ErrorShape {
    pub fn new(code: ErrorCode, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            message: message.into(),
            code: code.json_rpc_code(),
            data: ErrorData {
                code,
                path,
                input: None,
            },
        }
    }

    /// Attach the failed call's input.
    pub fn with_input(mut self, input: Option<Value>) -> Self {
        self.data.input = input;
        self
    }

    pub fn error_code(&self) -> ErrorCode {
        self.data.code
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "message": self.message,
            "code": self.code,
            "data": self.data,
        })
    }

    /// Interpret an arbitrary error payload.
    ///
    /// Uses `data.code` when it names a known code, otherwise falls back to
    /// the numeric `code`. A payload with no usable message still yields a
    /// shape.
    pub fn from_value(value: &Value) -> Self {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let named = value
            .get("data")
            .and_then(|d| d.get("code"))
            .and_then(|c| serde_json::from_value::<ErrorCode>(c.clone()).ok());
        let code = named.unwrap_or_else(|| {
            value
                .get("code")
                .and_then(Value::as_i64)
                .map(ErrorCode::from_json_rpc_code)
                .unwrap_or(ErrorCode::InternalServerError)
        });
        let path = value
            .get("data")
            .and_then(|d| d.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let input = value
            .get("data")
            .and_then(|d| d.get("input"))
            .filter(|input| !input.is_null())
            .cloned();
        Self::new(code, message, path).with_input(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_envelope_wire_shape() {
        let call = CallEnvelope::new(CallId::Number(1), CallKind::Query, "greet", Some(json!("world")));
        assert_eq!(
            call.to_value().unwrap(),
            json!({"trpc": {"id": 1, "method": "query", "params": {"path": "greet", "input": "world"}}})
        );
    }

    #[test]
    fn call_envelope_without_input_omits_field() {
        let call = CallEnvelope::new(CallId::Number(2), CallKind::Mutation, "reset", None);
        let value = call.to_value().unwrap();
        assert!(value["trpc"]["params"].get("input").is_none());
    }

    #[test]
    fn call_envelope_rejects_missing_or_null_id() {
        assert!(CallEnvelope::from_value(json!({"trpc": {"params": {"path": "x"}}})).is_none());
        assert!(CallEnvelope::from_value(json!({"trpc": {"id": null, "params": {"path": "x"}}})).is_none());
        assert!(CallEnvelope::from_value(json!({"other": 1})).is_none());
        assert!(CallEnvelope::from_value(json!("plain string")).is_none());
    }

    #[test]
    fn call_envelope_tolerates_missing_path_and_method() {
        let call = CallEnvelope::from_value(json!({"trpc": {"id": "a"}})).unwrap();
        assert_eq!(call.path(), "");
        assert_eq!(call.kind(), CallKind::Query);
    }

    #[test]
    fn call_envelope_flags_ill_typed_fields() {
        let call = CallEnvelope::from_value(json!({"trpc": {"id": 1, "params": null}})).unwrap();
        assert_eq!(call.path(), "");
        assert!(call.malformed().is_none());

        let call = CallEnvelope::from_value(
            json!({"trpc": {"id": 1, "method": 5, "params": {"path": "greet"}}}),
        )
        .unwrap();
        assert_eq!(call.malformed(), Some("method must be a string"));
        assert_eq!(call.path(), "greet");

        let call = CallEnvelope::from_value(json!({"trpc": {"id": 1, "params": {"path": 7}}})).unwrap();
        assert_eq!(call.malformed(), Some("path must be a string"));

        let call = CallEnvelope::from_value(json!({"trpc": {"id": 1, "params": [1]}})).unwrap();
        assert_eq!(call.malformed(), Some("params must be an object"));
    }

    #[test]
    fn call_envelope_parses_back() {
        let call = CallEnvelope::new(CallId::from("x"), CallKind::Mutation, "countUp", Some(json!(2)));
        let parsed = CallEnvelope::from_value(call.to_value().unwrap()).unwrap();
        assert_eq!(parsed, call);
        assert_eq!(parsed.kind(), CallKind::Mutation);
    }

    #[test]
    fn reply_success_wire_shape() {
        let reply = ReplyEnvelope::success(CallId::Number(3), json!(42));
        assert_eq!(
            reply.to_value().unwrap(),
            json!({"trpc": {"id": 3, "result": {"type": "data", "data": 42}}})
        );
    }

    #[test]
    fn reply_error_parses_back() {
        let shape = ErrorShape::new(ErrorCode::NotFound, "nope", Some("missing".into()));
        let reply = ReplyEnvelope::error(CallId::Number(4), &shape);
        let parsed = ReplyEnvelope::from_value(reply.to_value().unwrap()).unwrap();
        assert!(parsed.is_error());
        match parsed.outcome {
            ReplyOutcome::Error(v) => assert_eq!(ErrorShape::from_value(&v), shape),
            ReplyOutcome::Data(_) => panic!("expected error outcome"),
        }
    }

    #[test]
    fn reply_without_outcome_or_with_foreign_type_is_dropped() {
        assert!(ReplyEnvelope::from_value(json!({"trpc": {"id": 1}})).is_none());
        assert!(ReplyEnvelope::from_value(json!({"trpc": {"id": 1, "result": {"type": "started"}}})).is_none());
        assert!(ReplyEnvelope::from_value(json!({"trpc": {"id": null, "result": {"data": 1}}})).is_none());
    }

    #[test]
    fn reply_result_without_type_is_data() {
        let reply = ReplyEnvelope::from_value(json!({"trpc": {"id": 1, "result": {"data": "x"}}})).unwrap();
        assert_eq!(reply.outcome, ReplyOutcome::Data(json!("x")));
    }

    #[test]
    fn error_shape_carries_input_when_attached() {
        let shape = ErrorShape::new(ErrorCode::BadRequest, "bad", Some("countUp".into()));
        assert!(shape.to_value()["data"].get("input").is_none());

        let shape = shape.with_input(Some(json!("x")));
        let value = shape.to_value();
        assert_eq!(value["data"]["input"], json!("x"));
        assert_eq!(ErrorShape::from_value(&value), shape);
    }

    #[test]
    fn error_shape_falls_back_to_numeric_code() {
        let shape = ErrorShape::from_value(&json!({"message": "m", "code": -32005}));
        assert_eq!(shape.error_code(), ErrorCode::MethodNotSupported);

        let shape = ErrorShape::from_value(&json!("garbage"));
        assert_eq!(shape.error_code(), ErrorCode::InternalServerError);
        assert_eq!(shape.message, "Unknown error");
    }
}
