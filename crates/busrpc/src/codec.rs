// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pluggable application payload codec.
//!
//! A codec transforms application values into their on-the-wire JSON form
//! and back. It runs on inputs, outputs and error payloads; the envelope
//! structure itself is never passed through it.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Value transform applied on both ends of a call.
///
/// Both sides of a connection must use matching codecs.
pub trait Codec: Send + Sync + 'static {
    fn serialize(&self, value: Value) -> Result<Value, CodecError>;
    fn deserialize(&self, value: Value) -> Result<Value, CodecError>;
}

/// Identity codec: values go on the wire as plain JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize(&self, value: Value) -> Result<Value, CodecError> {
        Ok(value)
    }

    fn deserialize(&self, value: Value) -> Result<Value, CodecError> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_codec_is_identity() {
        let value = json!({"a": [1, 2, 3]});
        assert_eq!(JsonCodec.serialize(value.clone()).unwrap(), value);
        assert_eq!(JsonCodec.deserialize(value.clone()).unwrap(), value);
    }
}
