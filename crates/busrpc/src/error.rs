// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for busrpc operations.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::envelope::ErrorShape;
use crate::transport::TransportError;
use crate::types::{CallKind, ErrorCode};
use thiserror::Error;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Every way a call can settle other than with a value.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Call kind cannot be carried over single-shot request/reply
    #[error("{0} calls are not supported over the message bus")]
    UnsupportedKind(CallKind),

    /// No reply within the call's timeout
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Caller cancelled the call before it settled
    #[error("request cancelled")]
    Cancelled,

    /// Remote procedure returned a structured error
    #[error("{}", .0.message)]
    Remote(ErrorShape),

    /// Reply matched the token but not the call
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to encode or decode a value
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failed to (de)serialize an envelope
    #[error("envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// Transport rejected the publish/subscribe
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid client or server configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client was shut down
    #[error("RPC client shut down")]
    Shutdown,
}

impl RpcError {
    /// Structured code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedKind(_) => ErrorCode::MethodNotSupported,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::ClientClosedRequest,
            Self::Remote(shape) => shape.error_code(),
            Self::Codec(_) | Self::Envelope(_) => ErrorCode::ParseError,
            Self::Config(_) => ErrorCode::BadRequest,
            Self::Protocol(_) | Self::Transport(_) | Self::Shutdown => {
                ErrorCode::InternalServerError
            }
        }
    }

    /// The remote error shape, if the server produced this error.
    pub fn shape(&self) -> Option<&ErrorShape> {
        match self {
            Self::Remote(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_for_local_errors() {
        assert_eq!(RpcError::Timeout(5000).code(), ErrorCode::Timeout);
        assert_eq!(RpcError::Cancelled.code(), ErrorCode::ClientClosedRequest);
        assert_eq!(
            RpcError::UnsupportedKind(CallKind::Subscription).code(),
            ErrorCode::MethodNotSupported
        );
    }

    #[test]
    fn remote_error_passes_code_through() {
        let err = RpcError::Remote(ErrorShape::new(ErrorCode::Conflict, "taken", None));
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(err.to_string(), "taken");
        assert!(err.shape().is_some());
    }

    #[test]
    fn display_messages() {
        assert!(RpcError::Timeout(250).to_string().contains("250 ms"));
        assert!(RpcError::Cancelled.to_string().contains("cancelled"));
        assert!(RpcError::UnsupportedKind(CallKind::Subscription)
            .to_string()
            .contains("subscription"));
    }
}
