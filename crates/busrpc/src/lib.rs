// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # busrpc - Request/Reply RPC over publish/subscribe
//!
//! Correlated procedure calls carried over a topic-based message bus. A
//! caller publishes a call on a request topic and waits for exactly one
//! reply on its own response topic; a server dispatches each call to a
//! procedure and publishes the reply back, tagged with the caller's
//! correlation token.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use busrpc::{
//!     ClientConfig, MemoryBroker, ProcedureError, ProcedureRouter, ProtocolLevel, RpcClient,
//!     RpcServer, ServerConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MemoryBroker::new();
//!
//! let router = ProcedureRouter::<()>::new().query("greet", |_ctx, name: String| async move {
//!     Ok::<_, ProcedureError>(format!("hello, {}!", name))
//! });
//! let _server = RpcServer::builder(
//!     broker.connect(ProtocolLevel::V5),
//!     ServerConfig::new("rpc/request"),
//!     router,
//! )
//! .start()?;
//!
//! let client = RpcClient::new(broker.connect(ProtocolLevel::V5), ClientConfig::new("rpc/request"))?;
//! let greeting: String = client.query("greet", "world").await?;
//! assert_eq!(greeting, "hello, world!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   RpcClient (call multiplexer)      |   RpcServer (dispatcher)      |
//! |   CorrelationRegistry + timeouts    |   ProcedureResolver + codec   |
//! +---------------------------------------------------------------------+
//! |        ProtocolAdapter: structured routing | inline fallback        |
//! +---------------------------------------------------------------------+
//! |                 Transport (topics, metadata, fan-out)               |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Routing
//!
//! On v5 connections the correlation token and reply address travel as
//! message properties. On v3.1.1 connections they are folded into the JSON
//! body as `correlationId` / `responseTopic`. The choice is made once per
//! connection; see [`adapter`].

/// Protocol adapters (where correlation data travels).
pub mod adapter;
/// Call multiplexer (client side).
pub mod client;
/// Pluggable value encoding.
pub mod codec;
/// Client, server and file configuration.
pub mod config;
/// JSON envelopes for calls, replies and errors.
pub mod envelope;
/// Error types.
pub mod error;
/// Procedure resolution.
pub mod procedures;
/// Pending-call registry.
pub mod registry;
/// Dispatcher (server side).
pub mod server;
/// Transport abstraction and in-process broker.
pub mod transport;
/// Core identifiers and enums.
pub mod types;

pub use client::{CallOptions, RpcClient};
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{BusConfig, ClientConfig, ConfigError, ServerConfig};
pub use envelope::{CallEnvelope, ErrorShape, ReplyEnvelope, ReplyOutcome};
pub use error::{RpcError, RpcResult};
pub use procedures::{Invocation, ProcedureError, ProcedureResolver, ProcedureRouter};
pub use registry::CorrelationRegistry;
pub use server::{CallInfo, ErrorEvent, RpcServer, ServerBuilder};
pub use transport::{
    MemoryBroker, MemoryConnection, Message, Metadata, ProtocolLevel, Transport, TransportError,
};
pub use types::{CallId, CallKind, CorrelationToken, ErrorCode};

// Cancellation handle accepted by CallOptions
pub use tokio_util::sync::CancellationToken;
