// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC Server (dispatcher) implementation.
//!
//! The RpcServer receives calls on its request topic, hands them to a
//! [`ProcedureResolver`], and publishes exactly one reply per routable
//! call to the reply address the call carried, tagged with the call's own
//! correlation token.
//!
//! Nothing that happens while handling one call can take the server down:
//! malformed traffic is dropped, procedure failures (including panics)
//! become error replies, and publish failures are logged.

use crate::adapter::{self, ProtocolAdapter};
use crate::codec::{Codec, JsonCodec};
use crate::config::ServerConfig;
use crate::envelope::{CallEnvelope, ErrorShape, ReplyEnvelope, ReplyOutcome};
use crate::error::RpcResult;
use crate::procedures::{Invocation, ProcedureError, ProcedureResolver};
use crate::transport::{Capabilities, Message, Transport};
use crate::types::{CallId, CallKind, CorrelationToken, ErrorCode};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Routing facts about a call, handed to the context factory.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo<'a> {
    pub id: &'a CallId,
    pub path: &'a str,
    pub kind: CallKind,
    pub token: &'a CorrelationToken,
    pub reply_address: &'a str,
}

/// Builds a fresh context for every call.
pub type ContextFactory<C> =
    Arc<dyn Fn(&CallInfo<'_>) -> Result<C, ProcedureError> + Send + Sync>;

/// A failed call, as reported to the error observer.
#[derive(Debug)]
pub struct ErrorEvent<'a> {
    pub id: &'a CallId,
    pub path: &'a str,
    pub kind: CallKind,
    pub input: Option<&'a Value>,
    pub error: &'a ProcedureError,
}

/// Notified of every error reply before it is published.
pub type ErrorObserver = Arc<dyn Fn(&ErrorEvent<'_>) + Send + Sync>;

/// Builder for [`RpcServer`].
pub struct ServerBuilder<R: ProcedureResolver> {
    transport: Arc<dyn Transport>,
    config: ServerConfig,
    resolver: R,
    codec: Arc<dyn Codec>,
    context_factory: ContextFactory<R::Context>,
    on_error: Option<ErrorObserver>,
}

impl<R: ProcedureResolver> ServerBuilder<R> {
    /// Builder with an explicit context factory.
    pub fn new<T, F>(transport: Arc<T>, config: ServerConfig, resolver: R, context_factory: F) -> Self
    where
        T: Transport,
        F: Fn(&CallInfo<'_>) -> Result<R::Context, ProcedureError> + Send + Sync + 'static,
    {
        Self {
            transport,
            config,
            resolver,
            codec: Arc::new(JsonCodec),
            context_factory: Arc::new(context_factory),
            on_error: None,
        }
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn context_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&CallInfo<'_>) -> Result<R::Context, ProcedureError> + Send + Sync + 'static,
    {
        self.context_factory = Arc::new(factory);
        self
    }

    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ErrorEvent<'_>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(observer));
        self
    }

    /// Subscribe to the request topic and start serving.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> RpcResult<RpcServer> {
        self.config.validate()?;

        let capabilities = Capabilities::from_level(self.transport.protocol_level());
        let adapter = adapter::select(capabilities);
        let request_topic = self.config.request_topic.clone();

        self.transport.subscribe(&request_topic)?;
        let messages = self.transport.messages();

        log::info!("RpcServer started");
        log::info!("  Request topic: {}", request_topic);
        log::info!("  Routing: {}", adapter.name());

        let requests_processed = Arc::new(AtomicU64::new(0));
        let inner = Arc::new(ServerInner {
            transport: self.transport.clone(),
            adapter,
            codec: self.codec,
            resolver: self.resolver,
            context_factory: self.context_factory,
            on_error: self.on_error,
            request_topic: request_topic.clone(),
            verbose: self.config.verbose,
            requests_processed: requests_processed.clone(),
        });

        let task = tokio::spawn(serve(inner, messages));

        Ok(RpcServer {
            transport: self.transport,
            request_topic,
            running: AtomicBool::new(true),
            requests_processed,
            task,
        })
    }
}

/// RPC Server bound to one request topic.
///
/// # Example
///
/// ```rust,no_run
/// use busrpc::{MemoryBroker, ProcedureError, ProcedureRouter, ProtocolLevel, RpcServer, ServerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = MemoryBroker::new();
/// let conn = broker.connect(ProtocolLevel::V5);
///
/// let router = ProcedureRouter::<()>::new()
///     .query("echo", |_ctx, v: serde_json::Value| async move { Ok::<_, ProcedureError>(v) });
///
/// let server = RpcServer::builder(conn, ServerConfig::new("rpc/request"), router).start()?;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    transport: Arc<dyn Transport>,
    request_topic: String,
    running: AtomicBool,
    requests_processed: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl RpcServer {
    /// Builder using `Default` for the per-call context.
    pub fn builder<T, R>(transport: Arc<T>, config: ServerConfig, resolver: R) -> ServerBuilder<R>
    where
        T: Transport,
        R: ProcedureResolver,
        R::Context: Default,
    {
        ServerBuilder::new(transport, config, resolver, |_: &CallInfo<'_>| {
            Ok(R::Context::default())
        })
    }

    /// Stop receiving calls. Calls already being processed still reply.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        log::info!("RpcServer '{}' shutting down...", self.request_topic);
        self.task.abort();
        if let Err(e) = self.transport.unsubscribe(&self.request_topic) {
            log::debug!("RpcServer: unsubscribe failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn request_topic(&self) -> &str {
        &self.request_topic
    }

    /// Number of replies published so far.
    pub fn requests_processed(&self) -> u64 {
        self.requests_processed.load(Ordering::Relaxed)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ServerInner<R: ProcedureResolver> {
    transport: Arc<dyn Transport>,
    adapter: Arc<dyn ProtocolAdapter>,
    codec: Arc<dyn Codec>,
    resolver: R,
    context_factory: ContextFactory<R::Context>,
    on_error: Option<ErrorObserver>,
    request_topic: String,
    verbose: bool,
    requests_processed: Arc<AtomicU64>,
}

/// Receive loop: every call on the request topic gets its own task.
async fn serve<R: ProcedureResolver>(inner: Arc<ServerInner<R>>, mut messages: broadcast::Receiver<Message>) {
    loop {
        match messages.recv().await {
            Ok(message) => {
                // The connection may be shared with other components
                if message.topic != inner.request_topic {
                    continue;
                }
                let inner = inner.clone();
                tokio::spawn(async move { inner.process(message).await });
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("RpcServer: request listener lagged, {} messages lost", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    log::info!("RpcServer '{}' stopped", inner.request_topic);
}

impl<R: ProcedureResolver> ServerInner<R> {
    /// Process a single inbound message
    async fn process(&self, message: Message) {
        if self.verbose {
            log::info!(
                "{} {}",
                message.topic,
                String::from_utf8_lossy(&message.payload)
            );
        }
        if message.payload.is_empty() {
            return;
        }

        let Some(routed) = self
            .adapter
            .decode_incoming(&message.payload, &message.metadata)
        else {
            log::debug!("RpcServer: ignoring message without correlation data");
            return;
        };
        let Some(reply_to) = routed.reply_address else {
            log::debug!("RpcServer: ignoring call {} without reply address", routed.token);
            return;
        };
        let Some(call) = CallEnvelope::from_value(routed.body) else {
            log::debug!("RpcServer: ignoring malformed call {}", routed.token);
            return;
        };

        log::debug!("Processing call {} '{}' ({})", call.id, call.path(), call.kind());
        let reply = self.handle_call(&call, &routed.token, &reply_to).await;

        let envelope = match reply.to_value() {
            Ok(envelope) => envelope,
            Err(e) => {
                log::error!("Failed to encode reply for call {}: {}", call.id, e);
                return;
            }
        };
        let outgoing = match self.adapter.encode_outgoing(envelope, &routed.token, None) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                log::error!("Failed to encode reply for call {}: {}", call.id, e);
                return;
            }
        };

        if let Err(e) = self.transport.publish(Message {
            topic: reply_to,
            payload: outgoing.payload,
            metadata: outgoing.metadata,
        }) {
            log::error!("Failed to send reply for call {}: {}", call.id, e);
            return;
        }

        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        log::debug!("Reply sent for call {}", call.id);
    }

    /// Build the reply for a call; never fails.
    async fn handle_call(
        &self,
        call: &CallEnvelope,
        token: &CorrelationToken,
        reply_to: &str,
    ) -> ReplyEnvelope {
        let error = match self.execute(call, token, reply_to).await {
            Ok(data) => return ReplyEnvelope::success(call.id.clone(), data),
            Err(error) => error,
        };

        log::warn!(
            "Call {} '{}' failed: {} - {}",
            call.id,
            call.path(),
            error.code,
            error.message
        );
        if let Some(observer) = &self.on_error {
            observer(&ErrorEvent {
                id: &call.id,
                path: call.path(),
                kind: call.kind(),
                input: call.params.input.as_ref(),
                error: &error,
            });
        }

        let path = (!call.path().is_empty()).then(|| call.path().to_string());
        let mut shape = ErrorShape::new(error.code, error.message, path);
        if self.verbose {
            shape = shape.with_input(call.params.input.clone());
        }
        let shape = shape.to_value();
        let shape = match self.codec.serialize(shape.clone()) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::warn!("Codec failed on error shape, sending it raw: {}", e);
                shape
            }
        };
        ReplyEnvelope {
            id: call.id.clone(),
            outcome: ReplyOutcome::Error(shape),
        }
    }

    async fn execute(
        &self,
        call: &CallEnvelope,
        token: &CorrelationToken,
        reply_to: &str,
    ) -> Result<Value, ProcedureError> {
        let kind = call.kind();
        if let Some(reason) = call.malformed() {
            return Err(ProcedureError::bad_request(format!("Malformed call: {}", reason)));
        }
        if call.path().is_empty() {
            return Err(ProcedureError::bad_request("No path provided"));
        }
        if kind == CallKind::Subscription {
            return Err(ProcedureError::new(
                ErrorCode::MethodNotSupported,
                "Subscriptions are not supported over the message bus",
            ));
        }

        let context = (self.context_factory)(&CallInfo {
            id: &call.id,
            path: call.path(),
            kind,
            token,
            reply_address: reply_to,
        })?;

        let input = call
            .params
            .input
            .clone()
            .map(|raw| self.codec.deserialize(raw))
            .transpose()
            .map_err(|e| ProcedureError::new(ErrorCode::ParseError, e.to_string()))?;

        let invocation = Invocation {
            path: call.path().to_string(),
            kind,
            input,
            context,
        };
        let output = match AssertUnwindSafe(self.resolver.invoke(invocation))
            .catch_unwind()
            .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ProcedureError::internal("Procedure panicked")),
        };

        self.codec
            .serialize(output)
            .map_err(|e| ProcedureError::internal(e.to_string()))
    }
}
