// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC Client (call multiplexer).
//!
//! The RpcClient publishes calls on the request topic and matches replies
//! arriving on its response topic back to the waiting callers.
//!
//! One listener is attached to the connection for the lifetime of the
//! client; it demultiplexes replies across all pending calls by
//! correlation token. Every call settles exactly once, with whichever of
//! reply, timeout or cancellation wins the race for its registry entry.

use crate::adapter::{self, ProtocolAdapter};
use crate::codec::{Codec, JsonCodec};
use crate::config::ClientConfig;
use crate::envelope::{CallEnvelope, ErrorShape, ReplyEnvelope, ReplyOutcome};
use crate::error::{RpcError, RpcResult};
use crate::registry::{CorrelationRegistry, Waiter};
use crate::transport::{Capabilities, Message, Transport};
use crate::types::{CallId, CallKind, CorrelationToken};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
    /// Settles the call as cancelled when triggered.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// RPC Client for calling procedures over a shared connection.
///
/// # Example
///
/// ```rust,no_run
/// use busrpc::{ClientConfig, MemoryBroker, ProtocolLevel, RpcClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = MemoryBroker::new();
/// let conn = broker.connect(ProtocolLevel::V5);
/// let client = RpcClient::new(conn, ClientConfig::new("rpc/request"))?;
///
/// let greeting: serde_json::Value = client.query("greet", &"world").await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    inner: Arc<ClientInner>,

    /// Reply listener task (one per client, not per call)
    listener: JoinHandle<()>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    adapter: Arc<dyn ProtocolAdapter>,
    codec: Arc<dyn Codec>,
    request_topic: String,
    reply_address: String,
    default_timeout: Duration,

    /// Pending calls: correlation token -> reply channel
    pending: CorrelationRegistry<ReplyEnvelope>,

    /// Call id counter
    next_id: AtomicI64,

    shutdown: AtomicBool,
}

/// Removes a call's registry entry however the call future ends,
/// including when the caller drops it mid-flight.
struct PendingGuard<'a> {
    registry: &'a CorrelationRegistry<ReplyEnvelope>,
    token: &'a CorrelationToken,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.token);
    }
}

impl RpcClient {
    /// Create a client with the identity codec.
    pub fn new<T: Transport>(transport: Arc<T>, config: ClientConfig) -> RpcResult<Self> {
        Self::with_codec(transport, config, Arc::new(JsonCodec))
    }

    /// Create a client with a custom payload codec.
    ///
    /// Subscribes to the reply address and attaches the reply listener.
    /// Must be called from within a tokio runtime.
    pub fn with_codec<T: Transport>(
        transport: Arc<T>,
        config: ClientConfig,
        codec: Arc<dyn Codec>,
    ) -> RpcResult<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = transport;
        let capabilities = Capabilities::from_level(transport.protocol_level());
        let adapter = adapter::select(capabilities);
        let reply_address = config.reply_address();

        transport.subscribe(&reply_address)?;
        let messages = transport.messages();

        log::debug!(
            "RpcClient: requests on '{}', replies on '{}' ({} routing)",
            config.request_topic,
            reply_address,
            adapter.name()
        );

        let inner = Arc::new(ClientInner {
            transport,
            adapter,
            codec,
            request_topic: config.request_topic.clone(),
            reply_address,
            default_timeout: config.default_timeout(),
            pending: CorrelationRegistry::new(),
            next_id: AtomicI64::new(1),
            shutdown: AtomicBool::new(false),
        });

        let listener = tokio::spawn(reply_listener(inner.clone(), messages));

        Ok(Self { inner, listener })
    }

    /// Issue a call and wait for it to settle.
    ///
    /// `input` is passed through the codec before it is sent. Exactly one
    /// outcome is returned: the decoded result, the remote error, a
    /// timeout or a cancellation.
    pub async fn call(
        &self,
        path: &str,
        kind: CallKind,
        input: Option<Value>,
        options: CallOptions,
    ) -> RpcResult<Value> {
        let inner = &self.inner;

        if kind == CallKind::Subscription {
            return Err(RpcError::UnsupportedKind(kind));
        }
        if inner.shutdown.load(Ordering::Relaxed) {
            return Err(RpcError::Shutdown);
        }
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(RpcError::Cancelled);
        }

        let input = input.map(|v| inner.codec.serialize(v)).transpose()?;
        let id = CallId::Number(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let envelope = CallEnvelope::new(id.clone(), kind, path, input).to_value()?;

        let token = CorrelationToken::generate();
        let waiter = inner.pending.register(token.clone());
        let _guard = PendingGuard {
            registry: &inner.pending,
            token: &token,
        };

        let outgoing = inner
            .adapter
            .encode_outgoing(envelope, &token, Some(&inner.reply_address))?;
        inner.transport.publish(Message {
            topic: inner.request_topic.clone(),
            payload: outgoing.payload,
            metadata: outgoing.metadata,
        })?;
        log::debug!("call {} '{}' published (token {})", id, path, token);

        let timeout = options.timeout.unwrap_or(inner.default_timeout);
        let reply = self
            .wait(waiter, &token, timeout, options.cancel.as_ref())
            .await?;

        if reply.id != id {
            return Err(RpcError::Protocol(format!(
                "reply id {} does not match call id {}",
                reply.id, id
            )));
        }

        match reply.outcome {
            ReplyOutcome::Data(data) => Ok(inner.codec.deserialize(data)?),
            ReplyOutcome::Error(error) => {
                let error = inner.codec.deserialize(error)?;
                Err(RpcError::Remote(ErrorShape::from_value(&error)))
            }
        }
    }

    /// Race the reply against timeout and cancellation.
    ///
    /// Timeout and cancellation only win if they manage to remove the
    /// registry entry; if the listener resolved it first, the reply stands.
    async fn wait(
        &self,
        mut waiter: Waiter<ReplyEnvelope>,
        token: &CorrelationToken,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> RpcResult<ReplyEnvelope> {
        let cancelled = async {
            match cancel {
                Some(c) => c.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let lost = tokio::select! {
            reply = &mut waiter => {
                return reply.map_err(|_| RpcError::Shutdown);
            }
            _ = tokio::time::sleep(timeout) => {
                RpcError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            }
            _ = cancelled => RpcError::Cancelled,
        };

        if self.inner.pending.remove(token) {
            log::debug!("call with token {} settled locally: {}", token, lost);
            return Err(lost);
        }

        // The listener won the race for the entry
        waiter.try_recv().map_err(|_| lost)
    }

    /// Issue a query with a typed input and output.
    pub async fn query<I, O>(&self, path: &str, input: &I) -> RpcResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.typed(path, CallKind::Query, input, CallOptions::default())
            .await
    }

    /// Issue a mutation with a typed input and output.
    pub async fn mutate<I, O>(&self, path: &str, input: &I) -> RpcResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.typed(path, CallKind::Mutation, input, CallOptions::default())
            .await
    }

    /// Typed call with explicit options.
    pub async fn typed<I, O>(
        &self,
        path: &str,
        kind: CallKind,
        input: &I,
        options: CallOptions,
    ) -> RpcResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input)?;
        let input = (!input.is_null()).then_some(input);
        let output = self.call(path, kind, input, options).await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn request_topic(&self) -> &str {
        &self.inner.request_topic
    }

    pub fn reply_address(&self) -> &str {
        &self.inner.reply_address
    }

    /// Stop the reply listener. Pending and later calls settle with
    /// [`RpcError::Shutdown`].
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        self.listener.abort();
        self.inner.pending.clear();
        if let Err(e) = self.inner.transport.unsubscribe(&self.inner.reply_address) {
            log::debug!("RpcClient: unsubscribe failed: {}", e);
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Demultiplex replies from the connection's inbound stream.
async fn reply_listener(inner: Arc<ClientInner>, mut messages: tokio::sync::broadcast::Receiver<Message>) {
    loop {
        match messages.recv().await {
            Ok(message) => handle_reply(&inner, message),
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("RpcClient: reply listener lagged, {} messages lost", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    log::debug!("RpcClient: reply listener stopped");
}

fn handle_reply(inner: &ClientInner, message: Message) {
    // The connection may be shared with other components
    if message.topic != inner.reply_address {
        return;
    }

    let Some(routed) = inner
        .adapter
        .decode_incoming(&message.payload, &message.metadata)
    else {
        log::debug!("RpcClient: ignoring unroutable message on '{}'", message.topic);
        return;
    };

    let Some(reply) = ReplyEnvelope::from_value(routed.body) else {
        log::debug!("RpcClient: ignoring malformed reply (token {})", routed.token);
        return;
    };

    if !inner.pending.resolve(&routed.token, reply) {
        log::debug!("RpcClient: reply for unknown or settled token {}", routed.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryBroker, MemoryConnection, Metadata, ProtocolLevel};
    use serde_json::json;

    async fn setup(level: ProtocolLevel) -> (Arc<MemoryConnection>, RpcClient) {
        let broker = MemoryBroker::new();
        let conn = broker.connect(level);
        let client = RpcClient::new(conn.clone(), ClientConfig::new("svc/request")).unwrap();
        conn.subscribe("svc/request").unwrap();
        (conn, client)
    }

    /// Next call published on the request topic: (token, call, reply address).
    async fn next_call(
        rx: &mut tokio::sync::broadcast::Receiver<Message>,
        adapter: &dyn ProtocolAdapter,
    ) -> (CorrelationToken, CallEnvelope, String) {
        loop {
            let msg = rx.recv().await.unwrap();
            if msg.topic != "svc/request" {
                continue;
            }
            let routed = adapter.decode_incoming(&msg.payload, &msg.metadata).unwrap();
            let call = CallEnvelope::from_value(routed.body).unwrap();
            return (routed.token, call, routed.reply_address.unwrap());
        }
    }

    fn reply(conn: &MemoryConnection, adapter: &dyn ProtocolAdapter, token: &CorrelationToken, envelope: Value) {
        let out = adapter.encode_outgoing(envelope, token, None).unwrap();
        conn.publish(Message {
            topic: "svc/request/response".into(),
            payload: out.payload,
            metadata: out.metadata,
        })
        .unwrap();
    }

    #[tokio::test]
    async fn subscription_rejected_without_publishing() {
        let (conn, client) = setup(ProtocolLevel::V5).await;
        let mut rx = conn.messages();
        let err = client
            .call("feed", CallKind::Subscription, None, CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedKind(CallKind::Subscription)));
        assert!(rx.try_recv().is_err());
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn reply_resolves_call() {
        let (conn, client) = setup(ProtocolLevel::V5).await;
        let mut rx = conn.messages();
        let adapter = adapter::select(Capabilities::from_level(ProtocolLevel::V5));

        let call = client.call("echo", CallKind::Query, Some(json!("hi")), CallOptions::default());
        let server = async {
            let (token, call, reply_to) = next_call(&mut rx, adapter.as_ref()).await;
            assert_eq!(reply_to, "svc/request/response");
            assert_eq!(call.path(), "echo");
            let body = ReplyEnvelope::success(call.id, json!("hi back")).to_value().unwrap();
            reply(&conn, adapter.as_ref(), &token, body);
        };

        let (result, ()) = tokio::join!(call, server);
        assert_eq!(result.unwrap(), json!("hi back"));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn timeout_settles_and_late_reply_is_discarded() {
        let (conn, client) = setup(ProtocolLevel::V5).await;
        let mut rx = conn.messages();
        let adapter = adapter::select(Capabilities::from_level(ProtocolLevel::V5));

        let err = client
            .call(
                "slow",
                CallKind::Query,
                None,
                CallOptions::default().timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.pending_calls(), 0);

        let (token, call, _) = next_call(&mut rx, adapter.as_ref()).await;
        let body = ReplyEnvelope::success(call.id, json!(1)).to_value().unwrap();
        reply(&conn, adapter.as_ref(), &token, body);
        tokio::task::yield_now().await;
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_settles_call() {
        let (_conn, client) = setup(ProtocolLevel::V5).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let call = client.call(
            "slow",
            CallKind::Query,
            None,
            CallOptions::default().cancel(cancel),
        );
        let (result, ()) = tokio::join!(call, async move { trigger.cancel() });
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn already_cancelled_token_never_publishes() {
        let (conn, client) = setup(ProtocolLevel::V5).await;
        let mut rx = conn.messages();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .call("x", CallKind::Query, None, CallOptions::default().cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn foreign_traffic_is_ignored() {
        let (conn, client) = setup(ProtocolLevel::V311).await;
        let mut rx = conn.messages();
        let adapter = adapter::select(Capabilities::from_level(ProtocolLevel::V311));

        let call = client.call("echo", CallKind::Query, None, CallOptions::default());
        let server = async {
            let (token, call, _) = next_call(&mut rx, adapter.as_ref()).await;
            let junk: [&[u8]; 3] = [
                b"not json",
                br#"{"hello": 1}"#,
                br#"{"correlationId": "nobody", "trpc": {"id": 1, "result": {"data": 0}}}"#,
            ];
            for junk in junk {
                conn.publish(Message {
                    topic: "svc/request/response".into(),
                    payload: junk.to_vec(),
                    metadata: Metadata::default(),
                })
                .unwrap();
            }
            let body = ReplyEnvelope::success(call.id, json!("ok")).to_value().unwrap();
            reply(&conn, adapter.as_ref(), &token, body);
        };

        let (result, ()) = tokio::join!(call, server);
        assert_eq!(result.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn reply_without_id_is_dropped() {
        let (conn, client) = setup(ProtocolLevel::V5).await;
        let mut rx = conn.messages();
        let adapter = adapter::select(Capabilities::from_level(ProtocolLevel::V5));

        let call = client.call(
            "echo",
            CallKind::Query,
            None,
            CallOptions::default().timeout(Duration::from_millis(50)),
        );
        let server = async {
            let (token, _, _) = next_call(&mut rx, adapter.as_ref()).await;
            reply(&conn, adapter.as_ref(), &token, json!({"trpc": {"result": {"data": 1}}}));
        };

        let (result, ()) = tokio::join!(call, server);
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn shutdown_releases_pending_calls() {
        let (_conn, client) = setup(ProtocolLevel::V5).await;
        let call = client.call("slow", CallKind::Query, None, CallOptions::default());
        let (result, ()) = tokio::join!(call, async {
            tokio::task::yield_now().await;
            client.shutdown();
        });
        assert!(matches!(result.unwrap_err(), RpcError::Shutdown));
        assert!(matches!(
            client
                .call("x", CallKind::Query, None, CallOptions::default())
                .await
                .unwrap_err(),
            RpcError::Shutdown
        ));
    }
}
