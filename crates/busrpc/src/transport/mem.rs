// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker.
//!
//! Routes messages between [`MemoryConnection`]s inside one process. Each
//! connection is created with a protocol level; message properties survive
//! a hop only if both the publishing and the receiving connection speak v5.

use super::{
    has_wildcard, topic_matches, validate_filter, Message, Metadata, ProtocolLevel, Transport,
    TransportError,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

const INBOUND_CAPACITY: usize = 1024;

#[derive(Default)]
struct BrokerShared {
    connections: RwLock<Vec<Weak<ConnectionShared>>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
}

impl BrokerShared {
    fn route(&self, from: ProtocolLevel, message: Message) {
        let mut connections = self.connections.write();
        connections.retain(|c| c.strong_count() > 0);

        for conn in connections.iter().filter_map(Weak::upgrade) {
            if conn.closed.load(Ordering::Relaxed) || !conn.is_subscribed(&message.topic) {
                continue;
            }

            let mut delivered = message.clone();
            if from != ProtocolLevel::V5 || conn.level != ProtocolLevel::V5 {
                delivered.metadata = Metadata::default();
            }

            // No listener yet is not an error: the message is simply lost
            if conn.inbound.send(delivered).is_ok() {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

struct ConnectionShared {
    id: u64,
    level: ProtocolLevel,
    /// Filter -> number of holders on this connection
    subscriptions: RwLock<HashMap<String, usize>>,
    inbound: broadcast::Sender<Message>,
    closed: AtomicBool,
}

impl ConnectionShared {
    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .keys()
            .any(|filter| topic_matches(filter, topic))
    }
}

/// In-process message broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<BrokerShared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection at the given protocol level.
    pub fn connect(&self, level: ProtocolLevel) -> Arc<MemoryConnection> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let conn = Arc::new(ConnectionShared {
            id,
            level,
            subscriptions: RwLock::new(HashMap::new()),
            inbound,
            closed: AtomicBool::new(false),
        });
        self.shared.connections.write().push(Arc::downgrade(&conn));
        log::debug!("memory broker: connection {} opened ({:?})", id, level);

        Arc::new(MemoryConnection {
            shared: conn,
            broker: self.shared.clone(),
        })
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.shared
            .connections
            .read()
            .iter()
            .filter(|c| c.upgrade().is_some_and(|c| !c.closed.load(Ordering::Relaxed)))
            .count()
    }

    /// Total number of per-connection deliveries so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    shared: Arc<ConnectionShared>,
    broker: Arc<BrokerShared>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Close the connection. Later operations fail with
    /// [`TransportError::Closed`].
    pub fn disconnect(&self) {
        if !self.shared.closed.swap(true, Ordering::Relaxed) {
            self.shared.subscriptions.write().clear();
            log::debug!("memory broker: connection {} closed", self.shared.id);
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Transport for MemoryConnection {
    fn protocol_level(&self) -> ProtocolLevel {
        self.shared.level
    }

    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_filter(filter)?;
        *self
            .shared
            .subscriptions
            .write()
            .entry(filter.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut subs = self.shared.subscriptions.write();
        if let Some(holders) = subs.get_mut(filter) {
            *holders -= 1;
            if *holders == 0 {
                subs.remove(filter);
            }
        }
        Ok(())
    }

    fn publish(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        if message.topic.is_empty() || has_wildcard(&message.topic) {
            return Err(TransportError::InvalidTopic(message.topic));
        }
        self.broker.route(self.shared.level, message);
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<Message> {
        self.shared.inbound.subscribe()
    }

    fn listener_count(&self) -> usize {
        self.shared.inbound.receiver_count()
    }
}
