// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlation registry: pending calls keyed by correlation token.
//!
//! Each entry is a single-shot completion handle. Whichever of
//! resolve/remove reaches an entry first takes it out of the map; every
//! later attempt on the same token is a no-op. The map removal is the only
//! synchronization point, so racing resolve/remove calls are linearizable.

use crate::types::CorrelationToken;
use dashmap::DashMap;
use tokio::sync::oneshot;

/// Receiving half handed to the caller on [`CorrelationRegistry::register`].
pub type Waiter<T> = oneshot::Receiver<T>;

/// Map of outstanding calls.
///
/// Invariant: `len()` equals the number of registered calls for which no
/// resolve, remove or clear has been observed yet.
pub struct CorrelationRegistry<T> {
    pending: DashMap<CorrelationToken, oneshot::Sender<T>>,
}

impl<T> Default for CorrelationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CorrelationRegistry<T> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Register a token and return its waiter.
    ///
    /// Re-registering a live token replaces the old entry; its waiter then
    /// observes a closed channel.
    pub fn register(&self, token: CorrelationToken) -> Waiter<T> {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(token.clone(), tx).is_some() {
            log::warn!("correlation token {} registered twice", token);
        }
        rx
    }

    /// Fire the waiter for `token` with `value`.
    ///
    /// Returns `true` if the entry was present and the value was handed to
    /// a live waiter; `false` if the token is unknown or already settled.
    pub fn resolve(&self, token: &CorrelationToken, value: T) -> bool {
        match self.pending.remove(token) {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Deregister without firing. Returns `true` if the entry was present.
    pub fn remove(&self, token: &CorrelationToken) -> bool {
        self.pending.remove(token).is_some()
    }

    pub fn contains(&self, token: &CorrelationToken) -> bool {
        self.pending.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every entry; all waiters observe a closed channel.
    pub fn clear(&self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn resolve_fires_exactly_once() {
        let registry = CorrelationRegistry::new();
        let token = CorrelationToken::generate();
        let mut waiter = registry.register(token.clone());
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve(&token, 1));
        assert!(!registry.resolve(&token, 2));
        assert!(registry.is_empty());
        assert_eq!(waiter.try_recv().unwrap(), 1);
    }

    #[test]
    fn remove_prevents_later_resolve() {
        let registry = CorrelationRegistry::new();
        let token = CorrelationToken::generate();
        let mut waiter = registry.register(token.clone());

        assert!(registry.remove(&token));
        assert!(!registry.remove(&token));
        assert!(!registry.resolve(&token, "late"));
        assert!(waiter.try_recv().is_err());
    }

    #[test]
    fn unknown_token_is_noop() {
        let registry: CorrelationRegistry<u32> = CorrelationRegistry::new();
        assert!(!registry.resolve(&CorrelationToken::generate(), 7));
        assert!(!registry.remove(&CorrelationToken::generate()));
    }

    #[test]
    fn resolve_to_dropped_waiter_reports_false() {
        let registry = CorrelationRegistry::new();
        let token = CorrelationToken::generate();
        drop(registry.register(token.clone()));
        assert!(!registry.resolve(&token, ()));
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_closes_all_waiters() {
        let registry: CorrelationRegistry<u8> = CorrelationRegistry::new();
        let mut a = registry.register(CorrelationToken::generate());
        let mut b = registry.register(CorrelationToken::generate());
        registry.clear();
        assert!(registry.is_empty());
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn racing_resolve_and_remove_has_one_winner() {
        for _ in 0..64 {
            let registry = Arc::new(CorrelationRegistry::new());
            let token = CorrelationToken::generate();
            let _waiter = registry.register(token.clone());
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let registry = registry.clone();
                    let token = token.clone();
                    let wins = wins.clone();
                    std::thread::spawn(move || {
                        let won = if i % 2 == 0 {
                            registry.resolve(&token, i)
                        } else {
                            registry.remove(&token)
                        };
                        if won {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert!(registry.is_empty());
        }
    }
}
