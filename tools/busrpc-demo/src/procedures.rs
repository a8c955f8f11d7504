// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Demo procedures served by `busrpc-demo`.

use busrpc::{ProcedureError, ProcedureRouter};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long `slow` sleeps when no duration is given.
pub const SLOW_DEFAULT_MS: u64 = 10_000;

/// State shared by every call; cloned into each call's context.
#[derive(Debug, Clone, Default)]
pub struct DemoState {
    counter: Arc<AtomicI64>,
}

impl DemoState {
    pub fn count(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
pub struct Greeting {
    pub greeting: String,
}

/// `greet` (query), `countUp` (mutation) and `slow` (query).
pub fn router() -> ProcedureRouter<DemoState> {
    ProcedureRouter::new()
        .query("greet", |_state: DemoState, name: String| async move {
            Ok::<_, ProcedureError>(Greeting {
                greeting: format!("hello, {}!", name),
            })
        })
        .mutation("countUp", |state: DemoState, by: i64| async move {
            Ok::<_, ProcedureError>(state.counter.fetch_add(by, Ordering::SeqCst) + by)
        })
        .query("slow", |_state: DemoState, ms: Option<u64>| async move {
            tokio::time::sleep(Duration::from_millis(ms.unwrap_or(SLOW_DEFAULT_MS))).await;
            Ok::<_, ProcedureError>("done")
        })
}
