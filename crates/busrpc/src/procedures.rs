// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Procedure resolution.
//!
//! The dispatcher hands every accepted call to a [`ProcedureResolver`].
//! [`ProcedureRouter`] is a table-based resolver mapping paths to typed
//! async handlers.

use crate::types::{CallKind, ErrorCode};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a procedure (or by resolution itself).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcedureError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProcedureError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }
}

/// One call as seen by a resolver.
#[derive(Debug)]
pub struct Invocation<C> {
    pub path: String,
    pub kind: CallKind,
    /// Codec-decoded input; `None` when the caller sent none.
    pub input: Option<Value>,
    pub context: C,
}

/// External procedure framework consumed by the dispatcher.
pub trait ProcedureResolver: Send + Sync + 'static {
    /// Per-call context built by the server's context factory.
    type Context: Send + 'static;

    /// Resolve `invocation.path` and run it.
    fn invoke(
        &self,
        invocation: Invocation<Self::Context>,
    ) -> BoxFuture<'static, Result<Value, ProcedureError>>;
}

type Handler<C> = Arc<dyn Fn(C, Value) -> BoxFuture<'static, Result<Value, ProcedureError>> + Send + Sync>;

struct Procedure<C> {
    kind: CallKind,
    handler: Handler<C>,
}

/// Path → handler table.
///
/// ```rust
/// use busrpc::procedures::{ProcedureError, ProcedureRouter};
///
/// let router = ProcedureRouter::<()>::new()
///     .query("greet", |_ctx, name: String| async move {
///         Ok::<_, ProcedureError>(format!("hello, {}!", name))
///     });
/// assert!(router.contains("greet"));
/// ```
pub struct ProcedureRouter<C = ()> {
    procedures: HashMap<String, Procedure<C>>,
}

impl<C: Send + 'static> Default for ProcedureRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> ProcedureRouter<C> {
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    /// Register a query (read-call) handler.
    pub fn query<I, O, F, Fut>(self, path: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ProcedureError>> + Send + 'static,
    {
        self.procedure(CallKind::Query, path, handler)
    }

    /// Register a mutation (write-call) handler.
    pub fn mutation<I, O, F, Fut>(self, path: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ProcedureError>> + Send + 'static,
    {
        self.procedure(CallKind::Mutation, path, handler)
    }

    fn procedure<I, O, F, Fut>(mut self, kind: CallKind, path: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(C, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ProcedureError>> + Send + 'static,
    {
        let handler: Handler<C> = Arc::new(move |ctx: C, raw: Value| {
            let input = match serde_json::from_value::<I>(raw) {
                Ok(input) => input,
                Err(e) => {
                    let err = ProcedureError::bad_request(format!("Invalid input: {}", e));
                    return async move { Err(err) }.boxed();
                }
            };
            let fut = handler(ctx, input);
            async move {
                let output = fut.await?;
                serde_json::to_value(output)
                    .map_err(|e| ProcedureError::internal(format!("Invalid output: {}", e)))
            }
            .boxed()
        });

        if self
            .procedures
            .insert(path.to_string(), Procedure { kind, handler })
            .is_some()
        {
            log::warn!("procedure '{}' registered twice, keeping the last one", path);
        }
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.procedures.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }
}

impl<C: Send + 'static> ProcedureResolver for ProcedureRouter<C> {
    type Context = C;

    fn invoke(&self, invocation: Invocation<C>) -> BoxFuture<'static, Result<Value, ProcedureError>> {
        let Invocation {
            path,
            kind,
            input,
            context,
        } = invocation;

        match self.procedures.get(&path) {
            Some(procedure) if procedure.kind == kind => {
                (procedure.handler)(context, input.unwrap_or(Value::Null))
            }
            _ => {
                let err = ProcedureError::not_found(format!(
                    "No \"{}\"-procedure on path \"{}\"",
                    kind, path
                ));
                async move { Err(err) }.boxed()
            }
        }
    }
}
