//! Middleware chain execution.
//!
//! A middleware either lets the message through ([`Flow::Continue`]) or stops
//! it with an error ([`Flow::Abort`]). Returning a value instead of calling a
//! continuation means a middleware cannot resume the chain twice or forget to
//! resume it.

use async_trait::async_trait;
use axum::http::StatusCode;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::context::DispatchContext;
use crate::error::{RealtimeError, RealtimeResult};

/// Outcome of a single middleware step.
#[derive(Debug)]
pub enum Flow {
    /// Run the next middleware, or the handler after the last one
    Continue,
    /// Stop the chain and answer with this error
    Abort(RealtimeError),
}

impl From<RealtimeResult<()>> for Flow {
    fn from(result: RealtimeResult<()>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(e) => Self::Abort(e),
        }
    }
}

/// A step run before an event handler.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspects or modifies the context and decides whether dispatch continues.
    async fn handle(&self, ctx: &mut DispatchContext) -> Flow;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Payload of a success response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Response data
    pub data: Value,
    /// Optional human readable message
    pub message: Option<String>,
}

impl Reply {
    /// Creates a reply carrying `data`.
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            message: None,
        }
    }

    /// Adds a message to the reply.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Terminal processor of an event.
///
/// Returning `Ok(Some(reply))` answers the sender with a success frame.
/// Returning `Ok(None)` sends nothing; the handler may have emitted events
/// through the context instead.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles one message.
    async fn call(&self, ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>>;
}

struct MiddlewareFn<F>(F);

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut DispatchContext) -> BoxFuture<'a, Flow> + Send + Sync,
{
    async fn handle(&self, ctx: &mut DispatchContext) -> Flow {
        (self.0)(ctx).await
    }

    fn name(&self) -> &str {
        "middleware_fn"
    }
}

struct HandlerFn<F>(F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut DispatchContext) -> BoxFuture<'a, RealtimeResult<Option<Reply>>>
        + Send
        + Sync,
{
    async fn call(&self, ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as a middleware.
///
/// ```ignore
/// let mw = middleware_fn(|ctx| Box::pin(async move {
///     if ctx.data().get("amount").is_some() { Flow::Continue } else {
///         Flow::Abort(RealtimeError::middleware("validation_error", "amount is required"))
///     }
/// }));
/// ```
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: for<'a> Fn(&'a mut DispatchContext) -> BoxFuture<'a, Flow> + Send + Sync + 'static,
{
    Arc::new(MiddlewareFn(f))
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a mut DispatchContext) -> BoxFuture<'a, RealtimeResult<Option<Reply>>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Runs `middlewares` in order, then `handler`.
///
/// The chain stops at the first abort and the handler is skipped. The handler
/// runs exactly once when every middleware continues. Panics are caught and
/// reported as a `middleware_error` or `handler_error` with a 500 status.
///
/// # Errors
///
/// Returns the abort error of a middleware, the error of the handler, or the
/// error a caught panic was converted into.
pub async fn execute(
    middlewares: &[Arc<dyn Middleware>],
    handler: &dyn Handler,
    ctx: &mut DispatchContext,
) -> RealtimeResult<Option<Reply>> {
    for middleware in middlewares {
        match AssertUnwindSafe(middleware.handle(ctx)).catch_unwind().await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Abort(err)) => {
                debug!(
                    conn_id = %ctx.connection_id(),
                    event = ctx.event(),
                    middleware = middleware.name(),
                    code = err.error_code(),
                    "Middleware aborted dispatch"
                );
                return Err(err);
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(
                    conn_id = %ctx.connection_id(),
                    event = ctx.event(),
                    middleware = middleware.name(),
                    panic = %reason,
                    "Middleware panicked"
                );
                return Err(RealtimeError::Middleware {
                    code: "middleware_error".to_string(),
                    message: format!("Middleware failed: {reason}"),
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                });
            }
        }
    }

    match AssertUnwindSafe(handler.call(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(
                conn_id = %ctx.connection_id(),
                event = ctx.event(),
                panic = %reason,
                "Handler panicked"
            );
            Err(RealtimeError::Handler(reason))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
