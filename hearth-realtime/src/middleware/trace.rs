//! Dispatch tracing middleware.

use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::pipeline::{Flow, Middleware};
use crate::context::DispatchContext;

/// Request ID assigned to one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generates a new request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the request ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time the dispatch of a message started.
#[derive(Debug, Clone, Copy)]
pub struct DispatchStart(pub Instant);

/// Middleware that tags each dispatch with a [`RequestId`] and logs it.
///
/// The ID and a [`DispatchStart`] are stored in the context extensions so
/// handlers can correlate their own logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceMiddleware;

impl TraceMiddleware {
    /// Creates a new trace middleware.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(&self, ctx: &mut DispatchContext) -> Flow {
        let request_id = RequestId::generate();
        debug!(
            conn_id = %ctx.connection_id(),
            event = ctx.event(),
            request_id = %request_id,
            user_id = ctx.connection().user_id().as_deref().unwrap_or("anonymous"),
            "Dispatching event"
        );

        ctx.extensions_mut().insert(request_id);
        ctx.extensions_mut().insert(DispatchStart(Instant::now()));
        Flow::Continue
    }

    fn name(&self) -> &str {
        "trace"
    }
}
