//! Event routing.
//!
//! Maps event names to a middleware chain plus one handler and turns the
//! result of the chain into at most one response frame per message: a
//! success frame for a reply, an error frame for a failure, and nothing when
//! the handler completes without a reply.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::DispatchContext;
use crate::error::RealtimeError;
use crate::message::OutboundMessage;
use crate::middleware::{DispatchStart, Handler, Middleware, execute};

/// A registered event route.
pub struct Route {
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field(
                "middlewares",
                &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Result of dispatching one message.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The handler returned a reply and a success frame was sent
    Replied,
    /// The handler completed without a reply
    Completed,
    /// An error frame was sent
    Failed(RealtimeError),
}

impl DispatchOutcome {
    /// Returns true unless the dispatch failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Event name → route table with global middleware.
#[derive(Default)]
pub struct EventRouter {
    routes: RwLock<HashMap<String, Arc<Route>>>,
    global: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("routes", &self.events())
            .field("global_middlewares", &self.global.read().len())
            .finish()
    }
}

impl EventRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. A later registration for the same event replaces it.
    pub fn on(
        &self,
        event: impl Into<String>,
        middlewares: Vec<Arc<dyn Middleware>>,
        handler: Arc<dyn Handler>,
    ) {
        let event = event.into();
        let route = Arc::new(Route {
            middlewares,
            handler,
        });

        if self.routes.write().insert(event.clone(), route).is_some() {
            warn!(event = %event, "Route replaced by a later registration");
        } else {
            debug!(event = %event, "Route registered");
        }
    }

    /// Appends a middleware that runs before every route's own middleware.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "Global middleware registered");
        self.global.write().push(middleware);
    }

    /// Returns true if a route is registered for the event.
    #[must_use]
    pub fn has_route(&self, event: &str) -> bool {
        self.routes.read().contains_key(event)
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Returns the registered event names, sorted.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.routes.read().keys().cloned().collect();
        events.sort();
        events
    }

    /// Dispatches one message and sends its response frame.
    ///
    /// Global middleware runs first, then the route's middleware, then the
    /// handler. Unknown events are answered with `route_not_found` without
    /// running anything.
    pub async fn dispatch(&self, mut ctx: DispatchContext) -> DispatchOutcome {
        let route = self.routes.read().get(ctx.event()).cloned();
        let Some(route) = route else {
            debug!(conn_id = %ctx.connection_id(), event = ctx.event(), "No route for event");
            let err = RealtimeError::RouteNotFound(ctx.event().to_string());
            return Self::respond_error(&ctx, err).await;
        };

        let chain: Vec<Arc<dyn Middleware>> = self
            .global
            .read()
            .iter()
            .chain(route.middlewares.iter())
            .cloned()
            .collect();

        let result = execute(&chain, route.handler.as_ref(), &mut ctx).await;
        let elapsed_ms = ctx
            .extensions()
            .get::<DispatchStart>()
            .map(|start| start.0.elapsed().as_millis());

        match result {
            Ok(Some(reply)) => {
                let frame = OutboundMessage::success(ctx.event(), reply.data, reply.message);
                if let Err(e) = ctx.connection().send_message(&frame).await {
                    debug!(conn_id = %ctx.connection_id(), error = %e, "Reply dropped");
                }
                debug!(conn_id = %ctx.connection_id(), event = ctx.event(), ?elapsed_ms, "Event handled");
                DispatchOutcome::Replied
            }
            Ok(None) => {
                debug!(conn_id = %ctx.connection_id(), event = ctx.event(), ?elapsed_ms, "Event handled");
                DispatchOutcome::Completed
            }
            Err(err) => Self::respond_error(&ctx, err).await,
        }
    }

    async fn respond_error(ctx: &DispatchContext, err: RealtimeError) -> DispatchOutcome {
        debug!(
            conn_id = %ctx.connection_id(),
            event = ctx.event(),
            code = err.error_code(),
            "Event failed"
        );
        let frame = OutboundMessage::error(ctx.event(), &err);
        if let Err(e) = ctx.connection().send_message(&frame).await {
            debug!(conn_id = %ctx.connection_id(), error = %e, "Error frame dropped");
        }
        DispatchOutcome::Failed(err)
    }
}
