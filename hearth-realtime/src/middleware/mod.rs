//! Event middleware.
//!
//! This module provides:
//! - The middleware/handler traits and the chain executor
//! - Token authentication
//! - Role checks
//! - Dispatch tracing

mod auth;
pub mod pipeline;
mod role;
mod trace;

pub use auth::{AuthMiddleware, TOKEN_FIELD};
pub use pipeline::{Flow, Handler, Middleware, Reply, execute, handler_fn, middleware_fn};
pub use role::RequireRole;
pub use trace::{DispatchStart, RequestId, TraceMiddleware};
