//! Authentication middleware.
//!
//! Resolves the caller of a message to a user. A token sent in the message
//! (`data.token`) takes priority over the token captured from the connection
//! query string, so a client can re-authenticate on an open socket.
//! Once a connection is authenticated, later messages pass without
//! verification.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::pipeline::{Flow, Middleware};
use crate::auth::{Claims, TokenVerifier};
use crate::context::DispatchContext;
use crate::error::RealtimeError;

/// Payload field carrying an explicit token.
pub const TOKEN_FIELD: &str = "token";

/// Middleware that requires an authenticated connection.
#[derive(Clone)]
pub struct AuthMiddleware {
    verifier: Arc<dyn TokenVerifier>,
}

impl std::fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddleware").finish_non_exhaustive()
    }
}

impl AuthMiddleware {
    /// Creates an authentication middleware backed by `verifier`.
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    async fn authenticate(&self, ctx: &DispatchContext) -> Result<Claims, RealtimeError> {
        let token = ctx
            .str_field(TOKEN_FIELD)
            .or_else(|| ctx.connection().query_token())
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(RealtimeError::auth_required)?;

        self.verifier.verify(token).await
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(&self, ctx: &mut DispatchContext) -> Flow {
        // An explicit token always re-verifies
        if ctx.user().is_some() && ctx.str_field(TOKEN_FIELD).is_none() {
            return Flow::Continue;
        }

        match self.authenticate(ctx).await {
            Ok(claims) => {
                debug!(
                    conn_id = %ctx.connection_id(),
                    user_id = %claims.sub,
                    role = ?claims.role,
                    "Connection authenticated"
                );
                ctx.set_user(claims);
                Flow::Continue
            }
            Err(e) => {
                // A rejected re-auth drops the identity the connection held
                let dropped = ctx.clear_user();
                warn!(
                    conn_id = %ctx.connection_id(),
                    event = ctx.event(),
                    code = e.error_code(),
                    previous_user = ?dropped.map(|claims| claims.sub),
                    "Authentication failed"
                );
                Flow::Abort(e)
            }
        }
    }

    fn name(&self) -> &str {
        "auth"
    }
}
