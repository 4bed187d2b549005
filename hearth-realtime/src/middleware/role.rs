//! Role-based access control.

use async_trait::async_trait;

use super::pipeline::{Flow, Middleware};
use crate::auth::UserRole;
use crate::context::DispatchContext;
use crate::error::RealtimeError;

/// Middleware that admits only users holding one of the allowed roles.
///
/// Must run after [`AuthMiddleware`](super::AuthMiddleware); an anonymous
/// connection is rejected with `auth_required`.
#[derive(Debug, Clone)]
pub struct RequireRole {
    allowed: Vec<UserRole>,
}

impl RequireRole {
    /// Admits the given roles.
    #[must_use]
    pub fn any_of(allowed: impl IntoIterator<Item = UserRole>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Admits roles that can change shared family data.
    #[must_use]
    pub fn editors() -> Self {
        Self::any_of([UserRole::Owner, UserRole::Admin, UserRole::Member])
    }

    /// Admits roles that can manage family members.
    #[must_use]
    pub fn managers() -> Self {
        Self::any_of([UserRole::Owner, UserRole::Admin])
    }
}

#[async_trait]
impl Middleware for RequireRole {
    async fn handle(&self, ctx: &mut DispatchContext) -> Flow {
        let Some(user) = ctx.user() else {
            return Flow::Abort(RealtimeError::auth_required());
        };

        if self.allowed.contains(&user.role) {
            Flow::Continue
        } else {
            Flow::Abort(RealtimeError::Forbidden(format!(
                "role {:?} cannot use '{}'",
                user.role,
                ctx.event()
            )))
        }
    }

    fn name(&self) -> &str {
        "require_role"
    }
}
