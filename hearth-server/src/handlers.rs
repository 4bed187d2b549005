//! Application event handlers.
//!
//! Registers the Hearth real-time routes on an [`EventRouter`]:
//!
//! | Event            | Middleware          | Effect                                     |
//! |------------------|---------------------|--------------------------------------------|
//! | `auth`           | auth                | Authenticates, joins the family room       |
//! | `chat/message`   | auth, chat payload  | Relays a chat line to a joined room        |
//! | `family/update`  | auth, editors       | Notifies the family room of a data change  |
//! | `room/join`      | auth                | Joins a room                               |
//! | `room/leave`     | auth                | Leaves a room                              |
//! | `room/broadcast` | auth                | Relays an arbitrary event to a joined room |
//! | `room/members`   | auth                | Lists the connections in a joined room     |

#![allow(clippy::unused_async)]

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use hearth_realtime::{
    AuthMiddleware, DispatchContext, EventRouter, Flow, Middleware, RealtimeError, RealtimeResult,
    Reply, RequireRole, TokenVerifier, TraceMiddleware, handler_fn, middleware_fn,
};

/// Maximum length of a chat line in characters.
pub const MAX_CHAT_LENGTH: usize = 2000;

/// Maximum length of a room name.
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

const FAMILY_ROOM_PREFIX: &str = "family:";

/// Returns the room every member of a family joins on authentication.
#[must_use]
pub fn family_room(family_id: &str) -> String {
    format!("{FAMILY_ROOM_PREFIX}{family_id}")
}

/// Registers the application routes and the global trace middleware.
pub fn register_routes(router: &EventRouter, verifier: Arc<dyn TokenVerifier>) {
    router.use_middleware(Arc::new(TraceMiddleware::new()));

    let auth: Arc<dyn Middleware> = Arc::new(AuthMiddleware::new(verifier));
    let editors: Arc<dyn Middleware> = Arc::new(RequireRole::editors());

    router.on(
        "auth",
        vec![Arc::clone(&auth)],
        handler_fn(|ctx| Box::pin(authenticate(ctx))),
    );
    router.on(
        "chat/message",
        vec![Arc::clone(&auth), chat_payload()],
        handler_fn(|ctx| Box::pin(chat_message(ctx))),
    );
    router.on(
        "family/update",
        vec![Arc::clone(&auth), editors],
        handler_fn(|ctx| Box::pin(family_update(ctx))),
    );
    router.on(
        "room/join",
        vec![Arc::clone(&auth)],
        handler_fn(|ctx| Box::pin(join_room(ctx))),
    );
    router.on(
        "room/leave",
        vec![Arc::clone(&auth)],
        handler_fn(|ctx| Box::pin(leave_room(ctx))),
    );
    router.on(
        "room/broadcast",
        vec![Arc::clone(&auth)],
        handler_fn(|ctx| Box::pin(room_broadcast(ctx))),
    );
    router.on(
        "room/members",
        vec![auth],
        handler_fn(|ctx| Box::pin(room_members(ctx))),
    );

    info!(routes = router.route_count(), "Application routes registered");
}

#[derive(Debug, Deserialize)]
struct RoomRequest {
    room: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    room: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct RoomBroadcastRequest {
    room: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FamilyUpdateRequest {
    family_id: Option<String>,
    #[serde(default)]
    changes: Value,
}

/// Rejects chat lines that are blank or too long before the handler runs.
fn chat_payload() -> Arc<dyn Middleware> {
    middleware_fn(|ctx| {
        Box::pin(async move {
            let Some(text) = ctx.str_field("text") else {
                return Flow::Abort(RealtimeError::middleware(
                    "validation_error",
                    "Field 'text' is required",
                ));
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Flow::Abort(RealtimeError::middleware(
                    "validation_error",
                    "Message cannot be empty",
                ));
            }
            if trimmed.chars().count() > MAX_CHAT_LENGTH {
                return Flow::Abort(RealtimeError::middleware(
                    "validation_error",
                    format!("Message exceeds {MAX_CHAT_LENGTH} characters"),
                ));
            }

            let trimmed = trimmed.to_string();
            if let Some(data) = ctx.data_mut().as_object_mut() {
                data.insert("text".to_string(), Value::String(trimmed));
            }
            Flow::Continue
        })
    })
}

fn validate_room(room: &str) -> RealtimeResult<()> {
    if room.trim().is_empty() {
        return Err(RealtimeError::middleware(
            "invalid_room",
            "Room name cannot be empty",
        ));
    }
    if room.len() > MAX_ROOM_NAME_LENGTH {
        return Err(RealtimeError::middleware(
            "invalid_room",
            format!("Room name exceeds {MAX_ROOM_NAME_LENGTH} bytes"),
        ));
    }
    Ok(())
}

/// A member may only enter the room of their own family.
fn check_family_access(ctx: &DispatchContext, room: &str) -> RealtimeResult<()> {
    let Some(family_id) = room.strip_prefix(FAMILY_ROOM_PREFIX) else {
        return Ok(());
    };
    let user = ctx.require_user()?;
    if user.family_id.as_deref() == Some(family_id) {
        Ok(())
    } else {
        Err(RealtimeError::Forbidden(format!(
            "Not a member of family {family_id}"
        )))
    }
}

fn require_membership(ctx: &DispatchContext, room: &str) -> RealtimeResult<()> {
    if ctx.rooms().is_member(room, ctx.connection_id()) {
        Ok(())
    } else {
        Err(RealtimeError::Forbidden(format!(
            "Join room '{room}' first"
        )))
    }
}

async fn authenticate(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let user = ctx.require_user()?;

    let room = user.family_id.as_deref().map(family_room);
    if let Some(room) = &room {
        ctx.join(room);
    }

    Ok(Some(
        Reply::new(json!({
            "userId": user.sub,
            "role": user.role,
            "familyId": user.family_id,
            "familyRoom": room,
        }))
        .with_message("Authenticated"),
    ))
}

async fn chat_message(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let user = ctx.require_user()?;
    let request: ChatRequest = ctx.parse_data()?;
    require_membership(ctx, &request.room)?;

    let delivered = ctx.broadcast(
        &request.room,
        "chat/message",
        json!({
            "room": request.room,
            "text": request.text,
            "from": user.sub,
            "connectionId": ctx.connection_id(),
        }),
    );

    Ok(Some(Reply::new(json!({
        "room": request.room,
        "delivered": delivered,
    }))))
}

async fn family_update(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let user = ctx.require_user()?;
    let request: FamilyUpdateRequest = ctx.parse_data()?;

    let family_id = match (user.family_id.as_deref(), request.family_id.as_deref()) {
        (Some(own), Some(requested)) if own != requested => {
            return Err(RealtimeError::Forbidden(format!(
                "Not a member of family {requested}"
            )));
        }
        (Some(own), _) => own.to_string(),
        (None, _) => {
            return Err(RealtimeError::middleware(
                "family_required",
                "User is not attached to a family",
            ));
        }
    };

    let room = family_room(&family_id);
    let delivered = ctx.broadcast(
        &room,
        "family/updated",
        json!({
            "familyId": family_id,
            "changes": request.changes,
            "updatedBy": user.sub,
        }),
    );

    info!(
        conn_id = %ctx.connection_id(),
        family_id = %family_id,
        delivered,
        "Family update broadcast"
    );

    Ok(Some(
        Reply::new(json!({
            "familyId": family_id,
            "delivered": delivered,
        }))
        .with_message("Family notified"),
    ))
}

async fn join_room(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let RoomRequest { room } = ctx.parse_data()?;
    validate_room(&room)?;
    check_family_access(ctx, &room)?;

    let joined = ctx.join(&room);
    let members = ctx.rooms().members(&room).len();

    Ok(Some(Reply::new(json!({
        "room": room,
        "joined": joined,
        "members": members,
    }))))
}

async fn leave_room(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let RoomRequest { room } = ctx.parse_data()?;
    let left = ctx.leave(&room);

    Ok(Some(Reply::new(json!({
        "room": room,
        "left": left,
    }))))
}

async fn room_broadcast(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let request: RoomBroadcastRequest = ctx.parse_data()?;
    if request.event.trim().is_empty() {
        return Err(RealtimeError::middleware(
            "validation_error",
            "Field 'event' cannot be empty",
        ));
    }
    require_membership(ctx, &request.room)?;

    let delivered = ctx.broadcast(&request.room, &request.event, request.payload);

    Ok(Some(Reply::new(json!({
        "room": request.room,
        "delivered": delivered,
    }))))
}

async fn room_members(ctx: &mut DispatchContext) -> RealtimeResult<Option<Reply>> {
    let RoomRequest { room } = ctx.parse_data()?;
    require_membership(ctx, &room)?;

    let members = ctx.rooms().members(&room);

    Ok(Some(Reply::new(json!({
        "room": room,
        "count": members.len(),
        "members": members,
    }))))
}
