//! Message endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use pharmachat_shared::{Attachment, ChatMessage};

use crate::auth::AuthUser;
use crate::chat::{OutboundMessage, Participant};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::store::{MessageStore, ReactionToggle};

/// Resolve the calling identity: authenticated user, or an anonymous
/// customer with a request-scoped id.
fn caller(viewer: Option<Extension<AuthUser>>, fallback_name: Option<&str>) -> Participant {
    let user = match viewer {
        Some(Extension(user)) => user,
        None => AuthUser::anonymous(fallback_name.unwrap_or("Guest")),
    };
    Participant {
        user_id: user.user_id,
        name: user.name,
        role: user.role,
    }
}

// =============================================================================
// History / send
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/chat/sessions/:id/messages` — paged, creation order.
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    viewer: Option<Extension<AuthUser>>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let limit = query
        .limit
        .unwrap_or(state.config.history_page_size)
        .clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let staff = viewer
        .as_ref()
        .is_some_and(|Extension(u)| u.role.is_staff());

    let mut messages = state
        .messages
        .session_messages(session_id, limit, offset)
        .await?;
    if !staff {
        messages.retain(|m| !m.is_internal);
    }
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_internal: bool,
    /// Display name for anonymous senders.
    pub sender_name: Option<String>,
}

/// `POST /api/chat/sessions/:id/messages` — anonymous customers allowed.
pub async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    viewer: Option<Extension<AuthUser>>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let sender = caller(viewer, req.sender_name.as_deref());
    let message = state
        .delivery
        .send(
            &sender,
            OutboundMessage {
                session_id,
                content: req.content,
                reply_to: req.reply_to,
                attachments: req.attachments,
                is_internal: req.is_internal,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// =============================================================================
// Edit / delete / react / read
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

/// `PATCH /api/chat/messages/:id` — sender only.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    viewer: Option<Extension<AuthUser>>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<Json<ChatMessage>> {
    let editor = caller(viewer, None);
    let message = state.delivery.edit(message_id, &editor, req.content).await?;
    Ok(Json(message))
}

/// `DELETE /api/chat/messages/:id` — sender or elevated staff.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    viewer: Option<Extension<AuthUser>>,
) -> ApiResult<StatusCode> {
    let actor = caller(viewer, None);
    state.delivery.delete(message_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

/// `POST /api/chat/messages/:id/reactions` — toggle.
pub async fn react(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    viewer: Option<Extension<AuthUser>>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<Json<ChatMessage>> {
    let reactor = caller(viewer, None);
    let toggle = state.delivery.react(message_id, &reactor, req.emoji).await?;
    let message = match toggle {
        ReactionToggle::Added(m) | ReactionToggle::Removed(m) => m,
    };
    Ok(Json(message))
}

/// `POST /api/chat/messages/:id/read`
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    viewer: Option<Extension<AuthUser>>,
) -> ApiResult<StatusCode> {
    let reader = caller(viewer, None);
    state.delivery.mark_read(message_id, &reader, None).await?;
    Ok(StatusCode::NO_CONTENT)
}
