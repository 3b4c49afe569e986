//! Session endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use pharmachat_shared::{
    ChatChannel, ChatMessage, ChatSession, CustomerInfo, InternalNote, Priority, SessionStatus,
};

use crate::auth::AuthUser;
use crate::chat::NewSession;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::{MessageStore, SessionFilter, SessionPatch, SessionStore};

/// Strip agent-only fields before returning a session to a customer.
fn redact_for(session: ChatSession, viewer: Option<&AuthUser>) -> ChatSession {
    let staff = viewer.is_some_and(|u| u.role.is_staff());
    if staff {
        session
    } else {
        ChatSession {
            internal_notes: Vec::new(),
            ..session
        }
    }
}

// =============================================================================
// Create
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub channel: ChatChannel,
    pub customer: CustomerInfo,
    pub store_id: Option<Uuid>,
    pub store_name: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

/// `POST /api/chat/sessions` — anonymous customers may create sessions.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let session = state
        .lifecycle
        .create_session(NewSession {
            channel: req.channel,
            customer: req.customer,
            store_id: req.store_id,
            store_name: req.store_name,
            subject: req.subject,
            category: req.category,
            priority: req.priority,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(redact_for(session, None))))
}

// =============================================================================
// List / detail
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
    pub channel: Option<ChatChannel>,
    pub priority: Option<Priority>,
    pub store_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/chat/sessions` (staff)
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<ChatSession>>> {
    let sessions = state
        .sessions
        .list(&SessionFilter {
            status: query.status,
            channel: query.channel,
            priority: query.priority,
            store_id: query.store_id,
            agent_id: query.agent_id,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(Json(sessions))
}

#[derive(Debug, serde::Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

/// `GET /api/chat/sessions/:id` — detail plus the first page of history.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    viewer: Option<Extension<AuthUser>>,
) -> ApiResult<Json<SessionDetail>> {
    let session = state
        .sessions
        .get(session_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let viewer = viewer.map(|Extension(u)| u);
    let staff = viewer.as_ref().is_some_and(|u| u.role.is_staff());

    let mut messages = state
        .messages
        .session_messages(session_id, state.config.history_page_size, 0)
        .await?;
    if !staff {
        messages.retain(|m| !m.is_internal);
    }

    Ok(Json(SessionDetail {
        session: redact_for(session, viewer.as_ref()),
        messages,
    }))
}

// =============================================================================
// Triage / assignment / status
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PatchSessionRequest {
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub rating: Option<i16>,
    pub feedback: Option<String>,
    /// Appends an internal note authored by the caller.
    pub internal_note: Option<String>,
}

/// `PATCH /api/chat/sessions/:id` (staff)
pub async fn patch_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PatchSessionRequest>,
) -> ApiResult<Json<ChatSession>> {
    if let Some(rating) = req.rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::Validation(
                "Rating must be between 1 and 5".to_string(),
            ));
        }
    }

    if let Some(note) = req.internal_note {
        if note.trim().is_empty() {
            return Err(ApiError::Validation(
                "Internal note cannot be empty".to_string(),
            ));
        }
        state
            .sessions
            .add_internal_note(
                session_id,
                InternalNote {
                    author_id: user.user_id,
                    author_name: user.name.clone(),
                    note,
                    created_at: OffsetDateTime::now_utc(),
                },
            )
            .await?;
    }

    let session = state
        .sessions
        .apply_patch(
            session_id,
            SessionPatch {
                priority: req.priority,
                category: req.category,
                tags: req.tags,
                rating: req.rating,
                feedback: req.feedback,
            },
        )
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct AssignAgentRequest {
    /// Defaults to the caller.
    pub agent_id: Option<Uuid>,
    pub agent_name: Option<String>,
}

/// `POST /api/chat/sessions/:id/assign` (staff; 409 on conflict)
pub async fn assign_agent(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AssignAgentRequest>,
) -> ApiResult<Json<ChatSession>> {
    let agent_id = req.agent_id.unwrap_or(user.user_id);
    let agent_name = req.agent_name.unwrap_or_else(|| user.name.clone());

    let session = state
        .lifecycle
        .assign_agent(session_id, agent_id, &agent_name)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: SessionStatus,
    pub resolution: Option<String>,
}

/// `POST /api/chat/sessions/:id/status` (staff; 409 on illegal transition)
pub async fn update_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<ChatSession>> {
    let session = state
        .lifecycle
        .update_status(session_id, req.status, req.resolution, Some(&user.name))
        .await?;
    Ok(Json(session))
}
