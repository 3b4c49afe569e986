//! Agent presence and workload endpoints (staff)

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::chat::AgentPresence;
use crate::error::ApiResult;
use crate::state::AppState;
use crate::store::SessionStore;

/// `GET /api/chat/agents/online`
pub async fn online_agents(State(state): State<AppState>) -> Json<Vec<AgentPresence>> {
    Json(state.chat.presence.list_online().await)
}

#[derive(Debug, Serialize)]
pub struct WorkloadResponse {
    pub agent_id: Uuid,
    pub active_sessions: i64,
    pub availability: Value,
}

/// `GET /api/chat/agents/:id/workload`
pub async fn agent_workload(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<Json<WorkloadResponse>> {
    let active_sessions = state.sessions.count_active_for_agent(agent_id).await?;
    let availability = match state.chat.presence.get(agent_id).await {
        Some(presence) => json!(presence.state),
        None => json!("offline"),
    };
    Ok(Json(WorkloadResponse {
        agent_id,
        active_sessions,
        availability,
    }))
}
