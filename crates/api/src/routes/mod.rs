//! HTTP route definitions

pub mod agents;
pub mod health;
pub mod messages;
pub mod sessions;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{optional_auth, require_staff};
use crate::chat::ws_handler;
use crate::state::AppState;

/// Assemble the full application router.
pub fn router(state: AppState) -> Router {
    // Staff-only surface: listing, triage, assignment, presence.
    let staff = Router::new()
        .route("/api/chat/sessions", get(sessions::list_sessions))
        .route(
            "/api/chat/sessions/:id",
            axum::routing::patch(sessions::patch_session),
        )
        .route("/api/chat/sessions/:id/assign", post(sessions::assign_agent))
        .route("/api/chat/sessions/:id/status", post(sessions::update_status))
        .route("/api/chat/agents/online", get(agents::online_agents))
        .route("/api/chat/agents/:id/workload", get(agents::agent_workload))
        .layer(middleware::from_fn_with_state(state.clone(), require_staff));

    // Customer-reachable surface: anonymous access allowed, identity attached
    // when a token is present.
    let open = Router::new()
        .route("/api/chat/sessions", post(sessions::create_session))
        .route("/api/chat/sessions/:id", get(sessions::get_session))
        .route(
            "/api/chat/sessions/:id/messages",
            get(messages::session_history).post(messages::send_message),
        )
        .route(
            "/api/chat/messages/:id",
            axum::routing::patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/api/chat/messages/:id/reactions", post(messages::react))
        .route("/api/chat/messages/:id/read", post(messages::mark_read))
        .layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ws/chat", get(ws_handler))
        .merge(staff)
        .merge(open)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
