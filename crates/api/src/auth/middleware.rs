//! Authentication middleware
//!
//! `require_staff` guards staff-only routes; `optional_auth` attaches an
//! identity when a token is present but lets anonymous customers through.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use pharmachat_shared::ParticipantRole;

use crate::state::AppState;

/// Authenticated (or anonymous) request identity
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub role: ParticipantRole,
}

impl AuthUser {
    /// Anonymous customer identity with a connection-scoped id.
    pub fn anonymous(name: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            name: name.into(),
            role: ParticipantRole::Customer,
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Reject the request unless it carries a valid staff token.
pub async fn require_staff(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state
        .jwt_manager
        .validate_access_token(token)
        .map_err(|e| {
            tracing::warn!(error = ?e, "Staff auth failed: invalid token");
            StatusCode::UNAUTHORIZED
        })?;

    if !claims.role.is_staff() {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        name: claims.name,
        role: claims.role,
    });
    Ok(next.run(req).await)
}

/// Attach an identity when a valid token is present; otherwise pass through
/// with no `AuthUser` extension (anonymous customer).
pub async fn optional_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if let Some(token) = bearer_token(&req) {
        if let Ok(claims) = state.jwt_manager.validate_access_token(token) {
            req.extensions_mut().insert(AuthUser {
                user_id: claims.sub,
                name: claims.name,
                role: claims.role,
            });
        }
    }
    next.run(req).await
}
