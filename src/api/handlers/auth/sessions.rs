//! Listing and revoking the caller's own bearer sessions.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{
    principal::require_auth,
    state::AuthState,
    types::{SessionList, SessionSummary, TerminatedSessions},
};
use crate::api::envelope::{ok, ok_message, ok_with_message, ApiError, ApiResult};

#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions, newest first", body = SessionList),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn list(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let sessions = state
        .store()
        .list_sessions(principal.user.id, Utc::now())
        .await?;
    let active_sessions = sessions
        .into_iter()
        .map(|session| SessionSummary {
            id: session.id.to_string(),
            login_at: session.created_at,
            expires_at: session.expires_at,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            is_current: session.token_hash == principal.token_hash,
        })
        .collect();
    Ok(ok(SessionList { active_sessions }))
}

#[utoipa::path(
    post,
    path = "/auth/sessions/terminate-all",
    responses(
        (status = 200, description = "Every other session revoked", body = TerminatedSessions),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn terminate_all(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let terminated_count = state
        .store()
        .delete_sessions_except(principal.user.id, &principal.token_hash)
        .await?;
    info!(user_id = %principal.user.id, terminated_count, "Other sessions terminated");
    Ok(ok_with_message(
        &format!(
            "Terminated {terminated_count} session(s). All other devices have been logged out."
        ),
        TerminatedSessions { terminated_count },
    ))
}

#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session id from the session list")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Session not found")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn terminate(
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Extension(state): Extension<Arc<AuthState>>,
) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let Ok(session_id) = Uuid::parse_str(session_id.trim()) else {
        return Err(ApiError::not_found("Session not found"));
    };
    // Scoped to the caller, so another user's id reads as unknown.
    if !state
        .store()
        .delete_user_session(principal.user.id, session_id)
        .await?
    {
        return Err(ApiError::not_found("Session not found"));
    }
    Ok(ok_message("Session terminated successfully"))
}
