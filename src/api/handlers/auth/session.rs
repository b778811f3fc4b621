//! Bearer session issuance and lookup.
//!
//! Full sessions unlock the API. Pending sessions are issued after a correct
//! password when a second factor is still owed; they are bound to one user and
//! only accepted by the verify and QR create-session endpoints.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{
    state::AuthState,
    utils::{extract_client_ip, extract_user_agent, generate_session_token, hash_session_token},
};
use crate::{
    api::envelope::ApiError,
    store::{SessionKind, SessionRecord},
};

pub(super) const PENDING_EXPIRED_MESSAGE: &str =
    "Verification session expired. Please log in again.";

#[derive(Debug)]
pub(super) struct IssuedSession {
    pub(super) token: String,
    pub(super) expires_at: DateTime<Utc>,
}

/// Where a login came from, recorded on the session for the session list.
#[derive(Clone, Debug, Default)]
pub(super) struct ClientInfo {
    pub(super) ip_address: Option<String>,
    pub(super) user_agent: Option<String>,
}

impl ClientInfo {
    pub(super) fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_client_ip(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

pub(super) async fn issue_session(
    state: &AuthState,
    user_id: Uuid,
    kind: SessionKind,
    client: ClientInfo,
) -> Result<IssuedSession, ApiError> {
    let token =
        generate_session_token().map_err(|err| ApiError::internal("Server error", err))?;
    let ttl = match kind {
        SessionKind::Full => state.config().session_ttl_seconds(),
        SessionKind::Pending => state.config().pending_ttl_seconds(),
    };
    let now = Utc::now();
    let record = SessionRecord {
        id: Uuid::new_v4(),
        token_hash: hash_session_token(&token),
        user_id,
        kind,
        ip_address: client.ip_address,
        user_agent: client.user_agent,
        created_at: now,
        expires_at: now + Duration::seconds(ttl),
    };
    state.store().insert_session(&record).await?;
    Ok(IssuedSession {
        token,
        expires_at: record.expires_at,
    })
}

/// Confirm `pending_token` was issued to `user_id` and is still live.
pub(super) async fn check_pending(
    state: &AuthState,
    user_id: Uuid,
    pending_token: &str,
) -> Result<SessionRecord, ApiError> {
    let pending_token = pending_token.trim();
    if pending_token.is_empty() {
        return Err(ApiError::unauthorized(PENDING_EXPIRED_MESSAGE));
    }
    let record = state
        .store()
        .find_session(
            &hash_session_token(pending_token),
            SessionKind::Pending,
            Utc::now(),
        )
        .await?;
    match record {
        Some(record) if record.user_id == user_id => Ok(record),
        _ => Err(ApiError::unauthorized(PENDING_EXPIRED_MESSAGE)),
    }
}

/// Trade a pending session for a full one.
pub(super) async fn complete_pending(
    state: &AuthState,
    pending: &SessionRecord,
    client: ClientInfo,
) -> Result<IssuedSession, ApiError> {
    state.store().delete_session(&pending.token_hash).await?;
    issue_session(state, pending.user_id, SessionKind::Full, client).await
}
