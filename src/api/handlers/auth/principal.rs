//! Authenticated principal extraction and authorization helpers.
//!
//! Read the bearer token, resolve it to a full session and its user, and hand
//! downstream handlers the loaded user record.

use axum::http::HeaderMap;
use chrono::Utc;

use super::{
    state::AuthState,
    utils::{bearer_token, hash_session_token},
};
use crate::{
    api::envelope::ApiError,
    store::{SessionKind, User},
};

/// Authenticated user context derived from the bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user: User,
    pub token_hash: Vec<u8>,
}

impl Principal {
    /// Second-factor management is restricted to admins.
    pub fn require_admin(&self, message: &str) -> Result<(), ApiError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden(message))
        }
    }
}

/// Resolve the bearer token into a principal, or return 401.
pub async fn require_auth(headers: &HeaderMap, state: &AuthState) -> Result<Principal, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Err(ApiError::unauthorized("Not authorized to access this route"));
    };
    // Only the hash is stored; never compare raw tokens against storage.
    let token_hash = hash_session_token(token);
    let Some(session) = state
        .store()
        .find_session(&token_hash, SessionKind::Full, Utc::now())
        .await?
    else {
        return Err(ApiError::unauthorized("Not authorized to access this route"));
    };
    let Some(user) = state.store().find_user(session.user_id).await? else {
        return Err(ApiError::unauthorized("User no longer exists"));
    };
    if !user.is_active {
        return Err(ApiError::unauthorized("Account is deactivated"));
    }
    Ok(Principal { user, token_hash })
}
