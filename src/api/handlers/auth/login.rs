//! Credential check, second-factor login verification and session endpoints.

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    enforce_rate_limit, parse_body, parse_user_id,
    principal::require_auth,
    session::{check_pending, complete_pending, issue_session, ClientInfo},
    state::AuthState,
    two_factor::backup_codes::normalize_backup_code,
    types::{LoginRequest, LoginResponse, SecondFactorMode, SessionGrant, VerifySecondFactorRequest},
    utils::{normalize_email, valid_email},
    RateLimitAction,
};
use crate::{
    api::envelope::{ok, ok_message, ok_with_message, ApiError, ApiResult},
    store::{AccountStatus, SessionKind},
    totp::is_totp_code,
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_CODE: &str = "Invalid verification code";

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued, or a second factor is required", body = LoginResponse),
        (status = 400, description = "Missing or malformed email/password"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not approved or deactivated"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(payload)?;
    enforce_rate_limit(&state, &headers, RateLimitAction::Login)?;

    let email = normalize_email(&request.email);
    if email.is_empty() || request.password.is_empty() || !valid_email(&email) {
        return Err(ApiError::bad_request("Validation error"));
    }

    let user = state.store().find_user_by_email(&email).await?;
    let password_ok = state
        .hasher()
        .verify_offloaded(
            &request.password,
            user.as_ref().map(|user| user.password_hash.as_str()),
        )
        .await;
    let Some(user) = user.filter(|_| password_ok) else {
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    };

    // Account state is only revealed once the password has matched.
    match user.status {
        AccountStatus::Approved => {}
        AccountStatus::Pending => {
            return Err(ApiError::forbidden("Your account is pending approval."));
        }
        AccountStatus::Rejected => {
            return Err(ApiError::forbidden(
                "Your account registration was rejected.",
            ));
        }
    }
    if !user.is_active {
        return Err(ApiError::forbidden("Your account has been deactivated."));
    }

    let client = ClientInfo::from_headers(&headers);
    if user.requires_second_factor() {
        let mode = if user.qr_auth_enabled {
            SecondFactorMode::Qr
        } else {
            SecondFactorMode::Totp
        };
        let pending = issue_session(&state, user.id, SessionKind::Pending, client).await?;
        info!(user_id = %user.id, ?mode, "Second factor required");
        let message = match mode {
            SecondFactorMode::Qr => "QR authentication required",
            SecondFactorMode::Totp => "2FA verification required",
        };
        return Ok(ok_with_message(
            message,
            LoginResponse {
                requires_second_factor: true,
                user_id: Some(user.id.to_string()),
                mode: Some(mode),
                pending_token: Some(pending.token),
                expires_at: Some(pending.expires_at),
                ..LoginResponse::default()
            },
        ));
    }

    let session = issue_session(&state, user.id, SessionKind::Full, client).await?;
    info!(user_id = %user.id, "Login successful");
    Ok(ok_with_message(
        "Login successful",
        LoginResponse {
            token: Some(session.token),
            expires_at: Some(session.expires_at),
            user: Some(user.profile()),
            ..LoginResponse::default()
        },
    ))
}

#[utoipa::path(
    post,
    path = "/auth/verify-2fa-login",
    request_body = VerifySecondFactorRequest,
    responses(
        (status = 200, description = "Second factor accepted; session issued", body = SessionGrant),
        (status = 400, description = "Invalid or missing code"),
        (status = 401, description = "Pending token missing, expired, or for another user"),
        (status = 429, description = "Too many attempts"),
        (status = 500, description = "Stored secret could not be read")
    ),
    tag = "auth"
)]
pub async fn verify_second_factor(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<VerifySecondFactorRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(payload)?;
    enforce_rate_limit(&state, &headers, RateLimitAction::VerifySecondFactor)?;

    let code = match (request.token.as_deref(), request.backup_code.as_deref()) {
        (Some(token), None) => SubmittedCode::Totp(token.trim()),
        (None, Some(backup)) => SubmittedCode::Backup(backup),
        _ => {
            return Err(ApiError::bad_request(
                "Provide either a verification code or a backup code",
            ));
        }
    };
    let Some(user_id) = parse_user_id(&request.user_id) else {
        return Err(ApiError::bad_request("Validation error"));
    };
    let pending = check_pending(&state, user_id, &request.pending_token).await?;

    let Some(user) = state.store().find_user(user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    if !user.two_factor_enabled {
        return Err(ApiError::bad_request("2FA is not enabled for this account"));
    }

    let accepted = match code {
        SubmittedCode::Totp(token) => {
            if !is_totp_code(token) {
                return Err(ApiError::bad_request(INVALID_CODE));
            }
            let Some(secret) = user.two_factor_secret.as_deref() else {
                return Err(ApiError::internal(
                    "System error during 2FA verification. Please contact support.",
                    anyhow::anyhow!("2FA enabled without a stored secret for {}", user.id),
                ));
            };
            state.totp().verify(user.id, secret, token).map_err(|err| {
                ApiError::internal(
                    "System error during 2FA verification. Please contact support.",
                    err,
                )
            })?
        }
        SubmittedCode::Backup(raw) => {
            let Some(normalized) = normalize_backup_code(raw) else {
                return Err(ApiError::bad_request(INVALID_CODE));
            };
            let hashes = state.store().backup_code_hashes(user.id).await?;
            match state.hasher().find_match_offloaded(&normalized, hashes).await {
                // A concurrent request may have consumed the same code first.
                Some(hash) => state.store().consume_backup_code(user.id, &hash).await?,
                None => false,
            }
        }
    };

    if !accepted {
        warn!(user_id = %user.id, "Second factor rejected");
        return Err(ApiError::bad_request(INVALID_CODE));
    }

    let client = ClientInfo::from_headers(&headers);
    let session = complete_pending(&state, &pending, client).await?;
    info!(user_id = %user.id, "Second factor accepted");
    Ok(ok_with_message(
        "2FA verification successful",
        SessionGrant {
            token: session.token,
            expires_at: session.expires_at,
            user: user.profile(),
        },
    ))
}

enum SubmittedCode<'a> {
    Totp(&'a str),
    Backup(&'a str),
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = crate::store::UserProfile),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    Ok(ok(principal.user.profile()))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    state.store().delete_session(&principal.token_hash).await?;
    Ok(ok_message("Logged out successfully"))
}
