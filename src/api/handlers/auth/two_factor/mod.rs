//! TOTP enrollment and management for admin accounts.
//!
//! Setup stores an encrypted secret with `two_factor_enabled = false`; the
//! factor only becomes active once `verify-setup` proves the authenticator app
//! produces matching codes.

pub mod backup_codes;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::{
    parse_body,
    principal::require_auth,
    state::AuthState,
    types::{
        BackupCodesResponse, PasswordConfirmRequest, TwoFactorSetupResponse,
        TwoFactorStatusResponse, VerifySetupRequest,
    },
};
use crate::api::envelope::{ok, ok_message, ok_with_message, ApiError, ApiResult};

#[utoipa::path(
    post,
    path = "/two-factor/setup",
    responses(
        (status = 200, description = "Secret and backup codes issued; confirm with verify-setup", body = TwoFactorSetupResponse),
        (status = 400, description = "2FA already enabled"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Not an admin account")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn setup(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    principal.require_admin("2FA is only available for admin users")?;
    let mut user = principal.user;
    if user.two_factor_enabled {
        return Err(ApiError::bad_request(
            "2FA is already enabled. Disable it before starting a new setup.",
        ));
    }

    let enrollment = state
        .totp()
        .enroll(user.id, &user.email)
        .map_err(|err| ApiError::internal("Server error", err))?;
    user.two_factor_secret = Some(enrollment.encrypted_secret);
    state.store().update_user(&user).await?;
    let backup_codes = backup_codes::issue_batch(&state, user.id).await?;

    Ok(ok_with_message(
        "2FA setup initiated. Please verify with your authenticator app.",
        TwoFactorSetupResponse {
            otpauth_url: enrollment.otpauth_url,
            secret: enrollment.secret_base32,
            backup_codes,
        },
    ))
}

#[utoipa::path(
    post,
    path = "/two-factor/verify-setup",
    request_body = VerifySetupRequest,
    responses(
        (status = 200, description = "2FA enabled"),
        (status = 400, description = "Missing token, setup not started, or wrong code"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn verify_setup(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<VerifySetupRequest>, JsonRejection>,
) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let request = parse_body(payload)?;
    let token = request.token.trim();
    if token.is_empty() {
        return Err(ApiError::bad_request("Verification token is required"));
    }

    let mut user = principal.user;
    let Some(secret) = user.two_factor_secret.as_deref() else {
        return Err(ApiError::bad_request(
            "2FA setup not initiated. Please start setup first.",
        ));
    };
    let valid = state
        .totp()
        .verify(user.id, secret, token)
        .map_err(|err| ApiError::internal("Server error", err))?;
    if !valid {
        return Err(ApiError::bad_request(
            "Invalid verification code. Please try again.",
        ));
    }

    user.two_factor_enabled = true;
    state.store().update_user(&user).await?;
    info!(user_id = %user.id, "2FA enabled");
    Ok(ok_message("2FA has been successfully enabled for your account"))
}

#[utoipa::path(
    post,
    path = "/two-factor/disable",
    request_body = PasswordConfirmRequest,
    responses(
        (status = 200, description = "2FA disabled and backup codes deleted"),
        (status = 400, description = "Password missing"),
        (status = 401, description = "Invalid password or bearer token")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn disable(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<PasswordConfirmRequest>, JsonRejection>,
) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let request = parse_body(payload)?;
    if request.password.is_empty() {
        return Err(ApiError::bad_request("Password is required to disable 2FA"));
    }
    let mut user = principal.user;
    if !state
        .hasher()
        .verify_offloaded(&request.password, Some(user.password_hash.as_str()))
        .await
    {
        return Err(ApiError::unauthorized("Invalid password"));
    }

    user.two_factor_enabled = false;
    user.two_factor_secret = None;
    state.store().update_user(&user).await?;
    state.store().replace_backup_codes(user.id, &[]).await?;
    info!(user_id = %user.id, "2FA disabled");
    Ok(ok_message("2FA has been disabled for your account"))
}

#[utoipa::path(
    post,
    path = "/two-factor/backup-codes",
    request_body = PasswordConfirmRequest,
    responses(
        (status = 200, description = "New batch issued; previous codes are void", body = BackupCodesResponse),
        (status = 400, description = "Password missing or 2FA not enabled"),
        (status = 401, description = "Invalid password or bearer token")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn regenerate_backup_codes(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<PasswordConfirmRequest>, JsonRejection>,
) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let request = parse_body(payload)?;
    if request.password.is_empty() {
        return Err(ApiError::bad_request(
            "Password is required to regenerate backup codes",
        ));
    }
    let user = principal.user;
    if !user.two_factor_enabled {
        return Err(ApiError::bad_request("2FA is not enabled for this account"));
    }
    if !state
        .hasher()
        .verify_offloaded(&request.password, Some(user.password_hash.as_str()))
        .await
    {
        return Err(ApiError::unauthorized("Invalid password"));
    }

    let backup_codes = backup_codes::issue_batch(&state, user.id).await?;
    Ok(ok_with_message(
        "Backup codes have been regenerated",
        BackupCodesResponse { backup_codes },
    ))
}

#[utoipa::path(
    get,
    path = "/two-factor/status",
    responses(
        (status = 200, description = "2FA state of the current user", body = TwoFactorStatusResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "two-factor"
)]
pub async fn status(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let user = principal.user;
    let remaining = state.store().backup_code_hashes(user.id).await?.len();
    Ok(ok(TwoFactorStatusResponse {
        two_factor_enabled: user.two_factor_enabled,
        is_admin: user.is_admin(),
        backup_codes_remaining: remaining,
    }))
}
