//! QR approval: a login waiting on the desktop is approved from a trusted phone.
//!
//! Flow Overview:
//! 1) After a correct password, the login page calls `create-session` with the
//!    pending token and renders `qrUrl` as a QR code.
//! 2) The registered phone scans it, fetches the session details (which
//!    auto-approves a recognized device) or explicitly approves/rejects.
//! 3) The login page polls `session-status`. The first read after approval
//!    claims the session and returns a bearer token; later reads report
//!    `expired`.
//!
//! Sessions live for five minutes. Nothing is written when a dialog is
//! abandoned; status reads past `expiresAt` report `expired` and the sweeper
//! deletes the rows.

mod device;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::HeaderMap,
    Json,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    enforce_rate_limit, parse_body, parse_user_id,
    principal::require_auth,
    session::{check_pending, issue_session, ClientInfo},
    state::AuthState,
    types::{
        CreateQrSessionRequest, DeviceQuery, QrDecisionRequest, QrEnabledResponse,
        QrSessionCreated, QrSessionDetails, QrSessionOwner, QrSessionStatusResponse,
        QrSetupResponse, QrStatusResponse, RegisterDeviceRequest, RegisteredDevice,
    },
    utils::{
        build_qr_approve_url, build_qr_setup_url, extract_client_ip, extract_user_agent,
        generate_qr_session_token, valid_qr_session_token,
    },
    RateLimitAction,
};
use crate::{
    api::envelope::{ok, ok_message, ok_with_message, ApiError, ApiResult},
    store::{QrLoginSession, QrSessionStatus, SessionKind, User},
};
use device::{has_registered_device, match_device, redact, DeviceMatch};

const SESSION_GONE: &str = "Session not found, expired, or already resolved";
const ADMIN_ONLY: &str = "QR authentication is only available for admin accounts";
const UNKNOWN_DEVICE: &str = "Unknown Device";

#[utoipa::path(
    post,
    path = "/qr-auth/create-session",
    request_body = CreateQrSessionRequest,
    responses(
        (status = 200, description = "Approval session created", body = QrSessionCreated),
        (status = 400, description = "Missing user id or QR auth not enabled"),
        (status = 401, description = "Pending token missing or expired"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "qr-auth"
)]
pub async fn create_session(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<CreateQrSessionRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(payload)?;
    enforce_rate_limit(&state, &headers, RateLimitAction::QrSession)?;

    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("User ID is required"));
    }
    let Some(user_id) = parse_user_id(&request.user_id) else {
        return Err(ApiError::not_found("User not found"));
    };
    let pending = check_pending(&state, user_id, &request.pending_token).await?;

    let Some(user) = state.store().find_user(user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    if !user.qr_auth_enabled {
        return Err(ApiError::bad_request(
            "QR authentication is not enabled for this user",
        ));
    }

    let session_token =
        generate_qr_session_token().map_err(|err| ApiError::internal("Server error", err))?;
    let now = Utc::now();
    let session = QrLoginSession {
        session_token: session_token.clone(),
        user_id,
        status: QrSessionStatus::Pending,
        approved_by_device_id: None,
        approved_by_device_info: None,
        login_ip: extract_client_ip(&headers),
        login_user_agent: extract_user_agent(&headers).or_else(|| Some("Unknown".to_string())),
        pending_token_hash: Some(pending.token_hash),
        created_at: now,
        expires_at: now + Duration::seconds(state.config().qr_session_ttl_seconds()),
        resolved_at: None,
        consumed_at: None,
    };
    state.store().insert_qr_session(&session).await?;

    Ok(ok(QrSessionCreated {
        qr_url: build_qr_approve_url(state.config().frontend_base_url(), &session_token),
        session_token,
        expires_at: session.expires_at,
    }))
}

#[utoipa::path(
    get,
    path = "/qr-auth/session-status/{session_token}",
    params(("session_token" = String, Path, description = "QR session token")),
    responses(
        (status = 200, description = "Current status; carries a bearer token exactly once after approval", body = QrSessionStatusResponse),
        (status = 404, description = "Session not found")
    ),
    tag = "qr-auth"
)]
pub async fn session_status(
    Path(session_token): Path<String>,
    Extension(state): Extension<Arc<AuthState>>,
) -> ApiResult {
    let session = find_session(&state, &session_token)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;
    let now = Utc::now();

    let response = match session.status {
        _ if session.is_expired_at(now) => expired_status("Session has expired"),
        QrSessionStatus::Expired => expired_status("Session has expired"),
        QrSessionStatus::Pending => QrSessionStatusResponse {
            status: QrSessionStatus::Pending,
            expires_at: Some(session.expires_at),
            token: None,
            user: None,
            message: None,
        },
        QrSessionStatus::Rejected => QrSessionStatusResponse {
            status: QrSessionStatus::Rejected,
            expires_at: None,
            token: None,
            user: None,
            message: Some("Login was rejected".to_string()),
        },
        QrSessionStatus::Approved => {
            // Exactly one poll gets to exchange the approval for a session. The
            // claim also deletes the pending session that opened this one.
            if !state.store().claim_qr_session(&session_token, now).await? {
                expired_status("Session has already been used")
            } else {
                let Some(user) = state.store().find_user(session.user_id).await? else {
                    return Err(ApiError::not_found("User not found"));
                };
                let client = ClientInfo {
                    ip_address: session.login_ip.clone(),
                    user_agent: session.login_user_agent.clone(),
                };
                let issued = issue_session(&state, user.id, SessionKind::Full, client).await?;
                info!(user_id = %user.id, "QR login completed");
                QrSessionStatusResponse {
                    status: QrSessionStatus::Approved,
                    expires_at: Some(issued.expires_at),
                    token: Some(issued.token),
                    user: Some(user.profile()),
                    message: Some("Login approved".to_string()),
                }
            }
        }
    };
    Ok(ok(response))
}

fn expired_status(message: &str) -> QrSessionStatusResponse {
    QrSessionStatusResponse {
        status: QrSessionStatus::Expired,
        expires_at: None,
        token: None,
        user: None,
        message: Some(message.to_string()),
    }
}

#[utoipa::path(
    get,
    path = "/qr-auth/session/{session_token}",
    params(("session_token" = String, Path, description = "QR session token")),
    responses(
        (status = 200, description = "Details for manual approval, or auto-approved for a recognized device", body = QrSessionDetails),
        (status = 400, description = "Session expired or already resolved"),
        (status = 404, description = "Session not found")
    ),
    tag = "qr-auth"
)]
pub async fn session_details(
    headers: HeaderMap,
    Path(session_token): Path<String>,
    Query(query): Query<DeviceQuery>,
    Extension(state): Extension<Arc<AuthState>>,
) -> ApiResult {
    enforce_rate_limit(&state, &headers, RateLimitAction::QrSession)?;
    let session = find_session(&state, &session_token)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;
    let now = Utc::now();
    if session.is_expired_at(now) {
        return Err(ApiError::bad_request("Session has expired"));
    }
    if session.status != QrSessionStatus::Pending {
        return Err(ApiError::bad_request(format!(
            "Session has already been {}",
            session.status.as_str()
        )));
    }
    let Some(mut user) = state.store().find_user(session.user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    let owner = QrSessionOwner {
        email: user.email.clone(),
        full_name: user.full_name.clone(),
    };

    let device_id = query.device_id.as_deref().map(str::trim).unwrap_or_default();
    if !device_id.is_empty() && user.qr_auth_enabled {
        let device_info = query.device_info.as_deref();
        let matched = match_device(&user, device_id, device_info);
        if matched.is_match() {
            if !state
                .store()
                .resolve_qr_session(
                    &session_token,
                    QrSessionStatus::Approved,
                    Some(device_id),
                    device_info,
                    now,
                )
                .await?
            {
                return Err(ApiError::bad_request("Session has already been resolved"));
            }
            refresh_device_id(&state, &mut user, matched, device_id).await?;
            info!(
                user_id = %user.id,
                device = %device_info.map_or_else(|| redact(device_id), str::to_string),
                "QR login auto-approved"
            );
            return Ok(ok_with_message(
                "Login automatically approved - device recognized",
                QrSessionDetails {
                    session_token,
                    user: owner,
                    auto_approved: true,
                    login_ip: None,
                    login_user_agent: None,
                    expires_at: None,
                    created_at: None,
                },
            ));
        }
    }

    Ok(ok(QrSessionDetails {
        session_token,
        user: owner,
        auto_approved: false,
        login_ip: session.login_ip,
        login_user_agent: session.login_user_agent,
        expires_at: Some(session.expires_at),
        created_at: Some(session.created_at),
    }))
}

#[utoipa::path(
    post,
    path = "/qr-auth/approve",
    request_body = QrDecisionRequest,
    responses(
        (status = 200, description = "Login approved"),
        (status = 400, description = "Missing session token or device id"),
        (status = 403, description = "Device is not the registered device"),
        (status = 404, description = "Session not found, expired, or already resolved")
    ),
    tag = "qr-auth"
)]
pub async fn approve(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<QrDecisionRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(payload)?;
    enforce_rate_limit(&state, &headers, RateLimitAction::QrApproval)?;
    let (session, mut user) = load_decision(&state, &request).await?;
    let device_id = request.device_id.trim();
    let device_info = request.device_info.as_deref();

    if !has_registered_device(&user) {
        return Err(ApiError::forbidden(
            "No device is registered for QR authentication. Please register this device first.",
        ));
    }
    let matched = match_device(&user, device_id, device_info);
    if !matched.is_match() {
        warn!(
            user_id = %user.id,
            expected = %user.qr_auth_device_id.as_deref().map_or_else(|| "none".to_string(), redact),
            got = %redact(device_id),
            "QR approval from unregistered device"
        );
        return Err(ApiError::forbidden(
            "This device is not authorized to approve logins. Only your registered device can approve.",
        ));
    }

    if !state
        .store()
        .resolve_qr_session(
            &session.session_token,
            QrSessionStatus::Approved,
            Some(device_id),
            device_info,
            Utc::now(),
        )
        .await?
    {
        return Err(ApiError::not_found(SESSION_GONE));
    }
    refresh_device_id(&state, &mut user, matched, device_id).await?;
    info!(user_id = %user.id, device = %redact(device_id), "QR login approved");
    Ok(ok_message("Login approved successfully"))
}

#[utoipa::path(
    post,
    path = "/qr-auth/reject",
    request_body = QrDecisionRequest,
    responses(
        (status = 200, description = "Login rejected"),
        (status = 400, description = "Missing session token or device id"),
        (status = 403, description = "Device is not the registered device"),
        (status = 404, description = "Session not found, expired, or already resolved")
    ),
    tag = "qr-auth"
)]
pub async fn reject(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<QrDecisionRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(payload)?;
    enforce_rate_limit(&state, &headers, RateLimitAction::QrApproval)?;
    let (session, user) = load_decision(&state, &request).await?;
    let device_id = request.device_id.trim();
    let device_info = request.device_info.as_deref();

    if has_registered_device(&user) && !match_device(&user, device_id, device_info).is_match() {
        return Err(ApiError::forbidden(
            "Only the registered device can reject login attempts",
        ));
    }
    if !state
        .store()
        .resolve_qr_session(
            &session.session_token,
            QrSessionStatus::Rejected,
            Some(device_id),
            device_info,
            Utc::now(),
        )
        .await?
    {
        return Err(ApiError::not_found(SESSION_GONE));
    }
    info!(user_id = %user.id, "QR login rejected");
    Ok(ok_message("Login rejected"))
}

/// Shared validation for approve/reject: the session must still be open.
async fn load_decision(
    state: &AuthState,
    request: &QrDecisionRequest,
) -> Result<(QrLoginSession, User), ApiError> {
    if request.session_token.trim().is_empty() || request.device_id.trim().is_empty() {
        return Err(ApiError::bad_request(
            "Session token and device ID are required",
        ));
    }
    let session = find_session(state, request.session_token.trim())
        .await?
        .filter(|session| session.is_open_at(Utc::now()))
        .ok_or_else(|| ApiError::not_found(SESSION_GONE))?;
    let Some(user) = state.store().find_user(session.user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    Ok((session, user))
}

#[utoipa::path(
    post,
    path = "/qr-auth/register-device",
    request_body = RegisterDeviceRequest,
    responses(
        (status = 200, description = "Device registered; QR auth enabled and TOTP disabled", body = RegisteredDevice),
        (status = 400, description = "Missing fields"),
        (status = 401, description = "Invalid password"),
        (status = 403, description = "Not an admin account"),
        (status = 404, description = "User not found"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "qr-auth"
)]
pub async fn register_device(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(payload)?;
    enforce_rate_limit(&state, &headers, RateLimitAction::RegisterDevice)?;

    let device_id = request.device_id.trim();
    if request.user_id.trim().is_empty() || request.password.is_empty() || device_id.is_empty() {
        return Err(ApiError::bad_request(
            "User ID, password, and device ID are required",
        ));
    }
    let user = match parse_user_id(&request.user_id) {
        Some(user_id) => state.store().find_user(user_id).await?,
        None => None,
    };
    let Some(mut user) = user else {
        return Err(ApiError::not_found("User not found"));
    };
    if !state
        .hasher()
        .verify_offloaded(&request.password, Some(user.password_hash.as_str()))
        .await
    {
        return Err(ApiError::unauthorized("Invalid password"));
    }
    if !user.is_admin() {
        return Err(ApiError::forbidden(ADMIN_ONLY));
    }

    let device_info = request
        .device_info
        .as_deref()
        .map(str::trim)
        .filter(|info| !info.is_empty())
        .unwrap_or(UNKNOWN_DEVICE)
        .to_string();
    let registered_at = Utc::now();
    user.qr_auth_device_id = Some(device_id.to_string());
    user.qr_auth_device_info = Some(device_info.clone());
    user.qr_auth_device_registered_at = Some(registered_at);
    user.qr_auth_enabled = true;
    // QR approval replaces TOTP as the second factor.
    user.two_factor_enabled = false;
    state.store().update_user(&user).await?;
    info!(user_id = %user.id, device = %device_info, "QR device registered");

    Ok(ok_with_message(
        "Device registered successfully. You can now use this device to approve logins.",
        RegisteredDevice {
            device_info,
            registered_at,
        },
    ))
}

#[utoipa::path(
    post,
    path = "/qr-auth/enable",
    responses(
        (status = 200, description = "Device registration URL", body = QrSetupResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Not an admin account")
    ),
    security(("bearer" = [])),
    tag = "qr-auth"
)]
pub async fn enable(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    principal.require_admin(ADMIN_ONLY)?;
    let setup_url = build_qr_setup_url(
        state.config().frontend_base_url(),
        &principal.user.id.to_string(),
    );
    Ok(ok_with_message(
        "Scan this QR code with your phone to register it",
        QrSetupResponse {
            setup_url,
            expires_at: Utc::now() + Duration::seconds(state.config().qr_setup_ttl_seconds()),
        },
    ))
}

#[utoipa::path(
    get,
    path = "/qr-auth/status",
    responses(
        (status = 200, description = "QR auth state of the current user", body = QrStatusResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "qr-auth"
)]
pub async fn status(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let user = principal.user;
    Ok(ok(QrStatusResponse {
        qr_auth_enabled: user.qr_auth_enabled,
        is_admin: user.is_admin(),
        device_info: user.qr_auth_device_info,
        registered_at: user.qr_auth_device_registered_at,
    }))
}

#[utoipa::path(
    post,
    path = "/qr-auth/disable",
    responses(
        (status = 200, description = "QR auth disabled and device forgotten"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = [])),
    tag = "qr-auth"
)]
pub async fn disable(headers: HeaderMap, Extension(state): Extension<Arc<AuthState>>) -> ApiResult {
    let principal = require_auth(&headers, &state).await?;
    let mut user = principal.user;
    user.qr_auth_enabled = false;
    user.qr_auth_device_id = None;
    user.qr_auth_device_info = None;
    user.qr_auth_device_registered_at = None;
    state.store().update_user(&user).await?;
    info!(user_id = %user.id, "QR auth disabled");
    Ok(ok_message("QR authentication has been disabled"))
}

#[utoipa::path(
    get,
    path = "/qr-auth/check-enabled/{user_id}",
    params(("user_id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Whether the user approves logins by QR", body = QrEnabledResponse),
        (status = 404, description = "User not found")
    ),
    tag = "qr-auth"
)]
pub async fn check_enabled(
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Extension(state): Extension<Arc<AuthState>>,
) -> ApiResult {
    enforce_rate_limit(&state, &headers, RateLimitAction::QrSession)?;
    let user = match parse_user_id(&user_id) {
        Some(user_id) => state.store().find_user(user_id).await?,
        None => None,
    };
    let Some(user) = user else {
        return Err(ApiError::not_found("User not found"));
    };
    Ok(ok(QrEnabledResponse {
        qr_auth_enabled: user.qr_auth_enabled,
        is_admin: user.is_admin(),
    }))
}

async fn find_session(
    state: &AuthState,
    session_token: &str,
) -> Result<Option<QrLoginSession>, ApiError> {
    if !valid_qr_session_token(session_token) {
        return Ok(None);
    }
    Ok(state.store().find_qr_session(session_token).await?)
}

/// A device recognized by description gets its new id stored for next time.
async fn refresh_device_id(
    state: &AuthState,
    user: &mut User,
    matched: DeviceMatch,
    device_id: &str,
) -> Result<(), ApiError> {
    if matched != DeviceMatch::Info {
        return Ok(());
    }
    info!(user_id = %user.id, device = %redact(device_id), "Refreshing QR device id");
    user.qr_auth_device_id = Some(device_id.to_string());
    state.store().update_user(user).await?;
    Ok(())
}
