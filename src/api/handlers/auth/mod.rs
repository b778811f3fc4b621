//! Auth handlers and supporting modules.
//!
//! This module coordinates the login approval flow: the password check, the
//! second factor (TOTP, single-use backup codes, or QR approval from a trusted
//! device) and bearer session management.
//!
//! ## Sessions
//!
//! A correct password for an account that owes a second factor yields a
//! *pending* token instead of a session. The pending token is bound to the
//! user and expires after ten minutes; it must accompany
//! `/auth/verify-2fa-login` and `/qr-auth/create-session`, so knowing a user id
//! alone is not enough to attempt a second factor.
//!
//! ## Rate Limiting
//!
//! Login and verification attempts are limited per client IP (10 per 15
//! minutes), QR session traffic to 20 per 15 minutes, device registration to
//! 5 per hour.

use axum::{
    extract::rejection::JsonRejection,
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

pub mod hashing;
pub(crate) mod login;
pub(crate) mod principal;
pub(crate) mod qr_auth;
mod rate_limit;
mod session;
pub(crate) mod sessions;
mod state;
pub(crate) mod two_factor;
pub mod types;
mod utils;

pub use hashing::SecretHasher;
pub use rate_limit::{
    NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter, WindowRateLimiter,
};
pub use state::{AuthConfig, AuthState};
pub use utils::{normalize_email, valid_email, PASSWORD_MIN_LEN};

use crate::api::envelope::ApiError;

/// Unwrap a JSON body, mapping malformed input to a 400 envelope.
fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|_| ApiError::bad_request("Validation error"))
}

fn enforce_rate_limit(
    state: &AuthState,
    headers: &HeaderMap,
    action: RateLimitAction,
) -> Result<(), ApiError> {
    let ip = utils::extract_client_ip(headers);
    match state.rate_limiter().check_ip(ip.as_deref(), action) {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited => Err(ApiError::TooManyRequests(
            "Too many attempts, please try again later".to_string(),
        )),
    }
}

/// Ids arrive as strings; anything unparsable cannot name a user.
fn parse_user_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}
