//! Auth state and configuration shared by every auth handler.

use std::sync::Arc;

use super::{hashing::SecretHasher, rate_limit::RateLimiter};
use crate::{store::Store, totp::TotpService};

const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_PENDING_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_QR_SESSION_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_QR_SETUP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    pending_ttl_seconds: i64,
    qr_session_ttl_seconds: i64,
    qr_setup_ttl_seconds: i64,
    sweep_interval_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_BASE_URL.to_string())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            pending_ttl_seconds: DEFAULT_PENDING_TTL_SECONDS,
            qr_session_ttl_seconds: DEFAULT_QR_SESSION_TTL_SECONDS,
            qr_setup_ttl_seconds: DEFAULT_QR_SETUP_TTL_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_pending_ttl_seconds(mut self, seconds: i64) -> Self {
        self.pending_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_qr_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.qr_session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn pending_ttl_seconds(&self) -> i64 {
        self.pending_ttl_seconds
    }

    #[must_use]
    pub fn qr_session_ttl_seconds(&self) -> i64 {
        self.qr_session_ttl_seconds
    }

    pub(super) fn qr_setup_ttl_seconds(&self) -> i64 {
        self.qr_setup_ttl_seconds
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn Store>,
    totp: TotpService,
    hasher: SecretHasher,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn Store>,
        totp: TotpService,
        hasher: SecretHasher,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            store,
            totp,
            hasher,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(super) fn totp(&self) -> &TotpService {
        &self.totp
    }

    pub(super) fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
