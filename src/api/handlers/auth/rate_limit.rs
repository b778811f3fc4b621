//! Rate limiting primitives for auth flows.
//!
//! [`WindowRateLimiter`] keeps fixed windows in process memory, so limits are
//! per instance. Deployments behind several replicas should front the service
//! with a shared limiter instead.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RateLimitAction {
    Login,
    VerifySecondFactor,
    QrSession,
    QrApproval,
    RegisterDevice,
}

impl RateLimitAction {
    /// Attempts allowed per window and the window length.
    #[must_use]
    pub fn quota(self) -> (u32, Duration) {
        match self {
            Self::Login | Self::VerifySecondFactor => (10, Duration::from_secs(15 * 60)),
            Self::QrSession | Self::QrApproval => (20, Duration::from_secs(15 * 60)),
            Self::RegisterDevice => (5, Duration::from_secs(60 * 60)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Debug, Default)]
pub struct WindowRateLimiter {
    windows: Mutex<HashMap<(RateLimitAction, String), Window>>,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn hit(&self, key: String, action: RateLimitAction, now: Instant) -> RateLimitDecision {
        let (limit, _) = action.quota();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop stale windows so the map does not grow with every client ever seen.
        windows.retain(|(kind, _), window| now.duration_since(window.started) < kind.quota().1);

        let window = windows.entry((action, key)).or_insert(Window {
            started: now,
            hits: 0,
        });
        if window.hits >= limit {
            return RateLimitDecision::Limited;
        }
        window.hits += 1;
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Requests without a resolvable address share one bucket.
        let key = ip.unwrap_or("unknown").to_string();
        self.hit(key, action, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn window_limiter_blocks_after_quota() {
        let limiter = WindowRateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert_eq!(
                limiter.hit("10.0.0.1".into(), RateLimitAction::RegisterDevice, now),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.hit("10.0.0.1".into(), RateLimitAction::RegisterDevice, now),
            RateLimitDecision::Limited
        );
        // Other addresses and actions keep their own buckets.
        assert_eq!(
            limiter.hit("10.0.0.2".into(), RateLimitAction::RegisterDevice, now),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.hit("10.0.0.1".into(), RateLimitAction::Login, now),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn window_resets_after_its_length() {
        let limiter = WindowRateLimiter::new();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.hit("ip".into(), RateLimitAction::RegisterDevice, start);
        }
        let later = start + Duration::from_secs(60 * 60 + 1);
        assert_eq!(
            limiter.hit("ip".into(), RateLimitAction::RegisterDevice, later),
            RateLimitDecision::Allowed
        );
    }
}
