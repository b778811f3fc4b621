//! Scripted [`AuthApi`] used by the flow and poller tests.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration as StdDuration,
};

use super::{AuthApi, ClientError};
use crate::{
    api::types::{
        LoginResponse, QrSessionCreated, QrSessionStatusResponse, SecondFactorMode, SessionGrant,
        VerifySecondFactorRequest,
    },
    store::{QrSessionStatus, Role, User, UserProfile},
};

pub(crate) const PASSWORD: &str = "secret1";
pub(crate) const VALID_TOTP: &str = "123456";
pub(crate) const PENDING_TOKEN: &str = "pending-1";

pub(crate) struct FakeApi {
    mode: Option<SecondFactorMode>,
    backup_codes: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<Result<QrSessionStatus, ClientError>>>,
    fail_create: bool,
    status_delay: Option<StdDuration>,
    pub(crate) login_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeApi {
    pub(crate) fn new(mode: Option<SecondFactorMode>) -> Self {
        Self {
            mode,
            backup_codes: Mutex::new(vec!["A1B2C3D4".to_string()]),
            statuses: Mutex::new(VecDeque::new()),
            fail_create: false,
            status_delay: None,
            login_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Responses for successive status polls; `pending` once exhausted.
    pub(crate) fn with_statuses(self, statuses: Vec<Result<QrSessionStatus, ClientError>>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Hold every status response for `delay`, like a hung server.
    pub(crate) fn with_status_delay(mut self, delay: StdDuration) -> Self {
        self.status_delay = Some(delay);
        self
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn profile() -> UserProfile {
    User::new(
        "a@x.com".to_string(),
        "Alice".to_string(),
        String::new(),
        Role::Admin,
    )
    .profile()
}

fn rejected(status: u16, message: &str) -> ClientError {
    ClientError::Rejected {
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl AuthApi for FakeApi {
    async fn login(&self, _email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if password != PASSWORD {
            return Err(rejected(401, "Invalid credentials"));
        }
        Ok(match self.mode {
            Some(mode) => LoginResponse {
                requires_second_factor: true,
                user_id: Some("user-1".to_string()),
                mode: Some(mode),
                pending_token: Some(PENDING_TOKEN.to_string()),
                ..LoginResponse::default()
            },
            None => LoginResponse {
                token: Some("session-direct".to_string()),
                user: Some(profile()),
                ..LoginResponse::default()
            },
        })
    }

    async fn verify_second_factor(
        &self,
        request: &VerifySecondFactorRequest,
    ) -> Result<SessionGrant, ClientError> {
        if request.pending_token != PENDING_TOKEN {
            return Err(rejected(
                401,
                "Verification session expired. Please log in again.",
            ));
        }
        let accepted = match (&request.token, &request.backup_code) {
            (Some(token), None) => token == VALID_TOTP,
            (None, Some(code)) => {
                let mut codes = self.backup_codes.lock().unwrap();
                let before = codes.len();
                codes.retain(|stored| stored != code);
                codes.len() != before
            }
            _ => false,
        };
        if !accepted {
            return Err(rejected(400, "Invalid verification code"));
        }
        Ok(SessionGrant {
            token: "session-2fa".to_string(),
            expires_at: Utc::now() + Duration::days(7),
            user: profile(),
        })
    }

    async fn create_qr_session(
        &self,
        _user_id: &str,
        pending_token: &str,
    ) -> Result<QrSessionCreated, ClientError> {
        if self.fail_create {
            return Err(rejected(500, "Server error"));
        }
        if pending_token != PENDING_TOKEN {
            return Err(rejected(401, "Verification session expired. Please log in again."));
        }
        Ok(QrSessionCreated {
            session_token: "ab".repeat(32),
            qr_url: format!("https://crm.example.com/qr-approve/{}", "ab".repeat(32)),
            expires_at: Utc::now() + Duration::seconds(300),
        })
    }

    async fn qr_session_status(
        &self,
        _session_token: &str,
    ) -> Result<QrSessionStatusResponse, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.status_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(QrSessionStatus::Pending))?;
        let approved = next == QrSessionStatus::Approved;
        Ok(QrSessionStatusResponse {
            status: next,
            expires_at: None,
            token: approved.then(|| "session-qr".to_string()),
            user: approved.then(profile),
            message: None,
        })
    }
}
