//! Client side of the login approval flow.
//!
//! Flow Overview:
//! 1) [`flow::LoginFlow`] validates the credentials locally and calls
//!    `POST /auth/login`.
//! 2) A second-factor challenge moves the flow to `AwaitingTotp` or
//!    `AwaitingQr`, holding the pending-auth marker.
//! 3) TOTP: [`code_input::CodeInput`] filters keystrokes and yields a code once
//!    it is complete; the flow submits it.
//!    QR: [`qr_poller::QrPoller`] creates an approval session and polls it until
//!    it is approved, rejected, or the countdown runs out.
//! 4) Success replaces the marker with a [`Session`].
//!
//! The HTTP transport sits behind [`AuthApi`] so the state machines can be
//! driven by a fake in tests.

pub mod code_input;
pub mod flow;
pub mod http;
pub mod qr_poller;
#[cfg(test)]
mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    api::types::{
        LoginResponse, QrSessionCreated, QrSessionStatusResponse, SessionGrant,
        VerifySecondFactorRequest,
    },
    store::UserProfile,
};

pub use code_input::{CodeInput, CodeMode, SecondFactorCode};
pub use flow::{FlowState, LoginFlow, PendingAuth};
pub use http::HttpApi;
pub use qr_poller::{PollerConfig, QrOutcome, QrPhase, QrPoller};

/// Failure classes of the login flow.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Rejected locally before any request was sent.
    #[error("{0}")]
    Validation(String),
    /// The server answered with an error envelope.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl ClientError {
    /// HTTP status of a server rejection.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The pending token is gone; the user has to enter credentials again.
    #[must_use]
    pub fn requires_restart(&self) -> bool {
        self.status() == Some(401)
    }
}

/// An authenticated session. Only ever held by the `Verified` flow state.
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Option<UserProfile>,
}

impl From<SessionGrant> for Session {
    fn from(grant: SessionGrant) -> Self {
        Self {
            token: grant.token,
            expires_at: Some(grant.expires_at),
            user: Some(grant.user),
        }
    }
}

/// Backend calls used by the login flow.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError>;

    async fn verify_second_factor(
        &self,
        request: &VerifySecondFactorRequest,
    ) -> Result<SessionGrant, ClientError>;

    async fn create_qr_session(
        &self,
        user_id: &str,
        pending_token: &str,
    ) -> Result<QrSessionCreated, ClientError>;

    async fn qr_session_status(
        &self,
        session_token: &str,
    ) -> Result<QrSessionStatusResponse, ClientError>;
}
