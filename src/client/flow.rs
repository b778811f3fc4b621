//! Second-factor selector state machine.
//!
//! `Idle -> AwaitingTotp | AwaitingQr -> Verified | Failed`, and back to `Idle`
//! on cancellation. The pending-auth marker lives only inside the awaiting and
//! failed states; `Verified` carries the session alone, so the two can never
//! be held at the same time.

use std::sync::Arc;
use tracing::{debug, info};

use super::{
    code_input::SecondFactorCode,
    qr_poller::{QrOutcome, QrPoller},
    AuthApi, ClientError, Session,
};
use crate::api::{
    handlers::auth::{normalize_email, valid_email, PASSWORD_MIN_LEN},
    types::{SecondFactorMode, VerifySecondFactorRequest},
};

/// Marker for a login that passed the password check and still needs a
/// second factor.
#[derive(Clone, Debug)]
pub struct PendingAuth {
    pub user_id: String,
    /// Factor configured for the account.
    pub mode: SecondFactorMode,
    pending_token: String,
}

impl PendingAuth {
    #[must_use]
    pub fn new(user_id: String, mode: SecondFactorMode, pending_token: String) -> Self {
        Self {
            user_id,
            mode,
            pending_token,
        }
    }

    #[must_use]
    pub fn pending_token(&self) -> &str {
        &self.pending_token
    }
}

#[derive(Clone, Debug)]
pub enum FlowState {
    Idle,
    AwaitingTotp(PendingAuth),
    AwaitingQr(PendingAuth),
    Verified(Session),
    /// A retryable failure; the marker is kept so the user can try again.
    Failed {
        pending: PendingAuth,
        reason: String,
    },
}

impl FlowState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingTotp(_) => "awaiting_totp",
            Self::AwaitingQr(_) => "awaiting_qr",
            Self::Verified(_) => "verified",
            Self::Failed { .. } => "failed",
        }
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingAuth> {
        match self {
            Self::AwaitingTotp(pending)
            | Self::AwaitingQr(pending)
            | Self::Failed { pending, .. } => Some(pending),
            Self::Idle | Self::Verified(_) => None,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Verified(session) => Some(session),
            _ => None,
        }
    }
}

/// Client-side checks run before the credential request.
///
/// # Errors
/// Returns `ClientError::Validation` with a user-facing message.
pub fn validate_credentials(email: &str, password: &str) -> Result<String, ClientError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ClientError::Validation("Email is required".to_string()));
    }
    if !valid_email(&email) {
        return Err(ClientError::Validation(
            "Please enter a valid email address".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(ClientError::Validation("Password is required".to_string()));
    }
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(ClientError::Validation(format!(
            "Password must be at least {PASSWORD_MIN_LEN} characters"
        )));
    }
    Ok(email)
}

pub struct LoginFlow {
    api: Arc<dyn AuthApi>,
    state: FlowState,
}

impl LoginFlow {
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>) -> Self {
        Self {
            api,
            state: FlowState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> &FlowState {
        &self.state
    }

    #[must_use]
    pub fn api(&self) -> Arc<dyn AuthApi> {
        self.api.clone()
    }

    /// Run the credential check. Starting over discards any previous marker.
    ///
    /// # Errors
    /// Validation errors are returned before any request; server and transport
    /// errors leave the flow in `Idle`.
    pub async fn submit_credentials(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<&FlowState, ClientError> {
        self.state = FlowState::Idle;
        let email = validate_credentials(email, password)?;
        let response = self.api.login(&email, password).await?;

        self.state = if response.requires_second_factor {
            let (Some(user_id), Some(pending_token)) = (response.user_id, response.pending_token)
            else {
                return Err(ClientError::Protocol(
                    "second factor required without a pending token".to_string(),
                ));
            };
            let mode = response.mode.unwrap_or(SecondFactorMode::Totp);
            debug!(?mode, "second factor required");
            let pending = PendingAuth::new(user_id, mode, pending_token);
            match mode {
                SecondFactorMode::Totp => FlowState::AwaitingTotp(pending),
                SecondFactorMode::Qr => FlowState::AwaitingQr(pending),
            }
        } else {
            let Some(token) = response.token else {
                return Err(ClientError::Protocol("login without a token".to_string()));
            };
            FlowState::Verified(Session {
                token,
                expires_at: response.expires_at,
                user: response.user,
            })
        };
        Ok(&self.state)
    }

    /// Submit a TOTP or backup code.
    ///
    /// A rejected code moves the flow to `Failed` and keeps the marker; an
    /// expired pending token sends it back to `Idle`.
    ///
    /// # Errors
    /// Returns the server or transport error that caused the failure.
    pub async fn submit_code(&mut self, code: SecondFactorCode) -> Result<Session, ClientError> {
        let pending = match &self.state {
            FlowState::AwaitingTotp(pending) | FlowState::Failed { pending, .. } => pending.clone(),
            _ => {
                return Err(ClientError::Validation(
                    "No code verification in progress".to_string(),
                ))
            }
        };
        let (token, backup_code) = match code {
            SecondFactorCode::Totp(code) => (Some(code), None),
            SecondFactorCode::Backup(code) => (None, Some(code)),
        };
        let request = VerifySecondFactorRequest {
            user_id: pending.user_id.clone(),
            pending_token: pending.pending_token.clone(),
            token,
            backup_code,
        };

        match self.api.verify_second_factor(&request).await {
            Ok(grant) => {
                let session = Session::from(grant);
                info!("second factor accepted");
                self.state = FlowState::Verified(session.clone());
                Ok(session)
            }
            Err(err) if err.requires_restart() => {
                self.state = FlowState::Idle;
                Err(err)
            }
            Err(err) => {
                self.state = FlowState::Failed {
                    pending,
                    reason: err.to_string(),
                };
                Err(err)
            }
        }
    }

    /// Manual fall-back from code entry to the QR dialog.
    ///
    /// # Errors
    /// Returns an error when no second factor is pending.
    pub fn use_qr(&mut self) -> Result<(), ClientError> {
        let pending = self.take_pending()?;
        self.state = FlowState::AwaitingQr(pending);
        Ok(())
    }

    /// Manual fall-back from the QR dialog to code entry.
    ///
    /// # Errors
    /// Returns an error when no second factor is pending.
    pub fn use_code(&mut self) -> Result<(), ClientError> {
        let pending = self.take_pending()?;
        self.state = FlowState::AwaitingTotp(pending);
        Ok(())
    }

    fn take_pending(&self) -> Result<PendingAuth, ClientError> {
        self.state
            .pending()
            .cloned()
            .ok_or_else(|| ClientError::Validation("No second factor pending".to_string()))
    }

    /// Run the QR dialog to completion and apply its outcome.
    ///
    /// # Errors
    /// Returns an error when the flow is not waiting on a QR approval.
    pub async fn run_qr(&mut self, poller: &QrPoller) -> Result<&FlowState, ClientError> {
        let FlowState::AwaitingQr(pending) = &self.state else {
            return Err(ClientError::Validation(
                "No QR approval in progress".to_string(),
            ));
        };
        let pending = pending.clone();
        let outcome = poller.run(&pending).await;
        self.apply_qr_outcome(pending, outcome);
        Ok(&self.state)
    }

    fn apply_qr_outcome(&mut self, pending: PendingAuth, outcome: QrOutcome) {
        self.state = match outcome {
            QrOutcome::Approved(session) => FlowState::Verified(session),
            QrOutcome::Error(err) if err.requires_restart() => FlowState::Idle,
            outcome => FlowState::Failed {
                pending,
                reason: outcome.describe(),
            },
        };
    }

    /// Close the dialog: drop the marker and return to the credential form.
    /// Nothing is sent to the server.
    pub fn cancel(&mut self) {
        if self.state.pending().is_some() {
            debug!(from = self.state.name(), "login cancelled");
        }
        self.state = FlowState::Idle;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::{
        qr_poller::PollerConfig,
        testing::{FakeApi, PASSWORD, VALID_TOTP},
    };
    use crate::store::QrSessionStatus;
    use std::sync::atomic::Ordering;

    fn flow(mode: Option<SecondFactorMode>) -> (LoginFlow, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::new(mode));
        (LoginFlow::new(api.clone()), api)
    }

    #[tokio::test]
    async fn no_second_factor_goes_straight_to_verified() {
        let (mut flow, _) = flow(None);
        let state = flow.submit_credentials("A@X.com", PASSWORD).await.unwrap();
        assert_eq!(state.name(), "verified");
        assert!(state.pending().is_none());
        assert_eq!(
            flow.state().session().map(|s| s.token.as_str()),
            Some("session-direct")
        );
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_server() {
        let (mut flow, api) = flow(None);
        for (email, password) in [
            ("", PASSWORD),
            ("not-an-email", PASSWORD),
            ("a@x.com", ""),
            ("a@x.com", "12345"),
        ] {
            let err = flow.submit_credentials(email, password).await.err();
            assert!(matches!(err, Some(ClientError::Validation(_))), "{email}");
        }
        assert_eq!(api.login_calls.load(Ordering::SeqCst), 0);
        assert_eq!(flow.state().name(), "idle");
    }

    #[tokio::test]
    async fn wrong_password_stays_idle() {
        let (mut flow, _) = flow(Some(SecondFactorMode::Totp));
        let err = flow.submit_credentials("a@x.com", "secret2").await.err();
        assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("Invalid credentials"));
        assert_eq!(flow.state().name(), "idle");
    }

    #[tokio::test]
    async fn totp_failure_is_retryable() {
        let (mut flow, _) = flow(Some(SecondFactorMode::Totp));
        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        assert_eq!(flow.state().name(), "awaiting_totp");

        let err = flow
            .submit_code(SecondFactorCode::Totp("000000".to_string()))
            .await
            .err();
        assert!(err.is_some());
        assert_eq!(flow.state().name(), "failed");
        assert_eq!(
            flow.state().pending().map(|p| p.user_id.as_str()),
            Some("user-1")
        );

        let session = flow
            .submit_code(SecondFactorCode::Totp(VALID_TOTP.to_string()))
            .await
            .unwrap();
        assert_eq!(session.token, "session-2fa");
        assert!(flow.state().pending().is_none());
    }

    #[tokio::test]
    async fn reused_backup_code_fails_like_a_wrong_code() {
        let (mut flow, _) = flow(Some(SecondFactorMode::Totp));
        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        flow.submit_code(SecondFactorCode::Backup("A1B2C3D4".to_string()))
            .await
            .unwrap();

        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        let reused = flow
            .submit_code(SecondFactorCode::Backup("A1B2C3D4".to_string()))
            .await
            .err()
            .map(|e| e.to_string());
        let wrong = flow
            .submit_code(SecondFactorCode::Totp("000000".to_string()))
            .await
            .err()
            .map(|e| e.to_string());
        assert_eq!(reused, wrong);
        assert_eq!(flow.state().name(), "failed");
    }

    #[tokio::test]
    async fn cancel_from_any_state_returns_to_idle() {
        let (mut flow, _) = flow(Some(SecondFactorMode::Qr));
        flow.cancel();
        assert_eq!(flow.state().name(), "idle");

        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        assert_eq!(flow.state().name(), "awaiting_qr");
        flow.cancel();
        assert!(flow.state().pending().is_none());

        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        flow.use_code().unwrap();
        let _ = flow
            .submit_code(SecondFactorCode::Totp("000000".to_string()))
            .await;
        assert_eq!(flow.state().name(), "failed");
        flow.cancel();
        assert_eq!(flow.state().name(), "idle");
    }

    #[tokio::test]
    async fn fallback_switches_between_dialogs_keeping_the_marker() {
        let (mut flow, _) = flow(Some(SecondFactorMode::Totp));
        assert!(flow.use_qr().is_err());

        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        flow.use_qr().unwrap();
        assert_eq!(flow.state().name(), "awaiting_qr");
        assert_eq!(
            flow.state().pending().map(|p| p.mode),
            Some(SecondFactorMode::Totp)
        );
        flow.use_code().unwrap();
        assert_eq!(flow.state().name(), "awaiting_totp");
    }

    #[tokio::test]
    async fn code_submission_needs_a_pending_marker() {
        let (mut flow, _) = flow(None);
        let err = flow
            .submit_code(SecondFactorCode::Totp(VALID_TOTP.to_string()))
            .await
            .err();
        assert!(matches!(err, Some(ClientError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn qr_approval_verifies_the_flow() {
        let api = Arc::new(
            FakeApi::new(Some(SecondFactorMode::Qr)).with_statuses(vec![
                Ok(QrSessionStatus::Pending),
                Ok(QrSessionStatus::Approved),
            ]),
        );
        let mut flow = LoginFlow::new(api.clone());
        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();

        let poller = QrPoller::new(flow.api(), PollerConfig::default());
        let state = flow.run_qr(&poller).await.unwrap();
        assert_eq!(state.session().map(|s| s.token.as_str()), Some("session-qr"));
    }

    #[tokio::test(start_paused = true)]
    async fn qr_rejection_fails_the_flow_with_marker() {
        let api = Arc::new(
            FakeApi::new(Some(SecondFactorMode::Qr))
                .with_statuses(vec![Ok(QrSessionStatus::Rejected)]),
        );
        let mut flow = LoginFlow::new(api);
        flow.submit_credentials("a@x.com", PASSWORD).await.unwrap();
        let poller = QrPoller::new(flow.api(), PollerConfig::default());
        let state = flow.run_qr(&poller).await.unwrap();
        match state {
            FlowState::Failed { reason, pending } => {
                assert_eq!(reason, "Login was rejected");
                assert_eq!(pending.mode, SecondFactorMode::Qr);
            }
            other => panic!("unexpected state {}", other.name()),
        }
    }
}
