//! reqwest implementation of [`AuthApi`] with envelope decoding.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{AuthApi, ClientError};
use crate::api::{
    envelope::Envelope,
    types::{
        CreateQrSessionRequest, LoginRequest, LoginResponse, QrSessionCreated,
        QrSessionStatusResponse, SessionGrant, VerifySecondFactorRequest,
    },
};
use crate::store::UserProfile;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpApi {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| ClientError::Validation(format!("invalid server URL: {err}")))?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|err| ClientError::Protocol(format!("invalid endpoint {path}: {err}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.client.request(method, self.endpoint(path)?))
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.request(Method::POST, path)?.json(body).send().await?;
        data(response).await
    }

    /// Profile of the session owner.
    ///
    /// # Errors
    /// Returns an error if the token is not a valid session.
    pub async fn me(&self, token: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .request(Method::GET, "/auth/me")?
            .bearer_auth(token)
            .send()
            .await?;
        data(response).await
    }

    /// Revoke a session token.
    ///
    /// # Errors
    /// Returns an error if the request fails or the server refuses it.
    pub async fn logout(&self, token: &str) -> Result<(), ClientError> {
        let response = self
            .request(Method::POST, "/auth/logout")?
            .bearer_auth(token)
            .send()
            .await?;
        envelope::<serde_json::Value>(response).await.map(|_| ())
    }
}

async fn envelope<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let body: Envelope<T> = serde_json::from_slice(&bytes).map_err(|err| {
        debug!(status = status.as_u16(), "undecodable response body: {err}");
        if status.is_success() {
            ClientError::Protocol(err.to_string())
        } else {
            ClientError::Rejected {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string(),
            }
        }
    })?;

    if status.is_success() && body.success {
        Ok(body)
    } else {
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message: body
                .message
                .unwrap_or_else(|| "Request failed".to_string()),
        })
    }
}

async fn data<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    envelope(response)
        .await?
        .data
        .ok_or_else(|| ClientError::Protocol("response without data".to_string()))
}

#[async_trait]
impl AuthApi for HttpApi {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        self.post(
            "/auth/login",
            &LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
        )
        .await
    }

    async fn verify_second_factor(
        &self,
        request: &VerifySecondFactorRequest,
    ) -> Result<SessionGrant, ClientError> {
        self.post("/auth/verify-2fa-login", request).await
    }

    async fn create_qr_session(
        &self,
        user_id: &str,
        pending_token: &str,
    ) -> Result<QrSessionCreated, ClientError> {
        self.post(
            "/qr-auth/create-session",
            &CreateQrSessionRequest {
                user_id: user_id.to_string(),
                pending_token: pending_token.to_string(),
            },
        )
        .await
    }

    async fn qr_session_status(
        &self,
        session_token: &str,
    ) -> Result<QrSessionStatusResponse, ClientError> {
        let path = format!("/qr-auth/session-status/{session_token}");
        let response = self.request(Method::GET, &path)?.send().await?;
        data(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QrSessionStatus;
    use anyhow::Result;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn profile() -> serde_json::Value {
        json!({
            "id": "9b2f8c1e-0000-4000-8000-000000000001",
            "email": "a@x.com",
            "fullName": "Alice",
            "role": "admin",
            "twoFactorEnabled": false,
            "qrAuthEnabled": true
        })
    }

    #[tokio::test]
    async fn login_decodes_second_factor_challenge() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({ "email": "a@x.com", "password": "secret1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "QR authentication required",
                "data": {
                    "requiresSecondFactor": true,
                    "userId": "u-1",
                    "mode": "qr",
                    "pendingToken": "pending-1"
                }
            })))
            .mount(&server)
            .await;

        let api = HttpApi::new(&server.uri(), "leadgate-test")?;
        let response = api.login("a@x.com", "secret1").await?;
        assert!(response.requires_second_factor);
        assert_eq!(response.user_id.as_deref(), Some("u-1"));
        assert_eq!(response.pending_token.as_deref(), Some("pending-1"));
        assert!(response.token.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn error_envelope_becomes_rejection() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/verify-2fa-login"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "message": "Invalid verification code"
            })))
            .mount(&server)
            .await;

        let api = HttpApi::new(&server.uri(), "leadgate-test")?;
        let result = api
            .verify_second_factor(&VerifySecondFactorRequest {
                user_id: "u-1".to_string(),
                pending_token: "p".to_string(),
                token: Some("123456".to_string()),
                backup_code: None,
            })
            .await;
        match result {
            Err(ClientError::Rejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid verification code");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn non_json_error_keeps_status() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qr-auth/session-status/abc"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let api = HttpApi::new(&server.uri(), "leadgate-test")?;
        let err = api.qr_session_status("abc").await.err();
        assert_eq!(err.and_then(|err| err.status()), Some(502));
        Ok(())
    }

    #[tokio::test]
    async fn status_poll_and_bearer_calls() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qr-auth/session-status/tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "status": "approved", "token": "session-1", "user": profile() }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer session-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "data": profile() })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header("authorization", "Bearer session-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "message": "Logged out" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpApi::new(&format!("{}/", server.uri()), "leadgate-test")?;
        let status = api.qr_session_status("tok").await?;
        assert_eq!(status.status, QrSessionStatus::Approved);
        assert_eq!(status.token.as_deref(), Some("session-1"));

        let me = api.me("session-1").await?;
        assert_eq!(me.full_name, "Alice");
        api.logout("session-1").await?;
        Ok(())
    }

    #[test]
    fn invalid_base_url_is_a_validation_error() {
        assert!(matches!(
            HttpApi::new("not a url", "leadgate-test"),
            Err(ClientError::Validation(_))
        ));
    }
}
