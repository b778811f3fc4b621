//! Time-based one-time passwords for the second login factor.
//!
//! Codes are SHA-1, 6 digits, 30 second steps. Verification accepts two steps
//! of clock skew either side, so a code stays valid for about a minute after
//! it rolls over. Secrets are generated here, shown to the user once as an
//! `otpauth://` URL, and persisted only in encrypted form (see [`crypto`]).

pub mod crypto;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use secrecy::{ExposeSecret, SecretBox};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

pub const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 2;
const TOTP_STEP_SECONDS: u64 = 30;
pub const DEFAULT_ISSUER: &str = "Lead Management Platform";

/// Material returned when a user starts TOTP setup.
#[derive(Debug)]
pub struct Enrollment {
    pub secret_base32: String,
    pub otpauth_url: String,
    pub encrypted_secret: Vec<u8>,
}

#[derive(Clone)]
pub struct TotpService {
    key: Arc<SecretBox<[u8; 32]>>,
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(key: [u8; 32], issuer: String) -> Self {
        Self {
            key: Arc::new(SecretBox::new(Box::new(key))),
            issuer,
        }
    }

    /// Build from a base64 encoded 32-byte key.
    ///
    /// # Errors
    /// Returns an error if the key is not valid base64 or not 32 bytes long.
    pub fn from_base64_key(encoded: &str, issuer: String) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("TOTP encryption key is not valid base64")?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("TOTP encryption key must be 32 bytes"))?;
        Ok(Self::new(key, issuer))
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Generate a fresh secret for `user_id` and encrypt it for storage.
    ///
    /// # Errors
    /// Returns an error if secret generation or encryption fails.
    pub fn enroll(&self, user_id: Uuid, email: &str) -> Result<Enrollment> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;

        let totp = self.build(secret_bytes.clone(), email)?;
        let encrypted_secret =
            crypto::encrypt_secret(self.key.expose_secret(), &secret_bytes, user_id)?;

        Ok(Enrollment {
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            encrypted_secret,
        })
    }

    /// Check `code` against the stored secret at the current time.
    ///
    /// Malformed codes are simply invalid. Errors are reserved for secrets
    /// that cannot be decrypted, which callers must treat as a hard failure.
    ///
    /// # Errors
    /// Returns an error if the stored secret cannot be decrypted.
    pub fn verify(&self, user_id: Uuid, encrypted_secret: &[u8], code: &str) -> Result<bool> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_secs();
        self.verify_at(user_id, encrypted_secret, code, now)
    }

    /// Check `code` at an explicit unix time.
    ///
    /// # Errors
    /// Returns an error if the stored secret cannot be decrypted.
    pub fn verify_at(
        &self,
        user_id: Uuid,
        encrypted_secret: &[u8],
        code: &str,
        unix_time: u64,
    ) -> Result<bool> {
        if !is_totp_code(code) {
            return Ok(false);
        }
        let totp = self.decrypt(user_id, encrypted_secret)?;
        Ok(totp.check(code, unix_time))
    }

    /// Code for the stored secret at `unix_time`.
    ///
    /// # Errors
    /// Returns an error if the stored secret cannot be decrypted.
    pub fn generate_at(
        &self,
        user_id: Uuid,
        encrypted_secret: &[u8],
        unix_time: u64,
    ) -> Result<String> {
        Ok(self.decrypt(user_id, encrypted_secret)?.generate(unix_time))
    }

    fn decrypt(&self, user_id: Uuid, encrypted_secret: &[u8]) -> Result<TOTP> {
        let secret_bytes =
            crypto::decrypt_secret(self.key.expose_secret(), encrypted_secret, user_id)?;
        // Account label does not participate in verification.
        self.build(secret_bytes, "user")
    }

    fn build(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

/// Six ASCII digits.
#[must_use]
pub fn is_totp_code(code: &str) -> bool {
    code.len() == TOTP_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000;

    fn service() -> TotpService {
        TotpService::new([9u8; 32], DEFAULT_ISSUER.to_string())
    }

    #[test]
    fn enrollment_produces_otpauth_url() {
        let enrollment = service().enroll(Uuid::new_v4(), "a@x.com").unwrap();
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains(&enrollment.secret_base32));
        assert!(!enrollment.encrypted_secret.is_empty());
    }

    #[test]
    fn generated_code_verifies_within_skew() {
        let service = service();
        let user_id = Uuid::new_v4();
        let enrollment = service.enroll(user_id, "a@x.com").unwrap();

        let code = service
            .generate_at(user_id, &enrollment.encrypted_secret, T0)
            .unwrap();
        assert!(service
            .verify_at(user_id, &enrollment.encrypted_secret, &code, T0)
            .unwrap());
        assert!(service
            .verify_at(user_id, &enrollment.encrypted_secret, &code, T0 + 60)
            .unwrap());
        assert!(!service
            .verify_at(user_id, &enrollment.encrypted_secret, &code, T0 + 600)
            .unwrap());
    }

    #[test]
    fn malformed_codes_are_invalid_not_errors() {
        let service = service();
        let user_id = Uuid::new_v4();
        let enrollment = service.enroll(user_id, "a@x.com").unwrap();
        for code in ["", "12345", "1234567", "12a456"] {
            assert!(!service
                .verify_at(user_id, &enrollment.encrypted_secret, code, T0)
                .unwrap());
        }
    }

    #[test]
    fn undecryptable_secret_is_an_error() {
        let service = service();
        let enrollment = service.enroll(Uuid::new_v4(), "a@x.com").unwrap();
        assert!(service
            .verify_at(Uuid::new_v4(), &enrollment.encrypted_secret, "123456", T0)
            .is_err());
    }

    #[test]
    fn key_must_be_32_bytes_of_base64() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(TotpService::from_base64_key(&short, DEFAULT_ISSUER.into()).is_err());
        assert!(TotpService::from_base64_key("not base64!", DEFAULT_ISSUER.into()).is_err());

        let ok = base64::engine::general_purpose::STANDARD.encode([1u8; 32]);
        assert!(TotpService::from_base64_key(&ok, DEFAULT_ISSUER.into()).is_ok());
    }
}
