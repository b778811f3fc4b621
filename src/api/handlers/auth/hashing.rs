//! Argon2id hashing for passwords and backup codes.
//!
//! An optional server-side pepper is mixed in as the Argon2 secret. Changing
//! the pepper invalidates every stored hash.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SecretHasher {
    pepper: Option<Arc<[u8]>>,
    params: Params,
    /// Hash of a throwaway value, verified against when no user matched.
    decoy: Arc<OnceCell<String>>,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SecretHasher {
    #[must_use]
    pub fn new(pepper: Option<Vec<u8>>) -> Self {
        Self {
            pepper: pepper.filter(|p| !p.is_empty()).map(Arc::from),
            params: Params::default(),
            decoy: Arc::new(OnceCell::new()),
        }
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper.as_ref(),
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|_| anyhow!("failed to initialize Argon2id")),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }

    /// PHC string for `secret` with a fresh salt.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(self
            .argon2()?
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash secret"))?
            .to_string())
    }

    /// Check `secret` against a stored PHC string. Malformed hashes never match.
    #[must_use]
    pub fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        self.argon2()
            .is_ok_and(|argon2| argon2.verify_password(secret.as_bytes(), &parsed).is_ok())
    }

    /// Spend the same work as a real verification when the account is unknown,
    /// so response timing does not reveal which emails exist.
    pub fn verify_decoy(&self, secret: &str) {
        if let Ok(decoy) = self.decoy.get_or_try_init(|| self.hash("leadgate-decoy")) {
            let _ = self.verify(secret, decoy);
        }
    }

    /// [`Self::verify`] on the blocking pool. `None` runs the decoy and fails.
    pub async fn verify_offloaded(&self, secret: &str, stored_hash: Option<&str>) -> bool {
        let hasher = self.clone();
        let secret = secret.to_string();
        let stored_hash = stored_hash.map(str::to_string);
        tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => hasher.verify(&secret, &hash),
            None => {
                hasher.verify_decoy(&secret);
                false
            }
        })
        .await
        .unwrap_or(false)
    }

    /// First of `stored_hashes` that `secret` verifies against.
    pub async fn find_match_offloaded(
        &self,
        secret: &str,
        stored_hashes: Vec<String>,
    ) -> Option<String> {
        let hasher = self.clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || {
            stored_hashes
                .into_iter()
                .find(|hash| hasher.verify(&secret, hash))
        })
        .await
        .ok()
        .flatten()
    }

    /// [`Self::hash`] on the blocking pool.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn hash_offloaded(&self, secrets: Vec<String>) -> Result<Vec<String>> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || {
            secrets
                .iter()
                .map(|secret| hasher.hash(secret))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|err| anyhow!("hashing task failed: {err}"))?
    }

    /// Minimum-cost hasher so handler tests do not spend seconds in Argon2.
    #[cfg(test)]
    pub(crate) fn cheap(pepper: Option<Vec<u8>>) -> Self {
        let mut hasher = Self::new(pepper);
        if let Ok(params) = Params::new(256, 1, 1, None) {
            hasher.params = params;
        }
        hasher
    }
}
