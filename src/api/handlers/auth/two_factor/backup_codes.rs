//! Backup code generation and normalization.
//!
//! A batch holds ten codes of eight uppercase hex characters. Only Argon2id
//! hashes are stored; the plaintext is shown once when the batch is issued and
//! each code is deleted from storage on first successful use.

use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use crate::api::{envelope::ApiError, handlers::auth::state::AuthState};

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LEN: usize = 8;

/// Fresh plaintext codes.
#[must_use]
pub fn generate_backup_codes() -> Vec<String> {
    generate_with_rng(&mut OsRng)
}

fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Vec<String> {
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut raw = [0u8; BACKUP_CODE_LEN / 2];
            rng.fill_bytes(&mut raw);
            hex::encode_upper(raw)
        })
        .collect()
}

/// Canonical form of user input, or `None` if it cannot be a backup code.
///
/// Separators and case are ignored so `a1b2-c3d4` matches `A1B2C3D4`.
#[must_use]
pub fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    (normalized.len() == BACKUP_CODE_LEN && normalized.chars().all(|ch| ch.is_ascii_hexdigit()))
        .then_some(normalized)
}

/// Generate, hash and store a new batch, replacing any previous one.
/// Returns the plaintext codes for one-time display.
pub(in crate::api::handlers::auth) async fn issue_batch(
    state: &AuthState,
    user_id: Uuid,
) -> Result<Vec<String>, ApiError> {
    let codes = generate_backup_codes();
    let hashes = state
        .hasher()
        .hash_offloaded(codes.clone())
        .await
        .map_err(|err| ApiError::internal("Server error", err))?;
    state.store().replace_backup_codes(user_id, &hashes).await?;
    Ok(codes)
}
