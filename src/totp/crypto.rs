//! At-rest encryption for TOTP secrets.

use anyhow::{anyhow, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

const NONCE_LEN: usize = 12;

/// Encrypts a TOTP secret bound to its owner.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
#[allow(deprecated)]
pub fn encrypt_secret(key: &[u8; 32], secret: &[u8], user_id: Uuid) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(user_id);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: secret,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypts a secret produced by [`encrypt_secret`] for the same user.
///
/// # Errors
/// Returns an error if the data is truncated, tampered with, or belongs to another user.
#[allow(deprecated)]
pub fn decrypt_secret(key: &[u8; 32], data: &[u8], user_id: Uuid) -> Result<Vec<u8>> {
    if data.len() <= NONCE_LEN {
        return Err(anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let aad = construct_aad(user_id);

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow!("Decryption failure: {e}"))
}

fn construct_aad(user_id: Uuid) -> Vec<u8> {
    format!("totp-secret:v1|{user_id}").into_bytes()
}
